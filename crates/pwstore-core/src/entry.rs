//! Password entry codec.
//!
//! A decrypted entry is UTF-8 text. The first line is the password; every
//! following line is free-form extra content, usually `key: value` pairs.
//! Parsing never fails and serializing gives back the exact input.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Line prefixes that carry the username, matched case-insensitively.
pub const USERNAME_KEYS: [&str; 2] = ["username:", "login:"];

/// A decrypted password entry.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordEntry {
    password: String,
    /// Everything after the first newline. `None` when the payload had none.
    extra: Option<String>,
    username: Option<String>,
}

/// One line of the extra content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraLine<'a> {
    /// A `key: value` line. Keys may contain spaces (`Security question`)
    /// and are trimmed. `line` is the untouched original text.
    Field {
        key: &'a str,
        value: &'a str,
        line: &'a str,
    },
    /// Anything else, including blank lines.
    Raw(&'a str),
}

impl<'a> ExtraLine<'a> {
    fn parse(line: &'a str) -> Self {
        let Some((key, rest)) = line.split_once(':') else {
            return Self::Raw(line);
        };
        let key = key.trim();
        // `scheme://host` is a URL, not a field
        if key.is_empty() || rest.starts_with("//") {
            return Self::Raw(line);
        }
        Self::Field {
            key,
            value: rest.trim_start(),
            line,
        }
    }

    /// The original text of the line.
    pub fn as_str(&self) -> &'a str {
        match *self {
            Self::Field { line, .. } | Self::Raw(line) => line,
        }
    }
}

impl PasswordEntry {
    /// Parse a decrypted payload.
    ///
    /// Invalid UTF-8 is replaced rather than rejected, so any input yields an
    /// entry.
    pub fn parse(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::from_text(text),
            Err(e) => {
                tracing::warn!(
                    "Decrypted entry is not valid UTF-8 (first bad byte at {}), replacing invalid sequences",
                    e.valid_up_to()
                );
                Self::from_text(&String::from_utf8_lossy(bytes))
            }
        }
    }

    /// Parse entry text.
    pub fn from_text(text: &str) -> Self {
        let (password, extra) = match text.split_once('\n') {
            Some((password, rest)) => (password.to_owned(), Some(rest.to_owned())),
            None => (text.to_owned(), None),
        };
        let username = extra
            .as_deref()
            .and_then(username_line)
            .map(|(_, value)| value.to_owned());

        Self {
            password,
            extra,
            username,
        }
    }

    /// Build an entry from a password and the extra content that follows it.
    pub fn new(password: &str, extra_content: &str) -> Self {
        if extra_content.is_empty() {
            Self::from_text(password)
        } else {
            Self::from_text(&format!("{password}\n{extra_content}"))
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn has_username(&self) -> bool {
        self.username.is_some()
    }

    pub fn has_extra_content(&self) -> bool {
        !self.extra_content().is_empty()
    }

    /// All lines after the password, username line included.
    pub fn extra_content(&self) -> &str {
        self.extra.as_deref().unwrap_or_default()
    }

    /// The extra content with the first username line removed.
    pub fn extra_content_without_username(&self) -> String {
        let extra = self.extra_content();
        match username_line(extra) {
            Some((index, _)) => extra
                .split('\n')
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, line)| line)
                .collect::<Vec<_>>()
                .join("\n"),
            None => extra.to_owned(),
        }
    }

    /// The extra content line by line, in original order.
    pub fn extra_lines(&self) -> impl Iterator<Item = ExtraLine<'_>> {
        self.extra
            .as_deref()
            .into_iter()
            .flat_map(|extra| extra.split('\n'))
            .map(ExtraLine::parse)
    }

    /// Value of the first field named `key` (case-insensitive).
    pub fn field(&self, key: &str) -> Option<&str> {
        self.extra_lines().find_map(|line| match line {
            ExtraLine::Field { key: k, value, .. } if k.eq_ignore_ascii_case(key) => Some(value),
            _ => None,
        })
    }

    /// Serialize back to the exact bytes this entry was parsed from.
    pub fn serialize(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Serialize with the username line dropped from the extra content.
    ///
    /// Every other byte is kept, including the newline after the password
    /// and any trailing blank lines.
    pub fn serialize_without_username(&self) -> Vec<u8> {
        if !self.has_username() {
            return self.serialize();
        }
        format!("{}\n{}", self.password, self.extra_content_without_username()).into_bytes()
    }
}

impl fmt::Display for PasswordEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.password)?;
        if let Some(extra) = &self.extra {
            write!(f, "\n{extra}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PasswordEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordEntry")
            .field("password", &"<redacted>")
            .field("username", &self.username)
            .field("extra_lines", &self.extra_lines().count())
            .finish()
    }
}

impl FromStr for PasswordEntry {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_text(s))
    }
}

impl From<&[u8]> for PasswordEntry {
    fn from(bytes: &[u8]) -> Self {
        Self::parse(bytes)
    }
}

/// Index and value of the first username line in `extra`.
fn username_line(extra: &str) -> Option<(usize, &str)> {
    extra
        .split('\n')
        .enumerate()
        .find_map(|(i, line)| username_value(line).map(|value| (i, value)))
}

fn username_value(line: &str) -> Option<&str> {
    USERNAME_KEYS.iter().find_map(|key| {
        let prefix = line.get(..key.len())?;
        prefix
            .eq_ignore_ascii_case(key)
            .then(|| line[key.len()..].trim_start())
    })
}

/// Move a username from the file name into the extra content.
pub fn with_username_in_extras(username: &str, extras: &str) -> String {
    format!("username:{username}\n{extras}")
}

/// Pull the username out of the extra content.
///
/// Returns the username and the remaining extras, or `None` if the extras
/// carry no username line.
pub fn extract_username(extras: &str) -> Option<(String, String)> {
    let (index, value) = username_line(extras)?;
    let remaining = extras
        .split('\n')
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n");
    Some((value.to_owned(), remaining))
}

/// State of the "store username in the encrypted extras" switch when
/// creating an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsernameToggle {
    /// The switch can be flipped: exactly one of file name and extras holds
    /// the username.
    pub enabled: bool,
    /// The username currently lives in the extras.
    pub checked: bool,
}

impl UsernameToggle {
    pub fn evaluate(file_name: &str, extras: &str) -> Self {
        let in_file_name = !file_name.trim().is_empty();
        let in_extras = username_line(extras).is_some();
        Self {
            enabled: in_file_name ^ in_extras,
            checked: in_extras,
        }
    }
}
