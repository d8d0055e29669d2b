//! Preferences file handling.
//!
//! Reads from `~/.config/pwstore/pwstore.toml`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crypto::KeyId;

/// Clipboard timeout used when the configured value cannot be parsed.
pub const DEFAULT_CLEAR_AFTER_SECS: u64 = 45;

/// Raw clear-clipboard timeout as written in the preferences file.
///
/// Older files store the value as a string, so both forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClipboardTimeout {
    Seconds(i64),
    Text(String),
}

impl Default for ClipboardTimeout {
    fn default() -> Self {
        Self::Seconds(DEFAULT_CLEAR_AFTER_SECS as i64)
    }
}

impl ClipboardTimeout {
    /// Effective timeout in seconds. Unusable values fall back to the default.
    pub fn seconds(&self) -> u64 {
        let parsed = match self {
            Self::Seconds(secs) => u64::try_from(*secs).ok(),
            Self::Text(text) => text.trim().parse::<u64>().ok(),
        };
        parsed.unwrap_or_else(|| {
            tracing::warn!(
                "Invalid clipboard timeout {:?}, using {}s",
                self,
                DEFAULT_CLEAR_AFTER_SECS
            );
            DEFAULT_CLEAR_AFTER_SECS
        })
    }

    /// Delay before the clipboard is cleared, `None` when clearing is disabled.
    pub fn duration(&self) -> Option<Duration> {
        match self.seconds() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// User preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Root directory of the password store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// OpenPGP provider used for decryption. Empty means none chosen yet.
    #[serde(default = "default_openpgp_provider")]
    pub openpgp_provider: String,
    /// Seconds before a copied password is cleared; `0` keeps it.
    #[serde(default)]
    pub clear_clipboard_after: ClipboardTimeout,
    /// Whether the password is shown in clear after decryption.
    #[serde(default = "default_true")]
    pub show_password: bool,
    /// Whether extra content is shown in clear after decryption.
    #[serde(default = "default_true")]
    pub show_extra_content: bool,
    /// Whether the password is copied as soon as it is decrypted.
    #[serde(default = "default_true")]
    pub copy_on_decrypt: bool,
    /// Selected OpenPGP key ids, in decimal.
    #[serde(default)]
    pub openpgp_key_ids: BTreeSet<String>,
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".password-store")
}

fn default_openpgp_provider() -> String {
    "gpg".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            openpgp_provider: default_openpgp_provider(),
            clear_clipboard_after: ClipboardTimeout::default(),
            show_password: default_true(),
            show_extra_content: default_true(),
            copy_on_decrypt: default_true(),
            openpgp_key_ids: BTreeSet::new(),
        }
    }
}

impl Preferences {
    /// Read the user's preferences.
    ///
    /// An explicit `custom_path` must exist. Without one the file under
    /// [`Preferences::config_path`] is used, and written with defaults on
    /// first run. Use [`Preferences::load_from`] to read a known file as is.
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self> {
        let is_custom = custom_path.is_some();
        let config_path = match custom_path {
            Some(path) => path,
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            if is_custom {
                anyhow::bail!("Config file not found: {}", config_path.display());
            }
            let preferences = Preferences::default();
            preferences.save_to(&config_path)?;
            tracing::info!("Created default config at {}", config_path.display());
            return Ok(preferences);
        }

        Self::load_from(&config_path)
    }

    /// Load preferences from an existing file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let preferences: Preferences = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(preferences)
    }

    /// Save preferences to the default config file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save preferences to `path`, creating its directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Get the path to the default config file.
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("pwstore").join("pwstore.toml"))
    }

    /// Replace the selected key ids.
    pub fn set_key_ids(&mut self, ids: &[KeyId]) {
        self.openpgp_key_ids = ids.iter().map(|id| id.0.to_string()).collect();
    }

    /// Whether an OpenPGP provider has been chosen.
    pub fn has_provider(&self) -> bool {
        !self.openpgp_provider.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsable_timeout_falls_back_to_default() {
        let timeout = ClipboardTimeout::Text("abc".into());
        assert_eq!(timeout.seconds(), 45);
        assert_eq!(timeout.duration(), Some(Duration::from_secs(45)));
    }

    #[test]
    fn zero_timeout_disables_clearing() {
        assert_eq!(ClipboardTimeout::Text("0".into()).duration(), None);
        assert_eq!(ClipboardTimeout::Seconds(0).duration(), None);
    }

    #[test]
    fn negative_timeout_falls_back_to_default() {
        assert_eq!(ClipboardTimeout::Seconds(-5).seconds(), 45);
    }

    #[test]
    fn timeout_accepts_integers_and_strings() {
        let prefs: Preferences = toml::from_str("clear_clipboard_after = 10").expect("parse");
        assert_eq!(prefs.clear_clipboard_after.seconds(), 10);

        let prefs: Preferences = toml::from_str("clear_clipboard_after = \" 20 \"").expect("parse");
        assert_eq!(prefs.clear_clipboard_after.seconds(), 20);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let prefs: Preferences = toml::from_str("").expect("parse");
        assert_eq!(prefs, Preferences::default());
        assert!(prefs.show_password);
        assert!(prefs.copy_on_decrypt);
        assert_eq!(prefs.openpgp_provider, "gpg");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("pwstore.toml");

        let mut prefs = Preferences {
            show_extra_content: false,
            clear_clipboard_after: ClipboardTimeout::Seconds(0),
            ..Preferences::default()
        };
        prefs.set_key_ids(&[KeyId(42), KeyId(7)]);
        prefs.save_to(&path).expect("save");

        let loaded = Preferences::load(Some(path)).expect("load");
        assert_eq!(loaded, prefs);
        assert!(loaded.openpgp_key_ids.contains("42"));
    }

    #[test]
    fn missing_custom_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Preferences::load(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }
}
