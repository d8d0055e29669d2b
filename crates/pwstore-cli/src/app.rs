//! Application state and commands.

use anyhow::{Context, Result};
use pwstore_core::{
    CryptoSession, EntryLocation, PasswordEntry, PasswordStore, Preferences, SessionSettings,
};
use std::path::PathBuf;
use std::sync::Arc;

use crate::clipboard::SystemClipboard;
use crate::gpg::GpgService;
use crate::handlers::TerminalInteraction;

/// Shown in place of hidden secrets.
const MASK: &str = "********";

/// Main application model.
pub struct App {
    /// Loaded preferences.
    preferences: Preferences,
    /// Where preferences are saved back to.
    config_path: PathBuf,
}

impl App {
    pub fn new(preferences: Preferences, config_path: PathBuf) -> Self {
        Self {
            preferences,
            config_path,
        }
    }

    fn store(&self) -> Result<PasswordStore> {
        PasswordStore::open(&self.preferences.store_path)
    }

    /// Build a session against the configured OpenPGP provider.
    fn session(&self, settings: SessionSettings) -> Result<CryptoSession> {
        if !self.preferences.has_provider() {
            anyhow::bail!(
                "No OpenPGP provider configured, set `openpgp_provider` in {}",
                self.config_path.display()
            );
        }
        let service = Arc::new(GpgService::new(&self.preferences.openpgp_provider));
        let clipboard = Arc::new(SystemClipboard::default());
        Ok(CryptoSession::new(service, clipboard, settings))
    }

    /// Decrypt `name`, print it and keep the clipboard timer running until it
    /// fires or the user hits Ctrl-C.
    pub async fn show(&self, name: &str, clip: bool) -> Result<()> {
        let store = self.store()?;
        let ciphertext = store.read(name).await?;
        let location = store.location(name)?;

        let mut settings = SessionSettings::from(&self.preferences);
        settings.copy_on_decrypt |= clip;
        let session = self.session(settings)?;

        let Some(entry) = session
            .decrypt(ciphertext, &TerminalInteraction)
            .await
            .with_context(|| format!("Failed to decrypt {name}"))?
        else {
            eprintln!("Decryption cancelled");
            return Ok(());
        };

        print!("{}", self.render(&location, &entry));

        if !session.clipboard().is_active() {
            if settings.copy_on_decrypt && !entry.password().is_empty() {
                eprintln!("Password copied to clipboard, it will not be cleared automatically");
            }
            return Ok(());
        }

        if let Some(timeout) = settings.clear_after {
            eprintln!(
                "Password copied to clipboard, clearing in {}s (Ctrl-C clears now)",
                timeout.as_secs()
            );
        }
        tokio::select! {
            _ = session.clipboard().wait() => {}
            _ = tokio::signal::ctrl_c() => {
                session.clipboard().cancel(false)?;
                eprintln!("Clipboard cleared");
            }
        }
        Ok(())
    }

    /// Text shown for a decrypted entry.
    fn render(&self, location: &EntryLocation, entry: &PasswordEntry) -> String {
        let mut out = format!("{}{}\n", location.category, location.name);

        if !entry.password().is_empty() {
            let password = if self.preferences.show_password {
                entry.password()
            } else {
                MASK
            };
            out.push_str(&format!("Password: {password}\n"));
        }

        if let Some(username) = entry.username() {
            out.push_str(&format!("Username: {username}\n"));
        }

        if entry.has_extra_content() {
            if self.preferences.show_extra_content {
                out.push_str(&format!("\n{}\n", entry.extra_content()));
            } else {
                let lines = entry.extra_lines().count();
                out.push_str(&format!("\n{MASK} ({lines} hidden lines)\n"));
            }
        }
        out
    }

    /// Print every entry name in the store.
    pub fn list(&self) -> Result<()> {
        for name in self.store()?.list()? {
            println!("{name}");
        }
        Ok(())
    }

    /// Let the provider choose encryption keys and remember them.
    pub async fn select_key_ids(&mut self) -> Result<()> {
        let session = self.session(SessionSettings::from(&self.preferences))?;

        let Some(ids) = session
            .select_key_ids(&TerminalInteraction)
            .await
            .context("Failed to get key ids")?
        else {
            eprintln!("Key selection cancelled");
            return Ok(());
        };

        self.preferences.set_key_ids(&ids);
        self.preferences.save_to(&self.config_path)?;

        tracing::info!("Stored {} key ids", ids.len());
        for id in &ids {
            println!("{id}");
        }
        eprintln!("PGP keys selected");
        Ok(())
    }
}
