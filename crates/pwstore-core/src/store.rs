//! Password store directory access.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

use crate::paths;

/// Extension of encrypted entries.
pub const ENTRY_EXTENSION: &str = "gpg";

/// Where an entry lives inside the store, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryLocation {
    /// Parent directory relative to the store, as `/social/`.
    pub category: String,
    /// File name without extension.
    pub name: String,
}

/// A directory of `.gpg` entries.
pub struct PasswordStore {
    root: PathBuf,
}

impl PasswordStore {
    /// Open an existing store.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            anyhow::bail!("Password store not found: {}", root.display());
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the encrypted file for `name` (e.g. `social/facebook`).
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if name.is_empty() || escapes {
            anyhow::bail!("Invalid entry name: {name:?}");
        }
        Ok(self.root.join(format!("{name}.{ENTRY_EXTENSION}")))
    }

    /// Read the encrypted bytes of an entry.
    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read entry: {}", path.display()))?;
        tracing::debug!("Read {} bytes from {}", bytes.len(), path.display());
        Ok(bytes)
    }

    /// Category and short name of an entry.
    pub fn location(&self, name: &str) -> Result<EntryLocation> {
        let path = self.path_for(name)?;
        let full = path.to_string_lossy();
        let root = self.root.to_string_lossy();
        Ok(EntryLocation {
            category: paths::parent_path(&full, &root),
            name: paths::entry_name(&full),
        })
    }

    /// All entry names in the store, sorted. Hidden directories are skipped.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        self.collect_entries(&self.root, &mut names)?;
        names.sort();
        Ok(names)
    }

    fn collect_entries(&self, dir: &Path, names: &mut Vec<String>) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list directory: {}", dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            let hidden = path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'));
            if hidden {
                continue;
            }

            if path.is_dir() {
                self.collect_entries(&path, names)?;
            } else if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                let basename = paths::entry_name(&path.to_string_lossy());
                names.push(paths::long_name(
                    &dir.to_string_lossy(),
                    &self.root.to_string_lossy(),
                    &basename,
                ));
            }
        }
        Ok(())
    }
}
