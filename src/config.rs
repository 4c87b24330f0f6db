//! Persisted settings: camera credentials and the recording resolution flag.
//!
//! The file lives next to the binary as `config.json`. A missing or
//! malformed file is replaced with defaults and written back immediately so
//! the operator always finds an editable file on disk. Saves go through a
//! temp file + rename; the previous file survives as `config.json.bak`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Contents of `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_half_resolution")]
    pub half_resolution: bool,
}

fn default_username() -> String {
    "admin".into()
}

fn default_password() -> String {
    "123456".into()
}

fn default_half_resolution() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            username: default_username(),
            password: default_password(),
            half_resolution: default_half_resolution(),
        }
    }
}

/// Reader/writer gate around [`Settings`], shared across the whole process.
///
/// Readers always see a full tuple: either the values from before a save or
/// the values after it, never a mix.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    inner: Arc<RwLock<Settings>>,
}

impl ConfigStore {
    /// Load settings from `path`, seeding defaults when the file is missing
    /// or unreadable. The seeded defaults are written back to disk.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Settings>(&content) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Invalid config file, using defaults");
                    Settings::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No config file found, using defaults");
                Settings::default()
            }
        };

        let store = ConfigStore {
            path,
            inner: Arc::new(RwLock::new(settings)),
        };
        if let Err(e) = store.save() {
            warn!(error = %e, "Could not write initial config file");
        }
        store
    }

    /// Snapshot of the full settings tuple.
    pub fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }

    /// `(username, password)` as one consistent pair.
    pub fn credentials(&self) -> (String, String) {
        let s = self.inner.read();
        (s.username.clone(), s.password.clone())
    }

    pub fn half_resolution(&self) -> bool {
        self.inner.read().half_resolution
    }

    /// Replace the settings and persist them.
    pub fn update(&self, settings: Settings) -> Result<()> {
        *self.inner.write() = settings;
        self.save()
    }

    /// Atomic save: write a temp file, keep a `.bak` of the previous file,
    /// then rename over the destination.
    pub fn save(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::Config(format!("Cannot serialize config: {e}")))?;

        if self.path.exists() {
            let backup = backup_path(&self.path);
            // Best effort; a failed backup must not block the save.
            let _ = std::fs::copy(&self.path, backup);
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes())
            .map_err(|e| Error::Config(format!("Cannot write config: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Config(format!("Cannot replace config: {e}")))?;

        info!(
            username = snapshot.username,
            half_resolution = snapshot.half_resolution,
            "Configuration saved"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".bak");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_seed_admin_credentials() {
        let s = Settings::default();
        assert_eq!(s.username, "admin");
        assert_eq!(s.password, "123456");
        assert!(s.half_resolution);
    }

    #[test]
    fn partial_json_fills_missing_fields() {
        let s: Settings = serde_json::from_str(r#"{"username":"root"}"#).unwrap();
        assert_eq!(s.username, "root");
        assert_eq!(s.password, "123456");
        assert!(s.half_resolution);
    }

    #[test]
    fn backup_path_appends_suffix() {
        assert_eq!(
            backup_path(Path::new("config.json")),
            PathBuf::from("config.json.bak")
        );
    }
}
