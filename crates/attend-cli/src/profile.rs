//! Persisted name/seat profile enabling headless repeat runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("profile io ({path}): {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("profile encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A saved `{name, seat}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub seat: String,
}

impl Profile {
    /// Trimmed copy, or `None` if either field is blank.
    fn normalized(self) -> Option<Self> {
        let name = self.name.trim();
        let seat = self.seat.trim();
        if name.is_empty() || seat.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            seat: seat.to_string(),
        })
    }
}

/// JSON profile file at a fixed per-user path.
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the profile. Missing, unreadable, malformed or blank → `None`.
    pub fn load(&self) -> Option<Profile> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no saved profile");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "profile unreadable");
                return None;
            }
        };

        let profile = match serde_json::from_str::<Profile>(&data) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "profile malformed; ignoring");
                return None;
            }
        };

        let normalized = profile.normalized();
        if normalized.is_none() {
            tracing::warn!(path = %self.path.display(), "profile has blank name or seat; ignoring");
        }
        normalized
    }

    /// Write the profile, creating the parent directory if needed.
    pub fn save(&self, profile: &Profile) -> Result<(), ProfileError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ProfileError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(profile)?;
        std::fs::write(&self.path, json).map_err(|source| ProfileError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!(path = %self.path.display(), "saved permanent profile");
        Ok(())
    }

    /// Delete the profile. Returns whether a file was removed.
    pub fn reset(&self) -> Result<bool, ProfileError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "removed permanent profile");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ProfileError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ProfileStore {
        ProfileStore::new(dir.path().join("nested").join("profile.json"))
    }

    #[test]
    fn test_missing_profile_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).load().is_none());
    }

    #[test]
    fn test_save_creates_parent_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let profile = Profile { name: "Jane Doe".into(), seat: "12A".into() };
        store.save(&profile).unwrap();
        assert_eq!(store.load(), Some(profile));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"name\": \"Jane Doe\""));
    }

    #[test]
    fn test_malformed_profile_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_none());

        std::fs::write(store.path(), r#"{"name": "Jane"}"#).unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_blank_fields_rejected_and_values_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();

        std::fs::write(store.path(), r#"{"name": "   ", "seat": "4B"}"#).unwrap();
        assert!(store.load().is_none());

        std::fs::write(store.path(), r#"{"name": "  Ana ", "seat": " 4B\n"}"#).unwrap();
        assert_eq!(
            store.load(),
            Some(Profile { name: "Ana".into(), seat: "4B".into() })
        );
    }

    #[test]
    fn test_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(!store.reset().unwrap());

        store.save(&Profile { name: "a".into(), seat: "b".into() }).unwrap();
        assert!(store.reset().unwrap());
        assert!(!store.path().exists());
        assert!(store.load().is_none());
    }
}
