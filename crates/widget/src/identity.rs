use std::path::{Path, PathBuf};

use snafu::ResultExt;

use cordial_session::SessionId;

use crate::error::{
    CreateStateDirectorySnafu, MissingStateDirectorySnafu, ReadStateFileSnafu, WidgetResult,
    WriteStateFileSnafu,
};

const APP_DIR: &str = "cordial";

/// Issues and persists the opaque per-browser identity values for one widget
/// instance: the session identifier and the previews-dismissed flag. One
/// value per file, keyed by embed id so multiple widgets on one machine stay
/// independent.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    state_dir: PathBuf,
    embed_id: String,
}

impl IdentityStore {
    pub fn new(embed_id: impl Into<String>, state_dir: Option<PathBuf>) -> WidgetResult<Self> {
        let state_dir = match state_dir {
            Some(dir) => dir,
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR))
                .ok_or_else(|| {
                    MissingStateDirectorySnafu {
                        stage: "identity-state-dir",
                    }
                    .build()
                })?,
        };

        std::fs::create_dir_all(&state_dir).context(CreateStateDirectorySnafu {
            stage: "identity-create-dir",
            path: display_path(&state_dir),
        })?;

        Ok(Self {
            state_dir,
            embed_id: embed_id.into(),
        })
    }

    /// Returns the persisted session identifier, minting and persisting a
    /// fresh one on first run.
    pub fn session_id(&self) -> WidgetResult<SessionId> {
        let path = self.key_path("session_id");
        let existing = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(source).context(ReadStateFileSnafu {
                    stage: "identity-read-session-id",
                    path: display_path(&path),
                });
            }
        };

        if !existing.trim().is_empty() {
            let session_id = SessionId::from(existing.trim());
            tracing::debug!(session_id = %session_id, "resuming persisted session id");
            return Ok(session_id);
        }

        let session_id = SessionId::generate();
        tracing::debug!(session_id = %session_id, "registering new session id");
        std::fs::write(&path, session_id.as_str()).context(WriteStateFileSnafu {
            stage: "identity-write-session-id",
            path: display_path(&path),
        })?;
        Ok(session_id)
    }

    /// Whether the user dismissed the starter-message previews. Read errors
    /// degrade to "not dismissed".
    pub fn previews_dismissed(&self) -> bool {
        std::fs::read_to_string(self.key_path("previews_dismissed"))
            .map(|raw| raw.trim() == "true")
            .unwrap_or(false)
    }

    pub fn dismiss_previews(&self) -> WidgetResult<()> {
        let path = self.key_path("previews_dismissed");
        std::fs::write(&path, "true").context(WriteStateFileSnafu {
            stage: "identity-write-previews-dismissed",
            path: display_path(&path),
        })
    }

    fn key_path(&self, suffix: &str) -> PathBuf {
        self.state_dir
            .join(format!("cordial_{}_{suffix}", self.embed_id))
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn session_id_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new("embed-1", Some(dir.path().to_path_buf())).unwrap();
        let first = store.session_id().unwrap();

        let again = IdentityStore::new("embed-1", Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(again.session_id().unwrap(), first);
    }

    #[test]
    fn widgets_with_different_embed_ids_get_distinct_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let first = IdentityStore::new("embed-1", Some(dir.path().to_path_buf()))
            .unwrap()
            .session_id()
            .unwrap();
        let second = IdentityStore::new("embed-2", Some(dir.path().to_path_buf()))
            .unwrap()
            .session_id()
            .unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn previews_dismissed_defaults_to_false_and_sticks_once_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new("embed-1", Some(dir.path().to_path_buf())).unwrap();
        assert!(!store.previews_dismissed());
        store.dismiss_previews().unwrap();
        assert!(store.previews_dismissed());
    }
}
