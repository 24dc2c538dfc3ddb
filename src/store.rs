use anyhow::{anyhow, Result};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use crate::message::Message;

/// Durable per-dataset session storage.
///
/// The full message list is JSON-serialized to one file per dataset and
/// reloaded when the panel reopens on that dataset. A missing or unreadable
/// file degrades to an empty history.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn default_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;
        Ok(data_dir.join("datachat").join("sessions"))
    }

    pub fn load(&self, dataset: &str) -> Vec<Message> {
        let path = self.session_path(dataset);
        if !path.exists() {
            return Vec::new();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!("discarding unreadable session file {:?}: {}", path, e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("failed to read session file {:?}: {}", path, e);
                Vec::new()
            }
        }
    }

    pub fn save(&self, dataset: &str, messages: &[Message]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string(messages)?;
        fs::write(self.session_path(dataset), content)?;
        Ok(())
    }

    fn session_path(&self, dataset: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(dataset)))
    }
}

/// Dataset names come from the host and may contain path separators.
fn sanitize_key(dataset: &str) -> String {
    dataset
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_session_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        assert!(store.load("quickstart").is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());

        let messages = vec![
            Message::outgoing("show me dogs"),
            Message::incoming("Found 42 samples with dogs"),
        ];
        store.save("quickstart", &messages).unwrap();

        assert_eq!(store.load("quickstart"), messages);
        // Sessions are scoped per dataset.
        assert!(store.load("other-dataset").is_empty());
    }

    #[test]
    fn test_save_empty_list_clears_session() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());

        store.save("ds", &[Message::outgoing("hi")]).unwrap();
        store.save("ds", &[]).unwrap();
        assert!(store.load("ds").is_empty());
    }

    #[test]
    fn test_corrupt_session_degrades_to_empty() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());

        std::fs::write(dir.path().join("ds.json"), "not json").unwrap();
        assert!(store.load("ds").is_empty());
    }

    #[test]
    fn test_dataset_keys_are_sanitized() {
        assert_eq!(sanitize_key("my/data set"), "my_data_set");
        assert_eq!(sanitize_key("quickstart-v1.2"), "quickstart-v1.2");
    }
}
