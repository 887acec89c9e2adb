use std::path::{Path, PathBuf};

use anyhow::Context as _;
use log::debug;
use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub token_key: String,
    pub user_key: String,
}

/// Persisted driver state. Credentials are stored as one value so a
/// token without a user (or vice versa) can never be written out.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Configuration {
    #[serde(default, rename = "hasSentAnnouncement")]
    pub has_sent_announcement: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// JSON file backing for [`Configuration`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored configuration, falling back to defaults on first run.
    pub async fn load(&self) -> anyhow::Result<Configuration> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state at {:?}, starting unconfigured", self.path);
                return Ok(Configuration::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading state from {:?}", self.path));
            }
        };
        serde_json::from_str(&contents).with_context(|| format!("parsing state in {:?}", self.path))
    }

    /// Writes to a sibling temp file and renames it over the target.
    pub async fn save(&self, config: &Configuration) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing state to {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing state at {:?}", self.path))?;
        debug!("Saved state to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("state.json"));
        assert_eq!(store.load().await.unwrap(), Configuration::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("state.json"));
        let config = Configuration {
            has_sent_announcement: true,
            credentials: Some(Credentials {
                token_key: "tok1".to_string(),
                user_key: "usr1".to_string(),
            }),
        };
        store.save(&config).await.unwrap();
        assert_eq!(store.load().await.unwrap(), config);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(ConfigStore::new(path).load().await.is_err());
    }

    #[test]
    fn test_partial_credentials_are_not_representable_on_disk() {
        let config: Configuration =
            serde_json::from_str(r#"{"hasSentAnnouncement": true}"#).unwrap();
        assert!(config.credentials.is_none());

        let half: Result<Configuration, _> =
            serde_json::from_str(r#"{"credentials": {"token_key": "t"}}"#);
        assert!(half.is_err());
    }
}
