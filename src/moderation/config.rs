//! Per-community moderation configuration.
//!
//! Configuration lives in a [`DashMap`] keyed by community id and is
//! persisted as a single JSON document whose top-level keys are the decimal
//! community ids. Reads never touch disk; every successful mutation rewrites
//! the whole file through a temp-file rename.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::moderation::error::PersistError;

/// Classifier model used until a community picks its own.
pub const DEFAULT_CLASSIFIER_MODEL: &str = "google/gemini-2.5-flash-preview";

fn default_enabled() -> bool {
    true
}

fn default_model() -> String {
    DEFAULT_CLASSIFIER_MODEL.to_string()
}

/// Settings for one community. Field names on the wire match the dashboard
/// schema, so documents are interchangeable with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityConfig {
    /// Whether the moderation listener runs in this community
    #[serde(rename = "ENABLED", default = "default_enabled")]
    pub enabled: bool,

    /// Channel that receives moderator notices; the origin channel is used
    /// when unset
    #[serde(rename = "MOD_LOG_CHANNEL_ID", default)]
    pub log_channel_id: Option<u64>,

    /// Role pinged on ordinary violation notices
    #[serde(rename = "MODERATOR_ROLE_ID", default)]
    pub moderator_role_id: Option<u64>,

    /// Role pinged on self-harm concerns
    #[serde(rename = "SUICIDAL_PING_ROLE_ID", default)]
    pub escalation_role_id: Option<u64>,

    /// Channels treated as age-restricted in addition to the platform flag
    #[serde(rename = "NSFW_CHANNEL_IDS", default)]
    pub nsfw_channel_ids: Vec<u64>,

    /// Classifier model identifier sent with every request
    #[serde(rename = "AI_MODEL", default = "default_model")]
    pub classifier_model: String,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_channel_id: None,
            moderator_role_id: None,
            escalation_role_id: None,
            nsfw_channel_ids: Vec::new(),
            classifier_model: DEFAULT_CLASSIFIER_MODEL.to_string(),
        }
    }
}

/// Shared store of per-community configuration.
#[derive(Debug)]
pub struct ConfigStore {
    configs: DashMap<u64, CommunityConfig>,
    path: PathBuf,
    /// Serializes file writes; mutations to the map happen outside it.
    save_lock: Mutex<()>,
}

impl ConfigStore {
    /// Creates an empty store that will persist to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            configs: DashMap::new(),
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    /// Loads the store from `path`. A missing file is an empty store; a
    /// malformed file is logged and treated as empty rather than blocking
    /// startup.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let store = Self::new(path);
        let contents = match tokio::fs::read_to_string(&store.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %store.path.display(), "no community config file yet");
                return store;
            }
            Err(err) => {
                warn!(path = %store.path.display(), error = %err, "failed to read community config");
                return store;
            }
        };
        match serde_json::from_str::<HashMap<String, CommunityConfig>>(&contents) {
            Ok(parsed) => {
                for (key, config) in parsed {
                    match key.parse::<u64>() {
                        Ok(community_id) => {
                            store.configs.insert(community_id, config);
                        }
                        Err(_) => {
                            warn!(key, "skipping config entry with non-numeric community id");
                        }
                    }
                }
                debug!(communities = store.configs.len(), "community config loaded");
            }
            Err(err) => {
                warn!(path = %store.path.display(), error = %err, "malformed community config, starting empty");
            }
        }
        store
    }

    /// Returns the configuration for a community, falling back to defaults.
    /// Reading never creates an entry; only mutations do.
    #[must_use]
    pub fn get(&self, community_id: u64) -> CommunityConfig {
        self.configs
            .get(&community_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of communities with explicit configuration.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// # Errors
    /// Returns an error if the updated store cannot be written to disk. The
    /// in-memory value is updated regardless.
    pub async fn set_enabled(
        &self,
        community_id: u64,
        enabled: bool,
    ) -> Result<(), PersistError> {
        self.update(community_id, |config| config.enabled = enabled)
            .await
    }

    /// # Errors
    /// Returns an error if the updated store cannot be written to disk.
    pub async fn set_log_channel(
        &self,
        community_id: u64,
        channel_id: Option<u64>,
    ) -> Result<(), PersistError> {
        self.update(community_id, |config| config.log_channel_id = channel_id)
            .await
    }

    /// # Errors
    /// Returns an error if the updated store cannot be written to disk.
    pub async fn set_moderator_role(
        &self,
        community_id: u64,
        role_id: Option<u64>,
    ) -> Result<(), PersistError> {
        self.update(community_id, |config| config.moderator_role_id = role_id)
            .await
    }

    /// # Errors
    /// Returns an error if the updated store cannot be written to disk.
    pub async fn set_escalation_role(
        &self,
        community_id: u64,
        role_id: Option<u64>,
    ) -> Result<(), PersistError> {
        self.update(community_id, |config| config.escalation_role_id = role_id)
            .await
    }

    /// # Errors
    /// Returns an error if the updated store cannot be written to disk.
    pub async fn set_classifier_model(
        &self,
        community_id: u64,
        model: impl Into<String>,
    ) -> Result<(), PersistError> {
        let model = model.into();
        self.update(community_id, |config| config.classifier_model = model)
            .await
    }

    /// Adds a channel to the age-restricted list. Returns `false` when the
    /// channel was already listed, in which case nothing is written.
    ///
    /// # Errors
    /// Returns an error if the updated store cannot be written to disk.
    pub async fn add_nsfw_channel(
        &self,
        community_id: u64,
        channel_id: u64,
    ) -> Result<bool, PersistError> {
        let added = {
            let mut entry = self.configs.entry(community_id).or_default();
            if entry.nsfw_channel_ids.contains(&channel_id) {
                false
            } else {
                entry.nsfw_channel_ids.push(channel_id);
                true
            }
        };
        if added {
            self.persist().await?;
        }
        Ok(added)
    }

    /// Removes a channel from the age-restricted list. Returns `false` when
    /// the channel was not listed.
    ///
    /// # Errors
    /// Returns an error if the updated store cannot be written to disk.
    pub async fn remove_nsfw_channel(
        &self,
        community_id: u64,
        channel_id: u64,
    ) -> Result<bool, PersistError> {
        let removed = {
            let mut entry = self.configs.entry(community_id).or_default();
            let before = entry.nsfw_channel_ids.len();
            entry.nsfw_channel_ids.retain(|id| *id != channel_id);
            entry.nsfw_channel_ids.len() != before
        };
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn update<F>(&self, community_id: u64, apply: F) -> Result<(), PersistError>
    where
        F: FnOnce(&mut CommunityConfig),
    {
        {
            let mut entry = self.configs.entry(community_id).or_default();
            apply(&mut entry);
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<(), PersistError> {
        let _guard = self.save_lock.lock().await;
        let snapshot: BTreeMap<String, CommunityConfig> = self
            .configs
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().clone()))
            .collect();
        let json = serde_json::to_string_pretty(&snapshot)?;
        write_atomic(&self.path, &json).await?;
        Ok(())
    }
}

/// Writes `contents` to a sibling temp file and renames it over `path`, so
/// readers never observe a half-written document.
pub(crate) async fn write_atomic(path: &Path, contents: &str) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_enabled_with_default_model() {
        let config = CommunityConfig::default();
        assert!(config.enabled);
        assert_eq!(config.classifier_model, DEFAULT_CLASSIFIER_MODEL);
        assert!(config.log_channel_id.is_none());
        assert!(config.nsfw_channel_ids.is_empty());
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let config: CommunityConfig =
            serde_json::from_str(r#"{"MOD_LOG_CHANNEL_ID": 42}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.log_channel_id, Some(42));
        assert_eq!(config.classifier_model, DEFAULT_CLASSIFIER_MODEL);
    }

    #[test]
    fn get_never_creates_an_entry() {
        let store = ConfigStore::new("unused.json");
        let config = store.get(1);
        assert!(config.enabled);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn settings_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild_config.json");

        let store = ConfigStore::new(&path);
        store.set_log_channel(77, Some(1234)).await.unwrap();
        store.set_moderator_role(77, Some(5678)).await.unwrap();
        store.set_classifier_model(77, "alt/model").await.unwrap();
        store.add_nsfw_channel(77, 99).await.unwrap();
        store.set_enabled(88, false).await.unwrap();

        let reloaded = ConfigStore::load(&path).await;
        assert_eq!(reloaded.len(), 2);
        let config = reloaded.get(77);
        assert_eq!(config.log_channel_id, Some(1234));
        assert_eq!(config.moderator_role_id, Some(5678));
        assert_eq!(config.classifier_model, "alt/model");
        assert_eq!(config.nsfw_channel_ids, vec![99]);
        assert!(!reloaded.get(88).enabled);
    }

    #[tokio::test]
    async fn file_uses_dashboard_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild_config.json");

        let store = ConfigStore::new(&path);
        store.set_log_channel(5, Some(6)).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("\"5\""));
        assert!(contents.contains("MOD_LOG_CHANNEL_ID"));
        assert!(contents.contains("ENABLED"));
        assert!(contents.contains("AI_MODEL"));
    }

    #[tokio::test]
    async fn nsfw_list_mutations_report_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild_config.json");
        let store = ConfigStore::new(&path);

        assert!(store.add_nsfw_channel(1, 10).await.unwrap());
        assert!(!store.add_nsfw_channel(1, 10).await.unwrap());
        assert_eq!(store.get(1).nsfw_channel_ids, vec![10]);

        assert!(store.remove_nsfw_channel(1, 10).await.unwrap());
        assert!(!store.remove_nsfw_channel(1, 10).await.unwrap());
        assert!(store.get(1).nsfw_channel_ids.is_empty());
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load(dir.path().join("nope.json")).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn malformed_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild_config.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let store = ConfigStore::load(&path).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn non_numeric_keys_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guild_config.json");
        tokio::fs::write(&path, r#"{"abc": {"ENABLED": false}, "9": {"ENABLED": false}}"#)
            .await
            .unwrap();

        let store = ConfigStore::load(&path).await;
        assert_eq!(store.len(), 1);
        assert!(!store.get(9).enabled);
    }
}
