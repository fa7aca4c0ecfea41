//! Per-user infraction history.
//!
//! Histories are keyed `"{community_id}_{user_id}"`, ordered oldest first,
//! and capped per user: when an append would exceed the cap, the oldest
//! records are dropped. The whole store persists as one JSON document, same
//! scheme as the community config.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::moderation::action::ModAction;
use crate::moderation::clip;
use crate::moderation::config::write_atomic;
use crate::moderation::error::PersistError;

/// Most records retained per user; older ones are evicted first.
pub const MAX_INFRACTIONS_PER_USER: usize = 10;

/// Hard cap on a rendered history summary.
const SUMMARY_CHAR_LIMIT: usize = 500;
/// Reasoning prefix shown per summary line.
const SUMMARY_REASON_CHARS: usize = 50;
/// Reasoning length stored in a record.
const RECORD_REASON_CHARS: usize = 500;

/// One enforced violation in a user's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfractionRecord {
    /// When the action was taken
    pub timestamp: DateTime<Utc>,

    /// Violated rule identifier, as the classifier reported it
    #[serde(rename = "rule_violated")]
    pub category: String,

    /// Action that was actually applied
    pub action_taken: ModAction,

    /// Classifier reasoning, clipped for storage
    pub reasoning: String,
}

impl InfractionRecord {
    /// Builds a record stamped with the current time.
    #[must_use]
    pub fn new(category: impl Into<String>, action_taken: ModAction, reasoning: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            category: category.into(),
            action_taken,
            reasoning: clip(reasoning, RECORD_REASON_CHARS).to_string(),
        }
    }
}

/// Shared store of per-user infraction histories.
#[derive(Debug)]
pub struct InfractionStore {
    histories: DashMap<String, Vec<InfractionRecord>>,
    path: PathBuf,
    save_lock: Mutex<()>,
}

fn history_key(community_id: u64, user_id: u64) -> String {
    format!("{community_id}_{user_id}")
}

impl InfractionStore {
    /// Creates an empty store that will persist to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            histories: DashMap::new(),
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    /// Loads the store from `path`, tolerating a missing or malformed file.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let store = Self::new(path);
        let contents = match tokio::fs::read_to_string(&store.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %store.path.display(), "no infraction file yet");
                return store;
            }
            Err(err) => {
                warn!(path = %store.path.display(), error = %err, "failed to read infraction file");
                return store;
            }
        };
        match serde_json::from_str::<HashMap<String, Vec<InfractionRecord>>>(&contents) {
            Ok(parsed) => {
                for (key, records) in parsed {
                    store.histories.insert(key, records);
                }
                debug!(histories = store.histories.len(), "infraction histories loaded");
            }
            Err(err) => {
                warn!(path = %store.path.display(), error = %err, "malformed infraction file, starting empty");
            }
        }
        store
    }

    /// Appends a record to a user's history, evicting the oldest entries
    /// beyond [`MAX_INFRACTIONS_PER_USER`], then persists.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written to disk. The
    /// in-memory history is updated regardless.
    pub async fn append(
        &self,
        community_id: u64,
        user_id: u64,
        record: InfractionRecord,
    ) -> Result<(), PersistError> {
        {
            let mut entry = self
                .histories
                .entry(history_key(community_id, user_id))
                .or_default();
            entry.push(record);
            if entry.len() > MAX_INFRACTIONS_PER_USER {
                let excess = entry.len() - MAX_INFRACTIONS_PER_USER;
                entry.drain(..excess);
            }
        }
        self.persist().await
    }

    /// A user's history, oldest first. Empty when nothing is recorded.
    #[must_use]
    pub fn history(&self, community_id: u64, user_id: u64) -> Vec<InfractionRecord> {
        self.histories
            .get(&history_key(community_id, user_id))
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Erases a user's history and returns how many records were dropped.
    ///
    /// # Errors
    /// Returns an error if the store cannot be written to disk.
    pub async fn clear(&self, community_id: u64, user_id: u64) -> Result<usize, PersistError> {
        let removed = self
            .histories
            .remove(&history_key(community_id, user_id))
            .map_or(0, |(_, records)| records.len());
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Renders the `max_records` most recent infractions as a compact block
    /// for the classifier prompt, hard-capped at [`SUMMARY_CHAR_LIMIT`]
    /// characters.
    #[must_use]
    pub fn summarize(&self, community_id: u64, user_id: u64, max_records: usize) -> String {
        let history = self.history(community_id, user_id);
        if history.is_empty() {
            return "No prior infractions on record.".to_string();
        }
        let start = history.len().saturating_sub(max_records);
        let lines: Vec<String> = history[start..]
            .iter()
            .map(|record| {
                format!(
                    "- Action: {} for Rule {} on {}. Reason: {}...",
                    record.action_taken,
                    record.category,
                    record.timestamp.format("%Y-%m-%d"),
                    clip(&record.reasoning, SUMMARY_REASON_CHARS),
                )
            })
            .collect();
        let summary = lines.join("\n");
        if summary.chars().count() > SUMMARY_CHAR_LIMIT {
            format!("{}...", clip(&summary, SUMMARY_CHAR_LIMIT - 3))
        } else {
            summary
        }
    }

    async fn persist(&self) -> Result<(), PersistError> {
        let _guard = self.save_lock.lock().await;
        let snapshot: BTreeMap<String, Vec<InfractionRecord>> = self
            .histories
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let json = serde_json::to_string_pretty(&snapshot)?;
        write_atomic(&self.path, &json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(reason: &str) -> InfractionRecord {
        InfractionRecord::new("2", ModAction::Warn, reason)
    }

    #[tokio::test]
    async fn append_caps_history_keeping_the_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = InfractionStore::new(dir.path().join("infractions.json"));

        for n in 0..12 {
            store.append(1, 2, record(&format!("offense {n}"))).await.unwrap();
        }

        let history = store.history(1, 2);
        assert_eq!(history.len(), MAX_INFRACTIONS_PER_USER);
        assert_eq!(history[0].reasoning, "offense 2");
        assert_eq!(history[9].reasoning, "offense 11");
    }

    #[tokio::test]
    async fn histories_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infractions.json");

        let store = InfractionStore::new(&path);
        store.append(10, 20, record("first")).await.unwrap();
        store
            .append(10, 20, InfractionRecord::new("3", ModAction::Kick, "second"))
            .await
            .unwrap();
        store.append(10, 21, record("other user")).await.unwrap();

        let reloaded = InfractionStore::load(&path).await;
        let history = reloaded.history(10, 20);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].reasoning, "first");
        assert_eq!(history[1].action_taken, ModAction::Kick);
        assert_eq!(reloaded.history(10, 21).len(), 1);
    }

    #[tokio::test]
    async fn file_uses_composite_keys_and_wire_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infractions.json");

        let store = InfractionStore::new(&path);
        store.append(10, 20, record("spam")).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("\"10_20\""));
        assert!(contents.contains("rule_violated"));
        assert!(contents.contains("\"WARN\""));
    }

    #[tokio::test]
    async fn clear_reports_removed_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = InfractionStore::new(dir.path().join("infractions.json"));

        store.append(1, 2, record("a")).await.unwrap();
        store.append(1, 2, record("b")).await.unwrap();

        assert_eq!(store.clear(1, 2).await.unwrap(), 2);
        assert!(store.history(1, 2).is_empty());
        assert_eq!(store.clear(1, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn records_clip_stored_reasoning() {
        let dir = tempfile::tempdir().unwrap();
        let store = InfractionStore::new(dir.path().join("infractions.json"));

        let long = "x".repeat(600);
        store.append(1, 2, record(&long)).await.unwrap();
        assert_eq!(store.history(1, 2)[0].reasoning.chars().count(), 500);
    }

    #[test]
    fn summarize_formats_one_line_per_record() {
        let store = InfractionStore::new("unused.json");
        let summary = store.summarize(1, 2, 5);
        assert_eq!(summary, "No prior infractions on record.");
    }

    #[tokio::test]
    async fn summarize_lists_recent_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = InfractionStore::new(dir.path().join("infractions.json"));
        store.append(1, 2, record("posted spam links")).await.unwrap();

        let summary = store.summarize(1, 2, 5);
        assert!(summary.starts_with("- Action: WARN for Rule 2 on "));
        assert!(summary.ends_with(". Reason: posted spam links..."));
    }

    #[tokio::test]
    async fn summarize_takes_the_newest_records_newest_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = InfractionStore::new(dir.path().join("infractions.json"));
        for n in 0..5 {
            store.append(1, 2, record(&format!("offense {n}"))).await.unwrap();
        }

        let summary = store.summarize(1, 2, 3);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("offense 2"));
        assert!(lines[2].contains("offense 4"));
    }

    #[tokio::test]
    async fn summarize_respects_the_hard_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = InfractionStore::new(dir.path().join("infractions.json"));
        for n in 0..10 {
            store
                .append(1, 2, record(&format!("long reasoning {n} {}", "y".repeat(80))))
                .await
                .unwrap();
        }

        let summary = store.summarize(1, 2, 10);
        assert!(summary.chars().count() <= 500);
        assert!(summary.ends_with("..."));
    }
}
