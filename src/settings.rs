//! Durable engine settings and the bounded conflict-history log.
//!
//! Settings live as pretty-printed JSON in a state directory (by default
//! `~/.linearvault/`). The sync watermark is part of settings: read at
//! pass start, advanced only at pass end. Conflict records are appended
//! most-recent-first to a sibling file and capped, oldest evicted first.

use std::path::PathBuf;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::conflict::{ConflictPolicy, ConflictRecord};
use crate::error::{Result, SyncError};
use crate::util;

/// Maximum number of conflict records retained for audit.
const MAX_CONFLICT_HISTORY: usize = 100;

const SETTINGS_FILE: &str = "settings.json";
const HISTORY_FILE: &str = "conflict_history.json";

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    60
}

fn default_notes_folder() -> String {
    "Linear".to_string()
}

/// Engine configuration plus the persisted watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Personal API key for the remote service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Root of the markdown vault.
    #[serde(default)]
    pub vault_path: String,
    /// Restrict fetches to one team when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// Folder (vault-relative) receiving notes created by sync.
    #[serde(default = "default_notes_folder")]
    pub notes_folder: String,
    #[serde(default)]
    pub policy: ConflictPolicy,
    /// Note template text; None selects the built-in template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Watermark: last successful sync boundary, ISO-8601.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            vault_path: String::new(),
            team_id: None,
            notes_folder: default_notes_folder(),
            policy: ConflictPolicy::default(),
            template: None,
            last_sync: None,
            enabled: true,
            poll_interval_minutes: default_poll_interval(),
        }
    }
}

/// Settings persistence plus the in-memory copies shared across tasks.
pub struct SettingsStore {
    dir: PathBuf,
    settings: RwLock<Settings>,
    history: Mutex<Vec<ConflictRecord>>,
}

impl SettingsStore {
    /// Open a store rooted at `dir`, loading whatever state exists there.
    /// Missing files mean first run; malformed ones are logged and reset
    /// to defaults (the cost is a full rescan, not data loss).
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let settings = match std::fs::read_to_string(dir.join(SETTINGS_FILE)) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("Malformed settings file, using defaults: {}", e);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        };
        let history = match std::fs::read_to_string(dir.join(HISTORY_FILE)) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("Malformed conflict history, starting empty: {}", e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            dir,
            settings: RwLock::new(settings),
            history: Mutex::new(history),
        }
    }

    /// Canonical state directory (`~/.linearvault`).
    pub fn default_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| SyncError::Settings("could not find home directory".to_string()))?;
        Ok(home.join(".linearvault"))
    }

    pub fn snapshot(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Apply a mutation and persist the result atomically.
    pub fn update(&self, mutator: impl FnOnce(&mut Settings)) -> Result<Settings> {
        let mut guard = self.settings.write();
        mutator(&mut guard);
        let updated = guard.clone();
        drop(guard);
        self.persist(&updated)?;
        Ok(updated)
    }

    pub fn watermark(&self) -> Option<String> {
        self.settings.read().last_sync.clone()
    }

    /// Advance the watermark. Called once per pass, after reconciliation,
    /// never mid-pass.
    pub fn advance_watermark(&self, timestamp: &str) -> Result<()> {
        self.update(|s| s.last_sync = Some(timestamp.to_string()))?;
        Ok(())
    }

    /// Append conflict records, newest first, evicting past the cap.
    /// Persistence is best-effort; the log is an audit aid, not ground
    /// truth.
    pub fn record_conflicts(&self, records: &[ConflictRecord]) {
        if records.is_empty() {
            return;
        }
        {
            let mut guard = self.history.lock();
            for record in records.iter().rev() {
                guard.insert(0, record.clone());
            }
            if guard.len() > MAX_CONFLICT_HISTORY {
                guard.truncate(MAX_CONFLICT_HISTORY);
            }
        }
        if let Err(e) = self.save_history() {
            log::warn!("Failed to persist conflict history: {}", e);
        }
    }

    pub fn conflict_history(&self, limit: usize) -> Vec<ConflictRecord> {
        self.history.lock().iter().take(limit).cloned().collect()
    }

    fn persist(&self, settings: &Settings) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SyncError::Settings(format!("failed to create state dir: {}", e)))?;
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| SyncError::Settings(format!("failed to serialize settings: {}", e)))?;
        util::atomic_write_str(&self.dir.join(SETTINGS_FILE), &content)
            .map_err(|e| SyncError::Settings(format!("failed to write settings: {}", e)))
    }

    fn save_history(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| SyncError::Settings(format!("failed to create state dir: {}", e)))?;
        let history = self.history.lock().clone();
        let content = serde_json::to_string_pretty(&history)
            .map_err(|e| SyncError::Settings(format!("failed to serialize history: {}", e)))?;
        util::atomic_write_str(&self.dir.join(HISTORY_FILE), &content)
            .map_err(|e| SyncError::Settings(format!("failed to write history: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictField;

    fn record(identifier: &str, n: usize) -> ConflictRecord {
        ConflictRecord {
            identifier: format!("{}-{}", identifier, n),
            field: ConflictField::Title,
            remote_value: Some("r".into()),
            local_value: Some("l".into()),
            detected_at: "2024-01-20T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_first_run_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(tmp.path());
        let settings = store.snapshot();
        assert!(settings.enabled);
        assert_eq!(settings.poll_interval_minutes, 60);
        assert_eq!(settings.notes_folder, "Linear");
        assert_eq!(settings.policy, ConflictPolicy::RemoteWins);
        assert!(settings.last_sync.is_none());
    }

    #[test]
    fn test_update_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = SettingsStore::open(tmp.path());
            store
                .update(|s| {
                    s.api_key = Some("lin_api_x".into());
                    s.policy = ConflictPolicy::Manual;
                })
                .unwrap();
            store.advance_watermark("2024-01-20T00:00:00Z").unwrap();
        }
        let store = SettingsStore::open(tmp.path());
        let settings = store.snapshot();
        assert_eq!(settings.api_key.as_deref(), Some("lin_api_x"));
        assert_eq!(settings.policy, ConflictPolicy::Manual);
        assert_eq!(store.watermark().as_deref(), Some("2024-01-20T00:00:00Z"));
    }

    #[test]
    fn test_malformed_settings_fall_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(SETTINGS_FILE), "{broken").unwrap();
        let store = SettingsStore::open(tmp.path());
        assert_eq!(store.snapshot(), Settings::default());
    }

    #[test]
    fn test_settings_json_key_names() {
        let settings = Settings {
            api_key: Some("k".into()),
            last_sync: Some("2024-01-20T00:00:00Z".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"apiKey\""));
        assert!(json.contains("\"lastSync\""));
        assert!(json.contains("\"notesFolder\""));
        assert!(json.contains("\"pollIntervalMinutes\""));
        assert!(!json.contains("last_sync"));
    }

    #[test]
    fn test_history_is_bounded_and_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SettingsStore::open(tmp.path());
        for batch in 0..21 {
            let records: Vec<ConflictRecord> = (0..5).map(|i| record("ENG", batch * 5 + i)).collect();
            store.record_conflicts(&records);
        }
        let history = store.conflict_history(usize::MAX);
        assert_eq!(history.len(), MAX_CONFLICT_HISTORY);
        // Batch 20, first record of the batch, is the newest entry.
        assert_eq!(history[0].identifier, "ENG-100");
        // Oldest entries (batch 0) were evicted.
        assert!(history.iter().all(|r| r.identifier != "ENG-0"));
    }

    #[test]
    fn test_history_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = SettingsStore::open(tmp.path());
            store.record_conflicts(&[record("ENG", 1)]);
        }
        let store = SettingsStore::open(tmp.path());
        assert_eq!(store.conflict_history(10).len(), 1);
        assert_eq!(store.conflict_history(10)[0].identifier, "ENG-1");
    }
}
