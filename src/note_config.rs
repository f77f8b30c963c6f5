//! Per-folder configuration: `.linear.json` resolution and caching.
//!
//! A folder opts its documents into creation defaults (team, labels,
//! assignee, and so on) by carrying a reserved-name JSON file. Resolution
//! walks from the document's folder up to the vault root and the nearest
//! file wins outright; ancestor configs are never merged. Parses are cached
//! by config-file path, so documents sharing an ancestor share one parse,
//! and the cache is flushed wholesale whenever any config file changes.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::vault::DocumentStore;

/// Reserved file name for folder configuration.
pub const CONFIG_FILE_NAME: &str = ".linear.json";

/// Sparse per-folder defaults for new issues.
///
/// Key names are a compatibility surface; existing vaults carry exactly
/// these, so they must not be renamed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_sync: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl NoteConfig {
    pub fn is_empty(&self) -> bool {
        self == &NoteConfig::default()
    }

    /// Field-by-field merge where `over` wins. Labels accumulate instead
    /// (self's first, then over's), with duplicates dropped.
    pub fn overlay(&self, over: &NoteConfig) -> NoteConfig {
        let labels = match (&self.labels, &over.labels) {
            (None, None) => None,
            (base, extra) => {
                let mut merged: Vec<String> = base.clone().unwrap_or_default();
                for label in extra.iter().flatten() {
                    if !merged.contains(label) {
                        merged.push(label.clone());
                    }
                }
                Some(merged)
            }
        };
        NoteConfig {
            workspace: over.workspace.clone().or_else(|| self.workspace.clone()),
            team: over.team.clone().or_else(|| self.team.clone()),
            project: over.project.clone().or_else(|| self.project.clone()),
            labels,
            assignee: over.assignee.clone().or_else(|| self.assignee.clone()),
            priority: over.priority.or(self.priority),
            auto_sync: over.auto_sync.or(self.auto_sync),
            template: over.template.clone().or_else(|| self.template.clone()),
        }
    }
}

/// Folder of a vault-relative path, `""` at the root.
fn parent_folder(path: &str) -> &str {
    path.rsplit_once('/').map(|(folder, _)| folder).unwrap_or("")
}

/// Nearest-ancestor resolver with a shared parse cache.
pub struct ConfigResolver {
    store: Arc<dyn DocumentStore>,
    cache: DashMap<String, NoteConfig>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Resolve the config governing `document_path`.
    ///
    /// Walks the folder chain upward; the first `.linear.json` found wins
    /// and shadows anything above it. The root folder is checked as the
    /// final step. Fail-open: no file, or a malformed one, resolves to
    /// defaults rather than an error.
    pub async fn resolve_for(&self, document_path: &str) -> NoteConfig {
        let mut folder = parent_folder(document_path);
        loop {
            let candidate = if folder.is_empty() {
                CONFIG_FILE_NAME.to_string()
            } else {
                format!("{}/{}", folder, CONFIG_FILE_NAME)
            };
            if self.store.exists(&candidate).await {
                return self.load(&candidate).await;
            }
            if folder.is_empty() {
                break;
            }
            folder = parent_folder(folder);
        }
        NoteConfig::default()
    }

    async fn load(&self, path: &str) -> NoteConfig {
        if let Some(cached) = self.cache.get(path) {
            return cached.clone();
        }
        let parsed = match self.store.read(path).await {
            Ok(raw) => match serde_json::from_str::<NoteConfig>(&raw) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Malformed folder config {}: {}", path, e);
                    NoteConfig::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read folder config {}: {}", path, e);
                NoteConfig::default()
            }
        };
        self.cache.insert(path.to_string(), parsed.clone());
        parsed
    }

    /// Drop every cached parse.
    ///
    /// Called whenever any reserved-name file changes. A stale entry would
    /// silently hand wrong defaults to new issues, so the flush is total
    /// rather than per-entry.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn is_config_file(path: &Path) -> bool {
        path.file_name().and_then(|n| n.to_str()) == Some(CONFIG_FILE_NAME)
    }
}
