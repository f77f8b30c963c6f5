//! Sync orchestrator: one pass reconciles remote issues with vault notes.
//!
//! A pass moves through fixed stages: fetch every issue changed since the
//! watermark, match each against the vault (internal id first, then
//! identifier), merge, persist, then advance the watermark to wall-clock
//! "now". Unmatched issues become fresh notes from the template; matched
//! notes only ever get their frontmatter rewritten, never their body.
//!
//! Conflicts are batched across the whole pass and resolved once: either
//! every conflict gets a winner and all resolutions apply, or none do.
//! Per-entity storage failures are recorded and skipped; only fetch and
//! vault-scan failures abort a pass, and neither advances the watermark.
//! Two passes never overlap; a trigger while one runs fails fast with
//! `SyncError::PassInProgress`.

pub mod create;
pub mod poller;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::conflict::{self, ConflictField, ConflictRecord, ConflictResolver, InteractiveResolver, Winner};
use crate::error::{Result, SyncError};
use crate::frontmatter;
use crate::note_config::ConfigResolver;
use crate::remote::RemoteEntityService;
use crate::settings::{Settings, SettingsStore};
use crate::template;
use crate::types::{
    EntityPatch, Issue, NoteState, FM_ASSIGNEE, FM_KEYS, FM_PRIORITY, FM_STATUS, FM_TITLE,
};
use crate::util;
use crate::vault::DocumentStore;

/// Remote mutations in flight at once during the patch flush.
const MAX_PATCH_CONCURRENCY: usize = 5;

/// Outcome of one pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    /// Identifiers of issues that got a fresh note.
    pub created: Vec<String>,
    /// Identifiers whose note frontmatter was rewritten.
    pub updated: Vec<String>,
    /// Identifiers left untouched (no change, opted out, or unresolved).
    pub skipped: Vec<String>,
    pub errors: Vec<SyncItemError>,
    /// Every conflict detected this pass, resolved or not.
    pub conflicts: Vec<ConflictRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncItemError {
    pub identifier: String,
    pub error: String,
}

impl SyncReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} skipped, {} conflicts, {} errors",
            self.created.len(),
            self.updated.len(),
            self.skipped.len(),
            self.conflicts.len(),
            self.errors.len()
        )
    }
}

/// Clears the in-progress flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncEngine {
    store: Arc<dyn DocumentStore>,
    remote: Arc<dyn RemoteEntityService>,
    resolver: Arc<ConfigResolver>,
    settings: Arc<SettingsStore>,
    interactive: Option<Arc<dyn InteractiveResolver>>,
    in_progress: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        remote: Arc<dyn RemoteEntityService>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        let resolver = Arc::new(ConfigResolver::new(store.clone()));
        Self {
            store,
            remote,
            resolver,
            settings,
            interactive: None,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Attach the collaborator consulted under the manual conflict policy.
    pub fn with_interactive(mut self, interactive: Arc<dyn InteractiveResolver>) -> Self {
        self.interactive = Some(interactive);
        self
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub(crate) fn remote(&self) -> &Arc<dyn RemoteEntityService> {
        &self.remote
    }

    /// Run one full sync pass.
    pub async fn run_pass(&self) -> Result<SyncReport> {
        // Checked before the first await so concurrent triggers cannot
        // interleave over the single watermark.
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::PassInProgress);
        }
        let _guard = PassGuard(&self.in_progress);

        let settings = self.settings.snapshot();
        let watermark = settings.last_sync.clone();
        log::info!(
            "Sync pass: fetching issues changed since {}",
            watermark.as_deref().unwrap_or("the beginning")
        );

        let issues = self
            .remote
            .fetch_changed(settings.team_id.as_deref(), watermark.as_deref())
            .await?;
        log::info!("Sync pass: {} changed issues", issues.len());

        let mut notes = self.store.scan_notes().await?;
        let (by_id, by_identifier) = index_notes(&notes);

        let mut report = SyncReport::default();
        let mut deferred: Vec<(Issue, usize, Vec<ConflictRecord>)> = Vec::new();
        let mut patches: Vec<(String, String, EntityPatch)> = Vec::new();

        for issue in issues {
            let matched = by_id
                .get(issue.id.as_str())
                .or_else(|| by_identifier.get(issue.identifier.as_str()))
                .copied();

            match matched {
                None => match self.create_note(&issue, &settings).await {
                    Ok(Some(path)) => {
                        log::info!("Sync pass: created {} for {}", path, issue.identifier);
                        report.created.push(issue.identifier.clone());
                    }
                    Ok(None) => report.skipped.push(issue.identifier.clone()),
                    Err(e) => report.errors.push(SyncItemError {
                        identifier: issue.identifier.clone(),
                        error: e.to_string(),
                    }),
                },
                Some(idx) => {
                    let config = self.resolver.resolve_for(&notes[idx].path).await;
                    if config.auto_sync == Some(false) {
                        log::debug!(
                            "Sync pass: {} opted out via folder config",
                            notes[idx].path
                        );
                        report.skipped.push(issue.identifier.clone());
                        continue;
                    }

                    let conflicts = conflict::detect(&issue, &notes[idx]);
                    if conflicts.is_empty() {
                        let note = &mut notes[idx];
                        if !merge_remote(note, &issue) {
                            report.skipped.push(issue.identifier.clone());
                            continue;
                        }
                        match self.store.write_note(note).await {
                            Ok(()) => report.updated.push(issue.identifier.clone()),
                            Err(e) => report.errors.push(SyncItemError {
                                identifier: issue.identifier.clone(),
                                error: e.to_string(),
                            }),
                        }
                    } else {
                        deferred.push((issue, idx, conflicts));
                    }
                }
            }
        }

        // Resolve the pass-wide conflict batch in one shot. Either every
        // conflict has a winner and everything applies, or nothing does.
        if !deferred.is_empty() {
            let batch: Vec<ConflictRecord> = deferred
                .iter()
                .flat_map(|(_, _, conflicts)| conflicts.iter().cloned())
                .collect();
            self.settings.record_conflicts(&batch);
            report.conflicts = batch.clone();

            let resolver = match &self.interactive {
                Some(ui) => ConflictResolver::with_prompt(settings.policy, ui.clone()),
                None => ConflictResolver::new(settings.policy),
            };
            match resolver.resolve(&batch).await {
                Ok(winners) => {
                    for (issue, idx, conflicts) in deferred {
                        let note = &mut notes[idx];
                        let patch = apply_winners(note, &issue, &conflicts, &winners);
                        match self.store.write_note(note).await {
                            Ok(()) => {
                                report.updated.push(issue.identifier.clone());
                                if let Some(patch) = patch {
                                    patches.push((issue.id.clone(), issue.identifier, patch));
                                }
                            }
                            Err(e) => report.errors.push(SyncItemError {
                                identifier: issue.identifier.clone(),
                                error: e.to_string(),
                            }),
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Sync pass: {}; applying nothing from this batch", e);
                    for (issue, _, _) in deferred {
                        report.skipped.push(issue.identifier);
                    }
                }
            }
        }

        // Push local winners to the remote, a few at a time. A failed
        // patch is recorded against its issue and never cancels siblings.
        if !patches.is_empty() {
            log::info!("Sync pass: pushing {} local updates", patches.len());
            let results: Vec<(String, Result<Issue>)> = stream::iter(patches)
                .map(|(id, identifier, patch)| {
                    let remote = self.remote.clone();
                    async move { (identifier, remote.update(&id, patch).await) }
                })
                .buffer_unordered(MAX_PATCH_CONCURRENCY)
                .collect()
                .await;
            for (identifier, result) in results {
                match result {
                    Ok(_) => log::debug!("Sync pass: pushed local winners for {}", identifier),
                    Err(e) => report.errors.push(SyncItemError {
                        identifier,
                        error: e.to_string(),
                    }),
                }
            }
        }

        // Wall-clock at completion, deliberately not the pass start time:
        // an entity updated mid-pass is re-fetched next pass instead of
        // being missed, and the merge is idempotent.
        let stamp = Utc::now().to_rfc3339();
        if let Err(e) = self.settings.advance_watermark(&stamp) {
            // A stale watermark re-fetches old entities every pass until
            // persistence recovers; report it, not just log it.
            log::warn!("Sync pass: failed to persist watermark: {}", e);
            report.errors.push(SyncItemError {
                identifier: "watermark".to_string(),
                error: e.to_string(),
            });
        }

        log::info!("Sync pass complete: {}", report.summary());
        Ok(report)
    }

    /// Create a fresh note for an issue with no matching document.
    ///
    /// Returns the new path, or `None` when creation was declined (target
    /// path taken by an unlinked note, or the folder opted out).
    async fn create_note(&self, issue: &Issue, settings: &Settings) -> Result<Option<String>> {
        let path = note_path_for(issue, &settings.notes_folder);

        let config = self.resolver.resolve_for(&path).await;
        if config.auto_sync == Some(false) {
            log::debug!("Sync pass: not creating {}; folder opted out", path);
            return Ok(None);
        }
        if self.store.exists(&path).await {
            log::warn!(
                "Sync pass: {} already exists without a link to {}; leaving it alone",
                path,
                issue.identifier
            );
            return Ok(None);
        }

        // Folder config may point at a template note; settings carry
        // template text directly. Unreadable template files fall back.
        let template_text = match &config.template {
            Some(template_path) => match self.store.read(template_path).await {
                Ok(text) => Some(text),
                Err(e) => {
                    log::warn!("Template {} unreadable: {}", template_path, e);
                    settings.template.clone()
                }
            },
            None => settings.template.clone(),
        };

        let body = template::body_for(issue, template_text.as_deref());
        let stamp = Utc::now().to_rfc3339();
        let text = frontmatter::encode(&body, &issue.to_frontmatter(&stamp));
        self.store.write(&path, &text).await?;
        Ok(Some(path))
    }
}

/// Vault path for a new issue note: lowercased identifier plus slugged
/// title, under the configured notes folder.
fn note_path_for(issue: &Issue, notes_folder: &str) -> String {
    let name = format!(
        "{}-{}",
        issue.identifier.to_lowercase(),
        util::slugify(&issue.title)
    );
    let folder = notes_folder.trim_matches('/');
    if folder.is_empty() {
        format!("{}.md", name)
    } else {
        format!("{}/{}.md", folder, name)
    }
}

/// Index scanned notes by `linear_id` and `linear_identifier`. The first
/// note claiming an id wins; later claimants are reported and ignored.
fn index_notes(notes: &[NoteState]) -> (HashMap<String, usize>, HashMap<String, usize>) {
    let mut by_id = HashMap::new();
    let mut by_identifier = HashMap::new();
    for (idx, note) in notes.iter().enumerate() {
        if let Some(id) = note.linear_id() {
            match by_id.entry(id.to_string()) {
                Entry::Occupied(_) => {
                    log::warn!("Multiple notes claim issue id {}; ignoring {}", id, note.path)
                }
                Entry::Vacant(slot) => {
                    slot.insert(idx);
                }
            }
        }
        if let Some(identifier) = note.identifier() {
            match by_identifier.entry(identifier.to_string()) {
                Entry::Occupied(_) => log::warn!(
                    "Multiple notes claim identifier {}; ignoring {}",
                    identifier,
                    note.path
                ),
                Entry::Vacant(slot) => {
                    slot.insert(idx);
                }
            }
        }
    }
    (by_id, by_identifier)
}

/// Rewrite a note's owned frontmatter keys from the remote issue, leaving
/// user keys and the body alone.
pub(crate) fn project_remote(note: &mut NoteState, issue: &Issue, last_synced: &str) {
    let projection = issue.to_frontmatter(last_synced);
    for key in FM_KEYS {
        if projection.get(key).is_none() {
            note.frontmatter.remove(key);
        }
    }
    for (key, value) in projection.iter() {
        note.frontmatter.insert(key, value.clone());
    }
}

/// Merge remote state into a matched, conflict-free note.
///
/// Returns false when the projection would not change the document, in
/// which case nothing should be written and the sync stamp stays put.
fn merge_remote(note: &mut NoteState, issue: &Issue) -> bool {
    let before = note.to_text();
    let previous_stamp = note.last_synced().unwrap_or_default().to_string();

    let mut candidate = note.clone();
    project_remote(&mut candidate, issue, &previous_stamp);
    if candidate.to_text() == before {
        return false;
    }

    project_remote(note, issue, &Utc::now().to_rfc3339());
    true
}

/// Apply a fully resolved conflict batch to one note.
///
/// Remote winners ride in with the projection; local and merge winners
/// override the projection afterwards and accumulate into a patch for the
/// remote. The body is never rewritten, so a description resolved
/// remote-wins leaves local prose in place and the advanced sync stamp
/// keeps it from re-conflicting until the remote changes again.
fn apply_winners(
    note: &mut NoteState,
    issue: &Issue,
    conflicts: &[ConflictRecord],
    winners: &HashMap<String, Winner>,
) -> Option<EntityPatch> {
    project_remote(note, issue, &Utc::now().to_rfc3339());

    let mut patch = EntityPatch::default();
    for record in conflicts {
        let winner = match winners.get(&record.key()) {
            Some(w) => *w,
            None => continue,
        };
        let Some(local) = record.local_value.as_deref() else {
            continue;
        };
        match (winner, record.field) {
            (Winner::Remote, _) => {}
            (Winner::Local, ConflictField::Title) => {
                note.frontmatter.insert(FM_TITLE, local);
                patch.title = Some(local.to_string());
            }
            (Winner::Local, ConflictField::Status) => {
                note.frontmatter.insert(FM_STATUS, local);
                patch.state_name = Some(local.to_string());
            }
            (Winner::Local, ConflictField::Assignee) => {
                note.frontmatter.insert(FM_ASSIGNEE, local);
                patch.assignee_name = Some(local.to_string());
            }
            (Winner::Local, ConflictField::Priority) => {
                if let Ok(priority) = local.parse::<u8>() {
                    note.frontmatter.insert(FM_PRIORITY, priority as i64);
                    patch.priority = Some(priority);
                }
            }
            (Winner::Local, ConflictField::Description) => {
                // The body already holds the local text; only the remote
                // needs to learn it.
                patch.description = Some(local.to_string());
            }
            (Winner::Merge, ConflictField::Description) => {
                let remote = record.remote_value.as_deref().unwrap_or_default();
                patch.description = Some(merged_description(remote, local));
            }
            (Winner::Merge, ConflictField::Labels) => {
                let remote = record.remote_value.as_deref().unwrap_or_default();
                patch.label_names = Some(merged_labels(remote, local));
            }
            (Winner::Local, ConflictField::Labels) | (Winner::Merge, _) => {
                log::warn!(
                    "Unsupported winner {:?} for {} field; keeping remote",
                    winner,
                    record.field
                );
            }
        }
    }

    if patch.is_empty() {
        None
    } else {
        Some(patch)
    }
}

/// Both descriptions, remote first, separated by a rule.
fn merged_description(remote: &str, local: &str) -> String {
    format!("{}\n\n---\n\n{}", remote.trim_end(), local.trim_start())
}

/// Union of comma-separated label lists, remote order first.
fn merged_labels(remote: &str, local: &str) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for name in remote.split(',').chain(local.split(',')) {
        let name = name.trim();
        if !name.is_empty() && !merged.iter().any(|n| n == name) {
            merged.push(name.to_string());
        }
    }
    merged
}
