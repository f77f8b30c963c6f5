//! Conflict detection and policy-driven resolution.
//!
//! Detection is a pure function: compare a fetched issue against a note's
//! last-known-synced state and list the fields that diverged. Nothing is
//! compared unless the note carries a last-synced stamp and the remote
//! record changed after it; until both hold, the two sides cannot have
//! drifted apart independently.
//!
//! Resolution assigns a winner to every conflict in a batch. The engine
//! applies a batch only when it is completely resolved; a partially
//! resolved batch is applied nowhere.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::types::{Issue, NoteState};
use crate::util;

/// How a divergent field gets its winner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    #[default]
    RemoteWins,
    LocalWins,
    /// Degrades to remote-wins. There is no per-field timestamp to
    /// arbitrate with, and inventing a tie-break here would be worse than
    /// the honest simplification.
    Timestamp,
    Manual,
}

/// A field the detector can flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictField {
    Title,
    Status,
    Assignee,
    Priority,
    Description,
    Labels,
}

impl ConflictField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictField::Title => "title",
            ConflictField::Status => "status",
            ConflictField::Assignee => "assignee",
            ConflictField::Priority => "priority",
            ConflictField::Description => "description",
            ConflictField::Labels => "labels",
        }
    }

    /// Only long-text and set-valued fields can be merged; everything else
    /// is a binary remote/local pick.
    pub fn is_mergeable(&self) -> bool {
        matches!(self, ConflictField::Description | ConflictField::Labels)
    }
}

impl std::fmt::Display for ConflictField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected per-field divergence. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub identifier: String,
    pub field: ConflictField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_value: Option<String>,
    pub detected_at: String,
}

impl ConflictRecord {
    /// Stable join key: identifier plus field.
    pub fn key(&self) -> String {
        format!("{}:{}", self.identifier, self.field)
    }
}

/// Resolution outcome for one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Remote,
    Local,
    Merge,
}

/// Interactive collaborator consulted under the manual policy. Returns a
/// winner map keyed by [`ConflictRecord::key`]; the engine treats an
/// incomplete map as "resolve nothing".
#[async_trait]
pub trait InteractiveResolver: Send + Sync {
    async fn present_choices(&self, conflicts: &[ConflictRecord]) -> HashMap<String, Winner>;
}

/// Compare a remote issue against local note state.
///
/// Returns an empty list unless the note has been synced before and the
/// remote record was updated strictly after that sync. When eligible, the
/// five tracked fields are checked independently and in a fixed order;
/// one match never suppresses another field's check.
pub fn detect(remote: &Issue, local: &NoteState) -> Vec<ConflictRecord> {
    let Some(last_synced) = local.last_synced().and_then(util::parse_iso) else {
        return Vec::new();
    };
    let Some(remote_updated) = util::parse_iso(&remote.updated_at) else {
        return Vec::new();
    };
    if remote_updated <= last_synced {
        return Vec::new();
    }

    let detected_at = Utc::now().to_rfc3339();
    let mut conflicts = Vec::new();
    let mut push = |field: ConflictField, remote_value: Option<String>, local_value: Option<String>| {
        conflicts.push(ConflictRecord {
            identifier: remote.identifier.clone(),
            field,
            remote_value,
            local_value,
            detected_at: detected_at.clone(),
        });
    };

    // A local side with no value makes no claim and cannot conflict; a
    // local value against a cleared remote one still does.
    if let Some(local_title) = local.local_title() {
        if local_title.trim() != remote.title.trim() {
            push(
                ConflictField::Title,
                Some(remote.title.clone()),
                Some(local_title),
            );
        }
    }

    if let Some(local_status) = local.local_status() {
        if local_status.trim() != remote.state.name.trim() {
            push(
                ConflictField::Status,
                Some(remote.state.name.clone()),
                Some(local_status.to_string()),
            );
        }
    }

    if let Some(local_assignee) = local.local_assignee() {
        let remote_assignee = remote.assignee.as_ref().map(|a| a.name.as_str());
        if remote_assignee != Some(local_assignee.trim()) {
            push(
                ConflictField::Assignee,
                remote_assignee.map(str::to_string),
                Some(local_assignee.to_string()),
            );
        }
    }

    if let Some(local_priority) = local.local_priority() {
        if local_priority != remote.priority as i64 {
            push(
                ConflictField::Priority,
                Some(remote.priority.to_string()),
                Some(local_priority.to_string()),
            );
        }
    }

    let local_description = local.local_description();
    if !local_description.is_empty() {
        let remote_description = remote.description.as_deref().map(str::trim).unwrap_or("");
        if remote_description != local_description.trim() {
            push(
                ConflictField::Description,
                remote.description.clone(),
                Some(local_description),
            );
        }
    }

    conflicts
}

/// Assign a winner to every conflict in a batch under the given policy.
pub struct ConflictResolver {
    policy: ConflictPolicy,
    prompt: Option<std::sync::Arc<dyn InteractiveResolver>>,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            prompt: None,
        }
    }

    pub fn with_prompt(policy: ConflictPolicy, prompt: std::sync::Arc<dyn InteractiveResolver>) -> Self {
        Self {
            policy,
            prompt: Some(prompt),
        }
    }

    /// Resolve a batch. The returned map has exactly one winner per
    /// conflict; anything less is an error and the caller must apply
    /// nothing.
    pub async fn resolve(
        &self,
        conflicts: &[ConflictRecord],
    ) -> Result<HashMap<String, Winner>> {
        if conflicts.is_empty() {
            return Ok(HashMap::new());
        }
        match self.policy {
            ConflictPolicy::RemoteWins => Ok(fixed_winner(conflicts, Winner::Remote)),
            ConflictPolicy::LocalWins => Ok(fixed_winner(conflicts, Winner::Local)),
            ConflictPolicy::Timestamp => {
                log::debug!(
                    "Timestamp policy has no per-field timestamps; resolving {} conflicts remote-wins",
                    conflicts.len()
                );
                Ok(fixed_winner(conflicts, Winner::Remote))
            }
            ConflictPolicy::Manual => {
                let Some(prompt) = &self.prompt else {
                    return Err(SyncError::UnresolvedConflicts {
                        resolved: 0,
                        total: conflicts.len(),
                    });
                };
                let winners = prompt.present_choices(conflicts).await;
                let resolved = conflicts
                    .iter()
                    .filter(|c| winners.contains_key(&c.key()))
                    .count();
                if resolved < conflicts.len() {
                    return Err(SyncError::UnresolvedConflicts {
                        resolved,
                        total: conflicts.len(),
                    });
                }
                for conflict in conflicts {
                    if winners.get(&conflict.key()) == Some(&Winner::Merge)
                        && !conflict.field.is_mergeable()
                    {
                        return Err(SyncError::Validation(format!(
                            "merge is not available for the {} field",
                            conflict.field
                        )));
                    }
                }
                Ok(winners)
            }
        }
    }
}

fn fixed_winner(conflicts: &[ConflictRecord], winner: Winner) -> HashMap<String, Winner> {
    conflicts.iter().map(|c| (c.key(), winner)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TeamRef, UserRef, WorkflowState, FM_ASSIGNEE, FM_LAST_SYNCED, FM_PRIORITY, FM_STATUS};
    use std::sync::Arc;

    fn remote_issue() -> Issue {
        Issue {
            id: "uuid-1".into(),
            identifier: "ENG-123".into(),
            title: "A".into(),
            description: Some("Remote description".into()),
            state: WorkflowState {
                id: "s1".into(),
                name: "Todo".into(),
                category: "unstarted".into(),
            },
            assignee: Some(UserRef {
                id: "u1".into(),
                name: "Alice".into(),
                email: None,
            }),
            team: TeamRef {
                id: "t1".into(),
                name: "Engineering".into(),
                key: "ENG".into(),
            },
            priority: 1,
            estimate: None,
            labels: Vec::new(),
            created_at: "2024-01-01T00:00:00.000Z".into(),
            updated_at: "2024-01-20T00:00:00.000Z".into(),
            url: "https://linear.app/acme/issue/ENG-123".into(),
        }
    }

    fn linked_note(last_synced: &str, body: &str) -> NoteState {
        let text = format!(
            "---\nlinear_id: uuid-1\nlinear_identifier: ENG-123\nlinear_last_synced: {}\n---\n{}",
            last_synced, body
        );
        NoteState::from_text("eng-123.md", &text)
    }

    #[test]
    fn test_gate_requires_last_synced() {
        let note = NoteState::from_text("n.md", "# B\n");
        assert!(detect(&remote_issue(), &note).is_empty());
    }

    #[test]
    fn test_gate_requires_remote_newer() {
        // Remote updated 2024-01-10, synced 2024-01-15: nothing to detect
        // even though every field differs.
        let mut remote = remote_issue();
        remote.updated_at = "2024-01-10T00:00:00.000Z".into();
        let note = linked_note("2024-01-15T00:00:00Z", "# Completely different\n");
        assert!(detect(&remote, &note).is_empty());
    }

    #[test]
    fn test_gate_is_strict() {
        let mut remote = remote_issue();
        remote.updated_at = "2024-01-15T00:00:00Z".into();
        let note = linked_note("2024-01-15T00:00:00Z", "# Different title\n");
        assert!(detect(&remote, &note).is_empty());
    }

    #[test]
    fn test_field_independence() {
        // Same priority, different title: exactly one record, for title.
        let mut note = linked_note("2024-01-15T00:00:00Z", "# B\n");
        note.frontmatter.insert(FM_PRIORITY, 1i64);
        let conflicts = detect(&remote_issue(), &note);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, ConflictField::Title);
        assert_eq!(conflicts[0].remote_value.as_deref(), Some("A"));
        assert_eq!(conflicts[0].local_value.as_deref(), Some("B"));
    }

    #[test]
    fn test_fields_compared_in_fixed_order() {
        let mut note = linked_note("2024-01-15T00:00:00Z", "# B\nLocal words\n");
        note.frontmatter.insert(FM_STATUS, "Done");
        note.frontmatter.insert(FM_ASSIGNEE, "Bob");
        note.frontmatter.insert(FM_PRIORITY, 3i64);
        let fields: Vec<ConflictField> = detect(&remote_issue(), &note)
            .iter()
            .map(|c| c.field)
            .collect();
        assert_eq!(
            fields,
            vec![
                ConflictField::Title,
                ConflictField::Status,
                ConflictField::Assignee,
                ConflictField::Priority,
                ConflictField::Description,
            ]
        );
    }

    #[test]
    fn test_absent_local_value_makes_no_claim() {
        // Frontmatter has no status/assignee/priority and the body has no
        // heading: only the description can conflict, and it matches.
        let note = linked_note("2024-01-15T00:00:00Z", "Remote description\n");
        assert!(detect(&remote_issue(), &note).is_empty());
    }

    #[test]
    fn test_local_value_against_cleared_remote_conflicts() {
        let mut remote = remote_issue();
        remote.assignee = None;
        let mut note = linked_note("2024-01-15T00:00:00Z", "");
        note.frontmatter.insert(FM_ASSIGNEE, "Alice");
        let conflicts = detect(&remote, &note);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, ConflictField::Assignee);
        assert_eq!(conflicts[0].remote_value, None);
        assert_eq!(conflicts[0].local_value.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_conflict_key_is_joinable() {
        let note = linked_note("2024-01-15T00:00:00Z", "# B\n");
        let conflicts = detect(&remote_issue(), &note);
        assert_eq!(conflicts[0].key(), "ENG-123:title");
    }

    fn sample_conflicts(n: usize) -> Vec<ConflictRecord> {
        let fields = [
            ConflictField::Title,
            ConflictField::Status,
            ConflictField::Description,
        ];
        (0..n)
            .map(|i| ConflictRecord {
                identifier: "ENG-123".into(),
                field: fields[i % fields.len()],
                remote_value: Some("r".into()),
                local_value: Some("l".into()),
                detected_at: "2024-01-20T00:00:00Z".into(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_remote_wins_resolves_everything() {
        let resolver = ConflictResolver::new(ConflictPolicy::RemoteWins);
        let conflicts = sample_conflicts(3);
        let winners = resolver.resolve(&conflicts).await.unwrap();
        assert_eq!(winners.len(), 3);
        assert!(winners.values().all(|w| *w == Winner::Remote));
    }

    #[tokio::test]
    async fn test_local_wins_resolves_everything() {
        let resolver = ConflictResolver::new(ConflictPolicy::LocalWins);
        let winners = resolver.resolve(&sample_conflicts(2)).await.unwrap();
        assert!(winners.values().all(|w| *w == Winner::Local));
    }

    #[tokio::test]
    async fn test_timestamp_degrades_to_remote_wins() {
        let resolver = ConflictResolver::new(ConflictPolicy::Timestamp);
        let winners = resolver.resolve(&sample_conflicts(2)).await.unwrap();
        assert!(winners.values().all(|w| *w == Winner::Remote));
    }

    struct PartialPrompt;

    #[async_trait]
    impl InteractiveResolver for PartialPrompt {
        async fn present_choices(
            &self,
            conflicts: &[ConflictRecord],
        ) -> HashMap<String, Winner> {
            // Answers all but the last conflict.
            conflicts
                .iter()
                .take(conflicts.len() - 1)
                .map(|c| (c.key(), Winner::Local))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_manual_incomplete_batch_is_an_error() {
        let resolver =
            ConflictResolver::with_prompt(ConflictPolicy::Manual, Arc::new(PartialPrompt));
        let mut conflicts = sample_conflicts(2);
        conflicts[1].field = ConflictField::Priority; // distinct keys
        let err = resolver.resolve(&conflicts).await.unwrap_err();
        match err {
            SyncError::UnresolvedConflicts { resolved, total } => {
                assert_eq!((resolved, total), (1, 2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    struct MergeEverything;

    #[async_trait]
    impl InteractiveResolver for MergeEverything {
        async fn present_choices(
            &self,
            conflicts: &[ConflictRecord],
        ) -> HashMap<String, Winner> {
            conflicts.iter().map(|c| (c.key(), Winner::Merge)).collect()
        }
    }

    #[tokio::test]
    async fn test_merge_only_for_mergeable_fields() {
        let resolver =
            ConflictResolver::with_prompt(ConflictPolicy::Manual, Arc::new(MergeEverything));

        let description_only = vec![ConflictRecord {
            identifier: "ENG-123".into(),
            field: ConflictField::Description,
            remote_value: Some("r".into()),
            local_value: Some("l".into()),
            detected_at: "2024-01-20T00:00:00Z".into(),
        }];
        assert!(resolver.resolve(&description_only).await.is_ok());

        let title = vec![ConflictRecord {
            identifier: "ENG-123".into(),
            field: ConflictField::Title,
            remote_value: Some("r".into()),
            local_value: Some("l".into()),
            detected_at: "2024-01-20T00:00:00Z".into(),
        }];
        let err = resolver.resolve(&title).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_manual_without_prompt_resolves_nothing() {
        let resolver = ConflictResolver::new(ConflictPolicy::Manual);
        let err = resolver.resolve(&sample_conflicts(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::UnresolvedConflicts { .. }));
    }

    #[test]
    fn test_policy_serde_vocabulary() {
        assert_eq!(
            serde_json::to_string(&ConflictPolicy::RemoteWins).unwrap(),
            "\"remote-wins\""
        );
        let policy: ConflictPolicy = serde_json::from_str("\"local-wins\"").unwrap();
        assert_eq!(policy, ConflictPolicy::LocalWins);
    }
}
