//! Core data model: the remote issue record, its local document projection,
//! and the mutation payloads exchanged with the remote service.
//!
//! An `Issue` is owned by Linear; this crate only ever holds a projection of
//! it. A `NoteState` is the local side: the frontmatter keys listed below
//! plus free-form body text. The `linear_*` key-set is a compatibility
//! surface; existing vaults carry these exact names.

use serde::{Deserialize, Serialize};

use crate::frontmatter::{self, FrontmatterMap, Value};
use crate::parser;

// Frontmatter keys (compatibility surface, never rename).
pub const FM_ID: &str = "linear_id";
pub const FM_IDENTIFIER: &str = "linear_identifier";
pub const FM_TITLE: &str = "linear_title";
pub const FM_STATUS: &str = "linear_status";
pub const FM_ASSIGNEE: &str = "linear_assignee";
pub const FM_PRIORITY: &str = "linear_priority";
pub const FM_ESTIMATE: &str = "linear_estimate";
pub const FM_TEAM: &str = "linear_team";
pub const FM_LABELS: &str = "linear_labels";
pub const FM_URL: &str = "linear_url";
pub const FM_UPDATED: &str = "linear_updated";
pub const FM_LAST_SYNCED: &str = "linear_last_synced";

/// Every key the sync owns, in projection order. Keys outside this set are
/// user property and never touched.
pub const FM_KEYS: [&str; 12] = [
    FM_ID,
    FM_IDENTIFIER,
    FM_TITLE,
    FM_STATUS,
    FM_ASSIGNEE,
    FM_PRIORITY,
    FM_ESTIMATE,
    FM_TEAM,
    FM_LABELS,
    FM_URL,
    FM_UPDATED,
    FM_LAST_SYNCED,
];

/// Workflow state of an issue (Linear's `state` node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub id: String,
    pub name: String,
    /// Linear state category: backlog, unstarted, started, completed, canceled.
    pub category: String,
}

/// A user reference as the API returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// The team owning an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRef {
    pub id: String,
    pub name: String,
    /// Short key, the "ENG" in "ENG-123".
    pub key: String,
}

/// An issue label. Order within an issue's label list is meaningful and
/// preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueLabel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// A Linear issue: the remote, service-owned record this crate mirrors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Opaque stable id (UUID on the wire).
    pub id: String,
    /// Human-readable stable identifier, e.g. "ENG-123".
    pub identifier: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub state: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<UserRef>,
    pub team: TeamRef,
    /// 0 = none, 1 = urgent, 4 = low.
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
    #[serde(default)]
    pub labels: Vec<IssueLabel>,
    /// ISO-8601, as reported by the service.
    pub created_at: String,
    pub updated_at: String,
    pub url: String,
}

impl Issue {
    /// The full `linear_*` frontmatter projection of this issue.
    ///
    /// `last_synced` is stamped by the orchestrator after a successful
    /// merge; it must never run ahead of an actual write.
    pub fn to_frontmatter(&self, last_synced: &str) -> FrontmatterMap {
        let mut map = FrontmatterMap::new();
        map.insert(FM_ID, self.id.as_str());
        map.insert(FM_IDENTIFIER, self.identifier.as_str());
        map.insert(FM_TITLE, self.title.as_str());
        map.insert(FM_STATUS, self.state.name.as_str());
        if let Some(assignee) = &self.assignee {
            map.insert(FM_ASSIGNEE, assignee.name.as_str());
        }
        map.insert(FM_PRIORITY, self.priority as i64);
        if let Some(estimate) = self.estimate {
            map.insert(FM_ESTIMATE, Value::Float(estimate));
        }
        map.insert(FM_TEAM, self.team.key.as_str());
        if !self.labels.is_empty() {
            map.insert(
                FM_LABELS,
                Value::Seq(
                    self.labels
                        .iter()
                        .map(|l| Value::Str(l.name.clone()))
                        .collect(),
                ),
            );
        }
        map.insert(FM_URL, self.url.as_str());
        map.insert(FM_UPDATED, self.updated_at.as_str());
        map.insert(FM_LAST_SYNCED, last_synced);
        map
    }
}

/// Local document state: decoded frontmatter plus body text.
#[derive(Debug, Clone)]
pub struct NoteState {
    /// Vault-relative path.
    pub path: String,
    pub frontmatter: FrontmatterMap,
    /// Text after the frontmatter block (the user's prose).
    pub body: String,
}

impl NoteState {
    pub fn from_text(path: impl Into<String>, text: &str) -> Self {
        Self {
            path: path.into(),
            frontmatter: frontmatter::decode(text),
            body: frontmatter::strip_frontmatter(text).to_string(),
        }
    }

    /// Opaque remote id, when this document is linked.
    pub fn linear_id(&self) -> Option<&str> {
        self.frontmatter.get_str(FM_ID)
    }

    /// Human-readable identifier ("ENG-123"), when present.
    pub fn identifier(&self) -> Option<&str> {
        self.frontmatter.get_str(FM_IDENTIFIER)
    }

    /// A document is linked once it carries a `linear_id`. Linked documents
    /// never have their body overwritten by sync.
    pub fn is_linked(&self) -> bool {
        self.linear_id().is_some()
    }

    pub fn last_synced(&self) -> Option<&str> {
        self.frontmatter.get_str(FM_LAST_SYNCED)
    }

    /// Title as the document claims it: the first `#` heading's text.
    pub fn local_title(&self) -> Option<String> {
        parser::first_heading(&self.body)
    }

    pub fn local_status(&self) -> Option<&str> {
        self.frontmatter.get_str(FM_STATUS)
    }

    pub fn local_assignee(&self) -> Option<&str> {
        self.frontmatter.get_str(FM_ASSIGNEE)
    }

    pub fn local_priority(&self) -> Option<i64> {
        self.frontmatter.get_int(FM_PRIORITY)
    }

    /// Body prepared for description comparison: heading and trailer
    /// stripped, edges trimmed.
    pub fn local_description(&self) -> String {
        parser::note_body_for_compare(&self.body)
    }

    /// Serialize back to full document text.
    pub fn to_text(&self) -> String {
        frontmatter::encode(&self.body, &self.frontmatter)
    }
}

/// Field-level mutation pushed to the remote service when a conflict
/// resolves local-wins (or merge). Names are used where the remote API
/// wants ids; translating name → id is the client's concern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub state_name: Option<String>,
    pub assignee_name: Option<String>,
    pub priority: Option<u8>,
    pub label_names: Option<Vec<String>>,
}

impl EntityPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.state_name.is_none()
            && self.assignee_name.is_none()
            && self.priority.is_none()
            && self.label_names.is_none()
    }
}

/// Fields for creating a new issue from a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewIssue {
    /// Team key or name; required, validated before any network call.
    pub team: String,
    pub title: String,
    pub description: Option<String>,
    pub assignee_name: Option<String>,
    pub priority: Option<u8>,
    pub estimate: Option<f64>,
    pub label_names: Vec<String>,
    pub project_name: Option<String>,
    pub status_name: Option<String>,
}
