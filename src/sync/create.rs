//! Issue creation from a vault document.
//!
//! The push side: a human drafts a note, annotates it with inline tags or
//! folder config, and promotes it to a tracked issue. Creation defaults
//! stack global settings under folder config under in-note config, and a
//! team must be known before any network traffic happens. On success the
//! remote projection is written into the document's frontmatter and the
//! body is left exactly as the author wrote it.

use chrono::Utc;

use crate::error::{Result, SyncError};
use crate::note_config::NoteConfig;
use crate::parser;
use crate::sync::{project_remote, SyncEngine};
use crate::types::{Issue, NewIssue, NoteState};

impl SyncEngine {
    /// Promote an unlinked vault document to a new tracked issue.
    pub async fn create_issue_from_note(&self, path: &str) -> Result<Issue> {
        let text = self.store().read(path).await?;
        let note = NoteState::from_text(path, &text);
        if note.is_linked() {
            return Err(SyncError::Validation(format!(
                "{} is already linked to {}",
                path,
                note.identifier().unwrap_or("an issue")
            )));
        }

        let settings = self.settings().snapshot();
        let defaults = NoteConfig {
            team: settings.team_id.clone(),
            ..Default::default()
        };
        let folder = self.resolver().resolve_for(path).await;
        let in_note = parser::extract_config(&text);
        let config = defaults.overlay(&folder).overlay(&in_note);

        let Some(team) = config.team else {
            return Err(SyncError::Validation(
                "a team is required to create an issue; set one inline (@team/...), \
                 in .linear.json, or in settings"
                    .to_string(),
            ));
        };

        // Status and estimate have no folder-config counterpart; they only
        // ever arrive as inline tags.
        let tags = parser::extract_tags(&note.body);

        let title = note
            .local_title()
            .unwrap_or_else(|| note_stem(path).to_string());
        let description = parser::generate_description(&text);

        let draft = NewIssue {
            team,
            title,
            description: if description.is_empty() {
                None
            } else {
                Some(description)
            },
            assignee_name: config.assignee,
            priority: config.priority,
            estimate: tags.estimate,
            label_names: config.labels.unwrap_or_default(),
            project_name: config.project,
            status_name: tags.status,
        };

        log::info!("Creating issue from {} in team {}", path, draft.team);
        let issue = self.remote().create(draft).await?;
        log::info!("Created {} from {}", issue.identifier, path);

        let mut note = note;
        project_remote(&mut note, &issue, &Utc::now().to_rfc3339());
        self.store().write_note(&note).await?;
        Ok(issue)
    }
}

/// File stem of a vault path, the fallback issue title.
fn note_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".md").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::remote::RemoteEntityService;
    use crate::settings::SettingsStore;
    use crate::types::{EntityPatch, IssueLabel, TeamRef, UserRef, WorkflowState};
    use crate::vault::{DocumentStore, MemVault};

    /// Remote double that answers `create` from a script and refuses
    /// everything else.
    struct CreateOnlyRemote {
        drafts: Mutex<Vec<NewIssue>>,
    }

    impl CreateOnlyRemote {
        fn new() -> Self {
            Self {
                drafts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteEntityService for CreateOnlyRemote {
        async fn fetch_changed(&self, _team: Option<&str>, _since: Option<&str>) -> crate::error::Result<Vec<Issue>> {
            panic!("unexpected fetch_changed");
        }

        async fn fetch_by_id(&self, _id: &str) -> crate::error::Result<Option<Issue>> {
            panic!("unexpected fetch_by_id");
        }

        async fn create(&self, draft: NewIssue) -> crate::error::Result<Issue> {
            let issue = Issue {
                id: "uuid-new".into(),
                identifier: "ENG-77".into(),
                title: draft.title.clone(),
                description: draft.description.clone(),
                state: WorkflowState {
                    id: "s1".into(),
                    name: draft.status_name.clone().unwrap_or_else(|| "Todo".into()),
                    category: "unstarted".into(),
                },
                assignee: draft.assignee_name.clone().map(|name| UserRef {
                    id: "u1".into(),
                    name,
                    email: None,
                }),
                team: TeamRef {
                    id: "t1".into(),
                    name: "Engineering".into(),
                    key: "ENG".into(),
                },
                priority: draft.priority.unwrap_or(0),
                estimate: draft.estimate,
                labels: draft
                    .label_names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| IssueLabel {
                        id: format!("l{}", i),
                        name: name.clone(),
                        color: None,
                    })
                    .collect(),
                created_at: "2024-03-01T00:00:00Z".into(),
                updated_at: "2024-03-01T00:00:00Z".into(),
                url: "https://linear.app/acme/issue/ENG-77".into(),
            };
            self.drafts.lock().push(draft);
            Ok(issue)
        }

        async fn update(&self, _id: &str, _patch: EntityPatch) -> crate::error::Result<Issue> {
            panic!("unexpected update");
        }
    }

    fn engine_over(
        vault: Arc<MemVault>,
        remote: Arc<CreateOnlyRemote>,
        dir: &tempfile::TempDir,
    ) -> SyncEngine {
        let settings = Arc::new(SettingsStore::open(dir.path()));
        SyncEngine::new(vault, remote, settings)
    }

    #[tokio::test]
    async fn test_create_requires_team_before_any_network_call() {
        let vault = Arc::new(MemVault::new());
        vault.seed("inbox/idea.md", "# An idea\n\nSome text.\n");
        let remote = Arc::new(CreateOnlyRemote::new());
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_over(vault, remote.clone(), &dir);

        // The panicking double proves no network call happened.
        let err = engine.create_issue_from_note("inbox/idea.md").await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(remote.drafts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_linked_note() {
        let vault = Arc::new(MemVault::new());
        vault.seed(
            "inbox/linked.md",
            "---\nlinear_id: uuid-1\nlinear_identifier: ENG-1\n---\n# Linked\n",
        );
        let remote = Arc::new(CreateOnlyRemote::new());
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_over(vault, remote, &dir);

        let err = engine
            .create_issue_from_note("inbox/linked.md")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_stacks_config_and_links_note() {
        let vault = Arc::new(MemVault::new());
        vault.seed(
            "work/.linear.json",
            r#"{"team": "ENG", "assignee": "Alice", "labels": ["from-vault"]}"#,
        );
        vault.seed(
            "work/fix-it.md",
            "# Fix the login flow\n\n@assignee/Bob @estimate/3 #bug\n\nUsers get logged out.\n",
        );
        let remote = Arc::new(CreateOnlyRemote::new());
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_over(vault.clone(), remote.clone(), &dir);

        let issue = engine.create_issue_from_note("work/fix-it.md").await.unwrap();
        assert_eq!(issue.identifier, "ENG-77");

        let draft = remote.drafts.lock().remove(0);
        assert_eq!(draft.team, "ENG");
        // Inline tag beats the folder config.
        assert_eq!(draft.assignee_name.as_deref(), Some("Bob"));
        assert_eq!(draft.estimate, Some(3.0));
        assert_eq!(
            draft.label_names,
            vec!["from-vault".to_string(), "bug".to_string()]
        );
        assert_eq!(draft.title, "Fix the login flow");
        let description = draft.description.unwrap();
        assert!(description.contains("Users get logged out."));
        assert!(!description.contains("@assignee"), "tags never reach the remote");
        assert!(!description.contains("# Fix the login flow"), "heading mirrors the title field");

        // Write-back linked the document without touching the body.
        let note = vault.read_note("work/fix-it.md").await.unwrap();
        assert_eq!(note.linear_id(), Some("uuid-new"));
        assert!(note.body.contains("Users get logged out."));
        assert!(note.last_synced().is_some());
    }

    #[tokio::test]
    async fn test_create_title_falls_back_to_file_stem() {
        let vault = Arc::new(MemVault::new());
        vault.seed(".linear.json", r#"{"team": "ENG"}"#);
        vault.seed("quick-thought.md", "No heading here.\n");
        let remote = Arc::new(CreateOnlyRemote::new());
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_over(vault, remote.clone(), &dir);

        engine.create_issue_from_note("quick-thought.md").await.unwrap();
        assert_eq!(remote.drafts.lock()[0].title, "quick-thought");
    }

    #[test]
    fn test_note_stem() {
        assert_eq!(note_stem("a/b/idea.md"), "idea");
        assert_eq!(note_stem("idea.md"), "idea");
        assert_eq!(note_stem("odd-name"), "odd-name");
    }
}
