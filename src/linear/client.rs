//! GraphQL client for the Linear API.
//!
//! Uses reqwest with the API key passed as the Authorization header. All
//! queries target `https://api.linear.app/graphql`. Mutations take field
//! names from the local side (team key, state name, user name, label
//! names) and resolve them to Linear ids here; an unknown optional
//! reference is skipped with a warning, an unknown required one fails the
//! call.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Result, SyncError};
use crate::remote::RemoteEntityService;
use crate::types::{EntityPatch, Issue, IssueLabel, NewIssue, TeamRef, UserRef, WorkflowState};

const LINEAR_API_URL: &str = "https://api.linear.app/graphql";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Issue selection shared by every query and mutation that returns issues.
const ISSUE_FIELDS: &str = "id identifier title description priority estimate url \
     createdAt updatedAt \
     state { id name type } \
     assignee { id name email } \
     team { id name key } \
     labels { nodes { id name color } }";

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Nodes<T> {
    nodes: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    id: String,
    identifier: String,
    title: String,
    description: Option<String>,
    priority: f64,
    estimate: Option<f64>,
    url: String,
    created_at: String,
    updated_at: String,
    state: StateNode,
    assignee: Option<UserNode>,
    team: TeamNode,
    labels: Nodes<LabelNode>,
}

#[derive(Deserialize)]
struct StateNode {
    id: String,
    name: String,
    #[serde(rename = "type")]
    category: String,
}

#[derive(Deserialize)]
struct UserNode {
    id: String,
    name: String,
    email: Option<String>,
}

#[derive(Deserialize)]
struct TeamNode {
    id: String,
    name: String,
    key: String,
}

#[derive(Deserialize)]
struct LabelNode {
    id: String,
    name: String,
    color: Option<String>,
}

impl From<IssueNode> for Issue {
    fn from(node: IssueNode) -> Self {
        Issue {
            id: node.id,
            identifier: node.identifier,
            title: node.title,
            description: node.description,
            state: WorkflowState {
                id: node.state.id,
                name: node.state.name,
                category: node.state.category,
            },
            assignee: node.assignee.map(|u| UserRef {
                id: u.id,
                name: u.name,
                email: u.email,
            }),
            team: TeamRef {
                id: node.team.id,
                name: node.team.name,
                key: node.team.key,
            },
            priority: node.priority.clamp(0.0, 4.0) as u8,
            estimate: node.estimate,
            labels: node
                .labels
                .nodes
                .into_iter()
                .map(|l| IssueLabel {
                    id: l.id,
                    name: l.name,
                    color: l.color,
                })
                .collect(),
            created_at: node.created_at,
            updated_at: node.updated_at,
            url: node.url,
        }
    }
}

#[derive(Deserialize)]
struct MutationPayload {
    success: bool,
    issue: Option<IssueNode>,
}

fn payload_issue(payload: MutationPayload, operation: &str) -> Result<Issue> {
    if !payload.success {
        return Err(SyncError::Api(format!(
            "Linear {} reported failure",
            operation
        )));
    }
    payload
        .issue
        .map(Issue::from)
        .ok_or_else(|| SyncError::Api(format!("Linear {} returned no issue", operation)))
}

/// Issue filter for an incremental fetch.
fn changed_filter(team_id: Option<&str>, since: Option<&str>) -> Value {
    let mut filter = serde_json::Map::new();
    if let Some(since) = since {
        filter.insert("updatedAt".into(), json!({ "gt": since }));
    }
    if let Some(id) = team_id {
        filter.insert("team".into(), json!({ "id": { "eq": id } }));
    }
    Value::Object(filter)
}

/// Viewer info returned by [`LinearClient::viewer`].
#[derive(Debug, Clone, Deserialize)]
pub struct ViewerInfo {
    pub name: String,
    pub email: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct LinearClient {
    client: reqwest::Client,
    api_key: String,
}

impl LinearClient {
    pub fn new(api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key: api_key.to_string(),
        }
    }

    async fn graphql<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> Result<T> {
        let body = json!({ "query": query, "variables": variables });
        let resp = self
            .client
            .post(LINEAR_API_URL)
            .header("Authorization", self.api_key.clone())
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("Linear API request failed: {}", e)))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SyncError::RateLimited);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(SyncError::Api(format!("Linear API error {}: {}", status, text)));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| SyncError::Api(format!("Failed to parse Linear response: {}", e)))?;

        if let Some(errors) = json.get("errors") {
            return Err(SyncError::Api(format!("Linear GraphQL errors: {}", errors)));
        }

        let data = json
            .get("data")
            .ok_or_else(|| SyncError::Api("Missing 'data' in Linear response".to_string()))?;

        serde_json::from_value(data.clone())
            .map_err(|e| SyncError::Api(format!("Failed to deserialize Linear data: {}", e)))
    }

    /// Authenticated viewer, used to validate an API key.
    pub async fn viewer(&self) -> Result<ViewerInfo> {
        #[derive(Deserialize)]
        struct ViewerResponse {
            viewer: ViewerInfo,
        }

        let resp: ViewerResponse = self.graphql("{ viewer { name email } }", Value::Null).await?;
        Ok(resp.viewer)
    }

    /// Resolve a team reference (key, name, or id, case-insensitive) to its id.
    async fn resolve_team(&self, team: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct TeamsResponse {
            teams: Nodes<TeamNode>,
        }

        let resp: TeamsResponse = self
            .graphql("{ teams(first: 100) { nodes { id name key } } }", Value::Null)
            .await?;
        resp.teams
            .nodes
            .into_iter()
            .find(|t| {
                t.key.eq_ignore_ascii_case(team)
                    || t.name.eq_ignore_ascii_case(team)
                    || t.id == team
            })
            .map(|t| t.id)
            .ok_or_else(|| SyncError::NotFound(format!("team '{}'", team)))
    }

    /// Resolve a user by display name or email, case-insensitive.
    async fn resolve_user(&self, name: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct UsersResponse {
            users: Nodes<UserNode>,
        }

        let resp: UsersResponse = self
            .graphql("{ users(first: 250) { nodes { id name email } } }", Value::Null)
            .await?;
        resp.users
            .nodes
            .into_iter()
            .find(|u| {
                u.name.eq_ignore_ascii_case(name)
                    || u.email.as_deref().map_or(false, |e| e.eq_ignore_ascii_case(name))
            })
            .map(|u| u.id)
            .ok_or_else(|| SyncError::NotFound(format!("user '{}'", name)))
    }

    /// Resolve a workflow state by name within a team.
    async fn resolve_state(&self, team_id: &str, name: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct TeamResponse {
            team: TeamStates,
        }
        #[derive(Deserialize)]
        struct TeamStates {
            states: Nodes<StateNode>,
        }

        let resp: TeamResponse = self
            .graphql(
                "query($team: String!) { team(id: $team) { states(first: 50) { nodes { id name type } } } }",
                json!({ "team": team_id }),
            )
            .await?;
        resp.team
            .states
            .nodes
            .into_iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.id)
            .ok_or_else(|| SyncError::NotFound(format!("workflow state '{}'", name)))
    }

    /// Resolve label names to ids across workspace and team labels.
    /// Unknown labels are skipped with a warning, never fatal.
    async fn resolve_labels(&self, names: &[String]) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct LabelsResponse {
            issue_labels: Nodes<LabelNode>,
        }

        let resp: LabelsResponse = self
            .graphql(
                "{ issueLabels(first: 250) { nodes { id name color } } }",
                Value::Null,
            )
            .await?;
        let mut ids = Vec::new();
        for name in names {
            match resp
                .issue_labels
                .nodes
                .iter()
                .find(|l| l.name.eq_ignore_ascii_case(name))
            {
                Some(label) => ids.push(label.id.clone()),
                None => log::warn!("Label '{}' does not exist in Linear, skipping", name),
            }
        }
        Ok(ids)
    }

    /// Resolve a project by name.
    async fn resolve_project(&self, name: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct ProjectsResponse {
            projects: Nodes<ProjectNode>,
        }
        #[derive(Deserialize)]
        struct ProjectNode {
            id: String,
            name: String,
        }

        let resp: ProjectsResponse = self
            .graphql("{ projects(first: 250) { nodes { id name } } }", Value::Null)
            .await?;
        resp.projects
            .nodes
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.id)
            .ok_or_else(|| SyncError::NotFound(format!("project '{}'", name)))
    }
}

#[async_trait]
impl RemoteEntityService for LinearClient {
    async fn fetch_changed(&self, team: Option<&str>, since: Option<&str>) -> Result<Vec<Issue>> {
        #[derive(Deserialize)]
        struct IssuesResponse {
            issues: Nodes<IssueNode>,
        }

        let team_id = match team {
            Some(team) => Some(self.resolve_team(team).await?),
            None => None,
        };
        let query = format!(
            "query($filter: IssueFilter) {{ issues(filter: $filter, first: 250, orderBy: updatedAt) {{ nodes {{ {} }} }} }}",
            ISSUE_FIELDS
        );
        let filter = changed_filter(team_id.as_deref(), since);
        let resp: IssuesResponse = self.graphql(&query, json!({ "filter": filter })).await?;
        Ok(resp.issues.nodes.into_iter().map(Issue::from).collect())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<Option<Issue>> {
        #[derive(Deserialize)]
        struct IssuesResponse {
            issues: Nodes<IssueNode>,
        }

        let query = format!(
            "query($filter: IssueFilter) {{ issues(filter: $filter, first: 1) {{ nodes {{ {} }} }} }}",
            ISSUE_FIELDS
        );
        let resp: IssuesResponse = self
            .graphql(&query, json!({ "filter": { "id": { "eq": id } } }))
            .await?;
        Ok(resp.issues.nodes.into_iter().next().map(Issue::from))
    }

    async fn create(&self, draft: NewIssue) -> Result<Issue> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CreateResponse {
            issue_create: MutationPayload,
        }

        let team_id = self.resolve_team(&draft.team).await?;
        let mut input = serde_json::Map::new();
        input.insert("teamId".into(), json!(team_id));
        input.insert("title".into(), json!(draft.title));
        if let Some(description) = &draft.description {
            input.insert("description".into(), json!(description));
        }
        if let Some(priority) = draft.priority {
            input.insert("priority".into(), json!(priority));
        }
        if let Some(estimate) = draft.estimate {
            input.insert("estimate".into(), json!(estimate));
        }
        if let Some(name) = &draft.assignee_name {
            match self.resolve_user(name).await {
                Ok(id) => {
                    input.insert("assigneeId".into(), json!(id));
                }
                Err(SyncError::NotFound(what)) => log::warn!("Skipping unknown {}", what),
                Err(e) => return Err(e),
            }
        }
        if !draft.label_names.is_empty() {
            let ids = self.resolve_labels(&draft.label_names).await?;
            if !ids.is_empty() {
                input.insert("labelIds".into(), json!(ids));
            }
        }
        if let Some(project) = &draft.project_name {
            match self.resolve_project(project).await {
                Ok(id) => {
                    input.insert("projectId".into(), json!(id));
                }
                Err(SyncError::NotFound(what)) => log::warn!("Skipping unknown {}", what),
                Err(e) => return Err(e),
            }
        }
        if let Some(status) = &draft.status_name {
            match self.resolve_state(&team_id, status).await {
                Ok(id) => {
                    input.insert("stateId".into(), json!(id));
                }
                Err(SyncError::NotFound(what)) => log::warn!("Skipping unknown {}", what),
                Err(e) => return Err(e),
            }
        }

        let query = format!(
            "mutation($input: IssueCreateInput!) {{ issueCreate(input: $input) {{ success issue {{ {} }} }} }}",
            ISSUE_FIELDS
        );
        let resp: CreateResponse = self
            .graphql(&query, json!({ "input": Value::Object(input) }))
            .await?;
        payload_issue(resp.issue_create, "issueCreate")
    }

    async fn update(&self, id: &str, patch: EntityPatch) -> Result<Issue> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct UpdateResponse {
            issue_update: MutationPayload,
        }

        let mut input = serde_json::Map::new();
        if let Some(title) = &patch.title {
            input.insert("title".into(), json!(title));
        }
        if let Some(description) = &patch.description {
            input.insert("description".into(), json!(description));
        }
        if let Some(priority) = patch.priority {
            input.insert("priority".into(), json!(priority));
        }
        if let Some(name) = &patch.assignee_name {
            let user_id = self.resolve_user(name).await?;
            input.insert("assigneeId".into(), json!(user_id));
        }
        if let Some(name) = &patch.state_name {
            // Workflow states are team-scoped; the issue tells us the team.
            let issue = self
                .fetch_by_id(id)
                .await?
                .ok_or_else(|| SyncError::NotFound(format!("issue '{}'", id)))?;
            let state_id = self.resolve_state(&issue.team.id, name).await?;
            input.insert("stateId".into(), json!(state_id));
        }
        if let Some(names) = &patch.label_names {
            let ids = self.resolve_labels(names).await?;
            input.insert("labelIds".into(), json!(ids));
        }

        let query = format!(
            "mutation($id: String!, $input: IssueUpdateInput!) {{ issueUpdate(id: $id, input: $input) {{ success issue {{ {} }} }} }}",
            ISSUE_FIELDS
        );
        let resp: UpdateResponse = self
            .graphql(&query, json!({ "id": id, "input": Value::Object(input) }))
            .await?;
        payload_issue(resp.issue_update, "issueUpdate")
    }
}
