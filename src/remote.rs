//! Remote entity service: the tracker-facing seam of the sync engine.
//!
//! Everything the engine needs from the issue tracker fits four calls.
//! The GraphQL client implements this against the live API; tests script
//! it. Errors keep their transport classification (`RateLimited` distinct
//! from other failures) so callers can decide what to retry.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{EntityPatch, Issue, NewIssue};

#[async_trait]
pub trait RemoteEntityService: Send + Sync {
    /// Issues updated after `since` (RFC 3339), optionally limited to one
    /// team. `None` for `since` means everything visible.
    async fn fetch_changed(&self, team: Option<&str>, since: Option<&str>) -> Result<Vec<Issue>>;

    /// A single issue by internal id, `None` when the id is unknown.
    async fn fetch_by_id(&self, id: &str) -> Result<Option<Issue>>;

    /// Create an issue from local draft fields.
    async fn create(&self, draft: NewIssue) -> Result<Issue>;

    /// Apply a sparse field patch to an existing issue and return its new
    /// remote state.
    async fn update(&self, id: &str, patch: EntityPatch) -> Result<Issue>;
}
