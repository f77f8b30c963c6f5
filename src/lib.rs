//! Bidirectional sync between Linear issues and a markdown vault.
//!
//! Remote issues project into `linear_*` frontmatter keys on plain
//! markdown notes; notes annotated with inline tags or folder config can
//! be promoted to new issues. A sync pass fetches what changed since the
//! last watermark, merges it into the vault without ever rewriting the
//! body of a linked note, and resolves field conflicts under a
//! configurable policy.

pub mod conflict;
pub mod error;
pub mod frontmatter;
pub mod linear;
pub mod note_config;
pub mod parser;
pub mod remote;
pub mod settings;
pub mod sync;
pub mod template;
pub mod types;
pub mod util;
pub mod vault;
pub mod watcher;

pub use error::{Result, SyncError};
pub use sync::{SyncEngine, SyncReport};
