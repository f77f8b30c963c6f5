//! Document store: whole-file access to a markdown vault.
//!
//! The sync engine only ever reads and writes complete documents under a
//! vault-relative path namespace (`"Linear/eng-123.md"`, `/`-separated on
//! every platform). [`FsVault`] is the on-disk store; [`MemVault`] backs
//! tests and embedded hosts. Writes through `FsVault` go to a sibling
//! temp file first and rename into place, so a crash never leaves a
//! half-written note.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use walkdir::WalkDir;

use crate::error::{Result, SyncError};
use crate::types::NoteState;

/// A single entry returned by [`DocumentStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEntry {
    pub path: String,
    pub kind: EntryKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// Whole-file document access over a hierarchical path namespace.
///
/// Paths are vault-relative, `/`-separated strings. `write` creates any
/// missing parent folders.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn exists(&self, path: &str) -> bool;

    async fn is_folder(&self, path: &str) -> bool;

    async fn read(&self, path: &str) -> Result<String>;

    async fn write(&self, path: &str, text: &str) -> Result<()>;

    /// Direct children of a folder (`""` for the vault root).
    async fn list(&self, folder: &str) -> Result<Vec<VaultEntry>>;

    /// Every markdown file in the vault, sorted by path.
    async fn list_markdown(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![String::new()];
        while let Some(folder) = pending.pop() {
            for entry in self.list(&folder).await? {
                match entry.kind {
                    EntryKind::Folder => pending.push(entry.path),
                    EntryKind::File => {
                        if entry.path.ends_with(".md") {
                            found.push(entry.path);
                        }
                    }
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Read a document and decode its frontmatter.
    async fn read_note(&self, path: &str) -> Result<NoteState> {
        let text = self.read(path).await?;
        Ok(NoteState::from_text(path, &text))
    }

    async fn write_note(&self, note: &NoteState) -> Result<()> {
        self.write(&note.path, &note.to_text()).await
    }

    /// Decode every markdown document in the vault. Unreadable files are
    /// logged and skipped, never fatal.
    async fn scan_notes(&self) -> Result<Vec<NoteState>> {
        let mut notes = Vec::new();
        for path in self.list_markdown().await? {
            match self.read_note(&path).await {
                Ok(note) => notes.push(note),
                Err(err) => log::warn!("Skipping unreadable note {}: {}", path, err),
            }
        }
        Ok(notes)
    }
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

/// Store rooted at a directory on disk.
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Vault-relative, `/`-joined form of an absolute path, or `None` when
    /// the path lies outside the root.
    pub fn to_relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl DocumentStore for FsVault {
    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.absolute(path)).await.unwrap_or(false)
    }

    async fn is_folder(&self, path: &str) -> bool {
        tokio::fs::metadata(self.absolute(path))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn read(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(self.absolute(path))
            .await
            .map_err(|e| SyncError::storage(path, e))
    }

    async fn write(&self, path: &str, text: &str) -> Result<()> {
        let absolute = self.absolute(path);
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::storage(path, e))?;
        }
        let tmp = absolute.with_extension("md.tmp~");
        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| SyncError::storage(path, e))?;
        tokio::fs::rename(&tmp, &absolute)
            .await
            .map_err(|e| SyncError::storage(path, e))?;
        Ok(())
    }

    async fn list(&self, folder: &str) -> Result<Vec<VaultEntry>> {
        let dir = self.absolute(folder);
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| SyncError::storage(folder, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| SyncError::storage(folder, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = if folder.is_empty() {
                name
            } else {
                format!("{}/{}", folder, name)
            };
            let kind = match entry.file_type().await {
                Ok(t) if t.is_dir() => EntryKind::Folder,
                _ => EntryKind::File,
            };
            entries.push(VaultEntry { path, kind });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn list_markdown(&self) -> Result<Vec<String>> {
        let mut found: Vec<String> = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "md"))
            .filter_map(|e| self.to_relative(e.path()))
            .collect();
        found.sort();
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Flat path→text map behind the same interface. Folders exist implicitly
/// whenever some file path passes through them.
#[derive(Default)]
pub struct MemVault {
    files: RwLock<BTreeMap<String, String>>,
}

impl MemVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous insert for test setup.
    pub fn seed(&self, path: &str, text: &str) {
        self.files.write().insert(path.to_string(), text.to_string());
    }
}

#[async_trait]
impl DocumentStore for MemVault {
    async fn exists(&self, path: &str) -> bool {
        let files = self.files.read();
        files.contains_key(path) || files.keys().any(|k| k.starts_with(&format!("{}/", path)))
    }

    async fn is_folder(&self, path: &str) -> bool {
        let files = self.files.read();
        !files.contains_key(path) && files.keys().any(|k| k.starts_with(&format!("{}/", path)))
    }

    async fn read(&self, path: &str) -> Result<String> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::storage(path, "no such document"))
    }

    async fn write(&self, path: &str, text: &str) -> Result<()> {
        self.files.write().insert(path.to_string(), text.to_string());
        Ok(())
    }

    async fn list(&self, folder: &str) -> Result<Vec<VaultEntry>> {
        let prefix = if folder.is_empty() {
            String::new()
        } else {
            format!("{}/", folder)
        };
        let files = self.files.read();
        let mut entries: BTreeMap<String, EntryKind> = BTreeMap::new();
        for key in files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    entries.insert(format!("{}{}", prefix, child), EntryKind::Folder);
                }
                None => {
                    entries.insert(key.clone(), EntryKind::File);
                }
            }
        }
        Ok(entries
            .into_iter()
            .map(|(path, kind)| VaultEntry { path, kind })
            .collect())
    }
}
