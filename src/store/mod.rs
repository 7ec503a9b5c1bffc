//! Session-scoped persistence.
//!
//! Every artifact belongs to exactly one session:
//!
//! ```text
//! sessions/session-<id>/
//!     chat.json                append-only ordered log of ChatMessage
//!     notes.json               session-scoped notes
//!     email_drafts/
//!         index.json           ordered list of draft ids (rebuildable)
//!         draft_<id>.json      one file per draft
//!     files/<uploaded blobs>
//! global/notes.json            legacy global notes (back-compat only)
//! ```
//!
//! Writes to a single artifact are serialized by a per-file RwLock and are
//! write-to-temp-then-rename, so readers see either the pre-write or the
//! post-write state and a crash never leaves a torn file.

pub mod drafts;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::ChatMessage;

pub use drafts::{DraftError, DraftStatus, EmailDraft, EmailPriority, EmailTone};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    /// The requested artifact does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A draft state transition violated the permitted edges.
    #[error(transparent)]
    Draft(#[from] DraftError),
}

/// Metadata for one uploaded file blob.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub name: String,
    pub size_bytes: u64,
}

/// Hierarchical session store rooted at a data directory.
pub struct SessionStore {
    root: PathBuf,
    locks: tokio::sync::Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl SessionStore {
    /// Open (or lazily create) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub(crate) fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("session-{session_id}"))
    }

    fn chat_file(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("chat.json")
    }

    fn notes_file(&self, session_id: Option<&str>) -> PathBuf {
        match session_id {
            Some(id) => self.session_dir(id).join("notes.json"),
            None => self.root.join("global").join("notes.json"),
        }
    }

    fn files_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("files")
    }

    /// One lock per artifact path, created on first use.
    pub(crate) async fn lock_for(&self, path: &Path) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Read a JSON artifact under the read half of its lock.
    pub(crate) async fn read_json<T: DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, StoreError> {
        let lock = self.lock_for(path).await;
        let _guard = lock.read().await;
        read_json_unlocked(path).await
    }

    /// Write a JSON artifact atomically under the write half of its lock.
    pub(crate) async fn write_json<T: Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(path).await;
        let _guard = lock.write().await;
        write_json_unlocked(path, value).await
    }

    // ── Chat transcript ──

    /// Append one message to its session's transcript.
    pub async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let path = self.chat_file(&message.session_id);
        let lock = self.lock_for(&path).await;
        let _guard = lock.write().await;

        let mut messages: Vec<ChatMessage> =
            read_json_unlocked(&path).await?.unwrap_or_default();
        messages.push(message.clone());
        write_json_unlocked(&path, &messages).await
    }

    /// Load the last `limit` messages, ordered by timestamp (oldest first).
    pub async fn load_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let path = self.chat_file(session_id);
        let mut messages: Vec<ChatMessage> =
            self.read_json(&path).await?.unwrap_or_default();
        messages.sort_by_key(|m| m.timestamp);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    // ── Notes ──

    /// Append a note, returning its id. `session_id = None` targets the
    /// legacy global notes file.
    pub async fn save_note(
        &self,
        session_id: Option<&str>,
        mut note: serde_json::Value,
    ) -> Result<String, StoreError> {
        let path = self.notes_file(session_id);
        let lock = self.lock_for(&path).await;
        let _guard = lock.write().await;

        let mut notes: Vec<serde_json::Value> =
            read_json_unlocked(&path).await?.unwrap_or_default();
        let id = Uuid::new_v4().to_string();
        if let Some(obj) = note.as_object_mut() {
            obj.insert("id".to_owned(), serde_json::Value::String(id.clone()));
        }
        notes.push(note);
        write_json_unlocked(&path, &notes).await?;
        Ok(id)
    }

    /// Load all notes for a session (or the global file).
    pub async fn list_notes(
        &self,
        session_id: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let path = self.notes_file(session_id);
        Ok(self.read_json(&path).await?.unwrap_or_default())
    }

    // ── Uploaded files ──

    /// Persist an uploaded blob under the session's files directory.
    pub async fn save_file(
        &self,
        session_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let dir = self.files_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(sanitize_file_name(name));
        let lock = self.lock_for(&path).await;
        let _guard = lock.write().await;

        let tmp = temp_sibling(&path);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// List uploaded blobs for a session.
    pub async fn list_files(&self, session_id: &str) -> Result<Vec<StoredFile>, StoreError> {
        let dir = self.files_dir(session_id);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                out.push(StoredFile {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size_bytes: meta.len(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Load one uploaded blob.
    pub async fn load_file(&self, session_id: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.files_dir(session_id).join(sanitize_file_name(name));
        let lock = self.lock_for(&path).await;
        let _guard = lock.read().await;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("file {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Read without taking the artifact lock (caller holds it).
async fn read_json_unlocked<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomic write without taking the artifact lock (caller holds it).
async fn write_json_unlocked<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = temp_sibling(path);
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Unique temp sibling so concurrent writers of different artifacts never collide.
fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_owned());
    name.push_str(&format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

/// Keep uploaded names inside the files directory.
fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_owned());
    if base.is_empty() || base == "." || base == ".." {
        "upload".to_owned()
    } else {
        base
    }
}
