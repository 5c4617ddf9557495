//! Records, collection keys, and client-local collection views.
//!
//! A record's identity is a two-state fact, not an inferred one: either the
//! store has assigned it an id (`Persisted`) or the originating client minted
//! a temporary one (`Local`). The transition is a one-way, in-place swap,
//! never a second insertion.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Identity of one logical entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordId {
    /// Client-minted, store-incompatible, visible only to the originating
    /// client until commit.
    Local(Uuid),
    /// Store-assigned, visible to all clients after sync.
    Persisted(String),
}

impl RecordId {
    pub fn local() -> Self {
        RecordId::Local(Uuid::new_v4())
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, RecordId::Persisted(_))
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Local(id) => write!(f, "local:{id}"),
            RecordId::Persisted(id) => write!(f, "{id}"),
        }
    }
}

/// What kind of entity a record represents. Structurally interchangeable for
/// this core: a canvas node streams and syncs exactly like a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Message,
    CanvasNode,
    Session,
    Artifact,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Message => "message",
            RecordKind::CanvasNode => "canvas_node",
            RecordKind::Session => "session",
            RecordKind::Artifact => "artifact",
        }
    }
}

/// Lifecycle state of a record in the originating client's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// A stream is (or was) feeding this record; not yet durably saved.
    Streaming,
    /// Committed to the store.
    Complete,
    /// Stream or persist failed. The record stays visible so the caller can
    /// offer a manual retry; it is never retried automatically and never
    /// silently removed.
    Failed,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Streaming => "streaming",
            RecordState::Complete => "complete",
            RecordState::Failed => "failed",
        }
    }
}

/// One logical entity (message, canvas node, session, artifact).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub kind: RecordKind,
    /// Owning collection parent (session id for messages, board id for
    /// canvas nodes, ...).
    pub parent_id: String,
    pub content: String,
    pub state: RecordState,
    pub created_at: String,
}

impl Record {
    /// Mint a local placeholder record with empty content.
    pub fn new_local(kind: RecordKind, parent_id: &str) -> Self {
        Self {
            id: RecordId::local(),
            kind,
            parent_id: parent_id.to_string(),
            content: String::new(),
            state: RecordState::Streaming,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Identifies one shared collection: all records of `kind` under `parent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub kind: RecordKind,
    pub parent_id: String,
}

impl CollectionKey {
    pub fn new(kind: RecordKind, parent_id: &str) -> Self {
        Self {
            kind,
            parent_id: parent_id.to_string(),
        }
    }

    /// Channel name used on the refresh bus, e.g. `"message:sess-42"`.
    pub fn channel(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.parent_id)
    }
}

// ─── CollectionView ───────────────────────────────────────────────────────────

/// A client-local ordered view of one shared collection.
///
/// At most one record per logical entity. Eventually consistent with the
/// authoritative store, never required to be instantaneously consistent.
#[derive(Debug, Default, Clone)]
pub struct CollectionView {
    records: Vec<Record>,
}

impl CollectionView {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.iter().find(|r| &r.id == id)
    }

    /// Append a record. A record with the same identity must not already be
    /// present; duplicates are dropped with a warning rather than displayed
    /// twice.
    pub fn insert(&mut self, record: Record) {
        if self.get(&record.id).is_some() {
            tracing::warn!(id = %record.id, "duplicate record insert ignored");
            return;
        }
        self.records.push(record);
    }

    /// Overwrite a record's content in place, preserving its position.
    pub fn update_content(&mut self, id: &RecordId, content: &str) -> bool {
        match self.records.iter_mut().find(|r| &r.id == id) {
            Some(record) => {
                record.content = content.to_string();
                true
            }
            None => false,
        }
    }

    /// Swap a local identity for the persisted one in place, preserving
    /// position, so previously rendered state for that slot carries over.
    /// Content and state are taken from the persisted record.
    pub fn replace_identity(&mut self, local_id: &RecordId, persisted: Record) -> bool {
        match self.records.iter_mut().find(|r| &r.id == local_id) {
            Some(slot) => {
                *slot = persisted;
                true
            }
            None => false,
        }
    }

    pub fn mark_failed(&mut self, id: &RecordId) -> bool {
        match self.records.iter_mut().find(|r| &r.id == id) {
            Some(record) => {
                record.state = RecordState::Failed;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &RecordId) -> bool {
        let before = self.records.len();
        self.records.retain(|r| &r.id != id);
        self.records.len() != before
    }

    /// Replace this view with a freshly fetched authoritative snapshot.
    ///
    /// Persisted identities always win: any record the fetch returned takes
    /// the store's ordering and content. Local-identity records that have not
    /// been committed yet (still streaming, or flagged failed) have no
    /// persisted counterpart and are carried over after the fetched records,
    /// in their previous relative order. A refresh must not make an
    /// in-flight optimistic entry vanish.
    pub fn replace_with(&mut self, fetched: Vec<Record>) {
        let mut next = fetched;
        for old in self.records.drain(..) {
            if !old.id.is_persisted() && next.iter().all(|r| r.id != old.id) {
                next.push(old);
            }
        }
        self.records = next;
    }
}

// ─── SharedViews ──────────────────────────────────────────────────────────────

/// All collection views held by one client, keyed by channel name.
///
/// Clones are cheap (Arc-backed). Mutated only by the owning client's sync
/// controller and optimistic entry manager; decoder internals never touch it
/// directly.
#[derive(Clone, Default)]
pub struct SharedViews {
    inner: Arc<Mutex<HashMap<String, CollectionView>>>,
}

impl SharedViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a closure against the view for `key`, creating it empty on first
    /// touch.
    pub async fn with<R>(
        &self,
        key: &CollectionKey,
        f: impl FnOnce(&mut CollectionView) -> R,
    ) -> R {
        let mut views = self.inner.lock().await;
        f(views.entry(key.channel()).or_default())
    }

    /// A point-in-time copy of the records in `key`'s view.
    pub async fn snapshot(&self, key: &CollectionKey) -> Vec<Record> {
        self.with(key, |view| view.records().to_vec()).await
    }
}
