//! End-to-end tests for the stream decode pipeline: chunk feed through
//! splitter, normalizer and accumulator into the optimistic record, with
//! commit against a real SQLite store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;

use trellis_sync::config::SyncConfig;
use trellis_sync::record::{CollectionKey, Record, RecordKind, RecordState};
use trellis_sync::store::{RecordStore, SqliteStore};
use trellis_sync::stream::event::{parse, StreamEvent};
use trellis_sync::stream::splitter::FrameSplitter;
use trellis_sync::stream::ChunkSource;
use trellis_sync::{SyncContext, SyncError};

mod common;

/// Chunk source that replays a scripted list of chunks, then reports close.
struct ScriptedChunks {
    chunks: VecDeque<Vec<u8>>,
}

impl ScriptedChunks {
    fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
        }
    }
}

#[async_trait::async_trait]
impl ChunkSource for ScriptedChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.chunks.pop_front())
    }
}

/// Chunk source that fails with a transport error after draining its chunks.
struct FailingChunks {
    chunks: VecDeque<Vec<u8>>,
}

#[async_trait::async_trait]
impl ChunkSource for FailingChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SyncError> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => Err(SyncError::Transport("connection reset by peer".into())),
        }
    }
}

/// Chunk source that trips a cancel flag after its first chunk, simulating a
/// caller-side cancel while the stream is mid-flight.
struct CancellingChunks {
    chunks: VecDeque<Vec<u8>>,
    cancel: Arc<AtomicBool>,
    served: usize,
}

#[async_trait::async_trait]
impl ChunkSource for CancellingChunks {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SyncError> {
        if self.served >= 1 {
            self.cancel.store(true, Ordering::Release);
        }
        self.served += 1;
        Ok(self.chunks.pop_front())
    }
}

async fn make_ctx() -> (TempDir, SyncContext) {
    common::init_tracing();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path()).await.unwrap());
    (dir, SyncContext::new(SyncConfig::default(), store))
}

fn message_key() -> CollectionKey {
    CollectionKey::new(RecordKind::Message, "sess-1")
}

fn no_cancel() -> AtomicBool {
    AtomicBool::new(false)
}

// ─── Scenario A: delta split mid-JSON, then sentinel ─────────────────────────

#[tokio::test]
async fn delta_split_across_chunks_accumulates_and_commits() {
    let (_dir, ctx) = make_ctx().await;
    let client = ctx.new_client();
    let driver = client.turn_driver(&ctx);
    let key = message_key();

    let source = ScriptedChunks::new(&[
        "data: {\"type\":\"delta\",\"text\":\"Hel",
        "lo\"}\n\ndata: [DONE]\n",
    ]);
    let cancel = no_cancel();
    let outcome = driver
        .run_turn(&key, async { Ok(source) }, &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.text, "Hello");
    assert!(outcome.committed);
    assert!(outcome.record_id.is_persisted());

    // The store holds the full turn and the view holds exactly one record
    // with persisted identity.
    let stored = ctx.store.list_by_parent(&key).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].content, "Hello");

    let view = client.views.snapshot(&key).await;
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].id, outcome.record_id);
    assert_eq!(view[0].state, RecordState::Complete);
}

// ─── Scenario B: malformed frame absorbed silently ───────────────────────────

#[tokio::test]
async fn malformed_frame_is_absorbed_without_error() {
    let (_dir, ctx) = make_ctx().await;
    let client = ctx.new_client();
    let driver = client.turn_driver(&ctx);
    let key = message_key();

    let source = ScriptedChunks::new(&[
        "data: {not json\n",
        "data: {\"type\":\"delta\",\"text\":\"ok\"}\ndata: [DONE]\n",
    ]);
    let cancel = no_cancel();
    let outcome = driver
        .run_turn(&key, async { Ok(source) }, &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.text, "ok");
    assert!(outcome.committed);
}

// ─── Secondary schema and close-without-sentinel ─────────────────────────────

#[tokio::test]
async fn secondary_schema_and_connection_close_commit_normally() {
    let (_dir, ctx) = make_ctx().await;
    let client = ctx.new_client();
    let driver = client.turn_driver(&ctx);
    let key = message_key();

    // No [DONE]; the connection just closes, with the last frame
    // unterminated. close() must flush it.
    let source = ScriptedChunks::new(&[
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi \"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"there\"}}]}",
    ]);
    let cancel = no_cancel();
    let outcome = driver
        .run_turn(&key, async { Ok(source) }, &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.text, "Hi there");
    assert!(outcome.committed);
}

#[tokio::test]
async fn empty_stream_commits_empty_text() {
    let (_dir, ctx) = make_ctx().await;
    let client = ctx.new_client();
    let driver = client.turn_driver(&ctx);
    let key = message_key();

    let source = ScriptedChunks::new(&["data: [DONE]\n"]);
    let cancel = no_cancel();
    let outcome = driver
        .run_turn(&key, async { Ok(source) }, &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.text, "");
    assert!(outcome.committed);
}

// ─── Cancellation ────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_retains_partial_text_and_never_commits() {
    let (_dir, ctx) = make_ctx().await;
    let client = ctx.new_client();
    let driver = client.turn_driver(&ctx);
    let key = message_key();

    let cancel = Arc::new(AtomicBool::new(false));
    let source = CancellingChunks {
        chunks: VecDeque::from(vec![
            b"data: {\"type\":\"delta\",\"text\":\"part\"}\n".to_vec(),
            b"data: {\"type\":\"delta\",\"text\":\"never seen\"}\n".to_vec(),
        ]),
        cancel: Arc::clone(&cancel),
        served: 0,
    };

    let outcome = driver
        .run_turn(&key, async { Ok(source) }, cancel.as_ref())
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert!(!outcome.committed);
    assert_eq!(outcome.text, "part");

    // Nothing reached the store; the partial record stays visible, failed.
    assert!(ctx.store.list_by_parent(&key).await.unwrap().is_empty());
    let view = client.views.snapshot(&key).await;
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].content, "part");
    assert_eq!(view[0].state, RecordState::Failed);
}

// ─── Transport failure mid-stream ────────────────────────────────────────────

#[tokio::test]
async fn transport_failure_preserves_partial_locally() {
    let (_dir, ctx) = make_ctx().await;
    let client = ctx.new_client();
    let driver = client.turn_driver(&ctx);
    let key = message_key();

    let source = FailingChunks {
        chunks: VecDeque::from(vec![
            b"data: {\"type\":\"delta\",\"text\":\"half an ans\"}\n".to_vec(),
        ]),
    };
    let cancel = no_cancel();
    let err = driver
        .run_turn(&key, async { Ok(source) }, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Transport(_)));
    assert!(err.is_recoverable());
    assert!(ctx.store.list_by_parent(&key).await.unwrap().is_empty());

    let view = client.views.snapshot(&key).await;
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].content, "half an ans");
    assert_eq!(view[0].state, RecordState::Failed);
}

// ─── Handshake denied ────────────────────────────────────────────────────────

#[tokio::test]
async fn denied_handshake_is_fatal_and_flags_placeholder() {
    let (_dir, ctx) = make_ctx().await;
    let client = ctx.new_client();
    let driver = client.turn_driver(&ctx);
    let key = message_key();

    let cancel = no_cancel();
    let err = driver
        .run_turn::<ScriptedChunks, _>(&key, async { Err(SyncError::Denied) }, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Denied));
    assert!(!err.is_recoverable());

    let view = client.views.snapshot(&key).await;
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].state, RecordState::Failed);
}

// ─── Persistence failure after a clean stream ────────────────────────────────

/// Store whose insert always fails, wrapping a real store for the rest.
struct InsertFails(SqliteStore);

#[async_trait::async_trait]
impl RecordStore for InsertFails {
    async fn insert(&self, _record: &Record) -> Result<Record, SyncError> {
        Err(SyncError::Persistence(sqlx::Error::PoolClosed))
    }
    async fn update(&self, id: &str, content: &str) -> Result<(), SyncError> {
        self.0.update(id, content).await
    }
    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.0.delete(id).await
    }
    async fn list_by_parent(&self, key: &CollectionKey) -> Result<Vec<Record>, SyncError> {
        self.0.list_by_parent(key).await
    }
}

#[tokio::test]
async fn persist_failure_leaves_record_local_and_failed() {
    let dir = TempDir::new().unwrap();
    let sqlite = SqliteStore::new(dir.path()).await.unwrap();
    let ctx = SyncContext::new(SyncConfig::default(), Arc::new(InsertFails(sqlite)));
    let client = ctx.new_client();
    let driver = client.turn_driver(&ctx);
    let key = message_key();

    let source = ScriptedChunks::new(&[
        "data: {\"type\":\"delta\",\"text\":\"finished text\"}\ndata: [DONE]\n",
    ]);
    let cancel = no_cancel();
    let err = driver
        .run_turn(&key, async { Ok(source) }, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Persistence(_)));

    // Distinguishable from in-progress: Failed, still local identity, full
    // streamed text retained for a manual retry.
    let view = client.views.snapshot(&key).await;
    assert_eq!(view.len(), 1);
    assert!(!view[0].id.is_persisted());
    assert_eq!(view[0].state, RecordState::Failed);
    assert_eq!(view[0].content, "finished text");
}

// ─── Split invariance ────────────────────────────────────────────────────────

fn events_for(framed: &[trellis_sync::stream::splitter::Frame]) -> Vec<StreamEvent> {
    framed.iter().map(parse).collect()
}

proptest! {
    /// Any way of cutting the byte stream into chunks (including mid-line
    /// and mid-JSON) yields the exact frame and event sequence of a single
    /// unsplit feed.
    #[test]
    fn chunking_never_changes_the_frame_sequence(cuts in proptest::collection::vec(0usize..94, 0..8)) {
        let input: &str = "data: {\"type\":\"delta\",\"text\":\"Hel\"}\n: keepalive\ndata: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\ndata: [DONE]\n";
        let bytes = input.as_bytes();

        let mut whole = FrameSplitter::new();
        let mut expected = whole.feed(bytes);
        expected.extend(whole.close());

        let mut cuts = cuts;
        cuts.push(bytes.len());
        cuts.sort_unstable();

        let mut split = FrameSplitter::new();
        let mut got = Vec::new();
        let mut start = 0;
        for cut in cuts {
            let cut = cut.min(bytes.len());
            got.extend(split.feed(&bytes[start..cut]));
            start = cut;
        }
        got.extend(split.feed(&bytes[start..]));
        got.extend(split.close());

        prop_assert_eq!(&got, &expected);
        prop_assert_eq!(events_for(&got), events_for(&expected));
    }
}
