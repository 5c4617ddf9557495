//! Incremental response-stream decoding.
//!
//! One strictly sequential pipeline per stream: the splitter turns raw
//! chunks into frames, the normalizer classifies each frame, the accumulator
//! folds deltas into a snapshot, and the turn driver pushes every snapshot
//! into the optimistic entry manager. Decoding never suspends; the only
//! yield points are the network reads. Two concurrent streams never share
//! any of this state.

pub mod accumulator;
pub mod client;
pub mod event;
pub mod splitter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SyncError;
use crate::optimistic::OptimisticEntryManager;
use crate::record::{CollectionKey, RecordId, RecordState};
use crate::store::RecordStore;
use crate::sync::bus::RefreshBus;

use accumulator::Accumulator;
use event::StreamEvent;
use splitter::{Frame, FrameSplitter};

/// Abstract source of raw body chunks. Implemented by the live HTTP response
/// ([`client::ResponseChunks`]) and by in-memory fixtures in tests.
///
/// `Ok(None)` means the connection closed, which is a normal termination;
/// the explicit `[DONE]` sentinel is not guaranteed to arrive first.
#[async_trait::async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, SyncError>;
}

/// How one streamed turn finished.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Persisted identity when committed, the local identity otherwise.
    pub record_id: RecordId,
    /// Final accumulated text (partial if cancelled).
    pub text: String,
    /// Whether the record reached the store and was committed.
    pub committed: bool,
    /// Whether the turn ended because the caller cancelled it.
    pub cancelled: bool,
}

/// Drives one streamed turn end to end: placeholder record, decode loop,
/// persist, commit, refresh broadcast.
///
/// This is the one shared instance of the pattern the chat panel, artifact
/// summarization and build-agent prompting all use.
#[derive(Clone)]
pub struct TurnDriver {
    manager: OptimisticEntryManager,
    store: Arc<dyn RecordStore>,
    bus: RefreshBus,
}

impl TurnDriver {
    pub fn new(
        manager: OptimisticEntryManager,
        store: Arc<dyn RecordStore>,
        bus: RefreshBus,
    ) -> Self {
        Self {
            manager,
            store,
            bus,
        }
    }

    /// Consume one stream and reconcile the result with the store.
    ///
    /// `open` is the pending request/response handshake (e.g.
    /// [`client::GenerationClient::open_stream`]). The placeholder record is
    /// inserted into the collection view before that handshake completes, so
    /// the consumer sees an empty entry right away. Every delta overwrites
    /// the record's content in place. On `[DONE]` (or connection close) the
    /// final text is persisted and the record's identity swaps to the
    /// persisted one; the refresh signal goes out only after the write
    /// succeeds.
    ///
    /// `cancel` is checked before every chunk read. Cancellation stops
    /// feeding, leaves the record in its last-applied-snapshot state flagged
    /// failed, and never commits; it is not an error. Timeout detection is
    /// the caller's job: wrap this call in `tokio::time::timeout` and flip
    /// `cancel` on expiry.
    pub async fn run_turn<S, F>(
        &self,
        key: &CollectionKey,
        open: F,
        cancel: &AtomicBool,
    ) -> Result<TurnOutcome, SyncError>
    where
        S: ChunkSource,
        F: std::future::Future<Output = Result<S, SyncError>>,
    {
        let local_id = self.manager.begin_local(key).await;

        let mut source = match open.await {
            Ok(source) => source,
            Err(err) => {
                // Denied or failed before any frame: the empty placeholder
                // stays, flagged failed, so the caller can offer a retry.
                self.manager.mark_failed(key, &local_id).await;
                warn!(record = %local_id, err = %err, "stream handshake failed");
                return Err(err);
            }
        };

        let mut splitter = FrameSplitter::new();
        let mut acc = Accumulator::new();
        let mut ended = false;

        'read: loop {
            if cancel.load(Ordering::Acquire) {
                self.manager.mark_failed(key, &local_id).await;
                debug!(record = %local_id, chars = acc.text().len(), "turn cancelled");
                return Ok(TurnOutcome {
                    record_id: local_id,
                    text: acc.text().to_string(),
                    committed: false,
                    cancelled: true,
                });
            }

            let chunk = match source.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                // Connection close without the sentinel is still a normal end.
                Ok(None) => break 'read,
                Err(err) => {
                    self.manager.mark_failed(key, &local_id).await;
                    warn!(record = %local_id, err = %err, "stream aborted");
                    return Err(err);
                }
            };

            for frame in splitter.feed(&chunk) {
                if self.process_frame(&mut acc, key, &local_id, frame).await {
                    ended = true;
                    break 'read;
                }
            }
        }

        // Best-effort flush of an unterminated trailing fragment.
        if !ended {
            if let Some(frame) = splitter.close() {
                self.process_frame(&mut acc, key, &local_id, frame).await;
            }
            if !acc.is_finished() {
                acc.apply(&StreamEvent::StreamEnd);
            }
        }

        let final_text = acc.text().to_string();
        debug!(
            record = %local_id,
            deltas = acc.delta_count(),
            unrecognized = acc.unrecognized_count(),
            frames = splitter.emitted(),
            "stream complete"
        );

        // Persist, then commit the identity swap, then broadcast. A failure
        // here leaves the record local and flagged failed for manual retry;
        // partial or final text is never written to the store on failure.
        let mut to_persist = match self.manager.get(key, &local_id).await {
            Some(record) => record,
            None => {
                // View was torn down under us (session closed mid-stream).
                return Ok(TurnOutcome {
                    record_id: local_id,
                    text: final_text,
                    committed: false,
                    cancelled: true,
                });
            }
        };
        to_persist.content = final_text.clone();
        to_persist.state = RecordState::Complete;

        match self.store.insert(&to_persist).await {
            Ok(persisted) => {
                let persisted_id = persisted.id.clone();
                self.manager.commit(key, &local_id, persisted).await;
                self.bus.publish(&key.channel());
                Ok(TurnOutcome {
                    record_id: persisted_id,
                    text: final_text,
                    committed: true,
                    cancelled: false,
                })
            }
            Err(err) => {
                self.manager.mark_failed(key, &local_id).await;
                warn!(record = %local_id, err = %err, "persist after stream failed");
                Err(err)
            }
        }
    }

    /// Apply one frame. Returns true when the frame ended the stream.
    async fn process_frame(
        &self,
        acc: &mut Accumulator,
        key: &CollectionKey,
        local_id: &RecordId,
        frame: Frame,
    ) -> bool {
        match event::parse(&frame) {
            ev @ StreamEvent::TextDelta { .. } => {
                let snapshot = acc.apply(&ev).to_string();
                self.manager.apply_snapshot(key, local_id, &snapshot).await;
                false
            }
            StreamEvent::StreamEnd => {
                acc.apply(&StreamEvent::StreamEnd);
                true
            }
            ev @ StreamEvent::Unrecognized { .. } => {
                acc.apply(&ev);
                false
            }
        }
    }
}
