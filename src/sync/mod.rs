//! Realtime sync controller: keeps each client's collection views current.
//!
//! Writes go to the authoritative store first, then a refresh signal is
//! broadcast. The two steps are deliberately not atomic. A crash
//! between them leaves peers stale until the next signal or manual refresh;
//! the guarantee here is eventual consistency via idempotent re-fetch, not
//! strong consistency, and nothing in this module should try to upgrade it.
//!
//! Concurrent writers to the same entity are not merged: the last write the
//! re-fetch observes wins. No operational transform, no CRDT.

pub mod bus;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::record::{CollectionKey, Record, RecordId, RecordState, SharedViews};
use crate::store::RecordStore;
use bus::RefreshBus;

/// Observable state of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Subscribed,
    Refreshing,
}

impl SubscriptionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SubscriptionState::Subscribed,
            2 => SubscriptionState::Refreshing,
            _ => SubscriptionState::Idle,
        }
    }
}

/// Callback fired with the refreshed view after every re-fetch.
pub type OnChange = Box<dyn Fn(&[Record]) + Send + Sync>;

/// A non-streamed write against one collection.
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Create a record with the given content.
    Insert { key: CollectionKey, content: String },
    /// Overwrite a persisted record's content.
    Update {
        key: CollectionKey,
        id: String,
        content: String,
    },
    /// Remove a persisted record.
    Delete { key: CollectionKey, id: String },
}

impl Mutation {
    fn key(&self) -> &CollectionKey {
        match self {
            Mutation::Insert { key, .. }
            | Mutation::Update { key, .. }
            | Mutation::Delete { key, .. } => key,
        }
    }
}

/// Keeps one client's local view of shared collections current via change
/// subscriptions and refresh signals.
#[derive(Clone)]
pub struct SyncController {
    store: Arc<dyn RecordStore>,
    bus: RefreshBus,
    views: SharedViews,
}

/// Handle to a running subscription task. Dropping the handle does not stop
/// the task; call [`SubscriptionHandle::unsubscribe`].
pub struct SubscriptionHandle {
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl SyncController {
    pub fn new(store: Arc<dyn RecordStore>, bus: RefreshBus, views: SharedViews) -> Self {
        Self { store, bus, views }
    }

    /// Perform a mutation against the authoritative store, then broadcast a
    /// refresh signal for the collection. The two steps are independent and
    /// not atomic by design.
    ///
    /// Returns the persisted record for inserts.
    pub async fn write(&self, mutation: Mutation) -> Result<Option<Record>, SyncError> {
        let key = mutation.key().clone();
        let result = match &mutation {
            Mutation::Insert { key, content } => {
                let mut record = Record::new_local(key.kind, &key.parent_id);
                record.content = content.clone();
                record.state = RecordState::Complete;
                Some(self.store.insert(&record).await?)
            }
            Mutation::Update { id, content, .. } => {
                self.store.update(id, content).await?;
                None
            }
            Mutation::Delete { id, key } => {
                self.store.delete(id).await?;
                // Drop it from our own view right away; peers converge on
                // the refresh signal.
                self.views
                    .with(key, |view| view.remove(&RecordId::Persisted(id.clone())))
                    .await;
                None
            }
        };
        self.broadcast_refresh(&key);
        Ok(result)
    }

    /// Broadcast a content-free refresh signal for one collection.
    pub fn broadcast_refresh(&self, key: &CollectionKey) {
        self.bus.publish(&key.channel());
    }

    /// Re-fetch one collection from the store and replace the local view.
    /// Persisted identities win over stale local ones; uncommitted local
    /// records survive the replacement.
    pub async fn refresh(&self, key: &CollectionKey) -> Result<Vec<Record>, SyncError> {
        let fetched = self.store.list_by_parent(key).await?;
        let records = self
            .views
            .with(key, |view| {
                view.replace_with(fetched);
                view.records().to_vec()
            })
            .await;
        Ok(records)
    }

    /// Subscribe this client to refresh signals for one collection.
    ///
    /// State machine: `Idle → Subscribed → (signal) → Refreshing →
    /// Subscribed`. At most one re-fetch is in flight per subscription;
    /// back-to-back signals coalesce, and a signal that arrives while a
    /// re-fetch is running queues exactly one more re-fetch behind it, so
    /// the newest trigger is always followed by at least one re-fetch.
    pub fn subscribe(&self, key: CollectionKey, on_change: OnChange) -> SubscriptionHandle {
        let state = Arc::new(AtomicU8::new(SubscriptionState::Subscribed as u8));
        let state_for_task = Arc::clone(&state);
        let controller = self.clone();
        let channel = key.channel();
        let mut rx = self.bus.subscribe();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(chan) if chan == channel => {}
                    Ok(_) => continue,
                    // Lagged means signals were missed; one re-fetch makes
                    // the view current regardless of how many.
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(channel = %channel, skipped, "refresh bus lagged");
                    }
                    Err(RecvError::Closed) => break,
                }

                // Coalesce any signals already queued for this channel into
                // this single re-fetch.
                loop {
                    match rx.try_recv() {
                        Ok(_) => continue,
                        Err(TryRecvError::Empty) | Err(TryRecvError::Lagged(_)) => break,
                        Err(TryRecvError::Closed) => break,
                    }
                }

                state_for_task.store(SubscriptionState::Refreshing as u8, Ordering::Release);
                match controller.refresh(&key).await {
                    Ok(records) => on_change(&records),
                    // Stay subscribed and stale; the next signal (or a
                    // manual refresh) will converge the view.
                    Err(err) => warn!(channel = %channel, err = %err, "re-fetch failed"),
                }
                state_for_task.store(SubscriptionState::Subscribed as u8, Ordering::Release);
            }
            state_for_task.store(SubscriptionState::Idle as u8, Ordering::Release);
        });

        SubscriptionHandle { state, task }
    }
}
