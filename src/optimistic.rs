//! Optimistic entry manager: locally-identified placeholder records.
//!
//! A record exists in the consumer's view before any network round trip and
//! mutates in place while its stream runs. Exactly one record per logical
//! turn at all times: commit swaps the identity in the same slot, and a
//! failed turn stays visible flagged failed instead of disappearing.

use tracing::{debug, warn};

use crate::record::{CollectionKey, Record, RecordId, SharedViews};

#[derive(Clone)]
pub struct OptimisticEntryManager {
    views: SharedViews,
}

impl OptimisticEntryManager {
    pub fn new(views: SharedViews) -> Self {
        Self { views }
    }

    /// Mint a placeholder record with a local identity and insert it into
    /// the collection view immediately. The consumer sees an empty entry
    /// before the network call even starts.
    pub async fn begin_local(&self, key: &CollectionKey) -> RecordId {
        let record = Record::new_local(key.kind, &key.parent_id);
        let id = record.id.clone();
        self.views.with(key, |view| view.insert(record)).await;
        debug!(record = %id, channel = %key.channel(), "optimistic record created");
        id
    }

    /// Overwrite the record's content in place without changing its position.
    /// Returns false when the record is gone (view torn down mid-stream).
    pub async fn apply_snapshot(&self, key: &CollectionKey, id: &RecordId, text: &str) -> bool {
        let found = self
            .views
            .with(key, |view| view.update_content(id, text))
            .await;
        if !found {
            warn!(record = %id, "snapshot for unknown record dropped");
        }
        found
    }

    /// Swap the local identity for the persisted one, in place, exactly once.
    /// Called only after the authoritative write succeeded.
    pub async fn commit(&self, key: &CollectionKey, local_id: &RecordId, persisted: Record) -> bool {
        let swapped = self
            .views
            .with(key, |view| view.replace_identity(local_id, persisted))
            .await;
        if swapped {
            debug!(record = %local_id, "optimistic record committed");
        } else {
            warn!(record = %local_id, "commit target missing from view");
        }
        swapped
    }

    /// Flag the record failed/incomplete. It stays visibly present and is
    /// never retried automatically.
    pub async fn mark_failed(&self, key: &CollectionKey, id: &RecordId) -> bool {
        self.views.with(key, |view| view.mark_failed(id)).await
    }

    pub async fn get(&self, key: &CollectionKey, id: &RecordId) -> Option<Record> {
        self.views.with(key, |view| view.get(id).cloned()).await
    }
}
