// SPDX-License-Identifier: MIT
//! Write-rate governor: bounds how often high-frequency local mutations are
//! persisted and rebroadcast.
//!
//! Dragging a canvas node reports a mutation on every pointer move; writing
//! each one to the store (and fanning a refresh out to every peer) would
//! melt both. Continuous reports are throttled to a minimum inter-write
//! interval and never broadcast; the terminal report (drag release, explicit
//! submit) always writes, always reflects the last reported payload, and is
//! the only one that broadcasts a refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::error::SyncError;
use crate::record::CollectionKey;
use crate::store::RecordStore;
use crate::sync::bus::RefreshBus;

/// How a reported mutation should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportPhase {
    /// Mid-gesture update; subject to the minimum inter-write interval.
    Continuous,
    /// Gesture end or explicit submit; writes immediately and
    /// unconditionally, bypassing the throttle.
    Terminal,
}

/// What the governor did with one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Persisted (and broadcast, for terminal reports).
    Written,
    /// Dropped by the throttle. Safe: a later continuous or terminal report
    /// carries the newer payload.
    Throttled,
}

#[derive(Clone)]
pub struct WriteRateGovernor {
    store: Arc<dyn RecordStore>,
    bus: RefreshBus,
    min_interval: Duration,
    last_write: Arc<Mutex<HashMap<String, Instant>>>,
}

impl WriteRateGovernor {
    pub fn new(store: Arc<dyn RecordStore>, bus: RefreshBus, min_interval: Duration) -> Self {
        Self {
            store,
            bus,
            min_interval,
            last_write: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Report one local mutation of a persisted entity.
    ///
    /// Continuous reports inside the interval window are dropped without
    /// touching the store. The terminal report for an entity always writes
    /// the payload it carries, so the final state reflects the very last
    /// report even when every continuous write before it was throttled.
    pub async fn report(
        &self,
        key: &CollectionKey,
        entity_id: &str,
        payload: &str,
        phase: ReportPhase,
    ) -> Result<ReportOutcome, SyncError> {
        if phase == ReportPhase::Continuous {
            let last = self.last_write.lock().await;
            if let Some(prev) = last.get(entity_id) {
                if prev.elapsed() < self.min_interval {
                    trace!(entity = entity_id, "continuous write throttled");
                    return Ok(ReportOutcome::Throttled);
                }
            }
        }

        self.store.update(entity_id, payload).await?;

        match phase {
            ReportPhase::Continuous => {
                // The window opens on a successful write only; a failed
                // write must not suppress the retry that follows it.
                self.last_write
                    .lock()
                    .await
                    .insert(entity_id.to_string(), Instant::now());
            }
            ReportPhase::Terminal => {
                // The gesture is over; reset the window so the next one
                // starts with an immediate write, and fan out to peers.
                self.last_write.lock().await.remove(entity_id);
                self.bus.publish(&key.channel());
            }
        }
        Ok(ReportOutcome::Written)
    }
}
