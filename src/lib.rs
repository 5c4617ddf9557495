pub mod config;
pub mod error;
pub mod governor;
pub mod optimistic;
pub mod record;
pub mod store;
pub mod stream;
pub mod sync;

pub use error::SyncError;

use std::sync::Arc;

use config::SyncConfig;
use governor::WriteRateGovernor;
use optimistic::OptimisticEntryManager;
use record::SharedViews;
use store::RecordStore;
use stream::TurnDriver;
use sync::{bus::RefreshBus, SyncController};

/// Shared application state for one store-backed deployment.
///
/// Holds everything that is common to every connected client: the
/// authoritative record store, the refresh-signal bus, and the config.
/// Per-client state (collection views, optimistic entries) lives in
/// [`SyncClient`], one per connected session.
#[derive(Clone)]
pub struct SyncContext {
    pub config: Arc<SyncConfig>,
    pub store: Arc<dyn RecordStore>,
    pub bus: RefreshBus,
}

impl SyncContext {
    pub fn new(config: SyncConfig, store: Arc<dyn RecordStore>) -> Self {
        let bus = RefreshBus::with_capacity(config.channel.capacity);
        Self {
            config: Arc::new(config),
            store,
            bus,
        }
    }

    /// Create the per-client component set.
    ///
    /// Every client gets its own collection views; the views are mutated only
    /// by that client's own manager and controller, never by another client
    /// or by decoder internals.
    pub fn new_client(&self) -> SyncClient {
        let views = SharedViews::new();
        let manager = OptimisticEntryManager::new(views.clone());
        let controller = SyncController::new(
            Arc::clone(&self.store),
            self.bus.clone(),
            views.clone(),
        );
        let governor = WriteRateGovernor::new(
            Arc::clone(&self.store),
            self.bus.clone(),
            self.config.governor.min_write_interval(),
        );
        SyncClient {
            views,
            manager,
            controller,
            governor,
        }
    }
}

/// One connected client's view of the shared collections.
#[derive(Clone)]
pub struct SyncClient {
    pub views: SharedViews,
    pub manager: OptimisticEntryManager,
    pub controller: SyncController,
    pub governor: WriteRateGovernor,
}

impl SyncClient {
    /// Build a turn driver that streams into this client's views and commits
    /// through the shared store.
    pub fn turn_driver(&self, ctx: &SyncContext) -> TurnDriver {
        TurnDriver::new(
            self.manager.clone(),
            Arc::clone(&ctx.store),
            ctx.bus.clone(),
        )
    }
}
