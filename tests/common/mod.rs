//! Shared test harness helpers.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install the test tracing subscriber once per process. Verbosity follows
/// `RUST_LOG`; output goes through the test writer so it stays attached to
/// the owning test.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
