//! Opt-in tracing output for tests.

use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static INIT: Lazy<()> = Lazy::new(|| {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .init();
});

/// Install the test tracing subscriber once for the whole test binary.
///
/// Controlled by `RUST_LOG`; with nothing set, protocol tracing stays quiet.
pub fn init_test_logging() {
    Lazy::force(&INIT);
}
