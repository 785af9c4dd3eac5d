//! Shared helpers for anonctl's integration tests: config and payload
//! builders, fake backends, and a few async conveniences.

pub mod builders;
pub mod fake_backend;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

/// Upper bound for any single awaited step in a test. Generous enough for the
/// `sh` worker scripts, short enough that a lost envelope fails fast.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Route runtime and backend logs into the test harness.
///
/// Output is captured per test and only shown for failures. Set `RUST_LOG`
/// (e.g. `RUST_LOG=anonctl=debug`) to see envelope routing and process
/// supervision; the default is `info`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test if it takes longer than [`STEP_TIMEOUT`]
/// (a subscriber waiting for an envelope that never comes, a worker that
/// never exits).
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(STEP_TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("test step timed out after {STEP_TIMEOUT:?}"))
}
