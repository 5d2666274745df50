//! Shared scaffolding for `passdag` integration tests: tracing capture, a
//! timeout guard, probe passes, and recording fakes.

pub mod builders;
pub mod fakes;

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

/// Directives used when neither `PASSDAG_LOG` nor `RUST_LOG` is set.
const DEFAULT_FILTER: &str = "passdag=debug,passdag_test_utils=debug";

/// Upper bound on any single awaited step in a test. A wait that trips it
/// has deadlocked or lost an event, not merely slowed down.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Honours `PASSDAG_LOG` (the same variable the production init reads),
/// then `RUST_LOG`, then the crate-scoped default. Uses `with_test_writer()`,
/// so output is captured per-test and the harness only prints it for failing
/// tests (unless run with `-- --nocapture`).
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = std::env::var("PASSDAG_LOG")
            .ok()
            .map(EnvFilter::new)
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));
        let directives = filter.to_string();

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();

        tracing::debug!(%directives, "test tracing initialised");
    });
}

/// Run a future under the step timeout, so a wedged scheduler or coordinator
/// fails the test instead of hanging the suite.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(STEP_TIMEOUT, f)
        .await
        .expect("test step timed out after 5s")
}
