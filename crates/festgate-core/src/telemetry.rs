//! Tracing initialisation for festgate binaries.
//!
//! [`init_tracing`] installs the global subscriber once; later calls are
//! ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "FESTGATE_LOG";

/// Install the global subscriber.
///
/// The filter comes from `FESTGATE_LOG`, then `RUST_LOG`, then `level`.
/// With `json` set, lines are newline-delimited JSON. Logs go to stderr so
/// command output on stdout stays machine-readable.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
