//! Process-wide `tracing` subscriber setup.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static LOGGING_INIT: Once = Once::new();

/// Installs the stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows the CLI flags.
/// Repeated calls are no-ops.
pub fn init_logging(quiet: bool, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut init_result: Result<(), Box<dyn std::error::Error>> = Ok(());

    LOGGING_INIT.call_once(|| {
        init_result = tracing_subscriber::fmt()
            .with_env_filter(default_env_filter(quiet, verbose))
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
            .map_err(|e| format!("failed to initialize logging: {e}").into());
    });

    init_result
}

fn default_level(quiet: bool, verbose: bool) -> &'static str {
    if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

fn default_env_filter(quiet: bool, verbose: bool) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(default_level(quiet, verbose)),
    }
}
