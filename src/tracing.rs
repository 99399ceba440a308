use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use crate::util::env::env_flag;

/// Installs the global fmt subscriber used by the catalog binaries.
///
/// `RUST_LOG` wins over `default_filter`. Set `LOG_COMPACT=1` to drop file and
/// line locations from each event (handy when tailing a long sync).
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let verbose_locations = !env_flag("LOG_COMPACT", false);

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(verbose_locations)
        .with_file(verbose_locations)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
