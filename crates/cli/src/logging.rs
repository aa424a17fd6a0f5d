use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Setup tracing + log integration. Logs go to stderr so they never mix with
/// streamed answers; quiet unless `RUST_LOG` says otherwise.
pub fn setup_logging() -> anyhow::Result<()> {
    LogTracer::init()?;
    let fmt_layer = fmt::layer().with_target(true).with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
