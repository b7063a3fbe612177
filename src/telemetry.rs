//! Structured logging for the server and the client binaries

use tracing::{subscriber::set_global_default, Subscriber};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, EnvFilter, Registry};

/// Error returned when the global subscriber can't be installed
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A `log` logger was already set.
    #[error("Could not set logger - {0}")]
    Logger(#[from] tracing_log::log::SetLoggerError),

    /// A global subscriber was already set.
    #[error("Could not set subscriber - {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Build a subscriber that writes bunyan formatted JSON records to `sink`.
///
/// `RUST_LOG` takes precedence over `env_filter` when it is set.
pub fn get_subscriber<Sink>(
    name: String,
    env_filter: String,
    sink: Sink,
) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));
    Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(BunyanFormattingLayer::new(name, sink))
}

/// Install the subscriber as the global default and route `log` records through it.
///
/// Only the first call succeeds.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) -> Result<(), Error> {
    LogTracer::init()?;
    set_global_default(subscriber)?;
    Ok(())
}
