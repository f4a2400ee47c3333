pub mod broker;
pub mod cli;
pub mod client;
pub mod config;
pub mod ipc;
pub mod session;

pub use broker::{App, AppHandle, Broker, BrokerError, ProducerKey, SubscriptionIdent};
pub use config::Config;

use anyhow::Result;
use std::future::Future;
use tracing::info;

/// Register the event sources shipped with the daemon.
pub fn register_builtin_sources(broker: &Broker, config: &Config) -> Result<(), BrokerError> {
    broker.register(
        devd::SOURCE_NAME,
        devd::DevdFactory::new(config.devd_settings()),
    )
}

/// Serve clients on the configured socket until `shutdown` resolves, then
/// stop every event source.
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> Result<()> {
    let broker = Broker::new();
    register_builtin_sources(&broker, &config)?;
    let listener = session::bind(&config.socket_path)?;
    info!(
        socket = %config.socket_path.display(),
        sources = ?broker.sources(),
        "eventd listening"
    );

    session::serve(listener, broker.clone(), shutdown).await?;

    info!("shutting down event sources");
    let grace = config.shutdown_grace;
    tokio::task::spawn_blocking(move || broker.shutdown(grace)).await?;
    let _ = std::fs::remove_file(&config.socket_path);
    Ok(())
}
