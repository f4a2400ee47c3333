use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use eventd::{
    cli::{Cli, Command},
    client, register_builtin_sources, Broker, Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Run => {
            info!("eventd running - press Ctrl+C to exit");
            eventd::run(config, async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "failed to wait for Ctrl+C");
                }
            })
            .await?;
        }
        Command::Sources => {
            let broker = Broker::new();
            register_builtin_sources(&broker, &config)?;
            for name in broker.sources() {
                println!("{name}");
            }
        }
        Command::Watch { name, arg } => {
            client::watch(&config.socket_path, &name, arg).await?;
        }
    }
    Ok(())
}
