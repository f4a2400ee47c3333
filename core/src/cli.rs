use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line interface for the eventd daemon.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Override the daemon socket path.
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,
    /// Override the log filter (tracing `EnvFilter` syntax).
    #[arg(long, global = true)]
    pub log: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daemon until interrupted.
    Run,
    /// List the built-in event sources.
    Sources,
    /// Subscribe to an event source of a running daemon and print its events.
    Watch {
        /// Event source name, e.g. `system.device`.
        name: String,
        /// Optional argument qualifying the subscription.
        #[arg(long)]
        arg: Option<String>,
    },
}
