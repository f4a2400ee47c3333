use std::{fs, io, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

use crate::cli::Cli;

pub const DEFAULT_SOCKET: &str = "/var/run/eventd.sock";

/// Runtime configuration resolved from CLI, environment, config file and defaults.
#[derive(Clone, Debug)]
pub struct Config {
    /// Unix socket clients connect to.
    pub socket_path: PathBuf,
    /// How long shutdown waits for event source threads.
    pub shutdown_grace: Duration,
    /// Socket the devd reader connects to.
    pub devd_pipe: PathBuf,
    /// Delay between devd reconnection attempts.
    pub devd_retry: Duration,
    /// Default tracing filter.
    pub log_filter: String,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    devd: FileDevd,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_socket")]
    socket: PathBuf,
    #[serde(default = "default_shutdown_grace_ms")]
    shutdown_grace_ms: u64,
}

#[derive(Deserialize)]
struct FileDevd {
    #[serde(default = "default_devd_pipe")]
    pipe: PathBuf,
    #[serde(default = "default_retry_interval_ms")]
    retry_interval_ms: u64,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_filter")]
    filter: String,
}

fn default_socket() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET)
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_devd_pipe() -> PathBuf {
    PathBuf::from(devd::DEFAULT_PIPE)
}

fn default_retry_interval_ms() -> u64 {
    devd::DEFAULT_RETRY_INTERVAL.as_millis() as u64
}

fn default_filter() -> String {
    "info".into()
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for FileDevd {
    fn default() -> Self {
        Self {
            pipe: default_devd_pipe(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

/// Config file used when neither `--config` nor `EVENTD_CONFIG` is given.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("org", "eventd", "eventd")
        .map(|dirs| dirs.config_dir().join("eventd.toml"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/etc/eventd.toml"))
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("EVENTD_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(default_config_path);

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str(&contents)
                    .with_context(|| format!("invalid config file {}", config_path.display()))?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => FileConfig::default(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading config file {}", config_path.display()))
            }
        };

        let mut socket_path = file_cfg.server.socket;
        let mut devd_pipe = file_cfg.devd.pipe;
        let mut retry_ms = file_cfg.devd.retry_interval_ms;
        let mut log_filter = file_cfg.logging.filter;

        // environment overrides
        if let Ok(s) = std::env::var("EVENTD_SOCKET") {
            socket_path = PathBuf::from(s);
        }
        if let Ok(p) = std::env::var("EVENTD_DEVD_PIPE") {
            devd_pipe = PathBuf::from(p);
        }
        if let Ok(r) = std::env::var("EVENTD_DEVD_RETRY_MS") {
            if let Ok(r) = r.parse::<u64>() {
                retry_ms = r;
            }
        }
        if let Ok(l) = std::env::var("EVENTD_LOG") {
            log_filter = l;
        }

        // CLI overrides
        if let Some(s) = &cli.socket {
            socket_path = s.clone();
        }
        if let Some(l) = &cli.log {
            log_filter = l.clone();
        }

        if retry_ms == 0 {
            anyhow::bail!("devd retry interval must be greater than zero");
        }

        Ok(Self {
            socket_path,
            shutdown_grace: Duration::from_millis(file_cfg.server.shutdown_grace_ms),
            devd_pipe,
            devd_retry: Duration::from_millis(retry_ms),
            log_filter,
        })
    }

    /// Settings handed to the devd event source.
    pub fn devd_settings(&self) -> devd::DevdSettings {
        devd::DevdSettings {
            pipe: self.devd_pipe.clone(),
            retry_interval: self.devd_retry,
        }
    }
}
