use anyhow::{Context, Result};
use clap::Args;
use lib_defi::Module;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEFAULT_CONFIG_FILE: &str = "defi_loader.conf";

#[derive(Args, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[arg(long, env = "DEFI_BACKEND_URL", help = "Base URL of the backend, e.g. http://localhost:4242.")]
    pub backend_url: Option<String>,

    #[arg(long, env = "DEFI_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "DEFI_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "DEFI_LOG_LEVEL", help = "Logging level when RUST_LOG is unset (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "DEFI_PREMIUM", help = "Whether the session has premium entitlement (true/false).")]
    pub premium: Option<bool>,

    #[arg(long, env = "DEFI_MODULES", value_delimiter = ',', help = "Comma-separated active modules, e.g. aave,compound,makerdao_dsr.")]
    pub modules: Option<Vec<Module>>,

    #[arg(long, env = "DEFI_POLL_INTERVAL_MS", help = "Interval in milliseconds between task status polls.")]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, env = "DEFI_TASK_TIMEOUT_SECS", help = "Seconds before an unfinished backend task counts as failed.")]
    pub task_timeout_secs: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            backend_url: other.backend_url.or(self.backend_url),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            premium: other.premium.or(self.premium),
            modules: other.modules.or(self.modules),
            poll_interval_ms: other.poll_interval_ms.or(self.poll_interval_ms),
            task_timeout_secs: other.task_timeout_secs.or(self.task_timeout_secs),
        }
    }

    fn defaults() -> Config {
        Config {
            backend_url: Some("http://localhost:4242".to_string()),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            premium: Some(false),
            modules: Some(Vec::new()),
            poll_interval_ms: Some(2000),
            task_timeout_secs: Some(600),
            ..Default::default()
        }
    }
}

/// Fully resolved settings, every value present.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub backend_url: String,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub premium: bool,
    pub modules: Vec<Module>,
    pub poll_interval: Duration,
    pub task_timeout: Duration,
}

/// Layers defaults, then the config file, then `cli` (arguments and
/// environment) and resolves the result.
///
/// A missing config file is fine; an unreadable or malformed one is not.
pub fn load_config(cli: Config) -> Result<Settings> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("reading {}", config_file_path.display()))?;
        let file_config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("parsing {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    } else if cli.config_path.is_some() {
        warn!(path = %config_file_path.display(), "config file not found, using defaults and environment/CLI values");
    }

    current_config = current_config.merge(cli);
    resolve(current_config)
}

fn resolve(config: Config) -> Result<Settings> {
    let Config {
        backend_url: Some(backend_url),
        log_dir: Some(log_dir),
        log_level: Some(log_level),
        premium: Some(premium),
        modules: Some(modules),
        poll_interval_ms: Some(poll_interval_ms),
        task_timeout_secs: Some(task_timeout_secs),
        ..
    } = config
    else {
        anyhow::bail!("incomplete configuration");
    };

    Ok(Settings {
        backend_url,
        log_dir,
        log_level,
        premium,
        modules,
        poll_interval: Duration::from_millis(poll_interval_ms),
        task_timeout: Duration::from_secs(task_timeout_secs),
    })
}
