use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_chain::core::engine::{Strategy, TraversalConfig};
use lib_chain::ingestors::TrepConfig;

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "chain_expander.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Expands a chain into the list of its constituents", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(short, long, env = "CHAIN_SERVER", help = "WebSocket server, e.g. ws://172.20.33.24:15000/WebSocket")]
    pub server: Option<String>,

    #[clap(short, long, env = "CHAIN_USERNAME", help = "User name for the login request.")]
    pub username: Option<String>,

    #[clap(short, long, env = "CHAIN_ITEM", help = "Chain name to expand, e.g. 0#.DJI")]
    pub item: Option<String>,

    #[clap(short, long, env = "CHAIN_POSITION", help = "Login position, e.g. 10.42.62.43/net")]
    pub position: Option<String>,

    #[clap(long, env = "CHAIN_APP_ID", help = "Application id for the login request.")]
    pub app_id: Option<String>,

    #[clap(long, env = "CHAIN_BATCH_SIZE", help = "Batch size of the heuristic expansion, 0 to detect it.")]
    pub batch_size: Option<u32>,

    #[clap(long, env = "CHAIN_STOP_INDEX", help = "Last index of the first heuristic range when the batch size is set.")]
    pub stop_index: Option<u32>,

    #[clap(short, long, env = "CHAIN_OUTPUT_FILE", help = "File receiving the sorted constituent list.")]
    pub output_file: Option<PathBuf>,

    #[clap(long, env = "CHAIN_VERBOSE", num_args = 0..=1, default_missing_value = "true", help = "Print additional progress logs.")]
    pub verbose: Option<bool>,

    #[clap(long, env = "CHAIN_PRINT_JSON", num_args = 0..=1, default_missing_value = "true", help = "Log every JSON message sent and received.")]
    pub print_json: Option<bool>,

    #[clap(long, env = "CHAIN_SEQ", num_args = 0..=1, default_missing_value = "true", help = "Follow the chain one node at a time.")]
    pub seq: Option<bool>,

    #[clap(long, env = "CHAIN_SEQ_RECURSIVE", num_args = 0..=1, default_missing_value = "true", help = "Expand nested chains one node at a time.")]
    pub seq_recursive: Option<bool>,

    #[clap(long, env = "CHAIN_TIMEOUT_SECS", help = "Seconds without a response before a traversal fails, 0 to wait forever.")]
    pub timeout_secs: Option<u64>,

    #[clap(long, env = "CHAIN_CONNECT_RETRIES", help = "Connection attempts before giving up.")]
    pub connect_retries: Option<u32>,

    #[clap(long, env = "CHAIN_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "CHAIN_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "CHAIN_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            server: other.server.or(self.server),
            username: other.username.or(self.username),
            item: other.item.or(self.item),
            position: other.position.or(self.position),
            app_id: other.app_id.or(self.app_id),
            batch_size: other.batch_size.or(self.batch_size),
            stop_index: other.stop_index.or(self.stop_index),
            output_file: other.output_file.or(self.output_file),
            verbose: other.verbose.or(self.verbose),
            print_json: other.print_json.or(self.print_json),
            seq: other.seq.or(self.seq),
            seq_recursive: other.seq_recursive.or(self.seq_recursive),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
            connect_retries: other.connect_retries.or(self.connect_retries),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    fn defaults() -> Config {
        Config {
            position: Some("127.0.0.1/net".to_string()),
            app_id: Some("256".to_string()),
            batch_size: Some(0),
            stop_index: Some(50),
            verbose: Some(false),
            print_json: Some(false),
            seq: Some(false),
            seq_recursive: Some(false),
            timeout_secs: Some(30),
            connect_retries: Some(3),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }
}

/// Fully resolved, validated options.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server: String,
    pub username: String,
    pub item: String,
    pub position: String,
    pub app_id: String,
    pub batch_size: u32,
    pub stop_index: u32,
    pub output_file: Option<PathBuf>,
    pub verbose: bool,
    pub print_json: bool,
    pub seq: bool,
    pub seq_recursive: bool,
    pub timeout: Option<Duration>,
    pub connect_retries: u32,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl Settings {
    /// Traversal parameters for a top-level (`nested == false`) or nested chain.
    pub fn traversal_config(&self, nested: bool) -> TraversalConfig {
        let sequential = if nested { self.seq_recursive } else { self.seq };
        TraversalConfig {
            strategy: if sequential { Strategy::Sequential } else { Strategy::Heuristic },
            start_index: 0,
            stop_index: self.stop_index,
            batch_size: self.batch_size,
            verbose: self.verbose,
            waiting_timeout: self.timeout,
        }
    }

    pub fn transport_config(&self) -> TrepConfig {
        TrepConfig {
            url: self.server.clone(),
            connect_retries: self.connect_retries,
            print_json: self.print_json,
            ..TrepConfig::default()
        }
    }
}

impl TryFrom<Config> for Settings {
    type Error = anyhow::Error;

    fn try_from(config: Config) -> Result<Self> {
        let config = Config::defaults().merge(config);
        let server = required(config.server, "server")?;
        let username = required(config.username, "username")?;
        let item = required(config.item, "item")?;
        if item.contains(',') || item.chars().any(char::is_whitespace) {
            bail!("Invalid item {:?}: a chain name can not contain ',' or whitespace", item);
        }

        Ok(Settings {
            server,
            username,
            item,
            position: config.position.unwrap_or_default(),
            app_id: config.app_id.unwrap_or_default(),
            batch_size: config.batch_size.unwrap_or_default(),
            stop_index: config.stop_index.unwrap_or(50),
            output_file: config.output_file.filter(|p| !p.as_os_str().is_empty()),
            verbose: config.verbose.unwrap_or_default(),
            print_json: config.print_json.unwrap_or_default(),
            seq: config.seq.unwrap_or_default(),
            seq_recursive: config.seq_recursive.unwrap_or_default(),
            timeout: config.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
            connect_retries: config.connect_retries.unwrap_or(3),
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => bail!("Missing required option --{}", name),
    }
}

/// Reads a JSON config file. A missing file yields an empty config.
pub fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            path.display()
        );
        return Ok(Config::default());
    }
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Merges the config file named by `cli` (or the default file) under `cli`.
pub fn load_config_from(cli: Config) -> Result<Settings> {
    let path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let file_config = read_config_file(&path)?;
    Settings::try_from(file_config.merge(cli))
}

/// Defaults, then the config file, then environment variables and CLI arguments.
pub fn load_config() -> Result<Settings> {
    load_config_from(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli() -> Config {
        Config {
            server: Some("ws://127.0.0.1:15000/WebSocket".into()),
            username: Some("user1".into()),
            item: Some("0#.DJI".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_fill_missing_values() {
        let settings = Settings::try_from(cli()).unwrap();
        assert_eq!(settings.position, "127.0.0.1/net");
        assert_eq!(settings.app_id, "256");
        assert_eq!(settings.batch_size, 0);
        assert_eq!(settings.stop_index, 50);
        assert_eq!(settings.timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.connect_retries, 3);
        assert!(!settings.seq);
        assert!(settings.output_file.is_none());
    }

    #[test]
    fn test_required_options_and_item_validation() {
        let mut missing = cli();
        missing.username = None;
        assert!(Settings::try_from(missing).is_err());

        for bad in ["0#.DJI,0#.SETI", "0# .DJI", "  "] {
            let mut config = cli();
            config.item = Some(bad.into());
            assert!(Settings::try_from(config).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let mut config = cli();
        config.timeout_secs = Some(0);
        assert_eq!(Settings::try_from(config).unwrap().timeout, None);
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": "ws://file:15000/WebSocket", "username": "file_user", "batchSize": 20, "seqRecursive": true}}"#
        )
        .unwrap();

        let mut config = cli();
        config.server = None;
        config.config_path = Some(file.path().to_path_buf());
        let settings = load_config_from(config).unwrap();
        assert_eq!(settings.server, "ws://file:15000/WebSocket");
        assert_eq!(settings.username, "user1");
        assert_eq!(settings.batch_size, 20);
        assert!(settings.seq_recursive);
    }

    #[test]
    fn test_unparsable_config_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(read_config_file(file.path()).is_err());
        assert_eq!(
            read_config_file(Path::new("/nonexistent/chain_expander.conf")).unwrap(),
            Config::default()
        );
    }

    #[test]
    fn test_traversal_config_strategy() {
        let mut config = cli();
        config.seq_recursive = Some(true);
        let settings = Settings::try_from(config).unwrap();
        assert_eq!(settings.traversal_config(false).strategy, Strategy::Heuristic);
        assert_eq!(settings.traversal_config(true).strategy, Strategy::Sequential);
        assert_eq!(settings.transport_config().url, "ws://127.0.0.1:15000/WebSocket");
    }

    #[test]
    fn test_flags_parse_without_value() {
        let config = Config::try_parse_from(["chain_expander", "-s", "ws://h:1/WebSocket", "--seq", "--verbose"]).unwrap();
        assert_eq!(config.seq, Some(true));
        assert_eq!(config.verbose, Some(true));
        assert_eq!(config.print_json, None);
    }
}
