use clap::Parser;
use stagehand_core::layout::{
    GridSpec, DEFAULT_CAPACITY, DEFAULT_COLUMNS, DEFAULT_MARGIN, DEFAULT_SCENE_NAME,
    DEFAULT_SOURCE_FPS, DEFAULT_TILE_HEIGHT, DEFAULT_TILE_WIDTH,
};
use stagehand_obs::SessionConfig;
use stagehand_ranking::DEFAULT_API_URL;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ROOMS_FILE: &str = "live_url.txt";
pub const DEFAULT_OBS_URL: &str = "ws://127.0.0.1:4455";
pub const DEFAULT_LOG_DIR: &str = ".stagehand/logs";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "stagehand",
    about = "Keeps an OBS scene showing the most watched live rooms"
)]
pub struct Args {
    /// Newline-delimited room URLs.
    #[arg(long, env = "STAGEHAND_ROOMS_FILE", default_value = DEFAULT_ROOMS_FILE)]
    pub rooms_file: PathBuf,
    #[arg(long, env = "STAGEHAND_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
    #[arg(long, env = "STAGEHAND_OBS_URL", default_value = DEFAULT_OBS_URL)]
    pub obs_url: String,
    #[arg(long, env = "STAGEHAND_OBS_PASSWORD", hide_env_values = true)]
    pub obs_password: Option<String>,
    /// Seconds between reconciliation cycles.
    #[arg(long, env = "STAGEHAND_INTERVAL_SECS", default_value_t = 10)]
    pub interval_secs: u64,
    #[arg(long, env = "STAGEHAND_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,
    #[arg(long, env = "STAGEHAND_COLUMNS", default_value_t = DEFAULT_COLUMNS)]
    pub columns: usize,
    #[arg(long, env = "STAGEHAND_TILE_WIDTH", default_value_t = DEFAULT_TILE_WIDTH)]
    pub tile_width: u32,
    #[arg(long, env = "STAGEHAND_TILE_HEIGHT", default_value_t = DEFAULT_TILE_HEIGHT)]
    pub tile_height: u32,
    #[arg(long, env = "STAGEHAND_MARGIN", default_value_t = DEFAULT_MARGIN)]
    pub margin: u32,
    /// Browser source render size; tiles are scaled from it.
    #[arg(long, env = "STAGEHAND_SOURCE_WIDTH", default_value_t = DEFAULT_TILE_WIDTH)]
    pub source_width: u32,
    #[arg(long, env = "STAGEHAND_SOURCE_HEIGHT", default_value_t = DEFAULT_TILE_HEIGHT)]
    pub source_height: u32,
    #[arg(long, env = "STAGEHAND_SOURCE_FPS", default_value_t = DEFAULT_SOURCE_FPS)]
    pub source_fps: u32,
    #[arg(long, env = "STAGEHAND_SCENE_NAME", default_value = DEFAULT_SCENE_NAME)]
    pub scene_name: String,
    #[arg(long, env = "STAGEHAND_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_timeout_secs: u64,
    #[arg(long, env = "STAGEHAND_HANDSHAKE_TIMEOUT_SECS", default_value_t = 5)]
    pub handshake_timeout_secs: u64,
    #[arg(long, env = "STAGEHAND_REQUEST_TIMEOUT_SECS", default_value_t = 5)]
    pub request_timeout_secs: u64,
    #[arg(long, env = "STAGEHAND_FETCH_TIMEOUT_SECS", default_value_t = 5)]
    pub fetch_timeout_secs: u64,
    #[arg(long, env = "STAGEHAND_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,
    /// Mirror logs to stdout (always on when headless).
    #[arg(long, env = "STAGEHAND_LOG_STDOUT")]
    pub log_stdout: bool,
    /// Log status lines instead of drawing the terminal table.
    #[arg(long, env = "STAGEHAND_HEADLESS")]
    pub headless: bool,
    /// Rank and display rooms without touching OBS.
    #[arg(long, env = "STAGEHAND_MONITOR_ONLY")]
    pub monitor_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {field} url {value:?}: {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("obs url must use ws or wss, got {0:?}")]
    UnsupportedScheme(String),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    #[error("scene name must not be blank")]
    BlankSceneName,
}

/// Validated, immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub rooms_file: PathBuf,
    pub api_url: Url,
    pub fetch_timeout: Duration,
    pub session: SessionConfig,
    pub grid: GridSpec,
    pub interval: Duration,
    pub log_dir: PathBuf,
    pub log_stdout: bool,
    pub headless: bool,
    pub monitor_only: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let api_url = parse_url("api", &args.api_url)?;
        let obs_url = parse_url("obs", &args.obs_url)?;
        if !matches!(obs_url.scheme(), "ws" | "wss") {
            return Err(ConfigError::UnsupportedScheme(obs_url.scheme().to_string()));
        }
        let checks = [
            ("capacity", args.capacity as u64),
            ("columns", args.columns as u64),
            ("interval", args.interval_secs),
            ("tile width", u64::from(args.tile_width)),
            ("tile height", u64::from(args.tile_height)),
            ("source width", u64::from(args.source_width)),
            ("source height", u64::from(args.source_height)),
            ("source fps", u64::from(args.source_fps)),
            ("connect timeout", args.connect_timeout_secs),
            ("handshake timeout", args.handshake_timeout_secs),
            ("request timeout", args.request_timeout_secs),
            ("fetch timeout", args.fetch_timeout_secs),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(*field));
        }
        let scene_name = args.scene_name.trim().to_string();
        if scene_name.is_empty() {
            return Err(ConfigError::BlankSceneName);
        }

        let mut session = SessionConfig::new(obs_url);
        session.password = args.obs_password.filter(|password| !password.is_empty());
        session.connect_timeout = Duration::from_secs(args.connect_timeout_secs);
        session.handshake_timeout = Duration::from_secs(args.handshake_timeout_secs);
        session.request_timeout = Duration::from_secs(args.request_timeout_secs);

        let grid = GridSpec {
            scene_name,
            capacity: args.capacity,
            columns: args.columns,
            tile_width: args.tile_width,
            tile_height: args.tile_height,
            margin: args.margin,
            source_width: args.source_width,
            source_height: args.source_height,
            source_fps: args.source_fps,
        };

        Ok(Self {
            rooms_file: args.rooms_file,
            api_url,
            fetch_timeout: Duration::from_secs(args.fetch_timeout_secs),
            session,
            grid,
            interval: Duration::from_secs(args.interval_secs),
            log_dir: args.log_dir,
            log_stdout: args.log_stdout || args.headless,
            headless: args.headless,
            monitor_only: args.monitor_only,
        })
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|err| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Config, ConfigError> {
        let mut argv = vec!["stagehand"];
        argv.extend_from_slice(extra);
        Config::from_args(Args::try_parse_from(argv).expect("args"))
    }

    #[test]
    fn defaults_describe_a_six_tile_wall() {
        let config = parse(&[]).expect("config");
        assert_eq!(config.rooms_file, PathBuf::from("live_url.txt"));
        assert_eq!(config.api_url.as_str(), DEFAULT_API_URL);
        assert_eq!(config.session.url.as_str(), "ws://127.0.0.1:4455/");
        assert_eq!(config.session.password, None);
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.grid.capacity, 6);
        assert_eq!(config.grid.columns, 3);
        assert_eq!(config.grid.scene_name, "Live Room Wall");
        assert!(!config.monitor_only);
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--obs-url",
            "ws://10.0.0.5:4455",
            "--obs-password",
            "secret",
            "--capacity",
            "4",
            "--columns",
            "2",
            "--interval-secs",
            "3",
            "--request-timeout-secs",
            "2",
            "--headless",
            "--monitor-only",
        ])
        .expect("config");
        assert_eq!(config.session.password.as_deref(), Some("secret"));
        assert_eq!(config.session.request_timeout, Duration::from_secs(2));
        assert_eq!(config.grid.capacity, 4);
        assert_eq!(config.grid.columns, 2);
        assert_eq!(config.interval, Duration::from_secs(3));
        assert!(config.headless);
        assert!(config.log_stdout);
        assert!(config.monitor_only);
    }

    #[test]
    fn rejects_zero_capacity_and_interval() {
        assert_eq!(
            parse(&["--capacity", "0"]).expect_err("capacity"),
            ConfigError::Zero("capacity")
        );
        assert_eq!(
            parse(&["--interval-secs", "0"]).expect_err("interval"),
            ConfigError::Zero("interval")
        );
    }

    #[test]
    fn rejects_non_websocket_obs_url() {
        assert_eq!(
            parse(&["--obs-url", "http://127.0.0.1:4455"]).expect_err("scheme"),
            ConfigError::UnsupportedScheme("http".to_string())
        );
        assert!(matches!(
            parse(&["--api-url", "not a url"]),
            Err(ConfigError::InvalidUrl { field: "api", .. })
        ));
    }

    #[test]
    fn blank_scene_and_empty_password_are_handled() {
        assert_eq!(
            parse(&["--scene-name", "  "]).expect_err("scene"),
            ConfigError::BlankSceneName
        );
        let config = parse(&["--obs-password", ""]).expect("config");
        assert_eq!(config.session.password, None);
    }
}
