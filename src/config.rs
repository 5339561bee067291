use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::boxes::{validate_probability, DEFAULT_BOX_PROBABILITY};

const DEFAULT_WEB_PORT: u16 = 8420;
const DEFAULT_MJPEG_PORT: u16 = 8421;
const DEFAULT_WS_PATH: &str = "/ws";
const DEFAULT_SNAPSHOT_PATH: &str = "/snapshot.jpg";
const DEFAULT_INTERVAL_MS: u64 = 2_000;
const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    ws: Option<WsConfigFile>,
    snapshot: Option<SnapshotConfigFile>,
    #[serde(rename = "loop")]
    run_loop: Option<LoopConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct WsConfigFile {
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    url: Option<String>,
    enabled: Option<bool>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LoopConfigFile {
    interval_ms: Option<u64>,
    box_probability: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub ws: WsSettings,
    pub snapshot: SnapshotSettings,
    pub interval: Duration,
    pub box_probability: f64,
}

#[derive(Debug, Clone)]
pub struct WsSettings {
    pub url: String,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub url: String,
    pub enabled: bool,
    pub timeout: Duration,
}

/// Values supplied on the command line. `None` leaves the loaded value alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub ws_url: Option<String>,
    pub snapshot_url: Option<String>,
    pub disable_snapshot: bool,
    pub interval_ms: Option<u64>,
    pub box_probability: Option<f64>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            ws: WsSettings {
                url: default_ws_url(DEFAULT_WEB_PORT),
                connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            },
            snapshot: SnapshotSettings {
                url: default_snapshot_url(DEFAULT_MJPEG_PORT),
                enabled: true,
                timeout: Duration::from_millis(DEFAULT_SNAPSHOT_TIMEOUT_MS),
            },
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            box_probability: DEFAULT_BOX_PROBABILITY,
        }
    }
}

impl DetectorConfig {
    /// Defaults, then `HOMEEYE_CONFIG` file, then environment.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HOMEEYE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectorConfigFile) -> Self {
        let defaults = Self::default();
        let ws = WsSettings {
            url: file
                .ws
                .as_ref()
                .and_then(|ws| ws.url.clone())
                .unwrap_or(defaults.ws.url),
            connect_timeout: file
                .ws
                .as_ref()
                .and_then(|ws| ws.connect_timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.ws.connect_timeout),
        };
        let snapshot = SnapshotSettings {
            url: file
                .snapshot
                .as_ref()
                .and_then(|snapshot| snapshot.url.clone())
                .unwrap_or(defaults.snapshot.url),
            enabled: file
                .snapshot
                .as_ref()
                .and_then(|snapshot| snapshot.enabled)
                .unwrap_or(defaults.snapshot.enabled),
            timeout: file
                .snapshot
                .as_ref()
                .and_then(|snapshot| snapshot.timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.snapshot.timeout),
        };
        let interval = file
            .run_loop
            .as_ref()
            .and_then(|run_loop| run_loop.interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.interval);
        let box_probability = file
            .run_loop
            .and_then(|run_loop| run_loop.box_probability)
            .unwrap_or(defaults.box_probability);
        Self {
            ws,
            snapshot,
            interval,
            box_probability,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        // Port variables shared with the box server only move the default URLs.
        if let Some(port) = env_parse::<u16>("WEB_PORT")? {
            if self.ws.url == default_ws_url(DEFAULT_WEB_PORT) {
                self.ws.url = default_ws_url(port);
            }
        }
        if let Some(port) = env_parse::<u16>("MJPEG_PORT")? {
            if self.snapshot.url == default_snapshot_url(DEFAULT_MJPEG_PORT) {
                self.snapshot.url = default_snapshot_url(port);
            }
        }
        if let Some(url) = env_string("HOMEEYE_WS_URL") {
            self.ws.url = url;
        }
        if let Some(url) = env_string("HOMEEYE_SNAPSHOT_URL") {
            self.snapshot.url = url;
        }
        if let Some(raw) = env_string("HOMEEYE_SNAPSHOT_ENABLED") {
            self.snapshot.enabled = parse_bool(&raw).ok_or_else(|| {
                anyhow!("HOMEEYE_SNAPSHOT_ENABLED must be true/false, got '{}'", raw)
            })?;
        }
        if let Some(ms) = env_parse::<u64>("HOMEEYE_SNAPSHOT_TIMEOUT_MS")? {
            self.snapshot.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("HOMEEYE_CONNECT_TIMEOUT_MS")? {
            self.ws.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("HOMEEYE_INTERVAL_MS")? {
            self.interval = Duration::from_millis(ms);
        }
        if let Some(p) = env_parse::<f64>("HOMEEYE_BOX_PROBABILITY")? {
            self.box_probability = p;
        }
        Ok(())
    }

    /// Apply command-line values on top of the loaded config and re-validate.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(url) = &overrides.ws_url {
            self.ws.url = url.clone();
        }
        if let Some(url) = &overrides.snapshot_url {
            self.snapshot.url = url.clone();
        }
        if overrides.disable_snapshot {
            self.snapshot.enabled = false;
        }
        if let Some(ms) = overrides.interval_ms {
            self.interval = Duration::from_millis(ms);
        }
        if let Some(p) = overrides.box_probability {
            self.box_probability = p;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let ws = Url::parse(&self.ws.url)
            .with_context(|| format!("invalid websocket url {}", self.ws.url))?;
        if ws.scheme() != "ws" {
            return Err(anyhow!(
                "unsupported websocket scheme '{}'; expected ws",
                ws.scheme()
            ));
        }
        if ws.host_str().is_none() {
            return Err(anyhow!("websocket url {} is missing a host", self.ws.url));
        }

        let snapshot = Url::parse(&self.snapshot.url)
            .with_context(|| format!("invalid snapshot url {}", self.snapshot.url))?;
        if !matches!(snapshot.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported snapshot scheme '{}'; expected http(s)",
                snapshot.scheme()
            ));
        }
        if snapshot.host_str().is_none() {
            return Err(anyhow!("snapshot url {} is missing a host", self.snapshot.url));
        }

        if self.interval.is_zero() {
            return Err(anyhow!("loop interval must be greater than zero"));
        }
        if self.snapshot.timeout.is_zero() {
            return Err(anyhow!("snapshot timeout must be greater than zero"));
        }
        if self.ws.connect_timeout.is_zero() {
            return Err(anyhow!("connect timeout must be greater than zero"));
        }
        validate_probability(self.box_probability)
    }
}

fn default_ws_url(port: u16) -> String {
    format!("ws://127.0.0.1:{}{}", port, DEFAULT_WS_PATH)
}

fn default_snapshot_url(port: u16) -> String {
    format!("http://127.0.0.1:{}{}", port, DEFAULT_SNAPSHOT_PATH)
}

fn read_config_file(path: &Path) -> Result<DetectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
