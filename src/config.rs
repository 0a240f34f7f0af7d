//! Configuration types for unpackarr

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use tracing::warn;

/// Smallest accepted sampling or stall period. Anything below this would turn
/// the progress sampler into a busy loop.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Smallest accepted folder scan or *arr poll period
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Webhook events understood by [`WebhookConfig::events`]
pub const WEBHOOK_EVENTS: [&str; 2] = ["extracted", "failed"];

/// Main configuration
///
/// Every field has a default, so an empty JSON object is a valid config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Log level used when `RUST_LOG` is not set (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Health/status HTTP server
    #[serde(default)]
    pub health: HealthConfig,

    /// Extraction behaviour
    #[serde(default)]
    pub extract: ExtractConfig,

    /// Folder watcher
    #[serde(default)]
    pub watch: WatchConfig,

    /// Result webhook (None = disabled)
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,

    /// Sonarr connection
    #[serde(default)]
    pub sonarr: Option<StarrAppConfig>,

    /// Radarr connection
    #[serde(default)]
    pub radarr: Option<StarrAppConfig>,

    /// Lidarr connection
    #[serde(default)]
    pub lidarr: Option<StarrAppConfig>,

    /// Readarr connection
    #[serde(default)]
    pub readarr: Option<StarrAppConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            health: HealthConfig::default(),
            extract: ExtractConfig::default(),
            watch: WatchConfig::default(),
            webhook: None,
            sonarr: None,
            radarr: None,
            lidarr: None,
            readarr: None,
        }
    }
}

/// Health/status server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Serve /ping, /health, /ready, /status and /metrics (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address (default: 0.0.0.0:8085)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
        }
    }
}

/// Extraction configuration shared by the queue, the extractor and the
/// progress monitor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Number of extractions allowed to run at once (default: 1)
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Delete archives after a successful extraction (default: true)
    ///
    /// Applies to folder-watcher submissions. *arr submissions never delete
    /// originals because the *arr application still has to import them.
    #[serde(default = "default_true")]
    pub delete_original: bool,

    /// Passwords tried for every archive, before request-specific ones
    #[serde(default)]
    pub passwords: Vec<String>,

    /// Try an empty password after the configured ones (default: true)
    ///
    /// Archives are always tried without a password when no passwords are
    /// configured at all.
    #[serde(default = "default_true")]
    pub try_empty_password: bool,

    /// How often running extractions are sampled (default: 30 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,

    /// Inactivity period after which a running extraction is reported as
    /// stalled (default: 5 minutes)
    #[serde(default = "default_stall_timeout", with = "duration_serde")]
    pub stall_timeout: Duration,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            delete_original: true,
            passwords: Vec::new(),
            try_empty_password: true,
            progress_interval: default_progress_interval(),
            stall_timeout: default_stall_timeout(),
        }
    }
}

/// Folder watcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Enable the folder watcher (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Root folders whose immediate subdirectories are scanned
    #[serde(default = "default_watch_paths")]
    pub paths: Vec<PathBuf>,

    /// Scan period (default: 2 minutes)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Orphaned-marker sweep period (default: 1 hour)
    #[serde(default = "default_marker_cleanup_interval", with = "duration_serde")]
    pub marker_cleanup_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            paths: default_watch_paths(),
            poll_interval: default_poll_interval(),
            marker_cleanup_interval: default_marker_cleanup_interval(),
        }
    }
}

/// Webhook configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL to POST to
    pub url: String,

    /// Payload template: "discord", "slack", "gotify" or anything else for
    /// the generic JSON payload (default: "discord")
    #[serde(default = "default_webhook_template")]
    pub template: String,

    /// Events that trigger the webhook: "extracted" and/or "failed"
    #[serde(default = "default_webhook_events")]
    pub events: Vec<String>,

    /// Request timeout (default: 10 seconds)
    #[serde(default = "default_webhook_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            template: default_webhook_template(),
            events: default_webhook_events(),
            timeout: default_webhook_timeout(),
        }
    }
}

/// Connection settings for one media-management application
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StarrAppConfig {
    /// Base URL, e.g. `http://sonarr:8989`
    pub url: String,

    /// API key sent as `X-Api-Key`
    #[serde(default)]
    pub api_key: String,

    /// Only queue items whose output path starts with one of these prefixes
    /// are extracted (default: ["/downloads"])
    #[serde(default = "default_watch_paths")]
    pub paths: Vec<PathBuf>,

    /// Download protocols to accept, e.g. "torrent", "usenet" (empty = all)
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Per-request timeout (default: 10 seconds)
    #[serde(default = "default_starr_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Queue poll period (default: 2 minutes)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for StarrAppConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            paths: default_watch_paths(),
            protocols: Vec::new(),
            timeout: default_starr_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl StarrAppConfig {
    /// Whether an output path lives under one of the configured prefixes
    pub fn has_path(&self, path: &Path) -> bool {
        self.paths.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Whether a download protocol is accepted (case-insensitive)
    pub fn has_protocol(&self, protocol: &str) -> bool {
        self.protocols.is_empty()
            || self
                .protocols
                .iter()
                .any(|p| p.eq_ignore_ascii_case(protocol))
    }
}

impl Config {
    /// Load a JSON config file and normalise it with [`Config::validate`]
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the runtime configuration
    ///
    /// Starts from `path` (or the defaults), applies environment overrides
    /// (see [`Config::apply_env`]) and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Override settings from environment variables
    ///
    /// `lookup` returns the value of a variable, if set. Recognised names:
    ///
    /// | Variable | Setting |
    /// |---|---|
    /// | `HEALTH_PORT` | port of `health.bind_address` |
    /// | `HEALTH_ENABLED` | `health.enabled` |
    /// | `LOG_LEVEL` | `log_level` (lowercased) |
    /// | `EXTRACT_PARALLEL` | `extract.parallel` |
    /// | `EXTRACT_DELETE_ORIG` | `extract.delete_original` |
    /// | `EXTRACT_PASSWORDS` | `extract.passwords` |
    /// | `EXTRACT_PROGRESS_INTERVAL` | `extract.progress_interval` |
    /// | `EXTRACT_STALL_TIMEOUT` | `extract.stall_timeout` |
    /// | `WATCH_FOLDER_WATCH_ENABLED` | `watch.enabled` |
    /// | `WATCH_FOLDER_WATCH_PATHS` | `watch.paths` |
    /// | `WATCH_MARKER_CLEANUP_INTERVAL` | `watch.marker_cleanup_interval` |
    /// | `TIMING_POLL_INTERVAL` | `watch.poll_interval` and every app's `poll_interval` |
    /// | `WEBHOOK_URL`, `WEBHOOK_TEMPLATE`, `WEBHOOK_EVENTS`, `WEBHOOK_TIMEOUT` | `webhook` |
    /// | `SONARR_URL`, `SONARR_API_KEY`, `SONARR_PATHS`, `SONARR_PROTOCOLS`, `SONARR_TIMEOUT` | `sonarr` (same for `RADARR_`, `LIDARR_`, `READARR_`) |
    ///
    /// Lists are comma separated (`a,b`) or indexed (`NAME_0`, `NAME_1`, ...).
    /// Durations are whole seconds (`90`) or unit suffixed (`500ms`, `2m`,
    /// `1h30m`). Booleans accept `true/false`, `1/0`, `yes/no` and `on/off`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let env = EnvReader { lookup };

        if let Some(port) = env.parse::<u16>("HEALTH_PORT")? {
            self.health.bind_address.set_port(port);
        }
        if let Some(enabled) = env.bool("HEALTH_ENABLED")? {
            self.health.enabled = enabled;
        }
        if let Some(level) = env.string("LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }

        if let Some(parallel) = env.parse::<usize>("EXTRACT_PARALLEL")? {
            self.extract.parallel = parallel;
        }
        if let Some(delete) = env.bool("EXTRACT_DELETE_ORIG")? {
            self.extract.delete_original = delete;
        }
        if let Some(passwords) = env.list("EXTRACT_PASSWORDS") {
            self.extract.passwords = passwords;
        }
        if let Some(interval) = env.duration("EXTRACT_PROGRESS_INTERVAL")? {
            self.extract.progress_interval = interval;
        }
        if let Some(timeout) = env.duration("EXTRACT_STALL_TIMEOUT")? {
            self.extract.stall_timeout = timeout;
        }

        if let Some(enabled) = env.bool("WATCH_FOLDER_WATCH_ENABLED")? {
            self.watch.enabled = enabled;
        }
        if let Some(paths) = env.list("WATCH_FOLDER_WATCH_PATHS") {
            self.watch.paths = paths.into_iter().map(PathBuf::from).collect();
        }
        if let Some(interval) = env.duration("WATCH_MARKER_CLEANUP_INTERVAL")? {
            self.watch.marker_cleanup_interval = interval;
        }

        let url = env.string("WEBHOOK_URL");
        let template = env.string("WEBHOOK_TEMPLATE");
        let events = env.list("WEBHOOK_EVENTS");
        let timeout = env.duration("WEBHOOK_TIMEOUT")?;
        if url.is_some() || template.is_some() || events.is_some() || timeout.is_some() {
            let webhook = self.webhook.get_or_insert_with(WebhookConfig::default);
            if let Some(url) = url {
                webhook.url = url;
            }
            if let Some(template) = template {
                webhook.template = template;
            }
            if let Some(events) = events {
                webhook.events = events;
            }
            if let Some(timeout) = timeout {
                webhook.timeout = timeout;
            }
        }

        for (name, app) in self.starr_apps_mut() {
            let prefix = name.to_uppercase();
            let key = |suffix: &str| format!("{prefix}_{suffix}");

            let url = env.string(&key("URL"));
            let api_key = env.string(&key("API_KEY"));
            let paths = env.list(&key("PATHS"));
            let protocols = env.list(&key("PROTOCOLS"));
            let timeout = env.duration(&key("TIMEOUT"))?;
            if url.is_none()
                && api_key.is_none()
                && paths.is_none()
                && protocols.is_none()
                && timeout.is_none()
            {
                continue;
            }

            let cfg = app.get_or_insert_with(StarrAppConfig::default);
            if let Some(url) = url {
                cfg.url = url;
            }
            if let Some(api_key) = api_key {
                cfg.api_key = api_key;
            }
            if let Some(paths) = paths {
                cfg.paths = paths.into_iter().map(PathBuf::from).collect();
            }
            if let Some(protocols) = protocols {
                cfg.protocols = protocols;
            }
            if let Some(timeout) = timeout {
                cfg.timeout = timeout;
            }
        }

        if let Some(interval) = env.duration("TIMING_POLL_INTERVAL")? {
            self.watch.poll_interval = interval;
            for (_, app) in self.starr_apps_mut() {
                if let Some(cfg) = app.as_mut() {
                    cfg.poll_interval = interval;
                }
            }
        }

        Ok(())
    }

    /// Normalise values that have a safe fallback and reject the ones that
    /// don't
    pub fn validate(&mut self) -> Result<()> {
        if self.extract.parallel < 1 {
            self.extract.parallel = 1;
        }

        self.extract.progress_interval = clamp_interval(
            "extract.progress_interval",
            self.extract.progress_interval,
            default_progress_interval(),
            MIN_MONITOR_INTERVAL,
        );
        self.extract.stall_timeout = clamp_interval(
            "extract.stall_timeout",
            self.extract.stall_timeout,
            default_stall_timeout(),
            MIN_MONITOR_INTERVAL,
        );

        self.watch.poll_interval = clamp_interval(
            "watch.poll_interval",
            self.watch.poll_interval,
            default_poll_interval(),
            MIN_POLL_INTERVAL,
        );
        self.watch.marker_cleanup_interval = clamp_interval(
            "watch.marker_cleanup_interval",
            self.watch.marker_cleanup_interval,
            default_marker_cleanup_interval(),
            MIN_POLL_INTERVAL,
        );
        if self.watch.enabled && self.watch.paths.is_empty() {
            return Err(Error::config(
                "watch.paths",
                "folder watcher enabled without any paths",
            ));
        }

        if let Some(webhook) = self.webhook.as_mut() {
            if webhook.url.is_empty() {
                self.webhook = None;
            } else {
                url::Url::parse(&webhook.url)
                    .map_err(|e| Error::config("webhook.url", e.to_string()))?;
                webhook.events = filter_webhook_events(&webhook.events);
            }
        }

        for (name, app) in self.starr_apps_mut() {
            let Some(cfg) = app.as_mut() else { continue };
            if cfg.url.is_empty() {
                *app = None;
                continue;
            }
            url::Url::parse(&cfg.url)
                .map_err(|e| Error::config(format!("{name}.url"), e.to_string()))?;
            cfg.poll_interval = clamp_interval(
                &format!("{name}.poll_interval"),
                cfg.poll_interval,
                default_poll_interval(),
                MIN_POLL_INTERVAL,
            );
            if cfg.timeout.is_zero() {
                cfg.timeout = default_starr_timeout();
            }
        }

        Ok(())
    }

    /// Configured *arr applications with a non-empty URL, by name
    pub fn enabled_apps(&self) -> Vec<(&'static str, &StarrAppConfig)> {
        [
            ("sonarr", self.sonarr.as_ref()),
            ("radarr", self.radarr.as_ref()),
            ("lidarr", self.lidarr.as_ref()),
            ("readarr", self.readarr.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, app)| app.filter(|a| !a.url.is_empty()).map(|a| (name, a)))
        .collect()
    }

    fn starr_apps_mut(&mut self) -> [(&'static str, &mut Option<StarrAppConfig>); 4] {
        [
            ("sonarr", &mut self.sonarr),
            ("radarr", &mut self.radarr),
            ("lidarr", &mut self.lidarr),
            ("readarr", &mut self.readarr),
        ]
    }
}

/// Zero means `default`; anything else below `floor` is raised to `floor`
///
/// Every periodic task runs its period through this, since a zero tokio
/// interval panics and a tiny one spins.
pub(crate) fn clamp_interval(
    key: &str,
    value: Duration,
    default: Duration,
    floor: Duration,
) -> Duration {
    if value.is_zero() {
        return default;
    }
    if value < floor {
        warn!(
            key,
            requested_ms = value.as_millis() as u64,
            floor_ms = floor.as_millis() as u64,
            "interval below floor, clamping"
        );
        return floor;
    }
    value
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    /// Trimmed, non-empty value
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|e| Error::config(key, format!("invalid value {v:?}: {e}")))
            })
            .transpose()
    }

    fn bool(&self, key: &str) -> Result<Option<bool>> {
        self.string(key)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(Error::config(key, format!("invalid boolean {v:?}"))),
            })
            .transpose()
    }

    fn duration(&self, key: &str) -> Result<Option<Duration>> {
        self.string(key)
            .map(|v| {
                parse_duration(&v)
                    .ok_or_else(|| Error::config(key, format!("invalid duration {v:?}")))
            })
            .transpose()
    }

    /// `KEY=a,b` or `KEY_0=a`, `KEY_1=b`, ...
    fn list(&self, key: &str) -> Option<Vec<String>> {
        if let Some(raw) = (self.lookup)(key) {
            return Some(
                raw.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }

        let indexed: Vec<String> = (0..)
            .map_while(|i| self.string(&format!("{key}_{i}")))
            .collect();
        (!indexed.is_empty()).then_some(indexed)
    }
}

/// Whole seconds, or a sequence of `<number><unit>` with units `ms`, `s`,
/// `m` and `h`
fn parse_duration(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    if value.is_empty() {
        return None;
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut total = 0.0;
    let mut rest = value;
    while !rest.is_empty() {
        let unit_start = rest.find(|c: char| !is_number(c))?;
        let number: f64 = rest[..unit_start].parse().ok()?;
        rest = &rest[unit_start..];

        let unit_end = rest.find(is_number).unwrap_or(rest.len());
        total += match &rest[..unit_end] {
            "ms" => number / 1000.0,
            "s" => number,
            "m" => number * 60.0,
            "h" => number * 3600.0,
            _ => return None,
        };
        rest = &rest[unit_end..];
    }

    Duration::try_from_secs_f64(total).ok()
}

fn filter_webhook_events(events: &[String]) -> Vec<String> {
    let filtered: Vec<String> = events
        .iter()
        .filter(|e| {
            let known = WEBHOOK_EVENTS.contains(&e.as_str());
            if !known {
                warn!(event = %e, "ignoring unknown webhook event");
            }
            known
        })
        .cloned()
        .collect();

    if filtered.is_empty() {
        if !events.is_empty() {
            warn!("all configured webhook events were invalid, falling back to defaults");
        }
        return default_webhook_events();
    }
    filtered
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8085))
}

fn default_parallel() -> usize {
    1
}

pub(crate) fn default_progress_interval() -> Duration {
    Duration::from_secs(30)
}

pub(crate) fn default_stall_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_watch_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("/downloads")]
}

pub(crate) fn default_poll_interval() -> Duration {
    Duration::from_secs(2 * 60)
}

pub(crate) fn default_marker_cleanup_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_webhook_template() -> String {
    "discord".to_string()
}

fn default_webhook_events() -> Vec<String> {
    WEBHOOK_EVENTS.iter().map(|e| e.to_string()).collect()
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_starr_timeout() -> Duration {
    Duration::from_secs(10)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
