//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the HTTP server, media registry, relay, transcoders and
//! MJPEG feeds. Every section defaults sensibly so a completely empty `{}`
//! file is valid. Environment overrides (`RTSP_PORT`, `ENABLED_STREAMS`,
//! `SERVER_IP`) are applied on top with [`Config::apply_env`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub media: MediaConfig,
    pub relay: RelayConfig,
    pub transcoder: TranscoderConfig,
    pub tools: ToolsConfig,
    pub feeds: Vec<FeedConfig>,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Strict variant of [`Config::load_or_default`] used by `validate`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using an arbitrary variable lookup.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("RTSP_PORT") {
            match port.trim().parse::<u16>() {
                Ok(p) => self.relay.port = p,
                Err(e) => tracing::warn!("Ignoring invalid RTSP_PORT {port:?}: {e}"),
            }
        }

        if let Some(list) = lookup("ENABLED_STREAMS") {
            let ids: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            self.transcoder.enabled_streams = Some(ids);
        }

        if let Some(host) = lookup("SERVER_IP") {
            let host = host.trim();
            if !host.is_empty() {
                self.transcoder.advertised_host = host.to_string();
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.relay.port == 0 {
            warnings.push("relay.port is 0; transcoders cannot publish".into());
        }

        if self.media.chunk_size == 0 {
            warnings.push("media.chunk_size is 0; the default of 1 MiB is used".into());
        }

        if self.media.strategy == RegistryStrategy::Static && self.media.static_count == 0 {
            warnings.push("media.static_count is 0; no streams will be registered".into());
        }

        if self.media.strategy == RegistryStrategy::Directory && self.media.extensions.is_empty()
        {
            warnings.push("media.extensions is empty; directory discovery finds nothing".into());
        }

        if self.server.stream_mode == StreamMode::Mjpeg && self.feeds.is_empty() {
            warnings.push("server.stream_mode is mjpeg but no feeds are configured".into());
        }

        for (i, feed) in self.feeds.iter().enumerate() {
            if feed.id.is_empty() {
                warnings.push(format!("feeds[{i}].id is empty"));
            }
            if feed.fps == 0 {
                warnings.push(format!("feeds[{i}].fps is 0"));
            }
        }

        if self.transcoder.auto_restart && self.transcoder.monitor_interval_secs == 0 {
            warnings.push(
                "transcoder.auto_restart is enabled but the monitor is disabled (interval 0)"
                    .into(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Which handler serves `GET /{name}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Finite, range-capable file serving.
    #[default]
    Range,
    /// Unbounded body that restarts at end-of-file.
    Loop,
    /// Multipart JPEG frames from a configured feed.
    Mjpeg,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub stream_mode: StreamMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            stream_mode: StreamMode::Range,
        }
    }
}

/// How the media registry is populated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryStrategy {
    /// `video1`..`videoN` mapped by convention into `dir`.
    #[default]
    Static,
    /// Every recognized video file in `dir`, keyed by file stem.
    Directory,
}

/// What to do with a range whose end is past the file or before its start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    /// Clamp the end to the last byte of the file.
    #[default]
    Clamp,
    /// Reject with 416.
    Strict,
}

/// Default read chunk: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Media registry and byte-serving settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub strategy: RegistryStrategy,
    pub dir: PathBuf,
    pub static_count: u32,
    pub static_extension: String,
    pub extensions: Vec<String>,
    pub chunk_size: usize,
    pub range_policy: RangePolicy,
}

impl MediaConfig {
    /// Chunk size with a zero value replaced by the default.
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            strategy: RegistryStrategy::Static,
            dir: PathBuf::from("videos"),
            static_count: 4,
            static_extension: "mp4".into(),
            extensions: ["mp4", "m4v", "mkv", "webm", "mov", "avi", "ts"]
                .into_iter()
                .map(String::from)
                .collect(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            range_policy: RangePolicy::Clamp,
        }
    }
}

/// RTSP relay server (mediamtx) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub port: u16,
    pub binary: PathBuf,
    /// Launch the relay ourselves when it is not already reachable.
    pub manage: bool,
    pub startup_grace_ms: u64,
    pub stop_timeout_secs: u64,
    pub probe_timeout_ms: u64,
}

impl RelayConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8554,
            binary: PathBuf::from("./mediamtx"),
            manage: true,
            startup_grace_ms: 1000,
            stop_timeout_secs: 5,
            probe_timeout_ms: 500,
        }
    }
}

/// Transcoder subprocess supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Streams to launch; `None` means every registered stream.
    pub enabled_streams: Option<Vec<String>>,
    /// Host the transcoders publish to.
    pub publish_host: String,
    /// Host used when advertising RTSP URLs to clients.
    pub advertised_host: String,
    /// Launch all enabled streams when the server starts.
    pub autostart: bool,
    pub startup_grace_ms: u64,
    pub launch_stagger_ms: u64,
    pub stop_timeout_secs: u64,
    /// Liveness monitor period; 0 disables the monitor.
    pub monitor_interval_secs: u64,
    pub auto_restart: bool,
    pub restart_backoff_initial_secs: u64,
    pub restart_backoff_max_secs: u64,
}

impl TranscoderConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn launch_stagger(&self) -> Duration {
        Duration::from_millis(self.launch_stagger_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            enabled_streams: None,
            publish_host: "127.0.0.1".into(),
            advertised_host: "localhost".into(),
            autostart: true,
            startup_grace_ms: 500,
            launch_stagger_ms: 500,
            stop_timeout_secs: 5,
            monitor_interval_secs: 5,
            auto_restart: false,
            restart_backoff_initial_secs: 1,
            restart_backoff_max_secs: 60,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
}

/// An MJPEG feed backed by a capture device or a looping file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub id: String,
    /// `/dev/videoN` for a capture device, otherwise a file path.
    pub source: String,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// ffmpeg `-q:v` value (2 = best, 31 = worst).
    #[serde(default = "default_quality")]
    pub quality: u32,
}

fn default_fps() -> u32 {
    15
}

fn default_quality() -> u32 {
    5
}
