//! Configuration for the MTA debug adapter.
//!
//! The adapter reads an optional TOML file describing how to reach the game
//! server's debug backend and how to log. Every field has a default, so an
//! empty (or missing) file yields a working configuration.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;
use url::Url;

/// Port the backend's HTTP debug interface listens on by default.
pub const DEFAULT_BACKEND_PORT: u16 = 51237;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` for `toml::de::Error` includes a snippet of the raw input. Keep only the
        // message so configuration contents never end up in logs.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();

    // Escaped quotes (`\"`) may appear inside the quoted value; a naive `"[^"]*"` would stop
    // early and leak the remainder.
    let re = QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r#""(?:\\.|[^"\\])*""#).expect("quoted-string regex should compile")
    });
    let mut out = re.replace_all(message, r#""<redacted>""#).into_owned();

    // `unknown field `secret`, expected ...`: the key is user-controlled.
    if let Some(pos) = out.find("unknown field `") {
        let start = pos + "unknown field `".len();
        if let Some(end_rel) = out[start..].find('`') {
            out.replace_range(start..start + end_rel, "<redacted>");
        }
    }

    out
}

/// Which execution contexts the backend exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextLayout {
    /// One context addressed through the unsuffixed endpoints (`/get_info`, ...).
    Single,
    /// A server-side and a client-side context (`/get_info_server`, `/get_info_client`, ...).
    #[default]
    ServerAndClient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Base URL of the backend HTTP API.
    #[serde(default = "BackendConfig::default_url")]
    pub url: Url,

    #[serde(default)]
    pub contexts: ContextLayout,

    /// How often `launch` re-queries the resource info while the server starts up.
    #[serde(default = "BackendConfig::default_launch_retry_interval_ms")]
    pub launch_retry_interval_ms: u64,

    /// Interval of the resume-state poller.
    #[serde(default = "BackendConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay between submitting an expression and fetching its result.
    #[serde(default = "BackendConfig::default_eval_result_delay_ms")]
    pub eval_result_delay_ms: u64,

    /// Per-request timeout for backend HTTP calls.
    #[serde(default = "BackendConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Location of the resources directory relative to the server install path.
    #[serde(default = "BackendConfig::default_resources_subdir")]
    pub resources_subdir: String,
}

impl BackendConfig {
    fn default_url() -> Url {
        Url::parse(&format!("http://localhost:{DEFAULT_BACKEND_PORT}"))
            .expect("default backend url should parse")
    }

    fn default_launch_retry_interval_ms() -> u64 {
        200
    }

    fn default_poll_interval_ms() -> u64 {
        500
    }

    fn default_eval_result_delay_ms() -> u64 {
        1_000
    }

    fn default_request_timeout_ms() -> u64 {
        5_000
    }

    fn default_resources_subdir() -> String {
        "mods/deathmatch/resources".to_owned()
    }

    // `tokio::time::interval` panics on a zero period.
    pub fn launch_retry_interval(&self) -> Duration {
        Duration::from_millis(self.launch_retry_interval_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn eval_result_delay(&self) -> Duration {
        Duration::from_millis(self.eval_result_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            contexts: ContextLayout::default(),
            launch_retry_interval_ms: Self::default_launch_retry_interval_ms(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            eval_result_delay_ms: Self::default_eval_result_delay_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            resources_subdir: Self::default_resources_subdir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level, or a full `tracing_subscriber::EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Mirror logs to stderr. stdout is reserved for DAP traffic.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// If the file cannot be opened, file logging is disabled while other sinks
    /// remain active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Create the effective `EnvFilter`.
    ///
    /// If `RUST_LOG` is set, it is merged on top of the configured level.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AdapterConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            guard: self.file.lock(),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: parking_lot::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Initializes structured `tracing` logging.
///
/// Safe to call multiple times; only the first call installs a global
/// subscriber.
pub fn init_tracing_with_config(config: &AdapterConfig) {
    let logging = &config.logging;

    TRACING_INIT.call_once(|| {
        let filter = logging.env_filter();

        let file = logging
            .file
            .as_ref()
            .and_then(|path| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .ok()
            })
            .map(|file| Arc::new(Mutex::new(file)));

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if logging.stderr {
            // `cargo test` output capture only sees the stdlib print macros, so route through
            // `TestWriter` in debug builds.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr);
            } else {
                make_writer = BoxMakeWriter::new(io::stderr);
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
