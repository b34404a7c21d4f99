use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const DEFAULT_FILTER: &str = "warn";
const DEFAULT_LOG_FILE: &str = "docchat.logs.jsonl";

static INSTALLED: OnceCell<LogSink> = OnceCell::new();

/// Where log records go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    /// Compact lines on stderr.
    Stderr,
    /// JSON lines appended to a file; nothing is written to the terminal.
    JsonFile(PathBuf),
    Disabled,
}

/// Logging setup for a process using the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `warn` or `docchat_stream=debug`.
    pub filter: String,
    pub sink: LogSink,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            sink: LogSink::Stderr,
        }
    }
}

impl LogSettings {
    /// Reads the logging environment:
    ///
    /// - `DOCCHAT_OBSERVABILITY_ENABLED`: `0`/`false`/`off` disables logging.
    /// - `DOCCHAT_LOG_LEVEL`, then `RUST_LOG`: filter directive (default `warn`).
    /// - `DOCCHAT_JSON_LOG_PATH`: send JSON lines to this file instead of stderr.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let disabled = read("DOCCHAT_OBSERVABILITY_ENABLED").is_some_and(|flag| {
            matches!(
                flag.to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off" | "disabled"
            )
        });
        let filter = read("DOCCHAT_LOG_LEVEL")
            .or_else(|| read("RUST_LOG"))
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let sink = if disabled {
            LogSink::Disabled
        } else {
            read("DOCCHAT_JSON_LOG_PATH").map_or(LogSink::Stderr, |path| LogSink::JsonFile(path.into()))
        };
        Self { filter, sink }
    }

    /// Keeps the terminal free for chat output: logs go to `path`, or to
    /// `docchat.logs.jsonl` in the working directory when already on stderr.
    pub fn file_only(mut self, path: Option<PathBuf>) -> Self {
        self.sink = match (path, self.sink) {
            (_, LogSink::Disabled) => LogSink::Disabled,
            (Some(path), _) => LogSink::JsonFile(path),
            (None, LogSink::JsonFile(existing)) => LogSink::JsonFile(existing),
            (None, LogSink::Stderr) => LogSink::JsonFile(PathBuf::from(DEFAULT_LOG_FILE)),
        };
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs the global subscriber once per process.
///
/// Returns the sink that is in effect; later calls keep the first one.
pub fn init_logging(settings: &LogSettings) -> &'static LogSink {
    INSTALLED.get_or_init(|| {
        match &settings.sink {
            LogSink::Disabled => {}
            LogSink::Stderr => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(settings.env_filter())
                    .with(layer)
                    .try_init();
            }
            LogSink::JsonFile(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(settings.env_filter())
                    .with(layer)
                    .try_init();
            }
        }
        settings.sink.clone()
    })
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> LogSettings {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn defaults_to_warn_on_stderr() {
        assert_eq!(settings(&[]), LogSettings::default());
    }

    #[test]
    fn docchat_level_wins_over_rust_log() {
        let s = settings(&[("RUST_LOG", "info"), ("DOCCHAT_LOG_LEVEL", "docchat_stream=debug")]);
        assert_eq!(s.filter, "docchat_stream=debug");
        assert_eq!(settings(&[("RUST_LOG", "info")]).filter, "info");
    }

    #[test]
    fn kill_switch_and_json_path() {
        assert_eq!(
            settings(&[("DOCCHAT_OBSERVABILITY_ENABLED", "Off"), ("DOCCHAT_JSON_LOG_PATH", "x.jsonl")]).sink,
            LogSink::Disabled
        );
        assert_eq!(
            settings(&[("DOCCHAT_JSON_LOG_PATH", "logs/chat.jsonl")]).sink,
            LogSink::JsonFile("logs/chat.jsonl".into())
        );
    }

    #[test]
    fn file_only_moves_stderr_logging_into_a_file() {
        assert_eq!(
            LogSettings::default().file_only(None).sink,
            LogSink::JsonFile(DEFAULT_LOG_FILE.into())
        );
        assert_eq!(
            LogSettings::default().file_only(Some("/tmp/c.jsonl".into())).sink,
            LogSink::JsonFile("/tmp/c.jsonl".into())
        );
        let off = LogSettings {
            sink: LogSink::Disabled,
            ..LogSettings::default()
        };
        assert_eq!(off.file_only(None).sink, LogSink::Disabled);
    }

    #[test]
    fn bare_file_names_log_into_the_working_directory() {
        assert_eq!(
            split_log_path(Path::new("chat.jsonl")),
            (PathBuf::from("."), "chat.jsonl".to_string())
        );
    }
}
