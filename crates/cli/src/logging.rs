use std::path::PathBuf;

use dossier_client::config::dossier_dir;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,dossier_cli=info,dossier_client=info,dossier_protocol=info";
const LOG_FILE: &str = "client.log";
const ENV_FILTER: &str = "DOSSIER_LOG_FILTER";
const ENV_FORMAT: &str = "DOSSIER_LOG_FORMAT";
const ENV_DIR: &str = "DOSSIER_LOG_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("pretty") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

/// Where and how the client writes its log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub directory: PathBuf,
    pub filter: String,
    pub format: LogFormat,
}

impl LogSettings {
    /// `DOSSIER_LOG_FILTER` wins over `RUST_LOG`; blank values count as unset.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let directory = lookup(ENV_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| dossier_dir().join("logs"));
        let filter = lookup(ENV_FILTER)
            .or_else(|| lookup(EnvFilter::DEFAULT_ENV))
            .filter(|value| EnvFilter::try_new(value).is_ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let format = lookup(ENV_FORMAT)
            .map(|value| LogFormat::parse(&value))
            .unwrap_or(LogFormat::Json);

        LogSettings {
            directory,
            filter,
            format,
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.directory.join(LOG_FILE)
    }
}

pub struct LoggingHandle {
    pub log_path: PathBuf,
    pub guard: WorkerGuard,
}

/// Log to a file under the dossier directory. The terminal belongs to the chat UI.
pub fn init_logging() -> anyhow::Result<LoggingHandle> {
    let settings = LogSettings::resolve(|key| std::env::var(key).ok());
    std::fs::create_dir_all(&settings.directory)?;
    let log_path = settings.log_path();

    let file_appender = tracing_appender::rolling::never(&settings.directory, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry().with(EnvFilter::new(&settings.filter));
    match settings.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_target(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_target(true),
            )
            .init(),
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = settings.format.as_str(),
        filter = %settings.filter,
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
    );

    Ok(LoggingHandle { log_path, guard })
}
