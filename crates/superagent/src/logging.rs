//! Tracing setup: human-readable console output plus a daily-rotated JSON
//! file.

use std::path::PathBuf;

use superagent_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const CRATES: &[&str] = &[
    "superagent",
    "superagent_agent",
    "superagent_llm",
    "superagent_server",
    "superagent_sandbox",
    "superagent_config",
];

fn directives(level: &str, fallback: &str) -> String {
    let mut parts: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
    parts.push(fallback.to_string());
    parts.join(",")
}

fn log_dir(config: &LoggingConfig) -> PathBuf {
    config.dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("superagent").join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"))
    })
}

/// Install the global subscriber. The returned guard flushes the file
/// writer on drop and must be held for the life of the process.
///
/// `RUST_LOG` overrides the console filter.
pub fn init(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new(directives("debug", "info")),
        Err(_) => EnvFilter::try_new(directives(&config.level, "warn"))
            .unwrap_or_else(|_| EnvFilter::new(directives("info", "warn"))),
    };

    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    if !config.file {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir(config), "superagent.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(directives("trace", "info"))),
        )
        .init();

    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_cover_all_crates() {
        let d = directives("debug", "warn");
        assert!(d.starts_with("superagent=debug,"));
        assert!(d.contains("superagent_server=debug"));
        assert!(d.ends_with(",warn"));
    }

    #[test]
    fn test_log_dir_override() {
        let config = LoggingConfig {
            dir: Some(PathBuf::from("/tmp/sa-logs")),
            ..Default::default()
        };
        assert_eq!(log_dir(&config), PathBuf::from("/tmp/sa-logs"));
    }
}
