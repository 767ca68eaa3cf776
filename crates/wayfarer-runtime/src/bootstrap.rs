//! Process-wide tracing setup.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use wayfarer_config::ObservabilityConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once; later calls are no-ops.
///
/// `RUST_LOG` wins over the configured level. `WAYFARER_LOG_FILE` wins over
/// `observability.log_file`. A log file that cannot be opened falls back to
/// stdout.
pub fn init_tracing(observability: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let log_file = log_file_path(observability);
        let file = log_file.as_deref().and_then(open_log_file);
        let to_file = file.is_some();
        let writer = match file {
            Some(file) => BoxMakeWriter::new(Mutex::new(file)),
            None => BoxMakeWriter::new(std::io::stdout),
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(fallback_level(&observability.log_level)));
        let span_events = if observability.traces_enabled {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(!to_file)
            .with_writer(writer)
            .with_span_events(span_events)
            .try_init();

        tracing::info!(
            log_level = %observability.log_level,
            traces_enabled = observability.traces_enabled,
            log_file = %log_file
                .as_deref()
                .filter(|_| to_file)
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "(stdout)".to_string()),
            "tracing initialized"
        );
    });
}

fn log_file_path(observability: &ObservabilityConfig) -> Option<PathBuf> {
    std::env::var("WAYFARER_LOG_FILE")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .or_else(|| observability.log_file.clone())
        .map(PathBuf::from)
}

fn fallback_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Append-mode log file, creating missing parent directories.
fn open_log_file(path: &Path) -> Option<File> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if let Err(err) = fs::create_dir_all(dir) {
            eprintln!("wayfarer: cannot create log directory {}: {}", dir.display(), err);
            return None;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| eprintln!("wayfarer: cannot open log file {}: {}", path.display(), err))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_level_normalizes_config_value() {
        assert_eq!(fallback_level(" DEBUG "), "debug");
        assert_eq!(fallback_level("verbose"), "info");
    }

    #[test]
    fn test_log_file_is_created_with_parent_dirs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("logs").join("wayfarer.log");
        assert!(open_log_file(&path).is_some());
        assert!(path.exists());
    }

    #[test]
    fn test_unopenable_log_file_is_skipped() {
        let dir = tempfile::tempdir().expect("temp dir");
        // a directory cannot be opened for appending
        assert!(open_log_file(dir.path()).is_none());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let config = ObservabilityConfig::default();
        init_tracing(&config);
        init_tracing(&config);
        assert!(TRACING_INIT.get().is_some());
    }
}
