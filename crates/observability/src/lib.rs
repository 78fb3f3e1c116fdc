// crates/observability/src/lib.rs
//! Tracing setup shared by the benchstream binaries.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn,benchstream=info,benchstream_server=info,benchstream_core=info,benchstream_db=info";

/// Output format for the global subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `BENCHSTREAM_LOG_JSON=1|true` selects JSON lines.
    pub fn from_env() -> Self {
        match std::env::var("BENCHSTREAM_LOG_JSON").ok().as_deref() {
            Some("1") | Some("true") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Build the filter from `RUST_LOG`, falling back to `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = env_filter(DEFAULT_FILTER);
    let result = match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Whichever test thread gets here first wins; the second call must not panic.
        let _ = init_tracing(LogFormat::Compact);
        assert!(init_tracing(LogFormat::Json).is_err());
    }

    #[test]
    fn test_default_filter_parses() {
        let filter = EnvFilter::try_new(DEFAULT_FILTER).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("benchstream_server=info"));
        assert!(rendered.contains("benchstream_db=info"));
        assert_eq!(
            filter.max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::INFO)
        );
    }
}
