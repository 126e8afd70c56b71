use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable naming the log level (DEBUG, INFO, WARN, ERROR, CRITICAL).
pub const LOG_LEVEL_ENV: &str = "THELOGLEVEL";

/// Where the effective filter came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelSource {
    Verbose,
    Env(String),
    InvalidEnv(String),
    Default,
}

/// Map `-v` and the `THELOGLEVEL` value to a filter directive.
///
/// `None` means no explicit level was requested and `RUST_LOG` may apply.
pub fn resolve_level(verbose: u8, env_level: Option<&str>) -> (Option<&'static str>, LevelSource) {
    if verbose > 0 {
        return (Some("debug"), LevelSource::Verbose);
    }
    let Some(raw) = env_level else {
        return (None, LevelSource::Default);
    };
    let level = match raw {
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => return (Some("info"), LevelSource::InvalidEnv(raw.to_string())),
    };
    (Some(level), LevelSource::Env(raw.to_string()))
}

/// Install the global subscriber. Call once, before any line is processed.
pub fn init_logging(verbose: u8) {
    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
    let (level, source) = resolve_level(verbose, env_level.as_deref());

    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // stdout stays free for pipes; diagnostics go to stderr
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match source {
        LevelSource::Verbose if env_level.is_some() => {
            warn!("verbose flag overrides {LOG_LEVEL_ENV}");
        }
        LevelSource::InvalidEnv(raw) => {
            warn!("{LOG_LEVEL_ENV}={raw} is not a known level, defaulting to INFO");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_level_should_work() {
        assert_eq!(resolve_level(1, Some("ERROR")), (Some("debug"), LevelSource::Verbose));
        assert_eq!(resolve_level(0, None), (None, LevelSource::Default));
        assert_eq!(
            resolve_level(0, Some("WARN")),
            (Some("warn"), LevelSource::Env("WARN".to_string()))
        );
        assert_eq!(
            resolve_level(0, Some("CRITICAL")),
            (Some("error"), LevelSource::Env("CRITICAL".to_string()))
        );
        assert_eq!(
            resolve_level(0, Some("loud")),
            (Some("info"), LevelSource::InvalidEnv("loud".to_string()))
        );
    }
}
