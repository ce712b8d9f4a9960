//! Logging setup
//!
//! The library only uses the `log` macros. Binaries call [`init`] once to
//! install `env_logger`; `RUST_LOG` always wins over the configured level.

use log::LevelFilter;

/// Log level names accepted in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    pub fn filter(&self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

/// Level used when `RUST_LOG` is unset: debug mode forces at least `debug`.
pub fn default_filter(debug: bool, configured: &str) -> &'static str {
    let level = LogLevel::parse(configured).unwrap_or(LogLevel::Info);
    if debug && level > LogLevel::Debug {
        LogLevel::Debug.as_str()
    } else {
        level.as_str()
    }
}

/// Installs `env_logger`. Later calls are ignored.
pub fn init(debug: bool, configured: &str) {
    let filter = default_filter(debug, configured);
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("Trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::Debug.filter(), LevelFilter::Debug);
    }

    #[test]
    fn test_debug_raises_default_level() {
        assert_eq!(default_filter(false, "info"), "info");
        assert_eq!(default_filter(true, "info"), "debug");
        assert_eq!(default_filter(true, "trace"), "trace");
        assert_eq!(default_filter(false, "nonsense"), "info");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false, "warn");
        init(true, "debug");
        log::warn!("still logging");
    }
}
