//! Verbosity control.
//!
//! strand logs through the `log` facade and never installs a logger itself.
//! `LogLevel` is the configurable verbosity, mapped onto `log::LevelFilter`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How much strand logs, from most to least verbose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every lock acquisition and release.
    Trace,

    /// Thread lifecycle transitions.
    Debug,

    /// Registry creation and shutdown.
    #[default]
    Info,

    /// Swallowed platform failures and rollback problems.
    #[serde(alias = "warn")]
    Warning,

    /// Panicking thread bodies and failed guard releases.
    Error,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
    ];

    /// The spelling used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// The `log` crate filter that lets this level and everything more severe through.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warning => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
        }
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        level.to_level_filter()
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    /// Case-insensitive; `warn` is accepted for `warning`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if wanted == "warn" {
            return Ok(Self::Warning);
        }
        Self::ALL
            .into_iter()
            .find(|level| level.name() == wanted)
            .ok_or_else(|| Error::Config(format!("unknown log level '{}'", s)))
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_order_by_severity() {
        let mut shuffled = [
            LogLevel::Warning,
            LogLevel::Trace,
            LogLevel::Error,
            LogLevel::Info,
            LogLevel::Debug,
        ];
        shuffled.sort();
        assert_eq!(shuffled, LogLevel::ALL);
    }

    #[test]
    fn test_parse() {
        assert_eq!(" TRACE ".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!(matches!("loud".parse::<LogLevel>(), Err(Error::Config(_))));
        for level in LogLevel::ALL {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
    }

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(log::LevelFilter::from(LogLevel::Warning), log::LevelFilter::Warn);
        assert_eq!(LogLevel::Trace.to_level_filter(), log::LevelFilter::Trace);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
