//! Ambient configuration: broadcast cadence, retry budget, and the log
//! format/level knobs, all sourced from the CLI with env var fallbacks the
//! way `CliArgs` does in the node service.

use std::time::Duration;

use clap::Parser;

/// Output format for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Rebuild coordination service")]
pub struct CliArgs {
    /// Interval between successive progress broadcasts / queries.
    #[arg(long, env = "REBUILD_BCAST_INTERVAL_SECS", default_value_t = 2)]
    pub bcast_interval_secs: u64,

    /// Consecutive broadcast failures tolerated before a rebuild is
    /// considered aborted.
    #[arg(long, env = "REBUILD_BCAST_RETRY_MAX", default_value_t = 100)]
    pub bcast_retry_max: u32,

    /// Log output format.
    #[arg(long, value_enum, env = "REBUILD_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Log level filter, e.g. `info`, `rebuild_coord=debug`.
    #[arg(long, env = "REBUILD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Runtime configuration derived from [`CliArgs`], with durations already
/// converted out of raw seconds.
#[derive(Debug, Clone)]
pub struct RebuildConfig {
    pub bcast_interval: Duration,
    pub bcast_retry_max: u32,
}

impl From<&CliArgs> for RebuildConfig {
    fn from(args: &CliArgs) -> Self {
        Self {
            bcast_interval: Duration::from_secs(args.bcast_interval_secs),
            bcast_retry_max: args.bcast_retry_max,
        }
    }
}

impl RebuildConfig {
    /// A config suitable for tests: fast polling, small retry budget.
    pub fn for_test() -> Self {
        Self {
            bcast_interval: Duration::from_millis(10),
            bcast_retry_max: 3,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cli_defaults_parse() {
        let args = CliArgs::parse_from(["rebuild-coord"]);
        assert_eq!(args.bcast_interval_secs, 2);
        assert_eq!(args.bcast_retry_max, 100);
        assert_eq!(args.log_format, LogFormat::Pretty);
    }

    #[test]
    fn config_converts_seconds_to_duration() {
        let args = CliArgs::parse_from(["rebuild-coord", "--bcast-interval-secs", "7"]);
        let config = RebuildConfig::from(&args);
        assert_eq!(config.bcast_interval, Duration::from_secs(7));
    }
}
