use std::time::Duration;
use std::{env, fmt, str};

use clap::Parser;
use thiserror::Error;

const MIN_INTERVAL_SECS: u64 = 10;
const MAX_INTERVAL_SECS: u64 = 86400;
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;
const MAX_IN_FLIGHT_LIMIT: u64 = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{what} out of range: {value} (allowed {min}..={max})")]
    OutOfRange { what: &'static str, value: u64, min: u64, max: u64 },
}

#[derive(Parser, Debug, Default)]
#[command(name = "watchpost-sentinel", version, about = "URL probing worker for the watchpost status store")]
pub struct Cli {
    /// Store endpoint host, overrides REDIS_HOST
    #[arg(long)]
    pub redis_host: Option<String>,

    /// Store endpoint port, overrides REDIS_DB_PORT
    #[arg(long)]
    pub redis_port: Option<u16>,

    /// Seconds between sweeps, overrides CHECK_INTERVAL
    #[arg(long)]
    pub interval: Option<u64>,

    /// Per-probe timeout in seconds, overrides REQUEST_TIMEOUT
    #[arg(long)]
    pub timeout: Option<u64>,

    /// In-flight probe cap, overrides MAX_CONCURRENT_PROBES
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Run a single sweep and exit
    #[arg(long)]
    pub once: bool,
}

/// Effective worker configuration: CLI flags over environment variables over
/// defaults, validated before the scheduling loop may start.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_host: String,
    pub redis_port: u16,
    pub check_interval: Duration,
    pub request_timeout: Duration,
    pub max_in_flight: usize,
    pub shutdown_grace: Duration,
    pub once: bool,
}

impl Config {
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let config = Self {
            redis_host: resolve(cli.redis_host.clone(), "REDIS_HOST", "localhost".to_string())?,
            redis_port: resolve(cli.redis_port, "REDIS_DB_PORT", 6379)?,
            check_interval: Duration::from_secs(resolve(cli.interval, "CHECK_INTERVAL", 30)?),
            request_timeout: Duration::from_secs(resolve(cli.timeout, "REQUEST_TIMEOUT", 5)?),
            max_in_flight: resolve(cli.max_in_flight, "MAX_CONCURRENT_PROBES", 16)?,
            shutdown_grace: Duration::from_secs(resolve(None::<u64>, "SHUTDOWN_GRACE", 10)?),
            once: cli.once,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn store_url(&self) -> String {
        format!("redis://{}:{}/", self.redis_host, self.redis_port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "check interval seconds",
            self.check_interval.as_secs(),
            MIN_INTERVAL_SECS,
            MAX_INTERVAL_SECS,
        )?;
        check_range(
            "request timeout seconds",
            self.request_timeout.as_secs(),
            MIN_TIMEOUT_SECS,
            MAX_TIMEOUT_SECS,
        )?;
        check_range("max in-flight probes", self.max_in_flight as u64, 1, MAX_IN_FLIGHT_LIMIT)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "store endpoint: {}:{}", self.redis_host, self.redis_port)?;
        writeln!(f, "check interval: {}s", self.check_interval.as_secs())?;
        writeln!(f, "request timeout: {}s", self.request_timeout.as_secs())?;
        write!(f, "max in-flight probes: {}", self.max_in_flight)
    }
}

/// CLI wins, then the environment, then the default. A present but
/// malformed environment value is an error, never a silent fallback.
fn resolve<T: str::FromStr>(
    cli: Option<T>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    if let Some(value) = cli {
        return Ok(value);
    }
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { var, value: raw }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => {
            Err(ConfigError::Invalid { var, value: "<non-unicode>".to_string() })
        }
    }
}

fn check_range(what: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { what, value, min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_environment() {
        let config = Config::resolve(&Cli::default()).unwrap();
        assert_eq!(config.redis_host, "localhost");
        assert_eq!(config.redis_port, 6379);
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_in_flight, 16);
        assert_eq!(config.store_url(), "redis://localhost:6379/");
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let cli = Cli { interval: Some(120), max_in_flight: Some(4), ..Cli::default() };
        let config = Config::resolve(&cli).unwrap();
        assert_eq!(config.check_interval, Duration::from_secs(120));
        assert_eq!(config.max_in_flight, 4);
    }

    #[test]
    fn malformed_environment_value_is_rejected() {
        // A var name no other test touches; set_var is process-global.
        unsafe { env::set_var("WATCHPOST_TEST_BAD_PORT", "not-a-number") };
        let result = resolve(None::<u16>, "WATCHPOST_TEST_BAD_PORT", 6379);
        assert!(matches!(result, Err(ConfigError::Invalid { var: "WATCHPOST_TEST_BAD_PORT", .. })));
    }

    #[test]
    fn out_of_range_values_fail_fast() {
        let too_fast = Cli { interval: Some(1), ..Cli::default() };
        assert!(matches!(Config::resolve(&too_fast), Err(ConfigError::OutOfRange { .. })));

        let no_concurrency = Cli { max_in_flight: Some(0), ..Cli::default() };
        assert!(matches!(Config::resolve(&no_concurrency), Err(ConfigError::OutOfRange { .. })));

        let endless_timeout = Cli { timeout: Some(10_000), ..Cli::default() };
        assert!(matches!(Config::resolve(&endless_timeout), Err(ConfigError::OutOfRange { .. })));
    }
}
