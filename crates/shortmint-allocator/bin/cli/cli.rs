use clap::{Parser, ValueEnum};
use std::fmt::{Display, Formatter};

pub const ZK_SERVER_ENV: &str = "SHORTMINT_ZK_SERVER";
pub const WINDOW_SIZE_ENV: &str = "SHORTMINT_WINDOW_SIZE";
pub const ACQUIRE_TIMEOUT_MS_ENV: &str = "SHORTMINT_ACQUIRE_TIMEOUT_MS";
pub const ACQUIRE_ATTEMPTS_ENV: &str = "SHORTMINT_ACQUIRE_ATTEMPTS";
pub const RETRY_ATTEMPTS_ENV: &str = "SHORTMINT_RETRY_ATTEMPTS";
pub const RETRY_DELAY_MS_ENV: &str = "SHORTMINT_RETRY_DELAY_MS";
pub const LOG_FORMAT_ENV: &str = "SHORTMINT_LOG_FORMAT";

pub const DEFAULT_WINDOW_SIZE: &str = "1000000";
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: &str = "10000";
pub const DEFAULT_ACQUIRE_ATTEMPTS: &str = "3";
pub const DEFAULT_RETRY_ATTEMPTS: &str = "3";
pub const DEFAULT_RETRY_DELAY_MS: &str = "100";
pub const DEFAULT_COUNT: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[value(name = "pretty")]
    Pretty,
    #[value(name = "json")]
    Json,
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "shortmint", about = "Mint globally unique short codes")]
pub struct CLI {
    /// Comma-separated ZooKeeper ensemble. Without it tokens are only
    /// unique within this process.
    #[arg(long, env = ZK_SERVER_ENV)]
    pub zk_server: Option<String>,

    #[arg(long, env = WINDOW_SIZE_ENV, default_value = DEFAULT_WINDOW_SIZE)]
    pub window_size: u64,

    /// Lock acquisition bound in milliseconds, 0 waits forever.
    #[arg(
        long,
        env = ACQUIRE_TIMEOUT_MS_ENV,
        default_value = DEFAULT_ACQUIRE_TIMEOUT_MS
    )]
    pub acquire_timeout_ms: u64,

    #[arg(long, env = ACQUIRE_ATTEMPTS_ENV, default_value = DEFAULT_ACQUIRE_ATTEMPTS)]
    pub acquire_attempts: u32,

    #[arg(long, env = RETRY_ATTEMPTS_ENV, default_value = DEFAULT_RETRY_ATTEMPTS)]
    pub retry_attempts: u32,

    #[arg(long, env = RETRY_DELAY_MS_ENV, default_value = DEFAULT_RETRY_DELAY_MS)]
    pub retry_delay_ms: u64,

    #[arg(
        long,
        env = LOG_FORMAT_ENV,
        value_enum,
        default_value_t = LogFormat::Pretty
    )]
    pub log_format: LogFormat,

    /// Number of codes to mint.
    #[arg(long, default_value = DEFAULT_COUNT)]
    pub count: u64,
}
