// src/config.rs

use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

/// Points of a question when the admin does not give any.
pub const DEFAULT_QUESTION_POINTS: i64 = 1;

/// Number of entries returned by the leaderboard.
pub const LEADERBOARD_SIZE: i64 = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub sandbox: SandboxConfig,
    pub grading: GradingConfig,
}

/// How candidate programs are launched.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter invoked with the candidate file as its only argument.
    pub program: String,
    /// Suffix of the temporary candidate file, e.g. ".py".
    pub extension: String,
    pub timeout: Duration,
}

/// Background grading worker pool settings.
#[derive(Debug, Clone)]
pub struct GradingConfig {
    pub workers: usize,
    /// Maximum deliveries of one job before it is marked failed.
    pub max_attempts: i64,
    pub retry_backoff: Duration,
    /// How long an idle worker sleeps before polling the queue again.
    pub poll_interval: Duration,
    /// Jobs `running` for longer than this are handed to another worker.
    pub stale_after: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            extension: ".py".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(500),
            stale_after: Duration::from_secs(600),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let jwt_expiration = parse_var("JWT_EXPIRATION", 3600);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let admin_username = env::var("ADMIN_USERNAME").ok();
        let admin_password = env::var("ADMIN_PASSWORD").ok();

        let defaults = SandboxConfig::default();
        let sandbox = SandboxConfig {
            program: env::var("SANDBOX_PROGRAM").unwrap_or(defaults.program),
            extension: env::var("SANDBOX_EXTENSION").unwrap_or(defaults.extension),
            timeout: Duration::from_secs(parse_var("SANDBOX_TIMEOUT_SECS", 5)),
        };

        let defaults = GradingConfig::default();
        let grading = GradingConfig {
            workers: parse_var("GRADING_WORKERS", defaults.workers).max(1),
            max_attempts: parse_var("GRADING_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            retry_backoff: Duration::from_millis(parse_var("GRADING_RETRY_BACKOFF_MS", 1000)),
            poll_interval: defaults.poll_interval,
            stale_after: Duration::from_secs(parse_var("GRADING_STALE_AFTER_SECS", 600)),
        };

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            admin_username,
            admin_password,
            sandbox,
            grading,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
