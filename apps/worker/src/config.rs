use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::render::PageOptions;

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a number does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub certificate_queue: String,
    pub s3_bucket: String,
    /// Custom endpoint (MinIO, localstack). `None` uses the AWS default.
    pub s3_endpoint: Option<String>,
    pub region: String,
    /// Actor stamped into `updatedBy`.
    pub current_user: String,
    pub port: u16,
    pub rust_log: String,
    pub message_timeout_secs: u64,
    pub queue_batch_size: usize,
    pub queue_wait_secs: u64,
    pub queue_retry_backoff_secs: u64,
    pub render_zoom: f32,
    pub wkhtmltopdf_bin: PathBuf,
    pub mutool_bin: PathBuf,
    /// HTML template override; the built-in one is used when unset.
    pub certificate_template_path: Option<PathBuf>,
    pub page: PageOptions,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("Required environment variable '{key}' is not set"))
        };
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            database_url: require("DATABASE_URL")?,
            redis_url: require("REDIS_URL")?,
            certificate_queue: or_default("CERTIFICATE_QUEUE", "certificate-queue"),
            s3_bucket: require("S3_BUCKET")?,
            s3_endpoint: lookup("S3_ENDPOINT").filter(|v| !v.is_empty()),
            region: or_default("REGION", "us-east-1"),
            current_user: or_default("CURRENT_USER", "system"),
            port: parse_var(&lookup, "PORT", 8080)?,
            rust_log: or_default("RUST_LOG", "info"),
            message_timeout_secs: parse_var(&lookup, "MESSAGE_TIMEOUT_SECS", 300)?,
            queue_batch_size: parse_var(&lookup, "QUEUE_BATCH_SIZE", 10)?,
            queue_wait_secs: parse_var(&lookup, "QUEUE_WAIT_SECS", 20)?,
            queue_retry_backoff_secs: parse_var(&lookup, "QUEUE_RETRY_BACKOFF_SECS", 10)?,
            render_zoom: parse_var(&lookup, "RENDER_ZOOM", 2.0)?,
            wkhtmltopdf_bin: or_default("WKHTMLTOPDF_BIN", "wkhtmltopdf").into(),
            mutool_bin: or_default("MUTOOL_BIN", "mutool").into(),
            certificate_template_path: lookup("CERTIFICATE_TEMPLATE_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            page: PageOptions::default(),
        })
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    pub fn queue_wait(&self) -> Duration {
        Duration::from_secs(self.queue_wait_secs)
    }

    pub fn queue_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.queue_retry_backoff_secs)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}
