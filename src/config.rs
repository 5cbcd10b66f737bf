use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::{PipelineOptions, RecordErrorPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub queue_url: String,
    pub max_messages: i32,
    pub visibility_timeout_secs: i32,
    pub poll_interval_secs: u64,
    pub path_style_buckets: bool,
    pub pipeline: PipelineOptions,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any name-to-value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let queue_url = lookup("CLOUDTRAIL_QUEUE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("CLOUDTRAIL_QUEUE_URL"))?;

        let max_messages = parse_or(&lookup, "CLOUDTRAIL_MAX_MESSAGES", 10)?;
        if !(1..=10).contains(&max_messages) {
            return Err(ConfigError::Invalid {
                name: "CLOUDTRAIL_MAX_MESSAGES",
                value: max_messages.to_string(),
                reason: "must be between 1 and 10".to_string(),
            });
        }

        let max_records_per_batch = parse_or(&lookup, "CLOUDTRAIL_MAX_RECORDS_PER_BATCH", 100)?;
        if max_records_per_batch == 0 {
            return Err(ConfigError::Invalid {
                name: "CLOUDTRAIL_MAX_RECORDS_PER_BATCH",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Config {
            queue_url,
            max_messages,
            visibility_timeout_secs: parse_or(&lookup, "CLOUDTRAIL_VISIBILITY_TIMEOUT_SECS", 60)?,
            poll_interval_secs: parse_or(&lookup, "CLOUDTRAIL_POLL_INTERVAL_SECS", 5)?,
            path_style_buckets: flag(&lookup, "USE_PATH_STYLE_BUCKETS"),
            pipeline: PipelineOptions {
                max_records_per_batch,
                record_error_policy: parse_or(
                    &lookup,
                    "CLOUDTRAIL_RECORD_ERROR_POLICY",
                    RecordErrorPolicy::Skip,
                )?,
                raw_records: flag(&lookup, "CLOUDTRAIL_RAW_RECORDS"),
            },
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map_err(|err: T::Err| ConfigError::Invalid {
                    name,
                    reason: err.to_string(),
                    value,
                })
        }
        _ => Ok(default),
    }
}

fn flag<F>(lookup: &F, name: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}
