//! Client configuration read from the environment.
//!
//! Remote endpoint and credentials are required; poll tuning, request
//! timeout and the starting credit balance fall back to defaults. See
//! [`ClientConfig::from_env`] for the variable table.

use std::time::Duration;

use pixio_core::credits::DEFAULT_STARTING_CREDITS;
use pixio_core::submission::Workflow;

use crate::backoff::BackoffConfig;

const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_POLL_MAX_FAILURES: u32 = 10;
const DEFAULT_POLL_BACKOFF_MAX_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has an invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Remote deployment identifiers, one per workflow.
#[derive(Debug, Clone)]
pub struct Deployments {
    pub text_to_image: String,
    pub image_to_image: String,
    pub pose_guided: String,
}

impl Deployments {
    pub fn for_workflow(&self, workflow: Workflow) -> &str {
        match workflow {
            Workflow::TextToImage => &self.text_to_image,
            Workflow::ImageToImage => &self.image_to_image,
            Workflow::PoseGuided => &self.pose_guided,
        }
    }
}

/// Poll loop tuning.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Wall-clock period between status checks.
    pub interval: Duration,
    /// Number of consecutive failed checks after which the job is marked
    /// unreachable.
    pub max_consecutive_failures: u32,
    /// Extra delay applied after a failed check.
    pub backoff: BackoffConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_consecutive_failures: DEFAULT_POLL_MAX_FAILURES,
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
                max_delay: Duration::from_secs(DEFAULT_POLL_BACKOFF_MAX_SECS),
                multiplier: 2.0,
            },
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base HTTP URL of the Pixio API, without trailing slash.
    pub api_url: String,
    pub api_key: String,
    pub deployments: Deployments,
    /// Timeout applied to every HTTP request.
    pub request_timeout: Duration,
    pub poll: PollConfig,
    pub starting_credits: u64,
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                    | Default |
    /// |----------------------------|---------|
    /// | `PIXIO_API_URL`            | --      |
    /// | `PIXIO_API_KEY`            | --      |
    /// | `PIXIO_TXT2IMG_DEPLOYMENT` | --      |
    /// | `PIXIO_IMG2IMG_DEPLOYMENT` | --      |
    /// | `PIXIO_POSE_DEPLOYMENT`    | --      |
    /// | `POLL_INTERVAL_MS`         | `2000`  |
    /// | `POLL_MAX_FAILURES`        | `10`    |
    /// | `POLL_BACKOFF_MAX_SECS`    | `30`    |
    /// | `REQUEST_TIMEOUT_SECS`     | `60`    |
    /// | `STARTING_CREDITS`         | `500`   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let api_url = required("PIXIO_API_URL")?.trim_end_matches('/').to_string();
        let api_key = required("PIXIO_API_KEY")?;
        let deployments = Deployments {
            text_to_image: required("PIXIO_TXT2IMG_DEPLOYMENT")?,
            image_to_image: required("PIXIO_IMG2IMG_DEPLOYMENT")?,
            pose_guided: required("PIXIO_POSE_DEPLOYMENT")?,
        };

        let interval_ms: u64 = parse_or(&lookup, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        if interval_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_MS",
                value: "0".into(),
            });
        }
        let max_failures = parse_or(&lookup, "POLL_MAX_FAILURES", DEFAULT_POLL_MAX_FAILURES)?;
        let backoff_max_secs =
            parse_or(&lookup, "POLL_BACKOFF_MAX_SECS", DEFAULT_POLL_BACKOFF_MAX_SECS)?;
        let timeout_secs = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let starting_credits = parse_or(&lookup, "STARTING_CREDITS", DEFAULT_STARTING_CREDITS)?;

        let interval = Duration::from_millis(interval_ms);
        Ok(Self {
            api_url,
            api_key,
            deployments,
            request_timeout: Duration::from_secs(timeout_secs),
            poll: PollConfig {
                interval,
                max_consecutive_failures: max_failures,
                backoff: BackoffConfig {
                    initial_delay: interval,
                    max_delay: Duration::from_secs(backoff_max_secs).max(interval),
                    multiplier: 2.0,
                },
            },
            starting_credits,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}
