//! Env-driven client configuration.
//!
//! Values are read from the process environment; `dotenv` is loaded on demand
//! by the binary. A `Config` is always constructed explicitly and handed to
//! `ApiClient`, so tests and embedders can run several side by side.
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub const DEFAULT_BASE_URL: &str = "https://ap-east-1.tensorart.cloud";
pub const DEFAULT_OUTPUT_DIR: &str = "outputs";

/// Fixed output size forced onto `width`/`height` template fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution {
            width: 1920,
            height: 1080,
        }
    }
}

/// How long and how often to ask the service about a running job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` waits for as long as the job keeps running.
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: Duration::from_secs(1),
            timeout: Some(Duration::from_secs(30 * 60)),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_token: String,
    pub output_dir: PathBuf,
    pub poll: PollPolicy,
    pub resolution: Option<Resolution>,
}

impl Config {
    pub fn dotenv_load() {
        dotenv::dotenv().ok();
    }

    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Config {
            base_url: base_url.into(),
            api_token: api_token.into(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            poll: PollPolicy::default(),
            resolution: Some(Resolution::default()),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_resolution(mut self, resolution: Option<Resolution>) -> Self {
        self.resolution = resolution;
        self
    }

    /// Build a config from the process environment.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like `from_env`, but `overrides` (e.g. command-line flags) win over
    /// the environment.
    pub fn from_env_with(overrides: &HashMap<&'static str, String>) -> AppResult<Self> {
        Self::from_lookup(|key| overrides.get(key).cloned().or_else(|| env::var(key).ok()))
    }

    fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_token = lookup("JOB_API_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::Config("JOB_API_TOKEN is not set".to_string()))?;
        let base_url = lookup("JOB_API_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let mut config = Config::new(base_url, api_token);
        if let Some(dir) = lookup("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "POLL_INTERVAL_MS")? {
            if ms == 0 {
                return Err(AppError::Config("POLL_INTERVAL_MS must be greater than 0".to_string()));
            }
            config.poll.interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "POLL_TIMEOUT_SECS")? {
            // 0 disables the deadline
            config.poll.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(n) = parse_var::<u32>(&lookup, "POLL_MAX_ATTEMPTS")? {
            config.poll.max_attempts = (n > 0).then_some(n);
        }

        let disabled = lookup("FIXED_RESOLUTION")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "off" | "false" | "0" | "no"))
            .unwrap_or(false);
        if disabled {
            config.resolution = None;
        } else {
            let mut res = Resolution::default();
            if let Some(w) = parse_var::<u32>(&lookup, "FIXED_WIDTH")? {
                res.width = w;
            }
            if let Some(h) = parse_var::<u32>(&lookup, "FIXED_HEIGHT")? {
                res.height = h;
            }
            config.resolution = Some(res);
        }

        Ok(config)
    }

    pub fn log_summary(&self) {
        tracing::info!(
            base_url = %self.base_url,
            api_token = %redact(&self.api_token),
            output_dir = %self.output_dir.display(),
            poll_interval = ?self.poll.interval,
            poll_timeout = ?self.poll.timeout,
            poll_max_attempts = ?self.poll.max_attempts,
            resolution = ?self.resolution,
            "effective configuration"
        );
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> AppResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AppError::Config(format!("{} must be a number, got '{}': {}", key, raw, e))),
    }
}

fn redact(token: &str) -> String {
    let tail: String = token.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("***{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn token_is_required() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let cfg = Config::from_lookup(lookup_from(&[("JOB_API_TOKEN", "secret")])).unwrap();
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.output_dir, PathBuf::from("outputs"));
        assert_eq!(cfg.poll, PollPolicy::default());
        assert_eq!(cfg.resolution, Some(Resolution { width: 1920, height: 1080 }));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("JOB_API_TOKEN", "secret"),
            ("JOB_API_URL", "http://localhost:9000"),
            ("POLL_INTERVAL_MS", "250"),
            ("POLL_TIMEOUT_SECS", "0"),
            ("POLL_MAX_ATTEMPTS", "12"),
            ("FIXED_WIDTH", "1024"),
        ]))
        .unwrap();
        assert_eq!(cfg.base_url, "http://localhost:9000");
        assert_eq!(cfg.poll.interval, Duration::from_millis(250));
        assert_eq!(cfg.poll.timeout, None);
        assert_eq!(cfg.poll.max_attempts, Some(12));
        assert_eq!(cfg.resolution, Some(Resolution { width: 1024, height: 1080 }));
    }

    #[test]
    fn fixed_resolution_can_be_switched_off() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("JOB_API_TOKEN", "secret"),
            ("FIXED_RESOLUTION", "off"),
        ]))
        .unwrap();
        assert_eq!(cfg.resolution, None);
    }

    #[test]
    fn bad_number_is_a_config_error() {
        let err = Config::from_lookup(lookup_from(&[
            ("JOB_API_TOKEN", "secret"),
            ("POLL_INTERVAL_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("POLL_INTERVAL_MS"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("JOB_API_TOKEN", "secret"),
            ("POLL_INTERVAL_MS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Config(ref m) if m.contains("POLL_INTERVAL_MS")));
    }

    #[test]
    fn redact_keeps_only_the_tail() {
        assert_eq!(redact("38dbb245-abcd"), "***abcd");
        assert_eq!(redact("ab"), "***ab");
    }
}
