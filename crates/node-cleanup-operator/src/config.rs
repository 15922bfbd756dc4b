//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};

use node_cleanup_actions::{parse_duration, ActionOptions};
use node_cleanup_common::retry::RetryConfig;
use node_cleanup_common::telemetry::LogFormat;
use node_cleanup_common::{Error, DEFAULT_WORK_QUEUE_SIZE, LOGGER_ACTION, PORTWORX_ACTION};
use node_cleanup_watcher::WatcherSettings;

/// Node cleanup controller - blocks Node deletion until cleanup actions succeed
#[derive(Parser, Debug, Clone)]
#[command(name = "node-cleanup-controller", version, about, long_about = None)]
pub struct Cli {
    /// Path to kubeconfig (in-cluster config is used when unset)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Skip TLS verification of the API server certificate
    #[arg(long, env = "INSECURE_SKIP_TLS_VERIFY")]
    pub insecure_skip_tls_verify: bool,

    /// Comma-separated cleanup actions, run in the listed order [default: logger]
    #[arg(long, env = "ENABLED_ACTIONS")]
    pub enabled_actions: Option<String>,

    /// Former name of --enabled-actions, read when that one is unset
    #[arg(long, env = "ENABLED_PLUGINS", hide = true)]
    pub enabled_plugins: Option<String>,

    /// Delay before a failed cleanup is retried
    #[arg(long, env = "RETRY_DELAY", default_value = "10s", value_parser = duration_arg)]
    pub retry_delay: Duration,

    /// Upper bound for the retry delay when backing off
    #[arg(long, env = "MAX_RETRY_DELAY", default_value = "5m", value_parser = duration_arg)]
    pub max_retry_delay: Duration,

    /// Growth factor of the retry delay per failed attempt (1.0 keeps it fixed)
    #[arg(long, env = "RETRY_BACKOFF_MULTIPLIER", default_value_t = 1.0)]
    pub retry_backoff_multiplier: f64,

    /// Capacity of the cleanup work queue
    #[arg(long = "queue-size", env = "WORK_QUEUE_SIZE", default_value_t = DEFAULT_WORK_QUEUE_SIZE)]
    pub queue_size: usize,

    /// How often cached nodes are re-checked
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "30s", value_parser = duration_arg)]
    pub resync_interval: Duration,

    /// Log output format: json or pretty
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// Pause of the logger action after logging node metadata
    #[arg(long, env = "LOGGER_DELAY", default_value = "0s")]
    pub logger_delay: String,

    /// Label selector identifying Portworx nodes
    #[arg(long, env = "PORTWORX_LABEL_SELECTOR", default_value = "px/enabled=true")]
    pub portworx_label_selector: String,

    /// Base URL of the Portworx API
    #[arg(long, env = "PORTWORX_API_ENDPOINT", default_value = "http://portworx-api:9001")]
    pub portworx_api_endpoint: String,

    /// Time budget of one Portworx decommission request
    #[arg(long, env = "PORTWORX_TIMEOUT", default_value = "300s")]
    pub portworx_timeout: String,
}

/// Longest accepted retry delay or resync interval
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 3600);

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

impl Cli {
    /// Enabled action names in execution order, blanks dropped
    pub fn enabled_action_names(&self) -> Vec<String> {
        self.enabled_actions
            .as_deref()
            .or(self.enabled_plugins.as_deref())
            .unwrap_or(LOGGER_ACTION)
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Options handed to the named action
    pub fn action_options(&self, action: &str) -> ActionOptions {
        match action {
            LOGGER_ACTION => ActionOptions::new().with("delay", &self.logger_delay),
            PORTWORX_ACTION => ActionOptions::new()
                .with("labelSelector", &self.portworx_label_selector)
                .with("apiEndpoint", &self.portworx_api_endpoint)
                .with("timeout", &self.portworx_timeout),
            _ => ActionOptions::new(),
        }
    }

    /// Reject settings the watcher cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.retry_delay.is_zero() {
            return Err(Error::config("retry delay must be greater than zero"));
        }
        for (name, value) in [
            ("retry delay", self.retry_delay),
            ("max retry delay", self.max_retry_delay),
            ("resync interval", self.resync_interval),
        ] {
            if value > MAX_INTERVAL {
                return Err(Error::config(format!(
                    "{} {:?} exceeds the maximum of {:?}",
                    name, value, MAX_INTERVAL
                )));
            }
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(Error::config(format!(
                "max retry delay {:?} is below retry delay {:?}",
                self.max_retry_delay, self.retry_delay
            )));
        }
        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(Error::config(format!(
                "retry backoff multiplier must be >= 1.0, got {}",
                self.retry_backoff_multiplier
            )));
        }
        if self.queue_size == 0 {
            return Err(Error::config("queue size must be greater than zero"));
        }
        if self.resync_interval.is_zero() {
            return Err(Error::config("resync interval must be greater than zero"));
        }
        Ok(())
    }

    /// Watcher tunables derived from the flags
    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            queue_capacity: self.queue_size,
            retry: RetryConfig {
                max_attempts: 0,
                initial_delay: self.retry_delay,
                max_delay: self.max_retry_delay,
                backoff_multiplier: self.retry_backoff_multiplier,
            },
            resync_interval: self.resync_interval,
            ..WatcherSettings::default()
        }
    }

    /// Log the effective configuration with sensitive option values masked
    pub fn log_summary(&self) {
        match (&self.enabled_actions, &self.enabled_plugins) {
            (Some(_), Some(_)) => warn!("ENABLED_PLUGINS is ignored because ENABLED_ACTIONS is set"),
            (None, Some(_)) => warn!("ENABLED_PLUGINS is deprecated, use ENABLED_ACTIONS"),
            _ => {}
        }
        let enabled = self.enabled_action_names();
        info!(
            enabled_actions = ?enabled,
            retry_delay = ?self.retry_delay,
            max_retry_delay = ?self.max_retry_delay,
            retry_backoff_multiplier = self.retry_backoff_multiplier,
            queue_size = self.queue_size,
            resync_interval = ?self.resync_interval,
            "Loaded configuration"
        );
        for action in &enabled {
            for (key, value) in self.action_options(action).redacted() {
                debug!(%action, %key, %value, "Action option");
            }
        }
    }
}
