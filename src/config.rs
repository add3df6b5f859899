//! Configuration loaded from `qroute.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! `QROUTE_DEFAULT_QUEUE` takes precedence over the file's `default_queue`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::election::FilterPipeline;
use crate::state_machine::{DEFAULT_QUEUE, RetryConfig, is_valid_queue_name};

pub const CONFIG_FILE: &str = "qroute.toml";
pub const DEFAULT_QUEUE_ENV: &str = "QROUTE_DEFAULT_QUEUE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrouteConfig {
    /// Queue given to enqueued states when the caller names none.
    #[serde(default = "default_queue")]
    pub default_queue: String,

    /// Automatic retries before a failure sticks.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay in milliseconds for retry backoff.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// How often the delayed-job scheduler sweeps, in milliseconds.
    /// `qroute demo` waits on this interval.
    #[serde(default = "default_scheduler_poll_ms")]
    pub scheduler_poll_ms: u64,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

// Default queue name: "default".
fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

// Default retry budget: 10 attempts.
fn default_retry_attempts() -> u32 {
    10
}

// Default backoff base: 1000ms.
fn default_retry_base_delay_ms() -> u64 {
    1000
}

// Default sweep interval: 15s.
fn default_scheduler_poll_ms() -> u64 {
    15_000
}

// Default log filter: "info".
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for QrouteConfig {
    fn default() -> Self {
        Self {
            default_queue: default_queue(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            scheduler_poll_ms: default_scheduler_poll_ms(),
            log_filter: default_log_filter(),
        }
    }
}

impl QrouteConfig {
    /// Loads `qroute.toml` from the working directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Loads the given file, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<QrouteConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        let config = config.with_default_queue_override(std::env::var(DEFAULT_QUEUE_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Replaces `default_queue` when `value` is set and non-empty.
    pub fn with_default_queue_override(mut self, value: Option<String>) -> Self {
        if let Some(queue) = value
            && !queue.trim().is_empty()
        {
            self.default_queue = queue.trim().to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_queue_name(&self.default_queue) {
            bail!(
                "default_queue `{}` must consist of lowercase letters, digits, underscores and dashes",
                self.default_queue
            );
        }
        if self.scheduler_poll_ms == 0 {
            bail!("scheduler_poll_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry_attempts,
            base_delay_ms: self.retry_base_delay_ms,
        }
    }

    pub fn scheduler_poll_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_poll_ms)
    }

    /// The standard pipeline: retries, continuations, queue routing.
    pub fn filter_pipeline(&self) -> FilterPipeline {
        FilterPipeline::standard(self.retry_config())
    }
}
