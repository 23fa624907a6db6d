//! # Runtime Configuration
//!
//! Scheduler and timer queue settings, loadable from TOML.
//!
//! ```toml
//! [scheduler]
//! threads = 8          # omit for one per logical processor
//! package_size = 4
//! idle_wait_ms = 50
//!
//! [timers]
//! gaps_ms = [5000, 30000, 120000, 300000, 900000, 3600000]
//! min_queue_size = 64
//! dispatch_poll_ms = 5
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use std::path::Path;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::{JobsError, JobsResult};

/// Settings of a [`Scheduler`](crate::jobs::Scheduler).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads. `None` uses the logical processor count.
    pub threads: Option<usize>,
    /// Maximum systems one thread claims per scan.
    pub package_size: usize,
    /// Longest an idle worker sleeps before rescanning (ms).
    pub idle_wait_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: None,
            package_size: 4,
            idle_wait_ms: 50,
        }
    }
}

impl SchedulerConfig {
    /// Resolved worker thread count.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// - [`JobsError::ZeroThreadCount`] / [`JobsError::ZeroPackageSize`]
    /// - [`JobsError::InvalidConfig`] if the idle wait is zero
    pub fn validate(&self) -> JobsResult<()> {
        if self.threads == Some(0) {
            return Err(JobsError::ZeroThreadCount);
        }
        if self.package_size == 0 {
            return Err(JobsError::ZeroPackageSize);
        }
        if self.idle_wait_ms == 0 {
            return Err(JobsError::InvalidConfig(
                "scheduler idle wait must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Settings of a [`DeferredQueue`](crate::jobs::DeferredQueue).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerQueueConfig {
    /// Tier gaps in milliseconds, finest first.
    pub gaps_ms: Vec<u64>,
    /// Initial capacity of each tier and of the due heap.
    pub min_queue_size: usize,
    /// Resolution of the due queue (ms).
    pub dispatch_poll_ms: u64,
}

impl Default for TimerQueueConfig {
    fn default() -> Self {
        Self {
            gaps_ms: vec![5_000, 30_000, 120_000, 300_000, 900_000, 3_600_000],
            min_queue_size: 64,
            dispatch_poll_ms: 5,
        }
    }
}

impl TimerQueueConfig {
    /// Checks the settings.
    ///
    /// # Errors
    ///
    /// - [`JobsError::ZeroQueueSize`] if `min_queue_size` is zero
    /// - [`JobsError::InvalidConfig`] if the gaps are empty, contain zero or
    ///   are not strictly ascending, or the poll interval is zero
    pub fn validate(&self) -> JobsResult<()> {
        if self.min_queue_size == 0 {
            return Err(JobsError::ZeroQueueSize);
        }
        if self.gaps_ms.is_empty() {
            return Err(JobsError::InvalidConfig("timer gaps must not be empty".into()));
        }
        if self.gaps_ms[0] == 0 {
            return Err(JobsError::InvalidConfig("timer gaps must be positive".into()));
        }
        if self.gaps_ms.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(JobsError::InvalidConfig(format!(
                "timer gaps must be strictly ascending: {:?}",
                self.gaps_ms
            )));
        }
        if self.dispatch_poll_ms == 0 {
            return Err(JobsError::InvalidConfig(
                "dispatch poll interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Complete runtime configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Timer queue settings.
    pub timers: TimerQueueConfig,
}

impl RuntimeConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::InvalidConfig`] if the document does not parse,
    /// or the validation error of the first invalid section.
    pub fn from_toml_str(source: &str) -> JobsResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| JobsError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`JobsError::InvalidConfig`] if the file cannot be read, plus
    /// everything [`from_toml_str`](Self::from_toml_str) returns.
    pub fn from_toml_file(path: impl AsRef<Path>) -> JobsResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            JobsError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks both sections.
    ///
    /// # Errors
    ///
    /// See [`SchedulerConfig::validate`] and [`TimerQueueConfig::validate`].
    pub fn validate(&self) -> JobsResult<()> {
        self.scheduler.validate()?;
        self.timers.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.timers.gaps_ms.len(), 6);
        assert!(config.scheduler.thread_count() >= 1);
    }

    #[test]
    fn test_partial_document() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [scheduler]
            threads = 3

            [timers]
            gaps_ms = [100, 1000]
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.thread_count(), 3);
        assert_eq!(config.scheduler.package_size, 4);
        assert_eq!(config.timers.gaps_ms, vec![100, 1000]);
        assert_eq!(config.timers.min_queue_size, 64);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert_eq!(
            RuntimeConfig::from_toml_str("[scheduler]\nthreads = 0"),
            Err(JobsError::ZeroThreadCount)
        );
        assert_eq!(
            RuntimeConfig::from_toml_str("[scheduler]\npackage_size = 0"),
            Err(JobsError::ZeroPackageSize)
        );
        assert!(matches!(
            RuntimeConfig::from_toml_str("[scheduler]\nidle_wait_ms = 0"),
            Err(JobsError::InvalidConfig(_))
        ));
        assert_eq!(
            RuntimeConfig::from_toml_str("[timers]\nmin_queue_size = 0"),
            Err(JobsError::ZeroQueueSize)
        );
        assert!(matches!(
            RuntimeConfig::from_toml_str("[timers]\ngaps_ms = [300, 100]"),
            Err(JobsError::InvalidConfig(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("[scheduler\n"),
            Err(JobsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = RuntimeConfig::from_toml_file("/nonexistent/kairos.toml");
        assert!(matches!(result, Err(JobsError::InvalidConfig(_))));
    }
}
