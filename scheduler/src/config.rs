//! Configuration for the schedulers
//!
//! Defaults are layered under an optional file and `WARDEN_*` environment
//! variables. Once a `Warden` context is initialised its configuration is
//! owned by value and never changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use warden_shared::{PeriodClass, ResourceFactor};

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "WARDEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Total resource-factor capacity of the device
    pub capacity: ResourceFactor,

    /// Watchdog polls without liveness progress before a kernel is hung
    pub watchdog_threshold: u32,

    /// Ticks between watchdog polls
    pub watchdog_poll_ticks: u64,

    /// Base tick length in microseconds
    pub tick_resolution_us: u64,

    /// Processing budget per tick in microseconds
    pub system_operation_time_us: u64,

    /// Size of the worker pool
    pub worker_threads: usize,

    /// Enabled period classes
    pub period_classes: Vec<PeriodClass>,

    /// Consecutive deferrals tolerated before a deadline miss is reported
    pub max_consecutive_deferrals: u32,

    /// Liveness samples kept per kernel
    pub liveness_history: usize,

    /// Device command-poll interval while a kernel is parked, in microseconds
    pub device_idle_backoff_us: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: ResourceFactor::FULL,
            watchdog_threshold: 3,
            watchdog_poll_ticks: 1,
            tick_resolution_us: 1000,
            system_operation_time_us: 800,
            worker_threads: 4,
            period_classes: PeriodClass::ALL.to_vec(),
            max_consecutive_deferrals: 2,
            liveness_history: 64,
            device_idle_backoff_us: 50,
        }
    }
}

impl SchedulerConfig {
    /// Load defaults, then `path` if given, then `WARDEN_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let defaults = config::Config::try_from(&Self::default())
            .context("Failed to build default configuration")?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(env_prefix)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("period_classes"),
        );

        let config: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn tick_resolution(&self) -> Duration {
        Duration::from_micros(self.tick_resolution_us)
    }

    pub fn system_operation_time(&self) -> Duration {
        Duration::from_micros(self.system_operation_time_us)
    }

    pub fn watchdog_poll_interval(&self) -> Duration {
        self.tick_resolution() * self.watchdog_poll_ticks as u32
    }

    /// How long `terminate` waits on a kernel that is not ACTIVE. Parked
    /// kernels never checkpoint, so they get `watchdog_threshold` watchdog
    /// intervals or device command polls, whichever is longer.
    pub fn terminate_timeout(&self) -> Duration {
        self.watchdog_poll_interval().max(self.device_idle_backoff()) * self.watchdog_threshold
    }

    pub fn device_idle_backoff(&self) -> Duration {
        Duration::from_micros(self.device_idle_backoff_us)
    }

    /// Bounded depth of the job queue feeding the worker pool
    pub fn job_queue_depth(&self) -> usize {
        self.worker_threads * 4
    }

    pub fn is_enabled(&self, period: PeriodClass) -> bool {
        self.period_classes.contains(&period)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity.is_zero() {
            anyhow::bail!("Capacity must be greater than 0");
        }

        if self.watchdog_threshold == 0 {
            anyhow::bail!("Watchdog threshold must be greater than 0");
        }

        if self.watchdog_poll_ticks == 0 || self.watchdog_poll_ticks > u32::MAX as u64 {
            anyhow::bail!("Watchdog poll ticks must be between 1 and {}", u32::MAX);
        }

        if self.tick_resolution_us == 0 {
            anyhow::bail!("Tick resolution must be greater than 0");
        }

        if self.system_operation_time_us > self.tick_resolution_us {
            anyhow::bail!(
                "System operation time ({}us) exceeds tick resolution ({}us)",
                self.system_operation_time_us,
                self.tick_resolution_us
            );
        }

        if self.worker_threads == 0 {
            anyhow::bail!("Worker pool needs at least one thread");
        }

        if self.period_classes.is_empty() {
            anyhow::bail!("At least one period class must be enabled");
        }

        if self.liveness_history == 0 {
            anyhow::bail!("Liveness history must keep at least one sample");
        }

        Ok(())
    }
}
