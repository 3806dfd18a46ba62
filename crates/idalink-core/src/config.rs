//! Centralized configuration for idalink.
//!
//! Fixed protocol constants live on unit structs; per-launch tuning lives in
//! [`LaunchConfig`].

use crate::error::{IdaLinkError, Result};
use std::time::Duration;

/// Local IPC constants.
pub struct IpcConfig;

impl IpcConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const READ_TIMEOUT: Duration = Duration::from_secs(5);
    pub const ENDPOINT_PREFIX: &'static str = "ida_ipc_";
    pub const READ_CHUNK_SIZE: usize = 4096;
    pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;
    #[cfg(unix)]
    pub const ENDPOINT_DIR: &'static str = "/tmp";
    #[cfg(windows)]
    pub const PIPE_NAMESPACE: &'static str = r"\\.\pipe\";
}

/// Defaults for the launch state machine.
pub struct LaunchDefaults;

impl LaunchDefaults {
    pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
    pub const WORKSPACE_LOADED_TIMEOUT: Duration = Duration::from_secs(90);
    pub const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(100);
    pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);
    pub const BACKOFF_MULTIPLIER: f64 = 1.5;
    pub const ANALYSIS_POLL_INTERVAL: Duration = Duration::from_secs(5);
    pub const ANALYSIS_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
    /// Share of an overall timeout given to the socket phase.
    pub const SOCKET_SHARE: f64 = 0.3;
    /// Share used by link dispatch, which waits longer on database loading.
    pub const DISPATCH_SOCKET_SHARE: f64 = 0.25;
}

/// Tuning for one launch-and-wait run.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    /// Deadline for the IPC endpoint to answer a ping.
    pub socket_timeout: Duration,
    /// Deadline for the target database to show up in `get_info`.
    pub workspace_loaded_timeout: Duration,
    pub initial_poll_interval: Duration,
    pub max_poll_interval: Duration,
    pub backoff_multiplier: f64,
    /// Skip the auto-analysis wait entirely.
    pub skip_analysis_wait: bool,
    pub analysis_poll_interval: Duration,
    /// Server-side wait hint sent with each analysis probe.
    pub analysis_probe_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            socket_timeout: LaunchDefaults::SOCKET_TIMEOUT,
            workspace_loaded_timeout: LaunchDefaults::WORKSPACE_LOADED_TIMEOUT,
            initial_poll_interval: LaunchDefaults::INITIAL_POLL_INTERVAL,
            max_poll_interval: LaunchDefaults::MAX_POLL_INTERVAL,
            backoff_multiplier: LaunchDefaults::BACKOFF_MULTIPLIER,
            skip_analysis_wait: false,
            analysis_poll_interval: LaunchDefaults::ANALYSIS_POLL_INTERVAL,
            analysis_probe_timeout: LaunchDefaults::ANALYSIS_PROBE_TIMEOUT,
        }
    }
}

impl LaunchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_workspace_loaded_timeout(mut self, timeout: Duration) -> Self {
        self.workspace_loaded_timeout = timeout;
        self
    }

    /// Set the backoff schedule used by the socket and workspace phases.
    pub fn with_poll_intervals(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_poll_interval = initial;
        self.max_poll_interval = max;
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_skip_analysis_wait(mut self, skip: bool) -> Self {
        self.skip_analysis_wait = skip;
        self
    }

    pub fn with_analysis_poll_interval(mut self, interval: Duration) -> Self {
        self.analysis_poll_interval = interval;
        self
    }

    pub fn with_analysis_probe_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_probe_timeout = timeout;
        self
    }

    /// Split an overall timeout between the socket and workspace phases.
    ///
    /// `socket_share` is clamped to `0.0..=1.0`. The analysis wait stays
    /// unbounded.
    pub fn with_overall_timeout(mut self, total: Duration, socket_share: f64) -> Self {
        let share = socket_share.clamp(0.0, 1.0);
        let socket = total.mul_f64(share);
        self.socket_timeout = socket;
        self.workspace_loaded_timeout = total.saturating_sub(socket);
        self
    }

    /// Reject settings that would make polling spin or never advance.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("socket_timeout", self.socket_timeout),
            ("workspace_loaded_timeout", self.workspace_loaded_timeout),
            ("initial_poll_interval", self.initial_poll_interval),
            ("max_poll_interval", self.max_poll_interval),
            ("analysis_poll_interval", self.analysis_poll_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(IdaLinkError::Validation {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(IdaLinkError::Validation {
                field: "backoff_multiplier".to_string(),
                message: format!("must be at least 1.0, got {}", self.backoff_multiplier),
            });
        }
        if self.initial_poll_interval > self.max_poll_interval {
            return Err(IdaLinkError::Validation {
                field: "initial_poll_interval".to_string(),
                message: "must not exceed max_poll_interval".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LaunchConfig::default();
        assert_eq!(config.socket_timeout, Duration::from_secs(30));
        assert_eq!(config.workspace_loaded_timeout, Duration::from_secs(90));
        assert_eq!(config.initial_poll_interval, Duration::from_millis(100));
        assert_eq!(config.max_poll_interval, Duration::from_secs(2));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert!(!config.skip_analysis_wait);
        assert_eq!(config.analysis_poll_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overall_timeout_split() {
        let config = LaunchConfig::new().with_overall_timeout(Duration::from_secs(100), 0.3);
        assert_eq!(config.socket_timeout, Duration::from_secs(30));
        assert_eq!(config.workspace_loaded_timeout, Duration::from_secs(70));
    }

    #[test]
    fn test_overall_timeout_share_clamped() {
        let config = LaunchConfig::new().with_overall_timeout(Duration::from_secs(10), 2.0);
        assert_eq!(config.socket_timeout, Duration::from_secs(10));
        assert_eq!(config.workspace_loaded_timeout, Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_multiplier() {
        let config = LaunchConfig::new().with_poll_intervals(
            Duration::from_millis(100),
            Duration::from_secs(2),
            0.5,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_multiplier"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = LaunchConfig::new().with_analysis_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
