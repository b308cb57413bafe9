//! Engine configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::overwrite::OverwritePolicy;
use crate::task::ErrorPolicy;

/// Configuration supplied to the engine by the application.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Overwrite policy for tasks that do not specify one.
    #[builder(default)]
    #[serde(default)]
    pub default_overwrite: OverwritePolicy,

    /// Auto-start queued tasks when their resources are free.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub smart_queue: bool,

    /// Time budget for total-size discovery.
    #[builder(default = "Duration::from_secs(5)")]
    #[serde(default = "default_size_timeout")]
    pub size_discovery_timeout: Duration,

    /// Window over which the current speed is sampled.
    #[builder(default = "Duration::from_secs(1)")]
    #[serde(default = "default_speed_window")]
    pub speed_window: Duration,

    /// Follow symbolic links instead of recreating them.
    #[builder(default = "false")]
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Preserve permissions and timestamps on copied entries.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub preserve_metadata: bool,

    /// Chunk size for file copies.
    #[builder(default = "1024 * 1024")]
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,

    /// Error policy for tasks that do not specify one.
    #[builder(default)]
    #[serde(default)]
    pub default_error_policy: ErrorPolicy,
}

fn default_true() -> bool {
    true
}

fn default_size_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_speed_window() -> Duration {
    Duration::from_secs(1)
}

fn default_copy_buffer_size() -> usize {
    1024 * 1024
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.copy_buffer_size {
            if size == 0 {
                return Err("Copy buffer size must be greater than zero".to_string());
            }
        }
        if let Some(window) = self.speed_window {
            if window.is_zero() {
                return Err("Speed window cannot be zero".to_string());
            }
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_overwrite: OverwritePolicy::Ask,
            smart_queue: true,
            size_discovery_timeout: default_size_timeout(),
            speed_window: default_speed_window(),
            follow_symlinks: false,
            preserve_metadata: true,
            copy_buffer_size: default_copy_buffer_size(),
            default_error_policy: ErrorPolicy::ContinueOnError,
        }
    }
}
