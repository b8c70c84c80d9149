//! Runtime configuration, validation, and error types.
//!
//! [`RuntimeConfig`] is the input for constructing a
//! [`Runtime`](crate::runtime::Runtime). [`validate()`](RuntimeConfig::validate)
//! checks its invariants at startup.

use std::time::Duration;

use framesync_core::is_private;

// ── RuntimeConfig ──────────────────────────────────────────────────

/// Configuration for a [`Runtime`](crate::runtime::Runtime).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Frame rate targeted by [`Runtime::run`](crate::runtime::Runtime::run).
    /// Default: 60.
    pub target_fps: f64,
    /// Number of job worker threads. `None` = auto-detect
    /// (`available_parallelism`, clamped to `[1, 64]`).
    pub worker_count: Option<usize>,
    /// Name of the public slot that shows the job status line.
    /// Default: `"statusline"`.
    pub status_field: String,
    /// How long shutdown waits for the event-loop thread to exit before
    /// reporting it as not joined. Default: 200.
    pub loop_stop_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            worker_count: None,
            status_field: "statusline".to_string(),
            loop_stop_grace_ms: 200,
        }
    }
}

impl RuntimeConfig {
    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fps = self.target_fps;
        if !fps.is_finite() || fps <= 0.0 || !(1.0 / fps).is_finite() {
            return Err(ConfigError::InvalidFrameRate { value: fps });
        }
        if self.status_field.is_empty() {
            return Err(ConfigError::EmptyStatusField);
        }
        if is_private(&self.status_field) {
            return Err(ConfigError::PrivateStatusField {
                name: self.status_field.clone(),
            });
        }
        Ok(())
    }

    /// Resolve the actual worker count, applying auto-detection if `None`.
    ///
    /// Explicit values are clamped to `[1, 64]`. Zero workers would leave
    /// every submitted job queued forever.
    pub fn resolved_worker_count(&self) -> usize {
        match self.worker_count {
            Some(n) => n.clamp(1, 64),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .clamp(1, 64),
        }
    }

    /// Wall-clock budget of one frame.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps)
    }

    /// Grace period for the event-loop thread at shutdown.
    pub fn loop_stop_grace(&self) -> Duration {
        Duration::from_millis(self.loop_stop_grace_ms)
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while building a [`Runtime`](crate::runtime::Runtime).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// `target_fps` is NaN, infinite, zero, negative, or too small to
    /// yield a finite frame budget.
    #[error("target_fps must be finite and positive, got {value}")]
    InvalidFrameRate {
        /// The invalid value.
        value: f64,
    },
    /// `status_field` is empty.
    #[error("status_field must not be empty")]
    EmptyStatusField,
    /// `status_field` names a private slot, which would never be merged.
    #[error("status_field '{name}' uses the private prefix")]
    PrivateStatusField {
        /// The configured name.
        name: String,
    },
    /// The status slot already exists with a non-text value.
    #[error("status_field '{name}' already holds a non-text value")]
    StatusFieldNotText {
        /// The configured name.
        name: String,
    },
    /// A background thread could not be spawned.
    #[error("thread spawn failed: {reason}")]
    ThreadSpawnFailed {
        /// Description of which thread failed.
        reason: String,
    },
}
