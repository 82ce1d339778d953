//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every bridge session.
//!
//! ## Layout:
//! - **config**: `Arc<RwLock<AppConfig>>`, read on every new call, replaced by
//!   `PUT /api/v1/config`
//! - **metrics**: `Arc<RwLock<BridgeMetrics>>`, updated when calls start and end
//! - **start_time**: never changes, so it is shared directly
//!
//! Config changes only affect calls accepted after the change; a running
//! session keeps the settings it was created with.

use crate::bridge::session::SessionSummary;
use crate::config::AppConfig;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Call counters
    pub metrics: Arc<RwLock<BridgeMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters aggregated over every call handled since startup.
#[derive(Debug, Default, Clone)]
pub struct BridgeMetrics {
    /// Calls currently bridged
    pub active_sessions: u32,

    /// Calls accepted since startup
    pub total_sessions: u64,

    /// Calls refused because the server was at capacity
    pub rejected_sessions: u64,

    /// Calls that ended before the speech service connection came up
    pub failed_connects: u64,

    /// Telephony media messages received
    pub media_frames_in: u64,

    /// Telephony media messages sent
    pub frames_out: u64,

    /// Caller audio blocks submitted to the speech service
    pub submissions: u64,

    /// Submissions held back while a response was in flight
    pub suppressed_submissions: u64,

    /// Caller samples discarded by the inbound buffer cap
    pub dropped_samples: u64,

    /// Summary of the most recent call
    pub last_session: Option<SessionSummary>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(BridgeMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately so sessions never hold it.
    pub fn get_config(&self) -> AppConfig {
        self.read_config().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap_or_else(|e| e.into_inner()) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Reserve a session slot. Returns false when the server is at capacity.
    pub fn try_start_session(&self) -> bool {
        let max_sessions = self.read_config().performance.max_concurrent_sessions;
        let mut metrics = self.write_metrics();

        if metrics.active_sessions as usize >= max_sessions {
            metrics.rejected_sessions += 1;
            return false;
        }

        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
        true
    }

    /// Release a slot for a call that never got a speech service connection.
    pub fn record_failed_connect(&self) {
        let mut metrics = self.write_metrics();
        metrics.failed_connects += 1;
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Release a slot and fold the call's counters into the totals.
    pub fn record_session_end(&self, summary: SessionSummary) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
        metrics.media_frames_in += summary.media_frames_in;
        metrics.frames_out += summary.frames_out;
        metrics.submissions += summary.submissions;
        metrics.suppressed_submissions += summary.suppressed_submissions;
        metrics.dropped_samples += summary.dropped_samples;
        metrics.last_session = Some(summary);
    }

    pub fn get_metrics_snapshot(&self) -> BridgeMetrics {
        self.metrics.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn read_config(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, BridgeMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }
}
