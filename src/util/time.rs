//! Time utilities for the session loop and device timers

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default simulation rate (display refresh)
pub const DEFAULT_FRAME_RATE: u32 = 60;
/// Default renderer snapshot rate
pub const DEFAULT_SNAPSHOT_RATE: u32 = 30;

/// Period of the per-device telemetry push
pub const TELEMETRY_PERIOD: Duration = Duration::from_millis(250);
/// Flat delay before a dropped device link is retried
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);
/// Upper bound on a single connection attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Duration of one simulation frame at the given rate
pub fn frame_duration(frame_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(frame_rate.max(1)))
}

/// Number of frames between two renderer snapshots
pub fn snapshot_interval(frame_rate: u32, snapshot_rate: u32) -> u32 {
    (frame_rate / snapshot_rate.max(1)).max(1)
}
