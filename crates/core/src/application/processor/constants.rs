// Processor constants (no magic values)
use std::time::Duration;

/// Delayed re-poll after startup, masks notifications sent before subscribe (2s)
pub const STARTUP_REPOLL_DELAY: Duration = Duration::from_secs(2);

/// Periodic safety re-poll, masks dropped notifications (30s)
pub const SAFETY_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Bounded wait for OFFSCREEN_READY before the controller gives up (30s)
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default PING/PONG wait (5s)
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Store re-read interval of a progress stream (5s)
pub const PROGRESS_RECHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Pending control requests before senders wait
pub const CONTROL_CHANNEL_CAPACITY: usize = 64;
