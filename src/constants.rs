//! A set of constants used by the library.

use std::time::Duration;

/// The default number of messages buffered per entity while its worker is
/// passivating. Overflow drops the oldest buffered message.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// The default deadline for a worker to acknowledge a stop signal before it
/// is force-terminated.
pub const DEFAULT_HAND_OFF_TIMEOUT: Duration = Duration::from_secs(10);

/// Floor for the idle sweep period, guarding against degenerate timeouts.
pub(crate) const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);
