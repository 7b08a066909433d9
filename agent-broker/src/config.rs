use std::time::Duration;

/// Tunable literal constants from the spec, overridable by the embedding binary.
///
/// Configuration-file loading itself is an external concern; this struct only
/// carries the values, the same way the teacher's `*WorkerParams` structs carry
/// per-worker tunables without owning how they were sourced.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bound on reading the single registration frame after upgrade.
    pub registration_timeout: Duration,
    /// Interval between transport-level keepalive pings.
    pub ping_interval: Duration,
    /// Bound on writing a single keepalive ping.
    pub ping_write_timeout: Duration,
    /// Consecutive keepalive failures before the connection is closed.
    pub ping_failure_threshold: u32,
    /// Per-message read size limit installed on the upgraded socket.
    pub max_message_size: usize,
    /// Fallback timeout for `execute_command` when the caller supplies <= 0.
    pub default_command_timeout: Duration,
    /// Fixed timeout for `read_file`.
    pub read_file_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            registration_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(5),
            ping_write_timeout: Duration::from_secs(5),
            ping_failure_threshold: 3,
            max_message_size: 1024 * 1024,
            default_command_timeout: Duration::from_secs(60),
            read_file_timeout: Duration::from_secs(30),
        }
    }
}
