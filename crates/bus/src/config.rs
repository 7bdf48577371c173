//! Transport configuration loaded from environment variables.

/// In-process transport configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `BUS_ENDPOINT` — name stamped as the source of sent messages (default: `"local"`)
/// - `BUS_WORKER_COUNT` — number of worker tasks (default: `1`)
/// - `BUS_QUEUE_CAPACITY` — bounded queue size (default: `1024`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub endpoint: String,
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl TransportConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("BUS_ENDPOINT").unwrap_or(defaults.endpoint),
            worker_count: std::env::var("BUS_WORKER_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_count),
            queue_capacity: std::env::var("BUS_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.queue_capacity),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "local".to_string(),
            worker_count: 1,
            queue_capacity: 1024,
        }
    }
}
