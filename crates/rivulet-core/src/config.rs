//! Connection configuration.
//!
//! Every knob has a compiled-in default and can be overridden from the
//! environment with [`Config::from_env`]. Unset, unparsable or zero values fall
//! back to the default.

/// Default capacity of each per-direction message channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Default maximum payload size of a single frame (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Default maximum number of concurrently open streams per connection.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Messages buffered per direction before senders are suspended.
    pub channel_capacity: usize,
    /// Largest payload accepted in either direction.
    pub max_payload_len: u32,
    /// Streams that may be open at once on one connection.
    pub max_concurrent_streams: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
        }
    }
}

fn env_or<T: std::str::FromStr + PartialEq + Default>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .filter(|v| *v != T::default())
        .unwrap_or(default)
}

impl Config {
    /// Defaults overridden by `RIVULET_CHANNEL_CAPACITY`, `RIVULET_MAX_PAYLOAD_LEN`
    /// and `RIVULET_MAX_STREAMS`.
    pub fn from_env() -> Self {
        let config = Self {
            channel_capacity: env_or("RIVULET_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY),
            max_payload_len: env_or("RIVULET_MAX_PAYLOAD_LEN", DEFAULT_MAX_PAYLOAD_LEN),
            max_concurrent_streams: env_or("RIVULET_MAX_STREAMS", DEFAULT_MAX_CONCURRENT_STREAMS),
        };
        tracing::debug!(
            channel_capacity = config.channel_capacity,
            max_payload_len = config.max_payload_len,
            max_concurrent_streams = config.max_concurrent_streams,
            "loaded connection config"
        );
        config
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_max_payload_len(mut self, len: u32) -> Self {
        self.max_payload_len = len;
        self
    }

    pub fn with_max_concurrent_streams(mut self, streams: usize) -> Self {
        self.max_concurrent_streams = streams;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.channel_capacity, 16);
        assert_eq!(config.max_payload_len, 16 * 1024 * 1024);
        assert_eq!(config.max_concurrent_streams, 1024);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(Config::default().with_channel_capacity(0).channel_capacity, 1);
    }

    #[test]
    fn test_unset_env_falls_back() {
        assert_eq!(env_or("RIVULET_TEST_SURELY_UNSET_KEY", 7usize), 7);
    }
}
