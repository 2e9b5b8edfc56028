use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::core::ring_buffer::DEFAULT_CAPACITY;
use crate::error::{Error, Result};

/// Tunables for one client connection.
///
/// Every field has a default; [`Config::from_env`] overrides them from
/// `WS_*` environment variables (a `.env` file is honoured).
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether `BufferedChannel::read` spins until data arrives.
    pub blocking: bool,
    /// `Some(n)` gives each direction a fixed ring of `n` bytes; `None` a growable one.
    pub buffer_capacity: Option<usize>,
    /// Starting size of a growable ring.
    pub initial_capacity: usize,
    /// Upper bound on a single `Transport::read` issued by the reader pump.
    pub read_chunk: usize,
    /// `None` makes idle pumps call `yield_now`; `Some(d)` makes them sleep `d`.
    pub poll_interval: Option<Duration>,
    /// Pin both pump threads to this core index.
    pub pin_core: Option<usize>,
    /// How long teardown waits for queued outbound bytes to reach the transport.
    pub linger: Duration,
    pub connect_timeout: Duration,
    /// Split outbound data messages into frames of at most this many payload bytes.
    pub max_frame_payload: Option<usize>,
    /// Largest inbound frame payload accepted by the decoder.
    pub max_frame_size: u64,
    /// Largest reassembled inbound message.
    pub max_message_size: usize,
    /// Answer inbound Ping with Pong automatically.
    pub auto_pong: bool,
    /// Reject masked frames from the server.
    pub strict_masking: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blocking: true,
            buffer_capacity: None,
            initial_capacity: DEFAULT_CAPACITY,
            read_chunk: 16 * 1024,
            poll_interval: None,
            pin_core: None,
            linger: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            max_frame_payload: None,
            max_frame_size: 64 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            auto_pong: true,
            strict_masking: true,
        }
    }
}

impl Config {
    /// Defaults overridden by `WS_*` variables from the process environment or `.env`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();
        if let Some(v) = parse_var("WS_BLOCKING")? {
            config.blocking = v;
        }
        if let Some(v) = parse_var("WS_BUFFER_CAPACITY")? {
            config.buffer_capacity = Some(v);
        }
        if let Some(v) = parse_var("WS_INITIAL_CAPACITY")? {
            config.initial_capacity = v;
        }
        if let Some(v) = parse_var("WS_READ_CHUNK")? {
            config.read_chunk = v;
        }
        if let Some(v) = parse_var("WS_POLL_INTERVAL_US")? {
            config.poll_interval = Some(Duration::from_micros(v));
        }
        if let Some(v) = parse_var("WS_PIN_CORE")? {
            config.pin_core = Some(v);
        }
        if let Some(v) = parse_var("WS_LINGER_MS")? {
            config.linger = Duration::from_millis(v);
        }
        if let Some(v) = parse_var("WS_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse_var("WS_MAX_FRAME_PAYLOAD")? {
            config.max_frame_payload = Some(v);
        }
        if let Some(v) = parse_var("WS_MAX_FRAME_SIZE")? {
            config.max_frame_size = v;
        }
        if let Some(v) = parse_var("WS_MAX_MESSAGE_SIZE")? {
            config.max_message_size = v;
        }
        if let Some(v) = parse_var("WS_AUTO_PONG")? {
            config.auto_pong = v;
        }
        if let Some(v) = parse_var("WS_STRICT_MASKING")? {
            config.strict_masking = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_pin_core(mut self, core: usize) -> Self {
        self.pin_core = Some(core);
        self
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_max_frame_payload(mut self, max: usize) -> Self {
        self.max_frame_payload = Some(max);
        self
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_auto_pong(mut self, enabled: bool) -> Self {
        self.auto_pong = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == Some(0) {
            return Err(Error::InvalidInput("buffer capacity must be non-zero"));
        }
        if self.read_chunk == 0 {
            return Err(Error::InvalidInput("read chunk must be non-zero"));
        }
        if self.max_frame_payload == Some(0) {
            return Err(Error::InvalidInput("max frame payload must be non-zero"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &'static str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidInput(key)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.blocking);
        assert!(config.buffer_capacity.is_none());
        assert_eq!(config.initial_capacity, 1024);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = Config {
            buffer_capacity: Some(0),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));

        let config = Config {
            max_frame_payload: Some(0),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_setters() {
        let config = Config::default()
            .with_blocking(false)
            .with_buffer_capacity(4096)
            .with_max_frame_payload(512)
            .with_linger(Duration::from_millis(50));
        assert!(!config.blocking);
        assert_eq!(config.buffer_capacity, Some(4096));
        assert_eq!(config.max_frame_payload, Some(512));
        assert_eq!(config.linger, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_var_reports_key() {
        env::set_var("WS_TEST_ONLY_BAD_NUMBER", "twelve");
        let parsed: Result<Option<u32>> = parse_var("WS_TEST_ONLY_BAD_NUMBER");
        assert!(matches!(parsed, Err(Error::InvalidInput("WS_TEST_ONLY_BAD_NUMBER"))));
        env::remove_var("WS_TEST_ONLY_BAD_NUMBER");

        let missing: Result<Option<u32>> = parse_var("WS_TEST_ONLY_MISSING");
        assert!(matches!(missing, Ok(None)));
    }
}
