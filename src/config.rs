//! Configuration for the stream client and its polling fallback.

use std::collections::HashMap;
use std::time::Duration;

/// Default number of automatic reconnect attempts after a transport failure.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Maximum delay for exponential backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

/// Fraction of the computed backoff delay used as the jitter window.
pub const DEFAULT_JITTER_FRAC: f64 = 0.1;

/// Default capacity for consumer-held event buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

/// Default `limit` query parameter for the polling endpoint.
pub const DEFAULT_POLL_LIMIT: usize = 50;

/// Configuration shared by the streaming transport, the connection
/// manager, and the polling fallback.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base URL of the event server, without a trailing slash.
    pub base_url: String,
    /// Optional sub-scope within the tenant.
    pub location_id: Option<String>,
    /// Automatic reconnect budget; exceeding it settles the manager to
    /// `disconnected` until an explicit `reconnect()`.
    pub max_retries: u32,
    /// Backoff base delay.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Jitter window as a fraction of the computed delay.
    pub jitter_frac: f64,
    /// `limit` parameter for poll requests.
    pub poll_limit: usize,
    /// Overrides the poll cadence implied by the consumer's urgency.
    pub poll_interval: Option<Duration>,
    /// Default capacity for consumer event buffers.
    pub buffer_capacity: usize,
    /// Extra headers sent on both the stream and poll requests
    /// (authorization tokens, API keys).
    pub auth_headers: HashMap<String, String>,
}

impl StreamConfig {
    /// Create a config for the given event server base URL with defaults
    /// for everything else.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            location_id: None,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_frac: DEFAULT_JITTER_FRAC,
            poll_limit: DEFAULT_POLL_LIMIT,
            poll_interval: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            auth_headers: HashMap::new(),
        }
    }

    /// Scope the subscription to a single location within the tenant.
    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }

    /// Set the automatic reconnect budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff base delay and ceiling.
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Set the jitter window fraction.
    pub fn with_jitter_frac(mut self, jitter_frac: f64) -> Self {
        self.jitter_frac = jitter_frac.clamp(0.0, 1.0);
        self
    }

    /// Set the `limit` parameter for poll requests.
    pub fn with_poll_limit(mut self, poll_limit: usize) -> Self {
        self.poll_limit = poll_limit;
        self
    }

    /// Poll at a fixed cadence instead of the urgency default.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the default consumer buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Add a header sent on every stream and poll request.
    pub fn with_auth_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_headers.insert(name.into(), value.into());
        self
    }
}
