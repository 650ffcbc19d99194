//! Real-time event delivery client for multi-tenant club operations.
//!
//! This crate keeps a live connection to a server-pushed event feed and
//! degrades gracefully when it cannot:
//! - `tenant`: tenant/org context and the guard gating every attempt
//! - `connection`: the connection state machine and retry driver
//! - `backoff`: exponential retry delays with jitter and a ceiling
//! - `transport`: the transport seam and the SSE implementation
//! - `event`: the normalized `DomainEvent` shape and frame normalizer
//! - `polling`: interval REST fallback, active while the stream is down
//! - `visibility`: suspend/resume on foreground/background transitions
//! - `buffer`: the consumer-side bounded dedup buffer
//! - `broadcaster`: one connection per tenant, fanned out to subscribers
//!
//! # Architecture
//!
//! Data flows one direction: transport frames → normalizer → subscriber
//! → bounded buffer. The polling fallback pushes the identical event
//! shape through the same consumer contract, so widgets never care which
//! transport is active. Both paths deliver events carrying stable ids;
//! consumers deduplicate on them.

mod backoff;
mod broadcaster;
mod buffer;
mod config;
mod connection;
mod error;
mod event;
mod polling;
mod tenant;
mod transport;
mod visibility;


pub use backoff::BackoffPolicy;
pub use broadcaster::TenantBroadcaster;
pub use buffer::EventBuffer;
pub use config::{
    StreamConfig, DEFAULT_BASE_DELAY, DEFAULT_BUFFER_CAPACITY, DEFAULT_JITTER_FRAC,
    DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_POLL_LIMIT,
};
pub use connection::{ConnectionManager, ConnectionState, RetryContext};
pub use error::{NormalizeError, PollError, TransportError};
pub use event::{normalize_frame, DomainEvent, EventKind};
pub use polling::{PollSink, PollUrgency, PollingClient, PollingFallback};
pub use tenant::{
    channel as tenant_channel, GuardRejection, SharedTenant, TenantContext, TenantGuard,
    TenantWriter,
};
pub use transport::{ConnectParams, EventTransport, FrameStream, RawFrame, SseTransport};
pub use visibility::{PageVisibility, VisibilityGate};
