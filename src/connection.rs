//! The connection state machine and its async driver.
//!
//! `ConnectionManager` owns the `idle → connecting → connected →
//! (error ⇄ connecting) → disconnected` machine, opens and closes the
//! streaming transport, normalizes inbound frames, and schedules retries
//! through [`BackoffPolicy`]. Its lifecycle methods are named, idempotent,
//! and externally driven; a generation counter invalidates superseded
//! driver tasks so re-entrant start/stop cycles cannot wedge the machine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backoff::BackoffPolicy;
use crate::config::StreamConfig;
use crate::error::TransportError;
use crate::event::{normalize_frame, DomainEvent};
use crate::tenant::{GuardRejection, SharedTenant, TenantGuard};
use crate::transport::{ConnectParams, EventTransport, RawFrame};

/// Capacity of the normalized-event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Connection state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Error,
    Disconnected,
}

impl ConnectionState {
    /// Status string consumers surface to end users.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Connected => "live",
            Self::Connecting | Self::Error => "reconnecting",
            Self::Idle | Self::Disconnected => "offline",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Retry bookkeeping, reset on every successful connection.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    /// Failures since the last success.
    pub attempt: u32,
    /// Delay scheduled before the next automatic attempt.
    pub next_delay: Option<Duration>,
    pub last_error: Option<String>,
}

// ============================================================================
// Connection manager
// ============================================================================

type StateCallback = dyn Fn(ConnectionState) + Send + Sync;
type EventCallback = dyn Fn(DomainEvent) + Send + Sync;

#[derive(Debug)]
struct Machine {
    state: ConnectionState,
    retry: RetryContext,
    intend_connect: bool,
    last_event_id: Option<String>,
    last_rejection: Option<GuardRejection>,
}

/// Owns the streaming connection for one tenant subscription.
pub struct ConnectionManager {
    config: StreamConfig,
    backoff: BackoffPolicy,
    transport: Arc<dyn EventTransport>,
    tenant: SharedTenant,
    machine: Mutex<Machine>,
    /// Bumped on start/stop/suspend; driver tasks carrying a stale value
    /// exit without touching the machine.
    epoch: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<DomainEvent>,
    on_state_change: Mutex<Option<Arc<StateCallback>>>,
    on_event: Mutex<Option<Arc<EventCallback>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn EventTransport>,
        tenant: SharedTenant,
    ) -> Arc<Self> {
        let backoff = BackoffPolicy::from_config(&config);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Arc::new(Self {
            config,
            backoff,
            transport,
            tenant,
            machine: Mutex::new(Machine {
                state: ConnectionState::Idle,
                retry: RetryContext::default(),
                intend_connect: false,
                last_event_id: None,
                last_rejection: None,
            }),
            epoch: AtomicU64::new(0),
            state_tx,
            events_tx,
            on_state_change: Mutex::new(None),
            on_event: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.machine().state
    }

    /// Watch channel mirroring every state transition. The polling
    /// fallback and UI status indicators hang off this.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Receiver of normalized domain events. Control frames (handshake
    /// ack, heartbeat) are never delivered here.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events_tx.subscribe()
    }

    pub fn retry_context(&self) -> RetryContext {
        self.machine().retry.clone()
    }

    /// Guard rejection behind the most recent `error` state, if the error
    /// was a configuration failure rather than a transport one.
    pub fn last_rejection(&self) -> Option<GuardRejection> {
        self.machine().last_rejection
    }

    /// Invoked exactly once per state transition, synchronously with it.
    pub fn set_on_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        *self.lock_poisoned(&self.on_state_change) = Some(Arc::new(callback));
    }

    /// Invoked for every normalized, non-control event.
    pub fn set_on_event<F>(&self, callback: F)
    where
        F: Fn(DomainEvent) + Send + Sync + 'static,
    {
        *self.lock_poisoned(&self.on_event) = Some(Arc::new(callback));
    }

    // ------------------------------------------------------------------
    // Lifecycle transitions (named, idempotent, externally driven)
    // ------------------------------------------------------------------

    /// Begin connecting. No-op while already connecting or connected.
    ///
    /// The tenant guard runs synchronously before any transport resource
    /// is allocated: a rejection settles the machine to `error` with the
    /// guard's reason before this method returns.
    ///
    /// Starting from `disconnected` gets a fresh retry budget, the same
    /// as [`reconnect`].
    ///
    /// [`reconnect`]: Self::reconnect
    pub fn start(self: &Arc<Self>) {
        let epoch = {
            let mut m = self.machine();
            if matches!(
                m.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                trace!("start() ignored in state {}", m.state);
                return;
            }
            if m.state == ConnectionState::Disconnected {
                m.retry = RetryContext::default();
                m.last_rejection = None;
            }
            m.intend_connect = true;
            self.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        if let Some(rejection) = self.check_guard() {
            warn!("refusing to connect: {rejection}");
            self.transition(ConnectionState::Error);
            return;
        }

        self.spawn_driver(epoch);
    }

    /// Tear down: close the transport, cancel pending retries, settle to
    /// `disconnected`, and reset the retry budget. Does not count against
    /// the retry budget.
    pub fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut m = self.machine();
            m.intend_connect = false;
            m.retry = RetryContext::default();
        }
        self.abort_driver();
        self.transition(ConnectionState::Disconnected);
    }

    /// Release the transport while the page is hidden. Unlike [`stop`],
    /// retry counters and connect intent survive for [`resume`].
    ///
    /// [`stop`]: Self::stop
    /// [`resume`]: Self::resume
    pub fn suspend(&self) {
        if !self.machine().intend_connect {
            return;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.abort_driver();
        debug!("transport released while suspended");
        self.transition(ConnectionState::Idle);
    }

    /// Re-establish the connection after [`suspend`], if the consumer has
    /// not disconnected in the meantime.
    ///
    /// [`suspend`]: Self::suspend
    pub fn resume(self: &Arc<Self>) {
        if !self.machine().intend_connect {
            return;
        }
        self.start();
    }

    /// Leave `disconnected` after retry exhaustion: resets the attempt
    /// counter and starts over. The only way out of `disconnected`.
    pub fn reconnect(self: &Arc<Self>) {
        {
            let mut m = self.machine();
            m.retry = RetryContext::default();
            m.last_rejection = None;
        }
        self.start();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.lock_poisoned(&self.machine)
    }

    fn lock_poisoned<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn stale(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    /// Record a state change and notify observers exactly once.
    fn transition(&self, next: ConnectionState) {
        {
            let mut m = self.machine();
            if m.state == next {
                return;
            }
            m.state = next;
        }
        debug!("connection state -> {next}");
        self.state_tx.send_replace(next);
        let callback = self.lock_poisoned(&self.on_state_change).clone();
        if let Some(callback) = callback {
            callback(next);
        }
    }

    /// Run the tenant guard against the current context. Records and
    /// returns the rejection, if any.
    fn check_guard(&self) -> Option<GuardRejection> {
        let ctx = self.tenant.snapshot();
        let tenant_id = if ctx.ready { ctx.tenant_id } else { None };
        match TenantGuard::can_connect(tenant_id.as_deref()) {
            Ok(()) => {
                self.machine().last_rejection = None;
                None
            }
            Err(rejection) => {
                let mut m = self.machine();
                m.last_rejection = Some(rejection);
                m.retry.last_error = Some(rejection.to_string());
                Some(rejection)
            }
        }
    }

    fn spawn_driver(self: &Arc<Self>, epoch: u64) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.drive(epoch).await;
        });
        // A superseded driver exits on its own via the epoch check.
        let _ = self.lock_poisoned(&self.task).replace(handle);
    }

    fn abort_driver(&self) {
        if let Some(handle) = self.lock_poisoned(&self.task).take() {
            handle.abort();
        }
    }

    /// Connect/read/retry loop. One driver task exists per epoch.
    async fn drive(self: Arc<Self>, epoch: u64) {
        loop {
            if self.stale(epoch) {
                return;
            }

            // Tenant context can change between attempts; re-check before
            // every one. A rejection is a config error: not retriable.
            if let Some(rejection) = self.check_guard() {
                warn!("tenant guard rejected reconnect: {rejection}");
                self.transition(ConnectionState::Error);
                return;
            }
            let ctx = self.tenant.snapshot();

            self.transition(ConnectionState::Connecting);
            let params = ConnectParams {
                tenant_id: ctx.tenant_id.unwrap_or_default(),
                location_id: self.config.location_id.clone(),
                last_event_id: self.machine().last_event_id.clone(),
            };

            let failure = match self.transport.open(&params).await {
                Ok(mut frames) => {
                    let mut failure = TransportError::StreamClosed;
                    loop {
                        match frames.next().await {
                            Some(Ok(frame)) => {
                                if self.stale(epoch) {
                                    return;
                                }
                                self.handle_frame(frame);
                            }
                            Some(Err(e)) => {
                                failure = e;
                                break;
                            }
                            None => break,
                        }
                    }
                    failure
                }
                Err(e) => e,
            };

            if self.stale(epoch) {
                return;
            }

            warn!("event stream failed: {failure}");
            let exhausted = {
                let mut m = self.machine();
                m.retry.last_error = Some(failure.to_string());
                m.retry.attempt >= self.config.max_retries
            };
            self.transition(ConnectionState::Error);

            if exhausted {
                info!(
                    "no further automatic attempts (attempt {} of {}); reconnect() required",
                    self.machine().retry.attempt,
                    self.config.max_retries
                );
                self.transition(ConnectionState::Disconnected);
                return;
            }

            let delay = {
                let mut m = self.machine();
                let delay = self.backoff.delay(m.retry.attempt);
                m.retry.attempt += 1;
                m.retry.next_delay = Some(delay);
                delay
            };
            debug!("reconnecting in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }

    /// Dispatch one inbound frame. The first frame of a connection is the
    /// open signal: it completes the handshake and resets the retry
    /// budget. Normalization failures drop the single frame and leave the
    /// connection state untouched.
    fn handle_frame(&self, frame: RawFrame) {
        let newly_connected = {
            let mut m = self.machine();
            if m.state == ConnectionState::Connected {
                false
            } else {
                m.retry = RetryContext::default();
                true
            }
        };
        if newly_connected {
            self.transition(ConnectionState::Connected);
        }

        if let Some(id) = &frame.id {
            self.machine().last_event_id = Some(id.clone());
        }

        match normalize_frame(&frame) {
            Ok(event) => {
                if event.kind.is_control() {
                    trace!("control frame: {}", event.kind.as_wire());
                    return;
                }
                // Send fails only when no subscriber is attached.
                let _ = self.events_tx.send(event.clone());
                let callback = self.lock_poisoned(&self.on_event).clone();
                if let Some(callback) = callback {
                    callback(event);
                }
            }
            Err(e) => {
                warn!("dropping malformed frame (event={}): {e}", frame.event_type);
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.abort_driver();
    }
}
