//! Tenant-scoped fan-out: one connection, many subscribers.
//!
//! Per-consumer connection ownership multiplies transports N× against the
//! same endpoint. `TenantBroadcaster` centralizes a single
//! [`ConnectionManager`] (and a single polling fallback) per tenant and
//! fans normalized events out over a broadcast channel. Subscribers are
//! read-only: they receive events and observe state, but transport
//! lifecycle stays with the broadcaster's owner.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::StreamConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::PollError;
use crate::event::DomainEvent;
use crate::polling::{PollSink, PollUrgency, PollingClient, PollingFallback};
use crate::tenant::SharedTenant;
use crate::transport::EventTransport;

const FANOUT_CAPACITY: usize = 1024;

pub struct TenantBroadcaster {
    manager: Arc<ConnectionManager>,
    tx: broadcast::Sender<DomainEvent>,
    forward_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
}

impl TenantBroadcaster {
    /// Build the broadcaster. Call [`start`] to begin connecting.
    ///
    /// [`start`]: Self::start
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn EventTransport>,
        tenant: SharedTenant,
        urgency: PollUrgency,
    ) -> Result<Self, PollError> {
        let manager = ConnectionManager::new(config.clone(), transport, tenant.clone());
        let (tx, _) = broadcast::channel(FANOUT_CAPACITY);

        // Stream side: forward normalized events into the fan-out channel.
        let mut stream_rx = manager.subscribe();
        let fan_tx = tx.clone();
        let forward_task = tokio::spawn(async move {
            loop {
                match stream_rx.recv().await {
                    Ok(event) => {
                        // Send fails only with zero subscribers.
                        let _ = fan_tx.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("broadcaster lagged, dropped {n} stream events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        // Poll side: same channel, active only while the stream is down.
        // Subscribers dedupe by id, so overlap between the two paths is
        // harmless.
        let poll_client = PollingClient::new(&config, tenant)?;
        let fan_tx = tx.clone();
        let sink: PollSink = Arc::new(move |events| {
            for event in events {
                let _ = fan_tx.send(event);
            }
        });
        let poll_interval = config.poll_interval.unwrap_or_else(|| urgency.interval());
        let poll_task = PollingFallback::spawn(
            poll_client,
            manager.watch_state(),
            Utc::now(),
            poll_interval,
            sink,
        );

        Ok(Self {
            manager,
            tx,
            forward_task,
            poll_task,
        })
    }

    /// Read-only event feed for a subscriber. A slow subscriber observes
    /// a lag error and resumes with newer events; it never blocks the
    /// connection.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    pub fn start(&self) {
        self.manager.start();
    }

    pub fn stop(&self) {
        self.manager.stop();
    }

    /// Manual retry affordance after the retry budget is exhausted.
    pub fn reconnect(&self) {
        self.manager.reconnect();
    }

    /// Connection manager handle for wiring a [`VisibilityGate`].
    ///
    /// [`VisibilityGate`]: crate::visibility::VisibilityGate
    pub fn manager(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.manager)
    }

    fn shutdown(&self) {
        self.manager.stop();
        self.forward_task.abort();
        self.poll_task.abort();
    }
}

impl Drop for TenantBroadcaster {
    fn drop(&mut self) {
        self.shutdown();
    }
}
