//! The REST polling fallback: an interval-driven poller that is active
//! exactly while the stream is not connected, feeding the same normalized
//! event shape into the same consumer contract.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::connection::ConnectionState;
use crate::error::PollError;
use crate::event::DomainEvent;
use crate::tenant::{SharedTenant, TenantGuard};

/// How aggressively a consumer polls while the stream is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollUrgency {
    /// Check-in tickers, occupancy widgets: every 5 seconds.
    High,
    /// Slow-moving dashboards: every 30 seconds.
    Low,
}

impl PollUrgency {
    pub fn interval(&self) -> Duration {
        match self {
            Self::High => Duration::from_secs(5),
            Self::Low => Duration::from_secs(30),
        }
    }
}

/// Sink the poll loop hands fetched events to, in arrival order.
pub type PollSink = Arc<dyn Fn(Vec<DomainEvent>) + Send + Sync>;

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    events: Vec<DomainEvent>,
}

// ============================================================================
// Polling client
// ============================================================================

/// One-shot fetch against `GET /events`.
pub struct PollingClient {
    client: reqwest::Client,
    headers: HeaderMap,
    base_url: String,
    location_id: Option<String>,
    limit: usize,
    tenant: SharedTenant,
}

impl PollingClient {
    pub fn new(config: &StreamConfig, tenant: SharedTenant) -> Result<Self, PollError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PollError::Request(format!("failed to build HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.auth_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| PollError::Request(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| PollError::Request(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            headers,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            location_id: config.location_id.clone(),
            limit: config.poll_limit,
            tenant,
        })
    }

    /// Fetch events that occurred after `since`. The tenant guard runs
    /// before the request; a rejection makes this a no-network failure.
    pub async fn poll(&self, since: DateTime<Utc>) -> Result<Vec<DomainEvent>, PollError> {
        let ctx = self.tenant.snapshot();
        let tenant_id = if ctx.ready { ctx.tenant_id } else { None };
        TenantGuard::can_connect(tenant_id.as_deref()).map_err(PollError::Tenant)?;

        let url = format!("{}/events", self.base_url);
        let mut query: Vec<(&str, String)> = vec![
            ("tenantId", tenant_id.unwrap_or_default()),
            ("since", since.to_rfc3339()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(location_id) = &self.location_id {
            query.push(("locationId", location_id.clone()));
        }

        let response = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(PollError::Http { status, message });
        }

        let body: PollResponse = response
            .json()
            .await
            .map_err(|e| PollError::InvalidResponse(e.to_string()))?;
        Ok(body.events)
    }
}

// ============================================================================
// Polling loop
// ============================================================================

/// Interval loop that activates whenever the connection manager is not
/// `connected` and goes quiet the moment it is.
pub struct PollingFallback;

impl PollingFallback {
    /// Spawn the fallback loop.
    ///
    /// The `since` watermark advances to the newest fetched event's
    /// `occurred_at` (or the poll completion time when the result set is
    /// empty) and never goes backward; a failed poll keeps the watermark
    /// so the next tick retries the same window.
    pub fn spawn(
        client: PollingClient,
        mut state_rx: watch::Receiver<ConnectionState>,
        initial_since: DateTime<Utc>,
        interval: Duration,
        sink: PollSink,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut watermark = initial_since;
            loop {
                // Quiet while the stream is healthy.
                while *state_rx.borrow() == ConnectionState::Connected {
                    if state_rx.changed().await.is_err() {
                        return;
                    }
                }
                debug!("stream not connected; polling fallback active");

                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match client.poll(watermark).await {
                                Ok(events) => {
                                    let completed_at = Utc::now();
                                    let newest = events.iter().map(|e| e.occurred_at).max();
                                    if !events.is_empty() {
                                        sink(events);
                                    }
                                    let advanced = newest.unwrap_or(completed_at);
                                    if advanced > watermark {
                                        watermark = advanced;
                                    }
                                }
                                Err(e) => {
                                    // Watermark kept; next tick retries the window.
                                    warn!("poll failed: {e}");
                                }
                            }
                        }
                        changed = state_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            if *state_rx.borrow() == ConnectionState::Connected {
                                debug!("stream connected; polling fallback pausing");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_intervals() {
        assert_eq!(PollUrgency::High.interval(), Duration::from_secs(5));
        assert_eq!(PollUrgency::Low.interval(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn poll_refuses_without_tenant() {
        let (_writer, shared) = crate::tenant::channel(Default::default());
        let client = PollingClient::new(&StreamConfig::new("http://127.0.0.1:1"), shared).unwrap();

        let result = client.poll(Utc::now()).await;
        assert!(matches!(
            result,
            Err(PollError::Tenant(crate::tenant::GuardRejection::MissingOrg))
        ));
    }
}
