//! The normalized domain event shape and the frame normalizer.
//!
//! Every transport path (stream frames and poll responses) produces the
//! same [`DomainEvent`] shape, so consumer code is agnostic to which
//! transport is active. Unknown event types are retained with a generic
//! classification, never dropped: the client must keep working when the
//! server starts emitting new types.

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NormalizeError;
use crate::transport::RawFrame;

/// Closed set of known event types, plus a passthrough for anything the
/// server adds later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ConnectionEstablished,
    Heartbeat,
    VisitCheckin,
    VisitCheckout,
    MembershipExpiring,
    PaymentFailed,
    /// An event type this client does not know. Carried verbatim.
    Other(String),
}

impl EventKind {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "connection.established" => Self::ConnectionEstablished,
            "heartbeat" => Self::Heartbeat,
            "visit.checkin" => Self::VisitCheckin,
            "visit.checkout" => Self::VisitCheckout,
            "membership.expiring" => Self::MembershipExpiring,
            "payment.failed" => Self::PaymentFailed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::ConnectionEstablished => "connection.established",
            Self::Heartbeat => "heartbeat",
            Self::VisitCheckin => "visit.checkin",
            Self::VisitCheckout => "visit.checkout",
            Self::MembershipExpiring => "membership.expiring",
            Self::PaymentFailed => "payment.failed",
            Self::Other(raw) => raw,
        }
    }

    /// Liveness/handshake frames. Consumed by the connection manager,
    /// never forwarded to consumers.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::ConnectionEstablished | Self::Heartbeat)
    }

    /// Coarse grouping used by UI consumers for icons and filtering.
    /// Unknown kinds get a neutral classification.
    pub fn classification(&self) -> &'static str {
        match self {
            Self::VisitCheckin | Self::VisitCheckout => "visit",
            Self::MembershipExpiring => "membership",
            Self::PaymentFailed => "billing",
            Self::ConnectionEstablished | Self::Heartbeat => "system",
            Self::Other(_) => "general",
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

/// A normalized event, identical in shape whether it arrived over the
/// stream or the polling fallback.
///
/// `id` is unique within a tenant's feed and stable across transports for
/// the same logical event; consumers deduplicate on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Event time, not receipt time.
    pub occurred_at: DateTime<Utc>,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    /// Open key/value map; shape depends on `kind`.
    #[serde(default)]
    pub payload: Value,
}

impl DomainEvent {
    /// Human-readable one-liner for the accessibility live region.
    pub fn summary(&self) -> String {
        let who = self
            .payload
            .get("memberName")
            .and_then(Value::as_str)
            .unwrap_or("A member");
        match &self.kind {
            EventKind::VisitCheckin => format!("{who} checked in"),
            EventKind::VisitCheckout => format!("{who} checked out"),
            EventKind::MembershipExpiring => format!("Membership expiring soon: {who}"),
            EventKind::PaymentFailed => format!("Payment failed: {who}"),
            EventKind::ConnectionEstablished => "Live updates connected".to_string(),
            EventKind::Heartbeat => "Live updates active".to_string(),
            EventKind::Other(raw) => format!("New activity: {raw}"),
        }
    }
}

/// Map a raw transport frame into a [`DomainEvent`].
///
/// The frame's `event` discriminator wins; a bare `message` frame falls
/// back to a `type` field inside the JSON body. Control frames are allowed
/// to omit `occurredAt` and `tenantId` since they never reach consumers.
pub fn normalize_frame(frame: &RawFrame) -> Result<DomainEvent, NormalizeError> {
    let data: Value = serde_json::from_str(&frame.data)
        .map_err(|e| NormalizeError::InvalidJson(e.to_string()))?;
    let body = data.as_object().ok_or(NormalizeError::NotObject)?;

    let wire_type = if frame.event_type.is_empty() || frame.event_type == "message" {
        body.get("type").and_then(Value::as_str).unwrap_or("message")
    } else {
        frame.event_type.as_str()
    };
    let kind = EventKind::from_wire(wire_type);

    let id = match body.get("id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => frame
            .id
            .clone()
            .ok_or(NormalizeError::MissingField("id"))?,
    };

    let occurred_at = match body.get("occurredAt").and_then(Value::as_str) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|e| NormalizeError::InvalidTimestamp(e.to_string()))?
            .with_timezone(&Utc),
        None if kind.is_control() => Utc::now(),
        None => return Err(NormalizeError::MissingField("occurredAt")),
    };

    let tenant_id = match body.get("tenantId").and_then(Value::as_str) {
        Some(tenant) => tenant.to_string(),
        None if kind.is_control() => String::new(),
        None => return Err(NormalizeError::MissingField("tenantId")),
    };

    let location_id = body
        .get("locationId")
        .and_then(Value::as_str)
        .map(str::to_string);

    let payload = body
        .get("payload")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    Ok(DomainEvent {
        id,
        kind,
        occurred_at,
        tenant_id,
        location_id,
        payload,
    })
}
