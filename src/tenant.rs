//! Tenant context and the guard that gates every connection attempt.
//!
//! The authentication subsystem owns the tenant identity; this module only
//! reads it. [`TenantGuard::can_connect`] is pure and synchronous so it can
//! run before any network resource is allocated, and the connection manager
//! re-checks it before every attempt, including retries.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

/// Tenant identity supplied by the authentication collaborator.
///
/// `ready` is true only once authentication has resolved and a tenant id
/// exists. No connection may be attempted while it is false.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Option<String>,
    pub ready: bool,
}

impl TenantContext {
    /// A resolved context for the given tenant id.
    pub fn ready(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ready: true,
        }
    }
}

/// Why the guard refused a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardRejection {
    MissingOrg,
    InvalidOrgFormat,
}

impl GuardRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingOrg => "missing_org",
            Self::InvalidOrgFormat => "invalid_org_format",
        }
    }
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates tenant identifiers before any transport is opened.
pub struct TenantGuard;

impl TenantGuard {
    /// Check that a tenant id is present and is a UUID (versions 1-5).
    ///
    /// Pure and synchronous; no side effects.
    pub fn can_connect(tenant_id: Option<&str>) -> Result<(), GuardRejection> {
        let id = match tenant_id {
            Some(raw) if !raw.trim().is_empty() => raw.trim(),
            _ => return Err(GuardRejection::MissingOrg),
        };

        let parsed = Uuid::parse_str(id).map_err(|_| GuardRejection::InvalidOrgFormat)?;
        match parsed.get_version_num() {
            1..=5 => Ok(()),
            _ => Err(GuardRejection::InvalidOrgFormat),
        }
    }
}

/// Read side of the shared tenant context.
///
/// Cheap to clone; every clone observes updates made through the
/// [`TenantWriter`].
#[derive(Debug, Clone)]
pub struct SharedTenant {
    rx: watch::Receiver<TenantContext>,
}

impl SharedTenant {
    /// Current tenant context.
    pub fn snapshot(&self) -> TenantContext {
        self.rx.borrow().clone()
    }

    /// A fixed, already-resolved tenant context. Useful when the tenant is
    /// known up front and never changes.
    pub fn fixed(tenant_id: impl Into<String>) -> Self {
        let (_, shared) = channel(TenantContext::ready(tenant_id));
        shared
    }
}

/// Write side of the shared tenant context, held by the auth collaborator.
#[derive(Debug)]
pub struct TenantWriter {
    tx: watch::Sender<TenantContext>,
}

impl TenantWriter {
    /// Replace the current tenant context.
    pub fn set(&self, context: TenantContext) {
        self.tx.send_replace(context);
    }

    /// A new read handle onto this context.
    pub fn handle(&self) -> SharedTenant {
        SharedTenant {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a shared tenant context with the given initial value.
pub fn channel(initial: TenantContext) -> (TenantWriter, SharedTenant) {
    let (tx, rx) = watch::channel(initial);
    (TenantWriter { tx }, SharedTenant { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_TENANT: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn accepts_valid_uuid() {
        assert!(TenantGuard::can_connect(Some(VALID_TENANT)).is_ok());
        assert!(TenantGuard::can_connect(Some(&Uuid::new_v4().to_string())).is_ok());
    }

    #[test]
    fn rejects_missing_org() {
        assert_eq!(
            TenantGuard::can_connect(None),
            Err(GuardRejection::MissingOrg)
        );
        assert_eq!(
            TenantGuard::can_connect(Some("")),
            Err(GuardRejection::MissingOrg)
        );
        assert_eq!(
            TenantGuard::can_connect(Some("   ")),
            Err(GuardRejection::MissingOrg)
        );
    }

    #[test]
    fn rejects_invalid_format() {
        assert_eq!(
            TenantGuard::can_connect(Some("not-a-uuid")),
            Err(GuardRejection::InvalidOrgFormat)
        );
        // Nil UUID parses but is not a v1-v5 identifier.
        assert_eq!(
            TenantGuard::can_connect(Some("00000000-0000-0000-0000-000000000000")),
            Err(GuardRejection::InvalidOrgFormat)
        );
    }

    #[test]
    fn rejection_wire_names() {
        assert_eq!(GuardRejection::MissingOrg.as_str(), "missing_org");
        assert_eq!(
            GuardRejection::InvalidOrgFormat.as_str(),
            "invalid_org_format"
        );
    }

    #[test]
    fn shared_context_observes_updates() {
        let (writer, shared) = channel(TenantContext::default());
        assert!(!shared.snapshot().ready);

        writer.set(TenantContext::ready(VALID_TENANT));
        let ctx = shared.snapshot();
        assert!(ctx.ready);
        assert_eq!(ctx.tenant_id.as_deref(), Some(VALID_TENANT));
    }

    #[test]
    fn fixed_context_outlives_writer() {
        let shared = SharedTenant::fixed(VALID_TENANT);
        assert!(shared.snapshot().ready);
    }
}
