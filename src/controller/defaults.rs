//! Default resolution for under-specified WebConsole records

use chrono::{DateTime, Duration, Utc};

use super::capabilities::CapabilityFacts;
use crate::crd::{DeploymentMode, WebConsoleSpec};

/// Hours before expiry at which the client certificate is rotated
pub const DEFAULT_EXPIRATION_PERIOD_HOURS: i32 = 24;

/// Lifetime of a client certificate when the record does not set one
pub const DEFAULT_CERT_VALIDITY_DAYS: i64 = 365;

/// Fill unset fields; returns true when the stored record must be updated.
pub fn resolve_defaults(
    spec: &mut WebConsoleSpec,
    facts: &CapabilityFacts,
    now: DateTime<Utc>,
) -> bool {
    let mut changed = false;

    if spec.deployment_mode.is_none() {
        spec.deployment_mode = Some(DeploymentMode::Cluster);
        changed = true;
    }

    // Routers on newer releases only re-encrypt towards HTTPS backends.
    let ssl_required = facts.is_extended_platform_minimum_version;
    match spec.auth.internal_ssl {
        None => {
            spec.auth.internal_ssl = Some(true);
            changed = true;
        }
        Some(false) if ssl_required => {
            spec.auth.internal_ssl = Some(true);
            changed = true;
        }
        Some(_) => {}
    }

    if spec.auth.client_cert_expiration_date.is_none() {
        spec.auth.client_cert_expiration_date =
            Some(now + Duration::days(DEFAULT_CERT_VALIDITY_DAYS));
        changed = true;
    }

    if spec.auth.client_cert_expiration_period.is_none() {
        spec.auth.client_cert_expiration_period = Some(DEFAULT_EXPIRATION_PERIOD_HOURS);
        changed = true;
    }

    changed
}
