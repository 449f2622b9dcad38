//! WebConsole Custom Resource Definition
//!
//! A WebConsole describes one deployed web console: its scope, exposure,
//! certificates and configuration document. The operator converges the
//! workload, network entry points, secrets and scheduled jobs to match it.

use std::str::FromStr;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    AuthConfig, ConsoleConfig, DeploymentMode, MetadataPropagation, RbacConfig,
    ResourceRequirements, RouteConfig, RuntimeTunables,
};

/// Structured validation error for `WebConsoleSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.how_to_fix)
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "webconsole.io",
    version = "v1",
    kind = "WebConsole",
    namespaced,
    status = "WebConsoleStatus",
    shortname = "wc",
    derive = "PartialEq",
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.replicas","labelSelectorPath":".status.selector"}"#,
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.URL"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".status.image","priority":1}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebConsoleSpec {
    /// Cluster or namespace scope; unset until defaults are resolved
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub deployment_mode: Option<DeploymentMode>,

    /// Desired pod count; unset leaves the live replica count alone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Record annotations/labels copied onto generated objects
    #[serde(default, skip_serializing_if = "MetadataPropagation::is_empty")]
    pub metadata_propagation: MetadataPropagation,

    /// Hostname override for the route or ingress
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_hostname: Option<String>,

    /// Custom certificate for the route
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteConfig>,

    /// Additional routes whose hosts are valid OAuth redirect targets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_routes: Vec<String>,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default)]
    pub runtime: RuntimeTunables,

    #[serde(default)]
    pub rbac: RbacConfig,

    /// Overlay merged onto the built-in configuration document
    #[serde(default)]
    pub config: ConsoleConfig,
}

impl WebConsoleSpec {
    pub fn internal_ssl(&self) -> bool {
        self.auth.internal_ssl.unwrap_or(true)
    }

    /// Validate the spec and return all errors found
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors: Vec<SpecValidationError> = Vec::new();

        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                errors.push(SpecValidationError::new(
                    "spec.replicas",
                    format!("replicas must not be negative, got {replicas}"),
                    "Set spec.replicas to 0 or more, or remove it to keep the live count.",
                ));
            }
        }

        if let Some(schedule) = &self.auth.client_cert_check_schedule {
            if cron::Schedule::from_str(&format!("0 {schedule}")).is_err() {
                errors.push(SpecValidationError::new(
                    "spec.auth.clientCertCheckSchedule",
                    format!("'{schedule}' is not a valid cron schedule"),
                    "Use a five-field cron expression such as \"0 */12 * * *\".",
                ));
            }
        }

        if let Some(period) = self.auth.client_cert_expiration_period {
            if period <= 0 {
                errors.push(SpecValidationError::new(
                    "spec.auth.clientCertExpirationPeriod",
                    "the rotation period must be a positive number of hours",
                    "Set spec.auth.clientCertExpirationPeriod to e.g. 24.",
                ));
            }
        }

        if let Some(host) = &self.route_hostname {
            if !is_dns_name(host) {
                errors.push(SpecValidationError::new(
                    "spec.routeHostname",
                    format!("'{host}' is not a valid DNS name"),
                    "Use lower-case alphanumeric labels separated by dots, e.g. console.apps.example.com.",
                ));
            }
        }

        for (field, patterns) in [
            (
                "spec.metadataPropagation.annotations",
                &self.metadata_propagation.annotations,
            ),
            (
                "spec.metadataPropagation.labels",
                &self.metadata_propagation.labels,
            ),
        ] {
            for pattern in patterns {
                if glob::Pattern::new(pattern).is_err() {
                    errors.push(SpecValidationError::new(
                        field,
                        format!("'{pattern}' is not a valid glob pattern"),
                        "Use '*' and '?' wildcards and balanced '[...]' classes.",
                    ));
                }
            }
        }

        for name in &self.external_routes {
            if name.is_empty() {
                errors.push(SpecValidationError::new(
                    "spec.externalRoutes",
                    "external route names must not be empty",
                    "Remove the empty entry from spec.externalRoutes.",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn is_dns_name(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    })
}

/// Lifecycle phase of a WebConsole
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConsolePhase {
    /// Defaults were persisted; resources not yet converged
    Initialized,
    /// Every managed resource converged at least once
    Deployed,
    /// Spec, synthesis or certificate failure; cleared by the next good pass
    Failed,
}

impl std::fmt::Display for ConsolePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsolePhase::Initialized => write!(f, "Initialized"),
            ConsolePhase::Deployed => write!(f, "Deployed"),
            ConsolePhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Observed state, written only by the operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebConsoleStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ConsolePhase>,

    /// Console container image currently rolled out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// External URL of the console
    #[serde(rename = "URL", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Pods reported by the Deployment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Label selector of the console pods, for the scale subresource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl WebConsoleStatus {
    /// JSON merge patch replacing the whole status.
    ///
    /// Unset fields are sent as `null` so values that disappeared (such as
    /// `replicas` after scaling to zero) are removed from the stored status.
    pub fn merge_patch(&self) -> serde_json::Value {
        serde_json::json!({
            "status": {
                "phase": self.phase,
                "image": self.image,
                "URL": self.url,
                "replicas": self.replicas,
                "selector": self.selector,
            }
        })
    }
}
