//! Shared types for WebConsole specifications
//!
//! These types are used across the CRD definition and controller logic.
//!
//! # Type Hierarchy
//!
//! - [`DeploymentMode`] - Whether the console watches the whole cluster or one namespace
//! - [`AuthConfig`] - Internal SSL and client certificate rotation policy
//! - [`MetadataPropagation`] - Which of the record's own annotations/labels reach generated objects
//! - [`ConsoleConfig`] - The console configuration document (about, branding, online, disabled routes)
//! - [`ResourceRequirements`] - CPU and memory requests/limits following Kubernetes conventions

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Scope the console operates in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum DeploymentMode {
    /// Console can browse every namespace; authenticates through a cluster OAuthClient
    Cluster,
    /// Console is restricted to the namespace of the record
    Namespace,
}

impl DeploymentMode {
    /// Lower-case form used in environment variables
    pub fn as_env_value(&self) -> &'static str {
        match self {
            DeploymentMode::Cluster => "cluster",
            DeploymentMode::Namespace => "namespace",
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::Cluster => write!(f, "Cluster"),
            DeploymentMode::Namespace => write!(f, "Namespace"),
        }
    }
}

/// Glob allowlists for metadata copied from the record onto generated objects
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPropagation {
    /// Annotation key patterns, e.g. `example.com/*`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<String>,
    /// Label key patterns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl MetadataPropagation {
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty() && self.labels.is_empty()
    }
}

/// Reference to a Secret in the same namespace
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LocalSecretReference {
    pub name: String,
}

/// Reference to one key of a Secret in the same namespace
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretKeyReference {
    pub name: String,
    pub key: String,
}

/// Custom certificate material for the route or ingress
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// TLS secret (`tls.crt`/`tls.key`) presented by the router
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_secret: Option<LocalSecretReference>,
    /// CA certificate completing the presented chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<SecretKeyReference>,
}

/// Authentication and certificate policy
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Serve HTTPS between router and console pods
    #[serde(rename = "internalSSL", skip_serializing_if = "Option::is_none")]
    pub internal_ssl: Option<bool>,
    /// Common name of the proxying client certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert_common_name: Option<String>,
    /// Expiration date of the proxying client certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert_expiration_date: Option<DateTime<Utc>>,
    /// Cron schedule of the certificate expiry check job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert_check_schedule: Option<String>,
    /// Hours before expiry at which the certificate is rotated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert_expiration_period: Option<i32>,
}

/// Reverse proxy tunables passed to the console container
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeTunables {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_body_buffer_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_buffers: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subrequest_output_buffer_size: Option<String>,
}

/// RBAC configuration for the console
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RbacConfig {
    /// ConfigMap holding an `ACL.yaml` with the console's RBAC rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,
    /// Turn off RBAC enforcement entirely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_rbac_support: Option<bool>,
}

/// Kubernetes-style resource requirements
///
/// Quantities use the usual formats: CPU `"500m"`, `"2"`; memory `"512Mi"`, `"1Gi"`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: ResourceSpec,
    #[serde(default)]
    pub limits: ResourceSpec,
}

/// Resource specification for CPU and memory
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

// ============================================================================
// Console configuration document
// ============================================================================

/// Declared part of the console configuration document
///
/// Every field is optional: unset fields are taken from the built-in default
/// document when the two are merged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<AboutConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branding: Option<BrandingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<OnlineConfig>,
    /// Console routes hidden from users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_routes: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AboutConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub img_src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_info: Option<Vec<ProductInfo>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProductInfo {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrandingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_logo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

/// Settings that only apply to the in-cluster ("online") console
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnlineConfig {
    /// Label selector restricting the namespaces listed in cluster mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_selector: Option<String>,
    /// Platform console link settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_link: Option<ConsoleLinkConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLinkConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_relative_path: Option<String>,
}
