//! Deploy-time operator settings
//!
//! Read once from flags or environment variables when the operator starts.

use std::time::Duration;

use clap::Args;

use crate::error::{Error, Result};

/// Settings shared by every reconcile pass
#[derive(Args, Clone, Debug)]
pub struct OperatorSettings {
    /// Console container image
    #[arg(
        long,
        env = "CONSOLE_IMAGE",
        default_value = "quay.io/webconsole/online:latest"
    )]
    pub console_image: String,

    /// Operator image, run by the certificate expiry CronJob
    #[arg(
        long,
        env = "OPERATOR_IMAGE",
        default_value = "quay.io/webconsole/operator:latest"
    )]
    pub operator_image: String,

    /// Common name of proxying client certificates when a record sets none
    #[arg(
        long,
        env = "DEFAULT_CLIENT_CERT_CN",
        default_value = "webconsole-online.webconsole.svc"
    )]
    pub default_client_cert_common_name: String,

    /// Namespace of the platform CA secret
    #[arg(long, env = "CA_SECRET_NAMESPACE", default_value = "openshift-service-ca")]
    pub ca_secret_namespace: String,

    /// Name of the platform CA secret
    #[arg(long, env = "CA_SECRET_NAME", default_value = "signing-key")]
    pub ca_secret_name: String,

    /// Service account the expiry CronJob runs as; needs get/list/delete on secrets
    #[arg(long, env = "CERT_CHECK_SERVICE_ACCOUNT")]
    pub cert_check_service_account: Option<String>,

    /// Upper bound on every API server call, in seconds
    #[arg(long, env = "API_TIMEOUT_SECS", default_value_t = 30)]
    pub api_timeout_secs: u64,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            console_image: "quay.io/webconsole/online:latest".to_string(),
            operator_image: "quay.io/webconsole/operator:latest".to_string(),
            default_client_cert_common_name: "webconsole-online.webconsole.svc".to_string(),
            ca_secret_namespace: "openshift-service-ca".to_string(),
            ca_secret_name: "signing-key".to_string(),
            cert_check_service_account: None,
            api_timeout_secs: 30,
        }
    }
}

impl OperatorSettings {
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.console_image.trim().is_empty() {
            return Err(Error::ConfigError("console image must not be empty".into()));
        }
        if self.operator_image.trim().is_empty() {
            return Err(Error::ConfigError("operator image must not be empty".into()));
        }
        if self.default_client_cert_common_name.trim().is_empty() {
            return Err(Error::ConfigError(
                "default client certificate common name must not be empty".into(),
            ));
        }
        if self.api_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "API timeout must be at least one second".into(),
            ));
        }
        Ok(())
    }
}
