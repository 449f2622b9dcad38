//! TLS certificate management for WebConsole pods
//!
//! Issues the self-signed serving certificate and, on OpenShift, the proxying
//! client certificate signed by the platform service CA. Existing certificate
//! secrets are never replaced; rotation happens by deleting them, which the
//! `check-certificate-expiry` job does once they near expiry.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair,
    KeyUsagePurpose, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::client::ClusterClient;
use super::defaults::{DEFAULT_CERT_VALIDITY_DAYS, DEFAULT_EXPIRATION_PERIOD_HOURS};
use super::managed::{ManagedResource, ResourceKind};
use super::resources::{owned_metadata, standard_labels, SynthesisInput};
use crate::crd::WebConsole;
use crate::error::{Error, Result};
use crate::settings::OperatorSettings;

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

/// Label marking operator-issued certificate secrets; value is the purpose
pub const CERTIFICATE_LABEL: &str = "webconsole.io/certificate";
pub const SERVING_PURPOSE: &str = "serving";
pub const PROXYING_PURPOSE: &str = "proxying";

const RSA_KEY_BITS: usize = 2048;
const SERIAL_BYTES: usize = 16;

pub fn serving_secret_name(console_name: &str) -> String {
    format!("{console_name}-tls-serving")
}

pub fn client_secret_name(console_name: &str) -> String {
    format!("{console_name}-tls-proxying")
}

pub fn expiry_check_job_name(console_name: &str) -> String {
    format!("{console_name}-certificate-expiry-check")
}

/// PEM-encoded certificate and private key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub cert_pem: String,
    pub key_pem: String,
}

fn cert_error(message: impl std::fmt::Display) -> Error {
    Error::certificate(ResourceKind::Secret, message.to_string())
}

// ============================================================================
// Key material
// ============================================================================

fn generate_rsa_key_pair() -> Result<KeyPair> {
    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(cert_error)?;
    let pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(cert_error)?;
    KeyPair::from_pem_and_sign_algo(pem.as_str(), &PKCS_RSA_SHA256).map_err(cert_error)
}

/// Load a CA key in either PKCS#8 or PKCS#1 (`RSA PRIVATE KEY`) form
fn load_ca_key(pem: &str) -> Result<KeyPair> {
    if pem.contains("BEGIN RSA PRIVATE KEY") {
        let key = RsaPrivateKey::from_pkcs1_pem(pem).map_err(cert_error)?;
        let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).map_err(cert_error)?;
        return KeyPair::from_pem_and_sign_algo(pkcs8.as_str(), &PKCS_RSA_SHA256)
            .map_err(cert_error);
    }
    KeyPair::from_pem(pem).map_err(cert_error)
}

fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; SERIAL_BYTES];
    OsRng.fill_bytes(&mut bytes);
    // Keep the DER integer positive.
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

fn to_offset(at: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(at.timestamp()).map_err(cert_error)
}

fn leaf_params(
    common_name: &str,
    dns_names: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertificateParams> {
    let mut params = CertificateParams::new(dns_names).map_err(cert_error)?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.serial_number = Some(random_serial());
    params.not_before = to_offset(not_before)?;
    params.not_after = to_offset(not_after)?;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];
    Ok(params)
}

/// Self-signed certificate whose CN and only SAN is `dns_name`
pub fn generate_serving_certificate(
    dns_name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<CertificateMaterial> {
    let key_pair = generate_rsa_key_pair()?;
    let params = leaf_params(dns_name, vec![dns_name.to_string()], not_before, not_after)?;
    let cert = params.self_signed(&key_pair).map_err(cert_error)?;
    Ok(CertificateMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Client certificate signed by the given CA
pub fn generate_client_certificate(
    common_name: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    ca_cert_pem: &str,
    ca_key_pem: &str,
) -> Result<CertificateMaterial> {
    let ca_key = load_ca_key(ca_key_pem)?;
    let ca_params = CertificateParams::from_ca_cert_pem(ca_cert_pem).map_err(cert_error)?;
    let issuer = ca_params.self_signed(&ca_key).map_err(cert_error)?;

    let key_pair = generate_rsa_key_pair()?;
    let params = leaf_params(common_name, Vec::new(), not_before, not_after)?;
    let cert = params
        .signed_by(&key_pair, &issuer, &ca_key)
        .map_err(cert_error)?;
    Ok(CertificateMaterial {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// `kubernetes.io/tls` secret owned by the record
pub fn tls_secret(
    console: &WebConsole,
    name: String,
    purpose: &str,
    material: &CertificateMaterial,
    ca_pem: Option<&str>,
) -> Secret {
    let mut labels = standard_labels(console);
    labels.insert(CERTIFICATE_LABEL.to_string(), purpose.to_string());

    let mut data = BTreeMap::new();
    data.insert(
        TLS_CERT_KEY.to_string(),
        ByteString(material.cert_pem.clone().into_bytes()),
    );
    data.insert(
        TLS_PRIVATE_KEY.to_string(),
        ByteString(material.key_pem.clone().into_bytes()),
    );
    if let Some(ca) = ca_pem {
        data.insert(CA_CERT_KEY.to_string(), ByteString(ca.as_bytes().to_vec()));
    }

    Secret {
        metadata: owned_metadata(console, name, labels, BTreeMap::new()),
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// UTF-8 value of a secret key
pub fn secret_string(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .or_else(|| secret.string_data.as_ref().and_then(|d| d.get(key).cloned()))
}

/// Create `secret` unless another writer got there first
async fn create_secret(client: &dyn ClusterClient, secret: Secret) -> Result<()> {
    match client.create(&ManagedResource::Secret(secret)).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

// ============================================================================
// Serving certificate
// ============================================================================

/// Reuse or issue the serving certificate; returns its PEM
#[instrument(skip(client, console), fields(name = %console.name_any()))]
pub async fn ensure_serving_certificate(
    client: &dyn ClusterClient,
    console: &WebConsole,
    now: DateTime<Utc>,
) -> Result<String> {
    let namespace = console.namespace().unwrap_or_default();
    let name = serving_secret_name(&console.name_any());

    if let Some(ManagedResource::Secret(existing)) =
        client.get(ResourceKind::Secret, &namespace, &name).await?
    {
        return secret_string(&existing, TLS_CERT_KEY)
            .ok_or_else(|| cert_error(format!("secret {name} has no {TLS_CERT_KEY}")));
    }

    let dns_name = format!("{}.{}.svc", console.name_any(), namespace);
    let not_after = now + Duration::days(DEFAULT_CERT_VALIDITY_DAYS);
    let material = generate_serving_certificate(&dns_name, now, not_after)?;
    info!("Issuing serving certificate {} for {}", name, dns_name);

    let cert_pem = material.cert_pem.clone();
    create_secret(client, tls_secret(console, name, SERVING_PURPOSE, &material, None)).await?;
    Ok(cert_pem)
}

// ============================================================================
// Client certificate
// ============================================================================

/// Issue the proxying client certificate when missing.
///
/// Only needed on OpenShift with internal SSL, where the console proxies API
/// requests through the platform and must present a CA-signed identity.
#[instrument(skip(client, console, settings), fields(name = %console.name_any()))]
pub async fn ensure_client_certificate(
    client: &dyn ClusterClient,
    console: &WebConsole,
    settings: &OperatorSettings,
    now: DateTime<Utc>,
) -> Result<()> {
    let namespace = console.namespace().unwrap_or_default();
    let name = client_secret_name(&console.name_any());

    if client
        .get(ResourceKind::Secret, &namespace, &name)
        .await?
        .is_some()
    {
        return Ok(());
    }

    let ca_secret = match client
        .get(
            ResourceKind::Secret,
            &settings.ca_secret_namespace,
            &settings.ca_secret_name,
        )
        .await?
    {
        Some(ManagedResource::Secret(secret)) => secret,
        _ => {
            return Err(cert_error(format!(
                "platform CA secret {}/{} not found",
                settings.ca_secret_namespace, settings.ca_secret_name
            )))
        }
    };
    let ca_cert = secret_string(&ca_secret, TLS_CERT_KEY)
        .ok_or_else(|| cert_error("platform CA secret has no tls.crt"))?;
    let ca_key = secret_string(&ca_secret, TLS_PRIVATE_KEY)
        .ok_or_else(|| cert_error("platform CA secret has no tls.key"))?;

    let auth = &console.spec.auth;
    let common_name = auth
        .client_cert_common_name
        .clone()
        .filter(|cn| !cn.is_empty())
        .unwrap_or_else(|| settings.default_client_cert_common_name.clone());
    let not_after = auth
        .client_cert_expiration_date
        .unwrap_or_else(|| now + Duration::days(DEFAULT_CERT_VALIDITY_DAYS));

    let material = generate_client_certificate(&common_name, now, not_after, &ca_cert, &ca_key)?;
    info!(
        "Issuing client certificate {} (CN={}, expires {})",
        name, common_name, not_after
    );
    create_secret(
        client,
        tls_secret(console, name, PROXYING_PURPOSE, &material, Some(&ca_cert)),
    )
    .await
}

// ============================================================================
// Expiry check CronJob
// ============================================================================

fn expiry_check_args(namespace: &str, period_hours: i32) -> Vec<String> {
    vec![
        "check-certificate-expiry".to_string(),
        "--cert-namespace".to_string(),
        namespace.to_string(),
        "--cert-expiration-period".to_string(),
        period_hours.to_string(),
    ]
}

/// Flag whose value tracks the record's rotation period
pub const EXPIRATION_PERIOD_FLAG: &str = "--cert-expiration-period";

/// CronJob that rotates certificates nearing expiry
///
/// OpenShift only, and only when the record sets a schedule.
pub fn build_expiry_check_job(input: &SynthesisInput<'_>) -> Option<CronJob> {
    if !input.facts.is_extended_platform {
        return None;
    }
    let console = input.console;
    let schedule = console.spec.auth.client_cert_check_schedule.clone()?;
    let namespace = console.namespace().unwrap_or_default();
    let period = console
        .spec
        .auth
        .client_cert_expiration_period
        .unwrap_or(DEFAULT_EXPIRATION_PERIOD_HOURS);

    let labels = standard_labels(console);
    Some(CronJob {
        metadata: owned_metadata(
            console,
            expiry_check_job_name(&console.name_any()),
            labels.clone(),
            BTreeMap::new(),
        ),
        spec: Some(CronJobSpec {
            schedule,
            concurrency_policy: Some("Forbid".to_string()),
            job_template: JobTemplateSpec {
                spec: Some(JobSpec {
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            restart_policy: Some("Never".to_string()),
                            service_account_name: input.settings.cert_check_service_account.clone(),
                            containers: vec![Container {
                                name: "certificate-expiry-check".to_string(),
                                image: Some(input.settings.operator_image.clone()),
                                command: Some(vec!["webconsole-operator".to_string()]),
                                args: Some(expiry_check_args(&namespace, period)),
                                ..Default::default()
                            }],
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

// ============================================================================
// Expiry check
// ============================================================================

/// Delete client-certificate secrets expiring within `period_hours`.
///
/// Returns the names of the deleted secrets; the next reconcile re-issues
/// them. Secrets whose certificate cannot be parsed are left alone.
#[instrument(skip(client))]
pub async fn check_certificate_expiry(
    client: &dyn ClusterClient,
    namespace: &str,
    period_hours: i64,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let threshold = now + Duration::hours(period_hours);
    // Serving certificates are only replaced when deleted externally.
    let selector = format!("{CERTIFICATE_LABEL}={PROXYING_PURPOSE}");
    let secrets = client
        .list(ResourceKind::Secret, namespace, &selector)
        .await?;

    let mut deleted = Vec::new();
    for resource in secrets {
        let ManagedResource::Secret(secret) = resource else {
            continue;
        };
        let name = secret.name_any();
        let Some(pem) = secret_string(&secret, TLS_CERT_KEY) else {
            warn!("Secret {} has no {}; skipping", name, TLS_CERT_KEY);
            continue;
        };
        let not_after = match certificate_not_after(&pem) {
            Ok(at) => at,
            Err(e) => {
                warn!("Secret {} holds an unreadable certificate: {}", name, e);
                continue;
            }
        };
        if not_after <= threshold {
            info!(
                "Certificate in {} expires at {}; deleting for re-issue",
                name, not_after
            );
            client
                .delete(ResourceKind::Secret, namespace, &name)
                .await?;
            deleted.push(name);
        }
    }
    Ok(deleted)
}

/// Expiry of the first certificate in a PEM bundle
pub fn certificate_not_after(pem: &str) -> Result<DateTime<Utc>> {
    let (_, block) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).map_err(cert_error)?;
    let cert = block.parse_x509().map_err(cert_error)?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| cert_error(format!("certificate expiry {timestamp} out of range")))
}
