//! Kubernetes resource builders for WebConsole
//!
//! Every function here is pure: the same record, capability facts, settings
//! and observed state always produce byte-identical objects. The convergence
//! engine decides whether to create or update them.

use std::collections::{BTreeMap, BTreeSet};

use glob::Pattern;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource,
    HTTPGetAction, ObjectFieldSelector, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements as K8sResources, SecretVolumeSource, Service, ServiceAccount,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use serde_json::json;

use super::capabilities::CapabilityFacts;
use super::certificates;
use super::config_document::{canonical_json, content_version, render_document, string_at};
use super::managed::{ManagedResource, ResourceKind};
use crate::crd::platform::{
    ApplicationMenuSpec, ConsoleLinkSpec, NamespaceDashboardSpec, RoutePort, RouteSpec,
    RouteTargetReference, TlsConfig,
};
use crate::crd::{
    ConsoleLink, DeploymentMode, OAuthClient, ResourceSpec, Route, WebConsole,
};
use crate::error::{Error, Result};
use crate::settings::OperatorSettings;

/// Annotation carrying the configuration document's content version
pub const CONFIG_VERSION_ANNOTATION: &str = "webconsole.io/config-version";
/// Annotation carrying the hash of the synthesized pod template
pub const TEMPLATE_VERSION_ANNOTATION: &str = "webconsole.io/template-version";
/// Set by OpenShift on routes whose host the router generated
pub const HOST_GENERATED_ANNOTATION: &str = "openshift.io/host.generated";

pub const CONTAINER_NAME: &str = "webconsole";
pub const CONFIG_FILE_KEY: &str = "config.json";
pub const APP_LABEL_VALUE: &str = "webconsole";

const CONFIG_MOUNT_PATH: &str = "/usr/share/webconsole/config";
const SERVING_CERT_MOUNT_PATH: &str = "/etc/tls/private/serving";
const PROXYING_CERT_MOUNT_PATH: &str = "/etc/tls/private/proxying";
const RBAC_MOUNT_PATH: &str = "/etc/webconsole/rbac";
const HEALTH_PATH: &str = "/online";
const OAUTH_REDIRECT_ANNOTATION_PREFIX: &str = "serviceaccounts.openshift.io/oauth-redirectreference.";

/// Everything the synthesizer is allowed to look at
#[derive(Clone, Copy, Debug)]
pub struct SynthesisInput<'a> {
    pub console: &'a WebConsole,
    pub facts: &'a CapabilityFacts,
    pub settings: &'a OperatorSettings,
    pub observed: &'a ObservedState,
}

/// Cluster state read before synthesis
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedState {
    /// Hosts of the own route and the declared external routes
    pub redirect_hosts: BTreeSet<String>,
    /// External URL of the console, once a host is known
    pub console_url: Option<String>,
    /// Serving certificate, trusted by the router when re-encrypting
    pub serving_cert_pem: Option<String>,
    /// Custom certificate for the route or ingress
    pub route_tls: Option<RouteTlsMaterial>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteTlsMaterial {
    pub certificate: String,
    pub key: String,
    pub ca_certificate: Option<String>,
}

/// Get the standard labels for a WebConsole's resources
pub fn standard_labels(console: &WebConsole) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), APP_LABEL_VALUE.to_string());
    labels.insert("deployment".to_string(), console.name_any());
    labels
}

/// `app=webconsole,deployment=<name>`, for the scale subresource
pub fn label_selector_string(console: &WebConsole) -> String {
    standard_labels(console)
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(console: &WebConsole) -> OwnerReference {
    OwnerReference {
        api_version: WebConsole::api_version(&()).to_string(),
        kind: WebConsole::kind(&()).to_string(),
        name: console.name_any(),
        uid: console.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn mode(console: &WebConsole) -> DeploymentMode {
    console.spec.deployment_mode.unwrap_or(DeploymentMode::Cluster)
}

/// Cluster-scoped objects are named after namespace and record
pub fn cluster_scoped_name(console: &WebConsole) -> String {
    format!(
        "{}-{}",
        console.namespace().unwrap_or_default(),
        console.name_any()
    )
}

pub fn oauth_client_id(console: &WebConsole) -> String {
    match mode(console) {
        DeploymentMode::Cluster => cluster_scoped_name(console),
        DeploymentMode::Namespace => format!(
            "system:serviceaccount:{}:{}",
            console.namespace().unwrap_or_default(),
            console.name_any()
        ),
    }
}

/// Metadata for a namespaced object owned by the record
pub(crate) fn owned_metadata(
    console: &WebConsole,
    name: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
) -> ObjectMeta {
    let mut meta = ObjectMeta {
        name: Some(name),
        namespace: console.namespace(),
        labels: Some(labels),
        annotations: if annotations.is_empty() {
            None
        } else {
            Some(annotations)
        },
        owner_references: Some(vec![owner_reference(console)]),
        ..Default::default()
    };
    propagate_metadata(&mut meta, console);
    meta
}

/// Metadata for a cluster-scoped object; no owner reference is possible
fn cluster_metadata(console: &WebConsole, labels: BTreeMap<String, String>) -> ObjectMeta {
    let mut meta = ObjectMeta {
        name: Some(cluster_scoped_name(console)),
        labels: Some(labels),
        ..Default::default()
    };
    propagate_metadata(&mut meta, console);
    meta
}

/// Copy the record's own annotations/labels whose keys match the allowlists.
///
/// Keys already set on `meta` win.
pub fn propagate_metadata(meta: &mut ObjectMeta, console: &WebConsole) {
    let rules = &console.spec.metadata_propagation;
    copy_matching(
        &mut meta.annotations,
        console.metadata.annotations.as_ref(),
        &rules.annotations,
    );
    copy_matching(
        &mut meta.labels,
        console.metadata.labels.as_ref(),
        &rules.labels,
    );
}

fn copy_matching(
    target: &mut Option<BTreeMap<String, String>>,
    source: Option<&BTreeMap<String, String>>,
    patterns: &[String],
) {
    let Some(source) = source else {
        return;
    };
    let patterns: Vec<Pattern> = patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();
    if patterns.is_empty() {
        return;
    }
    for (key, value) in source {
        if patterns.iter().any(|p| p.matches(key)) {
            target
                .get_or_insert_with(BTreeMap::new)
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

fn port_name(console: &WebConsole) -> &'static str {
    if console.spec.internal_ssl() {
        "https"
    } else {
        "http"
    }
}

fn container_port(console: &WebConsole) -> i32 {
    if console.spec.internal_ssl() {
        8443
    } else {
        8080
    }
}

/// Every desired object in apply order.
///
/// Certificate secrets are not included: their key material is random and
/// they are issued separately by the certificate manager.
pub fn desired_resources(input: &SynthesisInput<'_>) -> Result<Vec<ManagedResource>> {
    let mut resources = vec![ManagedResource::ServiceAccount(build_service_account(input))];

    if let Some(oauth_client) = build_oauth_client(input) {
        resources.push(ManagedResource::OAuthClient(oauth_client));
    }

    let config_map = build_config_map(input)?;
    let config_version = config_map
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(CONFIG_VERSION_ANNOTATION))
        .cloned()
        .unwrap_or_default();
    resources.push(ManagedResource::ConfigMap(config_map));
    resources.push(ManagedResource::Service(build_service(input)));
    resources.push(ManagedResource::Deployment(build_deployment(
        input,
        &config_version,
    )?));

    if input.facts.supports_routes {
        resources.push(ManagedResource::Route(build_route(input)));
    } else {
        resources.push(ManagedResource::Ingress(build_ingress(input)));
    }

    if let Some(link) = build_console_link(input)? {
        resources.push(ManagedResource::ConsoleLink(link));
    }
    if let Some(job) = certificates::build_expiry_check_job(input) {
        resources.push(ManagedResource::CronJob(job));
    }

    Ok(resources)
}

// ============================================================================
// ServiceAccount / OAuthClient
// ============================================================================

pub fn build_service_account(input: &SynthesisInput<'_>) -> ServiceAccount {
    let console = input.console;
    let mut annotations = BTreeMap::new();

    // Namespace-scoped consoles authenticate as their service account; the
    // platform OAuth server accepts redirects to the referenced routes.
    if input.facts.supports_routes && mode(console) == DeploymentMode::Namespace {
        let mut routes = vec![console.name_any()];
        routes.extend(console.spec.external_routes.iter().cloned());
        for route in routes {
            let reference = json!({
                "kind": "OAuthRedirectReference",
                "apiVersion": "v1",
                "reference": {"kind": "Route", "name": route}
            });
            annotations.insert(
                format!("{OAUTH_REDIRECT_ANNOTATION_PREFIX}{route}"),
                reference.to_string(),
            );
        }
    }

    ServiceAccount {
        metadata: owned_metadata(
            console,
            console.name_any(),
            standard_labels(console),
            annotations,
        ),
        ..Default::default()
    }
}

pub fn build_oauth_client(input: &SynthesisInput<'_>) -> Option<OAuthClient> {
    if !input.facts.supports_routes || mode(input.console) != DeploymentMode::Cluster {
        return None;
    }
    Some(OAuthClient {
        metadata: cluster_metadata(input.console, standard_labels(input.console)),
        redirect_uris: input
            .observed
            .redirect_hosts
            .iter()
            .map(|host| format!("https://{host}"))
            .collect(),
        grant_method: Some("auto".to_string()),
    })
}

// ============================================================================
// ConfigMap
// ============================================================================

pub fn build_config_map(input: &SynthesisInput<'_>) -> Result<ConfigMap> {
    let console = input.console;
    let document = render_document(console)
        .map_err(|e| Error::synthesis(ResourceKind::ConfigMap, e.to_string()))?;

    let mut annotations = BTreeMap::new();
    annotations.insert(
        CONFIG_VERSION_ANNOTATION.to_string(),
        content_version(&document),
    );

    let mut data = BTreeMap::new();
    data.insert(CONFIG_FILE_KEY.to_string(), canonical_json(&document));

    Ok(ConfigMap {
        metadata: owned_metadata(
            console,
            console.name_any(),
            standard_labels(console),
            annotations,
        ),
        data: Some(data),
        ..Default::default()
    })
}

// ============================================================================
// Service
// ============================================================================

pub fn build_service(input: &SynthesisInput<'_>) -> Service {
    let console = input.console;
    let ssl = console.spec.internal_ssl();
    let labels = standard_labels(console);

    Service {
        metadata: owned_metadata(console, console.name_any(), labels.clone(), BTreeMap::new()),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some(port_name(console).to_string()),
                port: if ssl { 443 } else { 80 },
                target_port: Some(IntOrString::String(port_name(console).to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Deployment
// ============================================================================

pub fn build_deployment(input: &SynthesisInput<'_>, config_version: &str) -> Result<Deployment> {
    let console = input.console;
    let labels = standard_labels(console);
    let template = build_pod_template(input, config_version);

    let template_value = serde_json::to_value(&template)
        .map_err(|e| Error::synthesis(ResourceKind::Deployment, e.to_string()))?;
    let mut annotations = BTreeMap::new();
    annotations.insert(
        TEMPLATE_VERSION_ANNOTATION.to_string(),
        content_version(&template_value),
    );

    Ok(Deployment {
        metadata: owned_metadata(console, console.name_any(), labels.clone(), annotations),
        spec: Some(DeploymentSpec {
            replicas: console.spec.replicas,
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn build_pod_template(input: &SynthesisInput<'_>, config_version: &str) -> PodTemplateSpec {
    let console = input.console;
    let mut annotations = BTreeMap::new();
    annotations.insert(
        CONFIG_VERSION_ANNOTATION.to_string(),
        config_version.to_string(),
    );

    let (volumes, volume_mounts) = build_volumes(input);

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(standard_labels(console)),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(console.name_any()),
            containers: vec![build_container(input, volume_mounts)],
            volumes: Some(volumes),
            ..Default::default()
        }),
    }
}

fn build_container(input: &SynthesisInput<'_>, volume_mounts: Vec<VolumeMount>) -> Container {
    let console = input.console;
    let scheme = port_name(console).to_uppercase();
    let probe = |initial_delay: i32| Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.to_string()),
            port: IntOrString::String(port_name(console).to_string()),
            scheme: Some(scheme.clone()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(10),
        ..Default::default()
    };

    Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(input.settings.console_image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some(port_name(console).to_string()),
            container_port: container_port(console),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(build_env(input)),
        volume_mounts: Some(volume_mounts),
        readiness_probe: Some(probe(5)),
        liveness_probe: Some(probe(10)),
        resources: console.spec.resources.as_ref().map(|r| K8sResources {
            requests: quantities(&r.requests),
            limits: quantities(&r.limits),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn quantities(spec: &ResourceSpec) -> Option<BTreeMap<String, Quantity>> {
    let mut map = BTreeMap::new();
    if let Some(cpu) = &spec.cpu {
        map.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &spec.memory {
        map.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn build_env(input: &SynthesisInput<'_>) -> Vec<EnvVar> {
    let console = input.console;
    let spec = &console.spec;
    let mut vars = vec![env("WEBCONSOLE_MODE", mode(console).as_env_value())];

    if mode(console) == DeploymentMode::Namespace {
        vars.push(EnvVar {
            name: "WEBCONSOLE_NAMESPACE".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    vars.push(env("WEBCONSOLE_OAUTH_CLIENT_ID", oauth_client_id(console)));
    vars.push(env(
        "WEBCONSOLE_INTERNAL_SSL",
        spec.internal_ssl().to_string(),
    ));

    if spec.rbac.config_map.is_some() {
        vars.push(env(
            "WEBCONSOLE_RBAC_CONFIG",
            format!("{RBAC_MOUNT_PATH}/ACL.yaml"),
        ));
    }
    if spec.rbac.disable_rbac_support == Some(true) {
        vars.push(env("WEBCONSOLE_RBAC_ENABLED", "false"));
    }

    let tunables = [
        (
            "NGINX_CLIENT_BODY_BUFFER_SIZE",
            &spec.runtime.client_body_buffer_size,
        ),
        ("NGINX_PROXY_BUFFERS", &spec.runtime.proxy_buffers),
        (
            "NGINX_SUBREQUEST_OUTPUT_BUFFER_SIZE",
            &spec.runtime.subrequest_output_buffer_size,
        ),
    ];
    for (name, value) in tunables {
        if let Some(value) = value {
            vars.push(env(name, value.clone()));
        }
    }

    if input.facts.is_extended_platform {
        vars.push(env("WEBCONSOLE_GATEWAY", "true"));
        vars.push(env(
            "PLATFORM_CLUSTER_VERSION",
            input.facts.platform_version.clone(),
        ));
        if let Some(url) = &input.facts.platform_console_url {
            vars.push(env("PLATFORM_CONSOLE_URL", url.clone()));
        }
    }

    vars
}

fn build_volumes(input: &SynthesisInput<'_>) -> (Vec<Volume>, Vec<VolumeMount>) {
    let console = input.console;
    let name = console.name_any();
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();

    let mut secret_volume = |volume: &str, secret: String, path: &str| {
        volumes.push(Volume {
            name: volume.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: volume.to_string(),
            mount_path: path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    };

    secret_volume(
        "serving-cert",
        certificates::serving_secret_name(&name),
        SERVING_CERT_MOUNT_PATH,
    );
    if input.facts.is_extended_platform && console.spec.internal_ssl() {
        secret_volume(
            "proxying-cert",
            certificates::client_secret_name(&name),
            PROXYING_CERT_MOUNT_PATH,
        );
    }

    let mut config_map_volume = |volume: &str, config_map: String, path: &str| {
        volumes.push(Volume {
            name: volume.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(config_map),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: volume.to_string(),
            mount_path: path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    };

    config_map_volume("config", name.clone(), CONFIG_MOUNT_PATH);
    if let Some(rbac) = &console.spec.rbac.config_map {
        config_map_volume("rbac", rbac.clone(), RBAC_MOUNT_PATH);
    }

    (volumes, mounts)
}

// ============================================================================
// Route / Ingress
// ============================================================================

pub fn build_route(input: &SynthesisInput<'_>) -> Route {
    let console = input.console;
    let ssl = console.spec.internal_ssl();

    let mut tls = TlsConfig {
        termination: if ssl { "reencrypt" } else { "edge" }.to_string(),
        insecure_edge_termination_policy: Some("Redirect".to_string()),
        ..Default::default()
    };
    if ssl {
        tls.destination_ca_certificate = input.observed.serving_cert_pem.clone();
    }
    if let Some(material) = &input.observed.route_tls {
        tls.certificate = Some(material.certificate.clone());
        tls.key = Some(material.key.clone());
        tls.ca_certificate = material.ca_certificate.clone();
    }

    let mut route = Route::new(
        &console.name_any(),
        RouteSpec {
            host: console.spec.route_hostname.clone(),
            path: None,
            to: RouteTargetReference {
                kind: "Service".to_string(),
                name: console.name_any(),
                weight: Some(100),
            },
            port: Some(RoutePort {
                target_port: IntOrString::String(port_name(console).to_string()),
            }),
            tls: Some(tls),
            wildcard_policy: None,
        },
    );
    route.metadata = owned_metadata(
        console,
        console.name_any(),
        standard_labels(console),
        BTreeMap::new(),
    );
    route
}

pub fn build_ingress(input: &SynthesisInput<'_>) -> Ingress {
    let console = input.console;
    let name = console.name_any();
    let ssl = console.spec.internal_ssl();

    let mut annotations = BTreeMap::new();
    annotations.insert(
        "nginx.ingress.kubernetes.io/rewrite-target".to_string(),
        "/$2".to_string(),
    );
    annotations.insert(
        "nginx.ingress.kubernetes.io/use-regex".to_string(),
        "true".to_string(),
    );
    if ssl {
        annotations.insert(
            "nginx.ingress.kubernetes.io/backend-protocol".to_string(),
            "HTTPS".to_string(),
        );
    }

    let tls = console
        .spec
        .route
        .as_ref()
        .and_then(|r| r.cert_secret.as_ref())
        .map(|secret| {
            vec![IngressTLS {
                hosts: console.spec.route_hostname.clone().map(|h| vec![h]),
                secret_name: Some(secret.name.clone()),
            }]
        });

    Ingress {
        metadata: owned_metadata(console, name.clone(), standard_labels(console), annotations),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: console.spec.route_hostname.clone(),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(format!("/{name}(/|$)(.*)")),
                        path_type: "ImplementationSpecific".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: name.clone(),
                                port: Some(ServiceBackendPort {
                                    name: Some(port_name(console).to_string()),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            tls,
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// ConsoleLink
// ============================================================================

/// Platform menu entry; only once the console URL is known
pub fn build_console_link(input: &SynthesisInput<'_>) -> Result<Option<ConsoleLink>> {
    if !input.facts.supports_platform_links {
        return Ok(None);
    }
    let Some(url) = input.observed.console_url.as_ref() else {
        return Ok(None);
    };
    let console = input.console;
    let document = render_document(console)
        .map_err(|e| Error::synthesis(ResourceKind::ConsoleLink, e.to_string()))?;
    let text = string_at(&document, "/online/consoleLink/text")
        .unwrap_or("Web Console")
        .to_string();

    let spec = match mode(console) {
        DeploymentMode::Cluster => {
            let section = string_at(&document, "/online/consoleLink/section")
                .unwrap_or("Web Console")
                .to_string();
            let image_url = string_at(&document, "/online/consoleLink/imageRelativePath")
                .map(|path| format!("{}{}", url.trim_end_matches('/'), path));
            ConsoleLinkSpec {
                href: url.clone(),
                text,
                location: "ApplicationMenu".to_string(),
                application_menu: Some(ApplicationMenuSpec { section, image_url }),
                namespace_dashboard: None,
            }
        }
        DeploymentMode::Namespace => ConsoleLinkSpec {
            href: url.clone(),
            text,
            location: "NamespaceDashboard".to_string(),
            application_menu: None,
            namespace_dashboard: Some(NamespaceDashboardSpec {
                namespaces: vec![console.namespace().unwrap_or_default()],
            }),
        },
    };

    let mut link = ConsoleLink::new(&cluster_scoped_name(console), spec);
    link.metadata = cluster_metadata(console, standard_labels(console));
    Ok(Some(link))
}
