//! Main reconciler for WebConsole resources
//!
//! Implements the controller pattern using kube-rs runtime. The convergence
//! pass itself ([`converge`]) only talks to the cluster through
//! [`ClusterClient`], so it runs unchanged against the in-memory fake used
//! by the tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::capabilities::CapabilityFacts;
use super::certificates::{self, secret_string, TLS_CERT_KEY, TLS_PRIVATE_KEY};
use super::client::ClusterClient;
use super::defaults::resolve_defaults;
use super::drift::reconcile_fields;
use super::managed::{ManagedResource, ResourceKind};
use super::resources::{desired_resources, ObservedState, RouteTlsMaterial, SynthesisInput};
use super::status::{deployed_status, resolve_console_url, route_host, write_status_if_changed};
use crate::crd::{ConsolePhase, Route, WebConsole, WebConsoleStatus};
use crate::error::{Error, Result};
use crate::settings::OperatorSettings;

const REQUEUE_AFTER_DEFAULTS: Duration = Duration::from_secs(1);
const REQUEUE_URL_PENDING: Duration = Duration::from_secs(5);
const REQUEUE_DEPLOYED: Duration = Duration::from_secs(60);

/// Shared state for the controller
pub struct ControllerState {
    pub client: Arc<dyn ClusterClient>,
    /// Detected once at startup; never refreshed
    pub facts: CapabilityFacts,
    pub settings: OperatorSettings,
}

/// How a convergence pass ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The record no longer exists
    Absent,
    /// Defaults were persisted; the next pass does the work
    Initialized,
    /// Every managed resource matches the record
    Deployed {
        /// Objects created or updated in this pass
        writes: usize,
        url_pending: bool,
    },
}

impl Outcome {
    pub fn action(&self) -> Action {
        match self {
            Outcome::Absent => Action::await_change(),
            Outcome::Initialized => Action::requeue(REQUEUE_AFTER_DEFAULTS),
            Outcome::Deployed {
                url_pending: true, ..
            } => Action::requeue(REQUEUE_URL_PENDING),
            Outcome::Deployed { .. } => Action::requeue(REQUEUE_DEPLOYED),
        }
    }
}

/// What a single create-or-update decision did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Main entry point to start the controller
pub async fn run_controller(client: Client, state: Arc<ControllerState>) -> Result<()> {
    let consoles: Api<WebConsole> = Api::all(client.clone());

    info!("Starting WebConsole controller");

    // Verify CRD exists
    match consoles.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("WebConsole CRD is available"),
        Err(e) => {
            error!(
                "WebConsole CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "WebConsole CRD not installed".to_string(),
            ));
        }
    }

    let mut controller = Controller::new(consoles, Config::default())
        // Watch owned resources for changes
        .owns::<Deployment>(Api::all(client.clone()), Config::default())
        .owns::<Service>(Api::all(client.clone()), Config::default())
        .owns::<ConfigMap>(Api::all(client.clone()), Config::default())
        .owns::<ServiceAccount>(Api::all(client.clone()), Config::default());
    // Route status carries the admitted host the console URL is built from.
    controller = if state.facts.supports_routes {
        controller.owns::<Route>(Api::all(client.clone()), Config::default())
    } else {
        controller.owns::<Ingress>(Api::all(client.clone()), Config::default())
    };

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    info!("WebConsole controller stopped");
    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A WebConsole is created, updated, or deleted
/// - An owned resource changes
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<WebConsole>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_default();
    let outcome = converge(&ctx, &namespace, &obj.name_any(), Utc::now()).await?;
    Ok(outcome.action())
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(console: Arc<WebConsole>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(
        "Reconciliation error for {}: {:?}",
        console.name_any(),
        error
    );

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}

/// One full convergence pass for the record `namespace/name`
pub async fn converge(
    state: &ControllerState,
    namespace: &str,
    name: &str,
    now: DateTime<Utc>,
) -> Result<Outcome> {
    let client = state.client.as_ref();

    let Some(mut console) = client.get_console(namespace, name).await? else {
        debug!("WebConsole {}/{} is gone", namespace, name);
        return Ok(Outcome::Absent);
    };

    if resolve_defaults(&mut console.spec, &state.facts, now) {
        info!("Persisting defaults for WebConsole {}/{}", namespace, name);
        let stored = client.update_console(&console).await?;
        let phase = stored.status.as_ref().and_then(|s| s.phase);
        if phase.is_none() {
            let status = WebConsoleStatus {
                phase: Some(ConsolePhase::Initialized),
                ..stored.status.clone().unwrap_or_default()
            };
            client.patch_console_status(namespace, name, &status).await?;
        }
        return Ok(Outcome::Initialized);
    }

    if let Err(errors) = console.spec.validate() {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!("WebConsole {}/{} is invalid: {}", namespace, name, message);
        mark_failed(client, &console).await?;
        return Err(Error::ValidationError(message));
    }

    match converge_resources(state, &console, now).await {
        Err(e @ (Error::Certificate { .. } | Error::Synthesis { .. })) => {
            mark_failed(client, &console).await?;
            Err(e)
        }
        other => other,
    }
}

async fn converge_resources(
    state: &ControllerState,
    console: &WebConsole,
    now: DateTime<Utc>,
) -> Result<Outcome> {
    let client = state.client.as_ref();
    let facts = &state.facts;
    let namespace = console.namespace().unwrap_or_default();
    let name = console.name_any();

    let serving_cert_pem = certificates::ensure_serving_certificate(client, console, now).await?;
    if facts.is_extended_platform && console.spec.internal_ssl() {
        certificates::ensure_client_certificate(client, console, &state.settings, now).await?;
    }

    let observed = observe(client, facts, console, serving_cert_pem).await?;
    let input = SynthesisInput {
        console,
        facts,
        settings: &state.settings,
        observed: &observed,
    };

    let mut writes = 0;
    for desired in desired_resources(&input)? {
        if apply_resource(client, desired).await? != ApplyOutcome::Unchanged {
            writes += 1;
        }
    }

    let deployment = match client.get(ResourceKind::Deployment, &namespace, &name).await? {
        Some(ManagedResource::Deployment(deployment)) => Some(deployment),
        _ => None,
    };
    let url = resolve_console_url(client, facts, console).await?;
    let url_pending = url.is_none();
    let status = deployed_status(console, deployment.as_ref(), url);
    if write_status_if_changed(client, console, status).await? {
        info!("Updated status of WebConsole {}/{}", namespace, name);
    }

    Ok(Outcome::Deployed {
        writes,
        url_pending,
    })
}

/// Create `desired` when absent, otherwise update only the owned fields
/// that drifted
pub async fn apply_resource(
    client: &dyn ClusterClient,
    desired: ManagedResource,
) -> Result<ApplyOutcome> {
    let kind = desired.kind();
    let namespace = desired.namespace();
    let name = desired.name();

    let Some(existing) = client.get(kind, &namespace, &name).await? else {
        return match client.create(&desired).await {
            Ok(()) => {
                info!("Created {} {}/{}", kind, namespace, name);
                Ok(ApplyOutcome::Created)
            }
            Err(e) if e.is_already_exists() => {
                debug!("{} {}/{} created concurrently", kind, namespace, name);
                Ok(ApplyOutcome::Unchanged)
            }
            Err(e) => Err(e),
        };
    };

    match reconcile_fields(&existing, &desired)? {
        Some(updated) => {
            client.update(&updated).await?;
            info!("Updated {} {}/{}", kind, namespace, name);
            Ok(ApplyOutcome::Updated)
        }
        None => Ok(ApplyOutcome::Unchanged),
    }
}

/// Read the cluster state synthesis depends on
async fn observe(
    client: &dyn ClusterClient,
    facts: &CapabilityFacts,
    console: &WebConsole,
    serving_cert_pem: String,
) -> Result<ObservedState> {
    let namespace = console.namespace().unwrap_or_default();
    let mut observed = ObservedState {
        serving_cert_pem: Some(serving_cert_pem),
        ..Default::default()
    };

    if facts.supports_routes {
        let own = observed_route_host(client, &namespace, &console.name_any())
            .await?
            .or_else(|| console.spec.route_hostname.clone());
        observed.redirect_hosts.extend(own);
        for external in &console.spec.external_routes {
            match observed_route_host(client, &namespace, external).await? {
                Some(host) => {
                    observed.redirect_hosts.insert(host);
                }
                None => debug!("External route {} has no host yet", external),
            }
        }
        observed.route_tls = route_tls_material(client, console).await?;
    }

    observed.console_url = resolve_console_url(client, facts, console).await?;
    Ok(observed)
}

async fn observed_route_host(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<Option<String>> {
    Ok(match client.get(ResourceKind::Route, namespace, name).await? {
        Some(ManagedResource::Route(route)) => route_host(&route),
        _ => None,
    })
}

async fn read_secret(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<Option<Secret>> {
    Ok(match client.get(ResourceKind::Secret, namespace, name).await? {
        Some(ManagedResource::Secret(secret)) => Some(secret),
        _ => None,
    })
}

/// Custom route certificate referenced by the record, if readable
async fn route_tls_material(
    client: &dyn ClusterClient,
    console: &WebConsole,
) -> Result<Option<RouteTlsMaterial>> {
    let Some(route) = &console.spec.route else {
        return Ok(None);
    };
    let Some(cert_ref) = &route.cert_secret else {
        return Ok(None);
    };
    let namespace = console.namespace().unwrap_or_default();

    let Some(secret) = read_secret(client, &namespace, &cert_ref.name).await? else {
        warn!(
            "Route certificate secret {}/{} not found; using the router default",
            namespace, cert_ref.name
        );
        return Ok(None);
    };
    let missing = |key: &str| {
        Error::certificate(
            ResourceKind::Route,
            format!("secret {} has no {key}", cert_ref.name),
        )
    };
    let certificate = secret_string(&secret, TLS_CERT_KEY).ok_or_else(|| missing(TLS_CERT_KEY))?;
    let key = secret_string(&secret, TLS_PRIVATE_KEY).ok_or_else(|| missing(TLS_PRIVATE_KEY))?;

    let ca_certificate = match &route.ca_cert {
        Some(ca_ref) => read_secret(client, &namespace, &ca_ref.name)
            .await?
            .and_then(|s| secret_string(&s, &ca_ref.key)),
        None => None,
    };

    Ok(Some(RouteTlsMaterial {
        certificate,
        key,
        ca_certificate,
    }))
}

/// Record phase `Failed`, keeping whatever else the status says
async fn mark_failed(client: &dyn ClusterClient, console: &WebConsole) -> Result<()> {
    let status = WebConsoleStatus {
        phase: Some(ConsolePhase::Failed),
        ..console.status.clone().unwrap_or_default()
    };
    write_status_if_changed(client, console, status).await?;
    Ok(())
}
