//! Observed status and console URL resolution

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;

use super::capabilities::CapabilityFacts;
use super::client::ClusterClient;
use super::managed::{ManagedResource, ResourceKind};
use super::resources::{label_selector_string, CONTAINER_NAME};
use crate::crd::{ConsolePhase, Route, WebConsole, WebConsoleStatus};
use crate::error::Result;

/// Host a route is reachable at.
///
/// Among router ingress entries admitted with `Admitted=True`, the one
/// admitted earliest wins. Falls back to the declared host.
pub fn route_host(route: &Route) -> Option<String> {
    let admitted = route
        .status
        .as_ref()
        .map(|s| s.ingress.as_slice())
        .unwrap_or_default()
        .iter()
        .filter_map(|ingress| {
            let host = ingress.host.as_ref()?;
            let condition = ingress
                .conditions
                .iter()
                .find(|c| c.type_ == "Admitted" && c.status == "True")?;
            Some((condition.last_transition_time, host))
        })
        // Entries without a timestamp lose to any timestamped admission.
        .min_by_key(|(at, _)| (at.is_none(), *at))
        .map(|(_, host)| host.clone());

    admitted.or_else(|| route.spec.host.clone().filter(|h| !h.is_empty()))
}

/// Host an ingress is reachable at: rule host, then load balancer address
pub fn ingress_host(ingress: &Ingress) -> Option<String> {
    let rule_host = ingress
        .spec
        .as_ref()
        .and_then(|s| s.rules.as_ref())
        .and_then(|rules| rules.iter().find_map(|r| r.host.clone()));

    rule_host.or_else(|| {
        ingress
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|entries| {
                entries
                    .iter()
                    .find_map(|e| e.hostname.clone().or_else(|| e.ip.clone()))
            })
    })
}

/// External URL of the console, if any host is known yet
pub async fn resolve_console_url(
    client: &dyn ClusterClient,
    facts: &CapabilityFacts,
    console: &WebConsole,
) -> Result<Option<String>> {
    let namespace = console.namespace().unwrap_or_default();
    let name = console.name_any();
    let declared = console.spec.route_hostname.clone();

    if facts.supports_routes {
        let host = match client.get(ResourceKind::Route, &namespace, &name).await? {
            Some(ManagedResource::Route(route)) => route_host(&route),
            _ => None,
        };
        return Ok(host.or(declared).map(|h| format!("https://{h}")));
    }

    let ingress = match client.get(ResourceKind::Ingress, &namespace, &name).await? {
        Some(ManagedResource::Ingress(ingress)) => Some(ingress),
        _ => None,
    };
    let secure = ingress
        .as_ref()
        .and_then(|i| i.spec.as_ref())
        .and_then(|s| s.tls.as_ref())
        .is_some_and(|tls| !tls.is_empty());
    let host = ingress.as_ref().and_then(ingress_host).or(declared);
    let scheme = if secure { "https" } else { "http" };
    Ok(host.map(|h| format!("{scheme}://{h}/{name}")))
}

/// Status after a successful pass
pub fn deployed_status(
    console: &WebConsole,
    deployment: Option<&Deployment>,
    url: Option<String>,
) -> WebConsoleStatus {
    let image = deployment
        .and_then(|d| d.spec.as_ref())
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.iter().find(|c| c.name == CONTAINER_NAME))
        .and_then(|c| c.image.clone());
    let replicas = deployment
        .and_then(|d| d.status.as_ref())
        .and_then(|s| s.replicas);

    WebConsoleStatus {
        phase: Some(ConsolePhase::Deployed),
        image,
        url,
        replicas,
        selector: Some(label_selector_string(console)),
    }
}

/// Write `status` only when it differs from what the record carries
pub async fn write_status_if_changed(
    client: &dyn ClusterClient,
    console: &WebConsole,
    status: WebConsoleStatus,
) -> Result<bool> {
    if console.status.as_ref() == Some(&status) {
        return Ok(false);
    }
    client
        .patch_console_status(
            &console.namespace().unwrap_or_default(),
            &console.name_any(),
            &status,
        )
        .await?;
    Ok(true)
}
