//! Drift detection between live and desired objects
//!
//! Each kind has a function that compares only the fields the synthesizer
//! owns. It returns the live object with those fields replaced when they
//! differ, or `None` when no write is needed. Server-assigned fields
//! (cluster IPs, generated hosts, resource versions) and foreign
//! labels/annotations are carried through untouched.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::certificates::EXPIRATION_PERIOD_FLAG;
use super::managed::{ManagedResource, ResourceKind};
use super::resources::{
    CONFIG_VERSION_ANNOTATION, HOST_GENERATED_ANNOTATION, TEMPLATE_VERSION_ANNOTATION,
};
use crate::error::{Error, Result};

type DriftFn = fn(&ManagedResource, &ManagedResource) -> Result<Option<ManagedResource>>;

/// Kind → drift function
fn drift_fn(kind: ResourceKind) -> DriftFn {
    match kind {
        ResourceKind::Secret => secret_drift,
        ResourceKind::ServiceAccount => service_account_drift,
        ResourceKind::ConfigMap => config_map_drift,
        ResourceKind::Service => service_drift,
        ResourceKind::Deployment => deployment_drift,
        ResourceKind::CronJob => cron_job_drift,
        ResourceKind::Route => route_drift,
        ResourceKind::Ingress => ingress_drift,
        ResourceKind::ConsoleLink => console_link_drift,
        ResourceKind::OAuthClient => oauth_client_drift,
    }
}

/// Updated live object, or `None` when it already matches
pub fn reconcile_fields(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    if existing.kind() != desired.kind() {
        return Err(mismatch(desired.kind()));
    }
    drift_fn(desired.kind())(existing, desired)
}

fn mismatch(kind: ResourceKind) -> Error {
    Error::synthesis(kind, "live and desired objects are of different kinds")
}

fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Ensure every desired key is present with the desired value
fn merge_owned_map(
    live: &mut Option<BTreeMap<String, String>>,
    desired: &Option<BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return false;
    };
    let mut changed = false;
    let live = live.get_or_insert_with(BTreeMap::new);
    for (key, value) in desired {
        if live.get(key) != Some(value) {
            live.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

/// Owned labels, annotations and the controller owner reference
fn merge_owned_metadata(live: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let mut changed = merge_owned_map(&mut live.labels, &desired.labels);
    changed |= merge_owned_map(&mut live.annotations, &desired.annotations);

    if let Some(desired_refs) = &desired.owner_references {
        let refs = live.owner_references.get_or_insert_with(Vec::new);
        for owner in desired_refs {
            if !refs.iter().any(|r| r.uid == owner.uid) {
                refs.push(owner.clone());
                changed = true;
            }
        }
    }
    changed
}

fn secret_drift(existing: &ManagedResource, _desired: &ManagedResource) -> Result<Option<ManagedResource>> {
    // Certificate secrets are replaced only by deletion.
    match existing {
        ManagedResource::Secret(_) => Ok(None),
        other => Err(mismatch(other.kind())),
    }
}

fn service_account_drift(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    let (ManagedResource::ServiceAccount(live), ManagedResource::ServiceAccount(want)) =
        (existing, desired)
    else {
        return Err(mismatch(ResourceKind::ServiceAccount));
    };
    let mut updated = live.clone();
    let changed = merge_owned_metadata(&mut updated.metadata, &want.metadata);
    Ok(changed.then(|| ManagedResource::ServiceAccount(updated)))
}

fn config_map_drift(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    let (ManagedResource::ConfigMap(live), ManagedResource::ConfigMap(want)) = (existing, desired)
    else {
        return Err(mismatch(ResourceKind::ConfigMap));
    };
    let mut updated = live.clone();
    let mut changed = false;

    if annotation(&live.metadata, CONFIG_VERSION_ANNOTATION)
        != annotation(&want.metadata, CONFIG_VERSION_ANNOTATION)
    {
        updated.data = want.data.clone();
        changed = true;
    }
    changed |= merge_owned_metadata(&mut updated.metadata, &want.metadata);
    Ok(changed.then(|| ManagedResource::ConfigMap(updated)))
}

fn service_drift(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    let (ManagedResource::Service(live), ManagedResource::Service(want)) = (existing, desired)
    else {
        return Err(mismatch(ResourceKind::Service));
    };
    let mut updated = live.clone();
    let mut changed = merge_owned_metadata(&mut updated.metadata, &want.metadata);

    if let Some(want_spec) = &want.spec {
        let spec = updated.spec.get_or_insert_with(Default::default);
        if spec.ports != want_spec.ports {
            spec.ports = want_spec.ports.clone();
            changed = true;
        }
        if spec.selector != want_spec.selector {
            spec.selector = want_spec.selector.clone();
            changed = true;
        }
    }
    Ok(changed.then(|| ManagedResource::Service(updated)))
}

fn deployment_drift(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    let (ManagedResource::Deployment(live), ManagedResource::Deployment(want)) =
        (existing, desired)
    else {
        return Err(mismatch(ResourceKind::Deployment));
    };
    let mut updated = live.clone();
    let template_changed = annotation(&live.metadata, TEMPLATE_VERSION_ANNOTATION)
        != annotation(&want.metadata, TEMPLATE_VERSION_ANNOTATION);
    let mut changed = merge_owned_metadata(&mut updated.metadata, &want.metadata);

    if let Some(want_spec) = &want.spec {
        let spec = updated.spec.get_or_insert_with(Default::default);
        // The pod template is only replaced when its hash moved; this is the
        // sole path to a rollout.
        if template_changed {
            spec.template = want_spec.template.clone();
            changed = true;
        }
        // Unset replicas leaves scaling to whoever owns it.
        if want_spec.replicas.is_some() && spec.replicas != want_spec.replicas {
            spec.replicas = want_spec.replicas;
            changed = true;
        }
    }
    Ok(changed.then(|| ManagedResource::Deployment(updated)))
}

fn cron_job_drift(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    let (ManagedResource::CronJob(live), ManagedResource::CronJob(want)) = (existing, desired)
    else {
        return Err(mismatch(ResourceKind::CronJob));
    };
    let mut updated = live.clone();
    let mut changed = merge_owned_metadata(&mut updated.metadata, &want.metadata);

    let Some(want_spec) = &want.spec else {
        return Ok(changed.then(|| ManagedResource::CronJob(updated)));
    };
    let spec = updated.spec.get_or_insert_with(Default::default);
    if spec.schedule != want_spec.schedule {
        spec.schedule = want_spec.schedule.clone();
        changed = true;
    }

    let Some(want_pod) = want_spec
        .job_template
        .spec
        .as_ref()
        .and_then(|j| j.template.spec.as_ref())
    else {
        return Ok(changed.then(|| ManagedResource::CronJob(updated)));
    };
    let live_pod = spec
        .job_template
        .spec
        .as_mut()
        .and_then(|j| j.template.spec.as_mut());

    if let Some(live_pod) = live_pod {
        if live_pod.service_account_name != want_pod.service_account_name {
            live_pod.service_account_name = want_pod.service_account_name.clone();
            changed = true;
        }
        for want_container in &want_pod.containers {
            match live_pod
                .containers
                .iter_mut()
                .find(|c| c.name == want_container.name)
            {
                Some(container) => {
                    if container.image != want_container.image {
                        container.image = want_container.image.clone();
                        changed = true;
                    }
                    if container.command != want_container.command {
                        container.command = want_container.command.clone();
                        changed = true;
                    }
                    changed |= patch_args(&mut container.args, &want_container.args);
                }
                None => {
                    live_pod.containers.push(want_container.clone());
                    changed = true;
                }
            }
        }
    } else {
        spec.job_template = want_spec.job_template.clone();
        changed = true;
    }
    Ok(changed.then(|| ManagedResource::CronJob(updated)))
}

/// Bring `live` args to `want`, rewriting only the expiration value when
/// that is the sole difference.
fn patch_args(live: &mut Option<Vec<String>>, want: &Option<Vec<String>>) -> bool {
    if live == want {
        return false;
    }
    if let (Some(live_args), Some(want_args)) = (live.as_mut(), want.as_ref()) {
        let position = live_args.iter().position(|a| a == EXPIRATION_PERIOD_FLAG);
        let want_position = want_args.iter().position(|a| a == EXPIRATION_PERIOD_FLAG);
        if let (Some(i), Some(j)) = (position, want_position) {
            if i == j && i + 1 < live_args.len() && j + 1 < want_args.len() {
                live_args[i + 1] = want_args[j + 1].clone();
                if live_args == want_args {
                    return true;
                }
            }
        }
    }
    *live = want.clone();
    true
}

fn route_drift(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    let (ManagedResource::Route(live), ManagedResource::Route(want)) = (existing, desired) else {
        return Err(mismatch(ResourceKind::Route));
    };
    let mut updated = live.clone();
    let mut changed = merge_owned_metadata(&mut updated.metadata, &want.metadata);
    let spec = &mut updated.spec;

    match &want.spec.host {
        Some(host) if spec.host.as_ref() != Some(host) => {
            spec.host = Some(host.clone());
            changed = true;
        }
        None => {
            // A host left over from a removed override is cleared so the
            // router generates one; a generated host is kept.
            let generated = annotation(&live.metadata, HOST_GENERATED_ANNOTATION) == Some("true");
            if spec.host.is_some() && !generated {
                spec.host = None;
                changed = true;
            }
        }
        _ => {}
    }
    if spec.path != want.spec.path {
        spec.path = want.spec.path.clone();
        changed = true;
    }
    if spec.to != want.spec.to {
        spec.to = want.spec.to.clone();
        changed = true;
    }
    if spec.port != want.spec.port {
        spec.port = want.spec.port.clone();
        changed = true;
    }
    if spec.tls != want.spec.tls {
        spec.tls = want.spec.tls.clone();
        changed = true;
    }
    Ok(changed.then(|| ManagedResource::Route(updated)))
}

fn ingress_drift(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    let (ManagedResource::Ingress(live), ManagedResource::Ingress(want)) = (existing, desired)
    else {
        return Err(mismatch(ResourceKind::Ingress));
    };
    let mut updated = live.clone();
    let mut changed = merge_owned_metadata(&mut updated.metadata, &want.metadata);

    if let Some(want_spec) = &want.spec {
        let spec = updated.spec.get_or_insert_with(Default::default);
        if spec.rules != want_spec.rules {
            spec.rules = want_spec.rules.clone();
            changed = true;
        }
        if spec.tls != want_spec.tls {
            spec.tls = want_spec.tls.clone();
            changed = true;
        }
    }
    Ok(changed.then(|| ManagedResource::Ingress(updated)))
}

fn console_link_drift(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    let (ManagedResource::ConsoleLink(live), ManagedResource::ConsoleLink(want)) =
        (existing, desired)
    else {
        return Err(mismatch(ResourceKind::ConsoleLink));
    };
    let mut updated = live.clone();
    let mut changed = merge_owned_metadata(&mut updated.metadata, &want.metadata);
    if updated.spec != want.spec {
        updated.spec = want.spec.clone();
        changed = true;
    }
    Ok(changed.then(|| ManagedResource::ConsoleLink(updated)))
}

fn oauth_client_drift(
    existing: &ManagedResource,
    desired: &ManagedResource,
) -> Result<Option<ManagedResource>> {
    let (ManagedResource::OAuthClient(live), ManagedResource::OAuthClient(want)) =
        (existing, desired)
    else {
        return Err(mismatch(ResourceKind::OAuthClient));
    };
    let mut updated = live.clone();
    let mut changed = merge_owned_metadata(&mut updated.metadata, &want.metadata);
    if updated.redirect_uris != want.redirect_uris {
        updated.redirect_uris = want.redirect_uris.clone();
        changed = true;
    }
    if updated.grant_method != want.grant_method {
        updated.grant_method = want.grant_method.clone();
        changed = true;
    }
    Ok(changed.then(|| ManagedResource::OAuthClient(updated)))
}
