//! In-memory cluster for convergence tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::error::ErrorResponse;
use kube::ResourceExt;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use serde_json::Value;

use super::certificates::{tls_secret, CertificateMaterial};
use super::client::ClusterClient;
use super::managed::{ManagedResource, ResourceKind};
use crate::crd::{WebConsole, WebConsoleSpec, WebConsoleStatus};
use crate::error::{Error, Result};

type Key = (ResourceKind, String, String);

pub fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (fake)"),
        reason: reason.to_string(),
        code,
    }))
}

/// Self-signed CA standing in for the platform service CA
pub fn platform_ca() -> CertificateMaterial {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, "service-serving-signer");
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    CertificateMaterial {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    }
}

/// Stores objects exactly as written and counts every write
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<Key, ManagedResource>>,
    consoles: Mutex<BTreeMap<(String, String), WebConsole>>,
    next_version: AtomicUsize,
    /// When set, `get` misses every managed object, as a lagging cache would
    pub stale_reads: AtomicBool,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub console_updates: AtomicUsize,
    pub status_patches: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn stamp(&self, resource: &mut ManagedResource) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        let meta = resource.metadata_mut();
        meta.resource_version = Some(version.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{version}"));
        }
    }

    /// Store an object without counting it as a write
    pub fn seed(&self, mut resource: ManagedResource) {
        self.stamp(&mut resource);
        let key = (resource.kind(), resource.namespace(), resource.name());
        self.objects.lock().unwrap().insert(key, resource);
    }

    pub fn seed_console(&self, namespace: &str, name: &str, spec: WebConsoleSpec) {
        let mut console = WebConsole::new(name, spec);
        console.metadata.namespace = Some(namespace.to_string());
        console.metadata.uid = Some(format!("console-{name}"));
        console.metadata.resource_version = Some("1".to_string());
        self.consoles
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), console);
    }

    /// Seed a `tls.crt`/`tls.key` secret, as the platform service CA does
    pub fn seed_tls_secret(&self, namespace: &str, name: &str, material: &CertificateMaterial) {
        let mut owner = WebConsole::new("ca", WebConsoleSpec::default());
        owner.metadata.namespace = Some(namespace.to_string());
        let mut secret: Secret = tls_secret(&owner, name.to_string(), "ca", material, None);
        secret.metadata.owner_references = None;
        self.seed(ManagedResource::Secret(secret));
    }

    pub fn console(&self, namespace: &str, name: &str) -> Option<WebConsole> {
        self.consoles
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Edit a stored record's spec as a user would
    pub fn edit_console(&self, namespace: &str, name: &str, edit: impl FnOnce(&mut WebConsoleSpec)) {
        let mut consoles = self.consoles.lock().unwrap();
        if let Some(console) = consoles.get_mut(&(namespace.to_string(), name.to_string())) {
            edit(&mut console.spec);
        }
    }

    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<ManagedResource> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Mutate a stored object in place, as another controller would
    pub fn edit_object(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut ManagedResource),
    ) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(object) = objects.get_mut(&(kind, namespace.to_string(), name.to_string())) {
            edit(object);
        }
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.objects.lock().unwrap().keys().map(|(k, _, _)| *k).collect()
    }

    /// Total writes of managed objects (not the record)
    pub fn writes(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
            + self.updates.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        for counter in [
            &self.creates,
            &self.updates,
            &self.deletes,
            &self.console_updates,
            &self.status_patches,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

/// RFC 7386 merge: `null` removes a key, objects merge recursively
fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                apply_merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn matches_selector(resource: &ManagedResource, selector: &str) -> bool {
    let labels = resource.metadata().labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>> {
        if self.stale_reads.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.object(kind, namespace, name))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ManagedResource>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, ns, _), r)| {
                *k == kind && ns == namespace && matches_selector(r, label_selector)
            })
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn create(&self, resource: &ManagedResource) -> Result<()> {
        let key = (resource.kind(), resource.namespace(), resource.name());
        if self.objects.lock().unwrap().contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut stored = resource.clone();
        self.stamp(&mut stored);
        self.objects.lock().unwrap().insert(key, stored);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, resource: &ManagedResource) -> Result<()> {
        let key = (resource.kind(), resource.namespace(), resource.name());
        let current_version = match self.objects.lock().unwrap().get(&key) {
            Some(existing) => existing.metadata().resource_version.clone(),
            None => return Err(api_error(404, "NotFound")),
        };
        if resource.metadata().resource_version != current_version {
            return Err(api_error(409, "Conflict"));
        }
        let mut stored = resource.clone();
        self.stamp(&mut stored);
        self.objects.lock().unwrap().insert(key, stored);
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        let removed = self
            .objects
            .lock()
            .unwrap()
            .remove(&(kind, namespace.to_string(), name.to_string()));
        if removed.is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn get_console(&self, namespace: &str, name: &str) -> Result<Option<WebConsole>> {
        Ok(self.console(namespace, name))
    }

    async fn update_console(&self, console: &WebConsole) -> Result<WebConsole> {
        let key = (
            console.namespace().unwrap_or_default(),
            console.name_any(),
        );
        let mut consoles = self.consoles.lock().unwrap();
        let Some(stored) = consoles.get_mut(&key) else {
            return Err(api_error(404, "NotFound"));
        };
        if stored.metadata.resource_version != console.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }
        // Replacing the main resource never touches the status subresource.
        stored.spec = console.spec.clone();
        let version = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        stored.metadata.resource_version = Some((version + 1).to_string());
        self.console_updates.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn patch_console_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WebConsoleStatus,
    ) -> Result<()> {
        let mut consoles = self.consoles.lock().unwrap();
        let Some(stored) = consoles.get_mut(&(namespace.to_string(), name.to_string())) else {
            return Err(api_error(404, "NotFound"));
        };
        let mut current = serde_json::to_value(stored.status.clone().unwrap_or_default())?;
        apply_merge_patch(&mut current, &status.merge_patch()["status"]);
        stored.status = Some(serde_json::from_value(current)?);
        self.status_patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
