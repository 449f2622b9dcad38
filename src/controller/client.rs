//! Cluster access used by the convergence engine
//!
//! [`ClusterClient`] is the seam between reconcile logic and the API server.
//! [`KubeClusterClient`] talks to a live cluster through untyped
//! [`DynamicObject`]s, using the [`KindRegistry`] for endpoints and typed
//! conversion. Every call is bounded by the configured timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::debug;

use super::managed::{KindRegistry, ManagedResource, ResourceKind};
use crate::crd::{WebConsole, WebConsoleStatus};
use crate::error::{Error, Result};

/// Field manager recorded on status patches
pub const FIELD_MANAGER: &str = "webconsole-operator";

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// `Ok(None)` when the object does not exist
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>>;

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ManagedResource>>;

    async fn create(&self, resource: &ManagedResource) -> Result<()>;

    /// Replace; the object must carry the resource version it was read at
    async fn update(&self, resource: &ManagedResource) -> Result<()>;

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()>;

    async fn get_console(&self, namespace: &str, name: &str) -> Result<Option<WebConsole>>;

    async fn update_console(&self, console: &WebConsole) -> Result<WebConsole>;

    async fn patch_console_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WebConsoleStatus,
    ) -> Result<()>;
}

pub struct KubeClusterClient {
    client: Client,
    registry: Arc<KindRegistry>,
    timeout: Duration,
}

impl KubeClusterClient {
    pub fn new(client: Client, registry: Arc<KindRegistry>, timeout: Duration) -> Self {
        Self {
            client,
            registry,
            timeout,
        }
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Result<Api<DynamicObject>> {
        let entry = self.registry.entry(kind)?;
        Ok(if entry.namespaced {
            Api::namespaced_with(self.client.clone(), namespace, &entry.resource)
        } else {
            Api::all_with(self.client.clone(), &entry.resource)
        })
    }

    fn consoles(&self, namespace: &str) -> Api<WebConsole> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn bounded<T, F>(&self, what: String, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(Error::KubeError),
            Err(_) => Err(Error::Timeout(what)),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedResource>> {
        let api = self.api(kind, namespace)?;
        let found = self
            .bounded(format!("get {kind} {namespace}/{name}"), api.get_opt(name))
            .await?;
        found.map(|obj| self.registry.decode(kind, obj)).transpose()
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ManagedResource>> {
        let api = self.api(kind, namespace)?;
        let params = ListParams::default().labels(label_selector);
        let list = self
            .bounded(format!("list {kind} in {namespace}"), api.list(&params))
            .await?;
        list.items
            .into_iter()
            .map(|obj| self.registry.decode(kind, obj))
            .collect()
    }

    async fn create(&self, resource: &ManagedResource) -> Result<()> {
        let kind = resource.kind();
        let namespace = resource.namespace();
        let api = self.api(kind, &namespace)?;
        let object = self.registry.encode(resource)?;
        debug!("Creating {} {}/{}", kind, namespace, resource.name());
        self.bounded(
            format!("create {kind} {namespace}/{}", resource.name()),
            api.create(&PostParams::default(), &object),
        )
        .await?;
        Ok(())
    }

    async fn update(&self, resource: &ManagedResource) -> Result<()> {
        let kind = resource.kind();
        let namespace = resource.namespace();
        let name = resource.name();
        let api = self.api(kind, &namespace)?;
        let object = self.registry.encode(resource)?;
        debug!("Replacing {} {}/{}", kind, namespace, name);
        self.bounded(
            format!("update {kind} {namespace}/{name}"),
            api.replace(&name, &PostParams::default(), &object),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        let api = self.api(kind, namespace)?;
        match self
            .bounded(
                format!("delete {kind} {namespace}/{name}"),
                api.delete(name, &DeleteParams::default()),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_console(&self, namespace: &str, name: &str) -> Result<Option<WebConsole>> {
        let api = self.consoles(namespace);
        self.bounded(format!("get WebConsole {namespace}/{name}"), api.get_opt(name))
            .await
    }

    async fn update_console(&self, console: &WebConsole) -> Result<WebConsole> {
        let namespace = console.metadata.namespace.clone().unwrap_or_default();
        let name = console.metadata.name.clone().unwrap_or_default();
        let api = self.consoles(&namespace);
        self.bounded(
            format!("update WebConsole {namespace}/{name}"),
            api.replace(&name, &PostParams::default(), console),
        )
        .await
    }

    async fn patch_console_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WebConsoleStatus,
    ) -> Result<()> {
        let api = self.consoles(namespace);
        let patch = status.merge_patch();
        self.bounded(
            format!("patch WebConsole status {namespace}/{name}"),
            api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch)),
        )
        .await?;
        Ok(())
    }
}
