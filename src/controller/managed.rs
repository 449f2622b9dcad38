//! Managed resource kinds and the registry that maps them to API endpoints
//!
//! Every object the operator writes is a [`ManagedResource`]. The
//! [`KindRegistry`] knows, for each [`ResourceKind`], which API group/version/
//! plural serves it and whether it is namespaced, and converts between the
//! typed variants and the untyped [`DynamicObject`] the client sends.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject, TypeMeta};
use serde_json::Value;

use crate::crd::{ConsoleLink, OAuthClient, Route};
use crate::error::{Error, Result};

/// Every kind the operator synthesizes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Secret,
    ServiceAccount,
    ConfigMap,
    Service,
    Deployment,
    CronJob,
    Route,
    Ingress,
    ConsoleLink,
    OAuthClient,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Secret,
        ResourceKind::ServiceAccount,
        ResourceKind::ConfigMap,
        ResourceKind::Service,
        ResourceKind::Deployment,
        ResourceKind::CronJob,
        ResourceKind::Route,
        ResourceKind::Ingress,
        ResourceKind::ConsoleLink,
        ResourceKind::OAuthClient,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Secret => "Secret",
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Service => "Service",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::CronJob => "CronJob",
            ResourceKind::Route => "Route",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::ConsoleLink => "ConsoleLink",
            ResourceKind::OAuthClient => "OAuthClient",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed object of one of the managed kinds
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedResource {
    Secret(Secret),
    ServiceAccount(ServiceAccount),
    ConfigMap(ConfigMap),
    Service(Service),
    Deployment(Deployment),
    CronJob(CronJob),
    Route(Route),
    Ingress(Ingress),
    ConsoleLink(ConsoleLink),
    OAuthClient(OAuthClient),
}

impl ManagedResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ManagedResource::Secret(_) => ResourceKind::Secret,
            ManagedResource::ServiceAccount(_) => ResourceKind::ServiceAccount,
            ManagedResource::ConfigMap(_) => ResourceKind::ConfigMap,
            ManagedResource::Service(_) => ResourceKind::Service,
            ManagedResource::Deployment(_) => ResourceKind::Deployment,
            ManagedResource::CronJob(_) => ResourceKind::CronJob,
            ManagedResource::Route(_) => ResourceKind::Route,
            ManagedResource::Ingress(_) => ResourceKind::Ingress,
            ManagedResource::ConsoleLink(_) => ResourceKind::ConsoleLink,
            ManagedResource::OAuthClient(_) => ResourceKind::OAuthClient,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ManagedResource::Secret(o) => &o.metadata,
            ManagedResource::ServiceAccount(o) => &o.metadata,
            ManagedResource::ConfigMap(o) => &o.metadata,
            ManagedResource::Service(o) => &o.metadata,
            ManagedResource::Deployment(o) => &o.metadata,
            ManagedResource::CronJob(o) => &o.metadata,
            ManagedResource::Route(o) => &o.metadata,
            ManagedResource::Ingress(o) => &o.metadata,
            ManagedResource::ConsoleLink(o) => &o.metadata,
            ManagedResource::OAuthClient(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedResource::Secret(o) => &mut o.metadata,
            ManagedResource::ServiceAccount(o) => &mut o.metadata,
            ManagedResource::ConfigMap(o) => &mut o.metadata,
            ManagedResource::Service(o) => &mut o.metadata,
            ManagedResource::Deployment(o) => &mut o.metadata,
            ManagedResource::CronJob(o) => &mut o.metadata,
            ManagedResource::Route(o) => &mut o.metadata,
            ManagedResource::Ingress(o) => &mut o.metadata,
            ManagedResource::ConsoleLink(o) => &mut o.metadata,
            ManagedResource::OAuthClient(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> String {
        self.metadata().name.clone().unwrap_or_default()
    }

    /// Empty for cluster-scoped kinds
    pub fn namespace(&self) -> String {
        self.metadata().namespace.clone().unwrap_or_default()
    }

    fn to_value(&self) -> Result<Value> {
        let value = match self {
            ManagedResource::Secret(o) => serde_json::to_value(o)?,
            ManagedResource::ServiceAccount(o) => serde_json::to_value(o)?,
            ManagedResource::ConfigMap(o) => serde_json::to_value(o)?,
            ManagedResource::Service(o) => serde_json::to_value(o)?,
            ManagedResource::Deployment(o) => serde_json::to_value(o)?,
            ManagedResource::CronJob(o) => serde_json::to_value(o)?,
            ManagedResource::Route(o) => serde_json::to_value(o)?,
            ManagedResource::Ingress(o) => serde_json::to_value(o)?,
            ManagedResource::ConsoleLink(o) => serde_json::to_value(o)?,
            ManagedResource::OAuthClient(o) => serde_json::to_value(o)?,
        };
        Ok(value)
    }
}

/// API endpoint of one kind
#[derive(Clone, Debug)]
pub struct KindEntry {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Explicit kind → endpoint table, built once at startup
#[derive(Clone, Debug)]
pub struct KindRegistry {
    entries: BTreeMap<ResourceKind, KindEntry>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KindRegistry {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        for kind in ResourceKind::ALL {
            let (resource, namespaced) = match kind {
                ResourceKind::Secret => (ApiResource::erase::<Secret>(&()), true),
                ResourceKind::ServiceAccount => (ApiResource::erase::<ServiceAccount>(&()), true),
                ResourceKind::ConfigMap => (ApiResource::erase::<ConfigMap>(&()), true),
                ResourceKind::Service => (ApiResource::erase::<Service>(&()), true),
                ResourceKind::Deployment => (ApiResource::erase::<Deployment>(&()), true),
                ResourceKind::CronJob => (ApiResource::erase::<CronJob>(&()), true),
                ResourceKind::Route => (ApiResource::erase::<Route>(&()), true),
                ResourceKind::Ingress => (ApiResource::erase::<Ingress>(&()), true),
                ResourceKind::ConsoleLink => (ApiResource::erase::<ConsoleLink>(&()), false),
                ResourceKind::OAuthClient => (
                    ApiResource {
                        group: "oauth.openshift.io".to_string(),
                        version: "v1".to_string(),
                        api_version: "oauth.openshift.io/v1".to_string(),
                        kind: "OAuthClient".to_string(),
                        plural: "oauthclients".to_string(),
                    },
                    false,
                ),
            };
            entries.insert(
                kind,
                KindEntry {
                    resource,
                    namespaced,
                },
            );
        }
        Self { entries }
    }

    pub fn entry(&self, kind: ResourceKind) -> Result<&KindEntry> {
        self.entries
            .get(&kind)
            .ok_or_else(|| Error::ConfigError(format!("kind {kind} is not registered")))
    }

    /// Typed → untyped, stamping apiVersion/kind from the table
    pub fn encode(&self, resource: &ManagedResource) -> Result<DynamicObject> {
        let kind = resource.kind();
        let entry = self.entry(kind)?;
        let mut value = resource.to_value()?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| Error::synthesis(kind, "object did not serialize to a JSON map"))?;
        map.remove("apiVersion");
        map.remove("kind");
        let metadata: ObjectMeta = match map.remove("metadata") {
            Some(meta) => serde_json::from_value(meta)?,
            None => ObjectMeta::default(),
        };
        Ok(DynamicObject {
            types: Some(TypeMeta {
                api_version: entry.resource.api_version.clone(),
                kind: entry.resource.kind.clone(),
            }),
            metadata,
            data: value,
        })
    }

    /// Untyped → typed
    pub fn decode(&self, kind: ResourceKind, object: DynamicObject) -> Result<ManagedResource> {
        let value = serde_json::to_value(&object)?;
        let resource = match kind {
            ResourceKind::Secret => ManagedResource::Secret(serde_json::from_value(value)?),
            ResourceKind::ServiceAccount => {
                ManagedResource::ServiceAccount(serde_json::from_value(value)?)
            }
            ResourceKind::ConfigMap => ManagedResource::ConfigMap(serde_json::from_value(value)?),
            ResourceKind::Service => ManagedResource::Service(serde_json::from_value(value)?),
            ResourceKind::Deployment => ManagedResource::Deployment(serde_json::from_value(value)?),
            ResourceKind::CronJob => ManagedResource::CronJob(serde_json::from_value(value)?),
            ResourceKind::Route => ManagedResource::Route(serde_json::from_value(value)?),
            ResourceKind::Ingress => ManagedResource::Ingress(serde_json::from_value(value)?),
            ResourceKind::ConsoleLink => {
                ManagedResource::ConsoleLink(serde_json::from_value(value)?)
            }
            ResourceKind::OAuthClient => {
                ManagedResource::OAuthClient(serde_json::from_value(value)?)
            }
        };
        Ok(resource)
    }
}
