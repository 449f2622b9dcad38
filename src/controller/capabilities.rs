//! Cluster capability detection
//!
//! Run once at startup. The resulting [`CapabilityFacts`] never change for
//! the lifetime of the process and gate which resource kinds are synthesized.

use std::collections::BTreeSet;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::discovery::Discovery;
use kube::Client;
use semver::{Version, VersionReq};
use tracing::{debug, info, instrument, warn};

use crate::crd::ClusterVersion;
use crate::error::{Error, Result};

/// Oldest extended-platform release that forces internal SSL on
const MINIMUM_EXTENDED_VERSION: &str = ">=4.3";

/// Name of the ClusterVersion singleton
const CLUSTER_VERSION_NAME: &str = "version";

/// An API (group, version, resource) served by the cluster
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceTriple {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl ResourceTriple {
    pub fn new(group: &str, version: &str, resource: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
        }
    }
}

/// Immutable snapshot of what the cluster offers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilityFacts {
    /// Extended platform release, or the base `major.minor`
    pub platform_version: String,
    /// Orchestrator `major.minor`
    pub base_version: String,
    pub is_extended_platform: bool,
    pub is_extended_platform_minimum_version: bool,
    pub supports_routes: bool,
    pub supports_image_streams: bool,
    pub supports_platform_links: bool,
    /// Web address of the platform's own console, when it could be read
    pub platform_console_url: Option<String>,
}

/// What the detector needs from the API server
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn api_resources(&self) -> Result<Vec<ResourceTriple>>;

    /// (major, minor) as reported by `/version`
    async fn server_version(&self) -> Result<(String, String)>;

    /// `None` when the singleton does not exist
    async fn cluster_version(&self) -> Result<Option<ClusterVersion>>;

    async fn platform_console_url(&self) -> Result<Option<String>>;
}

/// Discovery against a live cluster
pub struct KubeDiscoveryClient {
    client: Client,
}

impl KubeDiscoveryClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiscoveryClient for KubeDiscoveryClient {
    async fn api_resources(&self) -> Result<Vec<ResourceTriple>> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut triples = Vec::new();
        for group in discovery.groups() {
            for version in group.versions() {
                for (resource, _caps) in group.versioned_resources(version) {
                    triples.push(ResourceTriple::new(
                        &resource.group,
                        &resource.version,
                        &resource.plural,
                    ));
                }
            }
        }
        Ok(triples)
    }

    async fn server_version(&self) -> Result<(String, String)> {
        let info = self.client.apiserver_version().await?;
        Ok((info.major, info.minor))
    }

    async fn cluster_version(&self) -> Result<Option<ClusterVersion>> {
        let api: Api<ClusterVersion> = Api::all(self.client.clone());
        Ok(api.get_opt(CLUSTER_VERSION_NAME).await?)
    }

    async fn platform_console_url(&self) -> Result<Option<String>> {
        let resource = ApiResource {
            group: "config.openshift.io".to_string(),
            version: "v1".to_string(),
            api_version: "config.openshift.io/v1".to_string(),
            kind: "Console".to_string(),
            plural: "consoles".to_string(),
        };
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let console = api.get_opt("cluster").await?;
        Ok(console.and_then(|c| {
            c.data
                .pointer("/status/consoleURL")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        }))
    }
}

/// Probe the cluster and build the facts
///
/// Errors here are fatal for startup: the operator cannot decide which kinds
/// to manage without them.
#[instrument(skip(discovery))]
pub async fn detect_capabilities(discovery: &dyn DiscoveryClient) -> Result<CapabilityFacts> {
    let index: BTreeSet<ResourceTriple> = discovery.api_resources().await?.into_iter().collect();
    debug!("Discovered {} API resources", index.len());

    let supports_routes = index.contains(&ResourceTriple::new("route.openshift.io", "v1", "routes"));
    let supports_image_streams =
        index.contains(&ResourceTriple::new("image.openshift.io", "v1", "imagestreams"));
    let supports_platform_links =
        index.contains(&ResourceTriple::new("console.openshift.io", "v1", "consolelinks"));

    let (major, minor) = discovery.server_version().await?;
    let base_version = base_version(&major, &minor);

    let cluster_version = if supports_platform_links {
        discovery.cluster_version().await?
    } else {
        None
    };

    let mut facts = CapabilityFacts {
        platform_version: base_version.clone(),
        base_version,
        is_extended_platform: cluster_version.is_some(),
        is_extended_platform_minimum_version: false,
        supports_routes,
        supports_image_streams,
        supports_platform_links,
        platform_console_url: None,
    };

    if let Some(cluster_version) = cluster_version {
        let completed = cluster_version
            .status
            .as_ref()
            .and_then(|s| s.history.iter().find(|h| h.state == "Completed"));

        if let Some(entry) = completed {
            facts.platform_version = entry.version.clone();
            facts.is_extended_platform_minimum_version = meets_minimum_version(&entry.version)?;
        } else {
            warn!("ClusterVersion has no completed update; using base version");
        }

        facts.platform_console_url = match discovery.platform_console_url().await {
            Ok(url) => url,
            Err(e) => {
                warn!("Could not read platform console URL: {}", e);
                None
            }
        };
    }

    info!(
        platform_version = %facts.platform_version,
        extended = facts.is_extended_platform,
        routes = facts.supports_routes,
        links = facts.supports_platform_links,
        "Detected cluster capabilities"
    );
    Ok(facts)
}

/// `major.minor` with anything but digits dropped, e.g. `1` + `26+` → `1.26`
fn base_version(major: &str, minor: &str) -> String {
    let digits = |s: &str| s.chars().filter(char::is_ascii_digit).collect::<String>();
    format!("{}.{}", digits(major), digits(minor))
}

fn meets_minimum_version(version: &str) -> Result<bool> {
    let parsed = Version::parse(version).map_err(|e| {
        Error::Capability(format!("platform version '{version}' is not semver: {e}"))
    })?;
    let requirement = VersionReq::parse(MINIMUM_EXTENDED_VERSION)
        .map_err(|e| Error::Capability(e.to_string()))?;
    // Nightly builds carry a pre-release tag that a plain requirement never matches.
    let release = Version::new(parsed.major, parsed.minor, parsed.patch);
    Ok(requirement.matches(&release))
}
