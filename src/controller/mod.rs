//! Controller module for WebConsole reconciliation
//!
//! This module contains the main controller loop, the convergence engine and
//! the resource synthesis it drives.

pub mod capabilities;
pub mod certificates;
pub mod client;
pub mod config_document;
mod defaults;
mod drift;
mod managed;
mod reconciler;
pub mod resources;
#[cfg(test)]
mod resources_test;
pub mod status;
#[cfg(test)]
mod testing;

pub use capabilities::{detect_capabilities, CapabilityFacts, DiscoveryClient, KubeDiscoveryClient};
pub use certificates::check_certificate_expiry;
pub use client::{ClusterClient, KubeClusterClient, FIELD_MANAGER};
pub use defaults::{resolve_defaults, DEFAULT_CERT_VALIDITY_DAYS, DEFAULT_EXPIRATION_PERIOD_HOURS};
pub use drift::reconcile_fields;
pub use managed::{KindRegistry, ManagedResource, ResourceKind};
pub use reconciler::{apply_resource, converge, run_controller, ApplyOutcome, ControllerState, Outcome};
