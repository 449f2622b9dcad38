//! webconsole-operator: converges web console deployments on Kubernetes
//! and OpenShift
//!
//! This crate provides a Kubernetes operator that keeps the workload,
//! network entry points, certificates and configuration of a web console in
//! line with a declarative `WebConsole` resource.

pub mod controller;
pub mod crd;
pub mod error;
pub mod settings;

pub use crate::error::{Error, Result};
