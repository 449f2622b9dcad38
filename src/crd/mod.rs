//! Custom Resource Definitions for the WebConsole operator
//!
//! `WebConsole` is the only CRD the operator installs. The OpenShift types in
//! [`platform`] are consumed or produced when the cluster serves them.

pub mod platform;
pub mod types;
mod web_console;

#[cfg(test)]
mod tests;

pub use platform::{ClusterVersion, ConsoleLink, OAuthClient, Route};
pub use types::*;
pub use web_console::{
    ConsolePhase, SpecValidationError, WebConsole, WebConsoleSpec, WebConsoleStatus,
};
