//! Kubernetes lookups and telemetry reporting for the krkn chaos engineering tool.
//!
//! ## Crate Features
//!
//! - `clap` enables deriving CLI arguments for the
//!   [`TelemetryConfig`](telemetry::config::TelemetryConfig).

pub mod client;
pub mod cluster;
pub mod logging;
pub mod models;
pub mod telemetry;

// External re-exports
pub use k8s_openapi;
pub use kube;
// Internal re-exports
pub use krkn_shared as shared;
