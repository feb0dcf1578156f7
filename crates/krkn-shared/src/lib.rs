//! This crate contains helpers for processing structured documents (YAML and JSON) which are
//! used across the other crates in this workspace and do not depend on Kubernetes.

pub mod deep;
pub mod yaml;

pub use deep::DeepAttributes;
