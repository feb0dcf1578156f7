//! Plain data types exchanged with the cluster and the telemetry collector.

pub mod k8s;
pub mod telemetry;
