//! The read-only cluster lookups the telemetry pipeline depends on.
use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    client::{self, KrknKubernetes},
    models::telemetry::{NodeInfo, Taint},
};

/// Cluster introspection needed to fill a [`ChaosRunTelemetry`](crate::models::telemetry::ChaosRunTelemetry).
///
/// [`KrknKubernetes`] implements this against a live cluster. Tests provide their own
/// implementations to observe which lookups are performed.
#[async_trait]
pub trait ClusterIntrospection: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Cloud infrastructure identifier, `Unknown` if it cannot be determined.
    async fn cluster_infrastructure(&self) -> Result<String, Self::Error>;

    async fn cluster_network_plugins(&self) -> Result<Vec<String>, Self::Error>;

    /// Number of objects of every kind in `kinds` that the cluster serves.
    async fn object_count_by_kinds(
        &self,
        kinds: &[String],
    ) -> Result<BTreeMap<String, u64>, Self::Error>;

    /// Node classes, see [`NodeInfo::summarize`].
    async fn node_summary_infos(&self) -> Result<Vec<NodeInfo>, Self::Error>;

    async fn node_taints(&self) -> Result<Vec<Taint>, Self::Error>;
}

#[async_trait]
impl ClusterIntrospection for KrknKubernetes {
    type Error = client::Error;

    async fn cluster_infrastructure(&self) -> Result<String, Self::Error> {
        self.get_cluster_infrastructure().await
    }

    async fn cluster_network_plugins(&self) -> Result<Vec<String>, Self::Error> {
        self.get_cluster_network_plugins().await
    }

    async fn object_count_by_kinds(
        &self,
        kinds: &[String],
    ) -> Result<BTreeMap<String, u64>, Self::Error> {
        self.get_all_kubernetes_object_count(kinds).await
    }

    async fn node_summary_infos(&self) -> Result<Vec<NodeInfo>, Self::Error> {
        let (infos, _) = self.get_nodes_infos().await?;
        Ok(infos)
    }

    async fn node_taints(&self) -> Result<Vec<Taint>, Self::Error> {
        let (_, taints) = self.get_nodes_infos().await?;
        Ok(taints)
    }
}
