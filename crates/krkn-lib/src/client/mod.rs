//! A Kubernetes client tailored to the lookups chaos scenarios and telemetry need.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use k8s_openapi::api::core::v1::{Namespace, Node, PersistentVolumeClaim, Pod as KubePod};
use kube::{
    Api, Client as KubeClient, Config, ResourceExt,
    api::{ApiResource, DynamicObject, GroupVersionKind, ListParams},
    config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
    discovery::{ApiCapabilities, Discovery, verbs},
};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

use crate::models::{
    k8s::{ChaosEngine, ChaosResult, Pod, Pvc},
    telemetry::{NodeInfo, Taint},
};

pub mod nodes;

type Result<T, E = Error> = std::result::Result<T, E>;

/// API group of the OpenShift cluster-wide configuration objects.
pub const OPENSHIFT_CONFIG_GROUP: &str = "config.openshift.io";

/// Name of the singleton OpenShift cluster-wide configuration objects.
const OPENSHIFT_CONFIG_NAME: &str = "cluster";

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create Kubernetes client from the inferred configuration"))]
    InferKubeClient { source: kube::Error },

    #[snafu(display("failed to read kubeconfig from {path:?}"))]
    ReadKubeconfig {
        source: KubeconfigError,
        path: PathBuf,
    },

    #[snafu(display("failed to load client configuration from kubeconfig {path:?}"))]
    LoadKubeconfig {
        source: KubeconfigError,
        path: PathBuf,
    },

    #[snafu(display("failed to create Kubernetes client from kubeconfig {path:?}"))]
    CreateKubeClient { source: kube::Error, path: PathBuf },

    #[snafu(display("failed to determine the Kubernetes API server version"))]
    ApiServerVersion { source: kube::Error },

    #[snafu(display("failed to list nodes"))]
    ListNodes { source: kube::Error },

    #[snafu(display("failed to get node {node:?}"))]
    GetNode { source: kube::Error, node: String },

    #[snafu(display("node {node:?} has no resource version"))]
    MissingResourceVersion { node: String },

    #[snafu(display("failed to get namespace {namespace:?}"))]
    GetNamespace {
        source: kube::Error,
        namespace: String,
    },

    #[snafu(display("namespace {namespace:?} reports no phase"))]
    MissingNamespacePhase { namespace: String },

    #[snafu(display("failed to list pods"))]
    ListPods { source: kube::Error },

    #[snafu(display("failed to get pod {pod:?} in namespace {namespace:?}"))]
    GetPod {
        source: kube::Error,
        pod: String,
        namespace: String,
    },

    #[snafu(display("pod {pod:?} not found in namespace {namespace:?}"))]
    PodNotFound { pod: String, namespace: String },

    #[snafu(display("failed to get persistent volume claim {pvc:?} in namespace {namespace:?}"))]
    GetPvc {
        source: kube::Error,
        pvc: String,
        namespace: String,
    },

    #[snafu(display("failed to get {kind} {name:?} in namespace {namespace:?}"))]
    GetLitmusObject {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to get cluster configuration {kind}/cluster"))]
    GetClusterConfig { source: kube::Error, kind: String },

    #[snafu(display("failed to discover the API resources served by the cluster"))]
    DiscoverApiResources { source: kube::Error },

    #[snafu(display("failed to count objects of kind {kind:?}"))]
    CountObjects { source: kube::Error, kind: String },
}

/// This `KrknKubernetes` client wraps an underlying [`kube::Client`] and provides the read-only
/// cluster lookups used by chaos scenarios and by the telemetry collection.
#[derive(Clone)]
pub struct KrknKubernetes {
    client: KubeClient,
}

impl KrknKubernetes {
    pub fn new(client: KubeClient) -> Self {
        Self { client }
    }

    /// Creates a client from the inferred configuration: the in-cluster service account, or the
    /// kubeconfig pointed to by `KUBECONFIG` (defaulting to `~/.kube/config`).
    pub async fn try_default() -> Result<Self> {
        let client = KubeClient::try_default()
            .await
            .context(InferKubeClientSnafu)?;

        Ok(Self::new(client))
    }

    /// Creates a client from the kubeconfig file at `path`, using its current context.
    pub async fn from_kubeconfig_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let kubeconfig = Kubeconfig::read_from(path).context(ReadKubeconfigSnafu { path })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(LoadKubeconfigSnafu { path })?;
        let client = KubeClient::try_from(config).context(CreateKubeClientSnafu { path })?;

        Ok(Self::new(client))
    }

    /// Returns a [`kube::Client`] that can be freely used.
    pub fn as_kube_client(&self) -> KubeClient {
        self.client.clone()
    }

    /// Returns the `major.minor` version of the API server.
    pub async fn get_version(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .context(ApiServerVersionSnafu)?;

        Ok(format!("{major}.{minor}", major = info.major, minor = info.minor))
    }

    /// Returns the names of the nodes matching the optional label selector.
    pub async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .nodes(label_selector)
            .await?
            .iter()
            .map(ResourceExt::name_any)
            .collect())
    }

    async fn nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());

        Ok(api
            .list(&list_params(label_selector))
            .await
            .context(ListNodesSnafu)?
            .items)
    }

    pub async fn get_node_resource_version(&self, node: &str) -> Result<String> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node_object = api.get(node).await.context(GetNodeSnafu { node })?;

        node_object
            .resource_version()
            .context(MissingResourceVersionSnafu { node })
    }

    /// Returns the phase of `namespace`, e.g. `Active` or `Terminating`.
    pub async fn get_namespace_status(&self, namespace: &str) -> Result<String> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace_object = api
            .get(namespace)
            .await
            .context(GetNamespaceSnafu { namespace })?;

        namespace_object
            .status
            .and_then(|status| status.phase)
            .context(MissingNamespacePhaseSnafu { namespace })
    }

    /// Returns `(name, namespace)` of every pod in the cluster matching the optional label
    /// selector.
    pub async fn get_all_pods(
        &self,
        label_selector: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let api: Api<KubePod> = Api::all(self.client.clone());
        let pods = api
            .list(&list_params(label_selector))
            .await
            .context(ListPodsSnafu)?;

        Ok(pods
            .iter()
            .map(|pod| (pod.name_any(), pod.namespace().unwrap_or_default()))
            .collect())
    }

    pub async fn get_containers_in_pod(&self, pod: &str, namespace: &str) -> Result<Vec<String>> {
        let pod = self
            .get_pod_info(pod, namespace)
            .await?
            .context(PodNotFoundSnafu { pod, namespace })?;

        Ok(pod
            .containers
            .into_iter()
            .map(|container| container.name)
            .collect())
    }

    /// Returns a snapshot of the pod, or [`None`] if it does not exist.
    pub async fn get_pod_info(&self, pod: &str, namespace: &str) -> Result<Option<Pod>> {
        let api: Api<KubePod> = Api::namespaced(self.client.clone(), namespace);
        let pod_object = api
            .get_opt(pod)
            .await
            .context(GetPodSnafu { pod, namespace })?;

        Ok(pod_object.as_ref().map(Pod::from))
    }

    /// Returns a snapshot of the persistent volume claim, including the pods mounting it, or
    /// [`None`] if the claim does not exist.
    pub async fn get_pvc_info(&self, pvc: &str, namespace: &str) -> Result<Option<Pvc>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let Some(claim) = api
            .get_opt(pvc)
            .await
            .context(GetPvcSnafu { pvc, namespace })?
        else {
            return Ok(None);
        };

        let pods: Api<KubePod> = Api::namespaced(self.client.clone(), namespace);
        let pods = pods
            .list(&ListParams::default())
            .await
            .context(ListPodsSnafu)?;

        Ok(Some(Pvc::new(&claim, &pods.items)))
    }

    pub async fn get_litmus_chaos_engine(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ChaosEngine>> {
        let engine = self
            .get_litmus_object(&ChaosEngine::api_resource(), name, namespace)
            .await?;

        Ok(engine.as_ref().map(ChaosEngine::from))
    }

    pub async fn get_litmus_chaos_result(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ChaosResult>> {
        let result = self
            .get_litmus_object(&ChaosResult::api_resource(), name, namespace)
            .await?;

        Ok(result.as_ref().map(ChaosResult::from))
    }

    async fn get_litmus_object(
        &self,
        api_resource: &ApiResource,
        name: &str,
        namespace: &str,
    ) -> Result<Option<DynamicObject>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, api_resource);

        api.get_opt(name).await.context(GetLitmusObjectSnafu {
            kind: &api_resource.kind,
            name,
            namespace,
        })
    }

    /// Returns the platform of the cluster (e.g. `AWS`, `GCP`, `BareMetal`) as reported by the
    /// OpenShift infrastructure configuration, or `Unknown`.
    #[instrument(skip(self))]
    pub async fn get_cluster_infrastructure(&self) -> Result<String> {
        let infrastructure = self
            .get_openshift_config("Infrastructure", "infrastructures")
            .await?;

        Ok(infrastructure
            .as_ref()
            .and_then(|object| string_at(object, "/status/platform"))
            .unwrap_or_else(|| UNKNOWN.to_owned()))
    }

    /// Returns the network plugins of the cluster as reported by the OpenShift network
    /// configuration, or a single `Unknown` entry.
    #[instrument(skip(self))]
    pub async fn get_cluster_network_plugins(&self) -> Result<Vec<String>> {
        let network = self.get_openshift_config("Network", "networks").await?;

        let network_type = network
            .as_ref()
            .and_then(|object| string_at(object, "/status/networkType"))
            .unwrap_or_else(|| UNKNOWN.to_owned());

        Ok(vec![network_type])
    }

    /// The cluster-wide object is absent on clusters which are not OpenShift.
    async fn get_openshift_config(
        &self,
        kind: &str,
        plural: &str,
    ) -> Result<Option<DynamicObject>> {
        let api_resource = ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(OPENSHIFT_CONFIG_GROUP, "v1", kind),
            plural,
        );
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &api_resource);

        api.get_opt(OPENSHIFT_CONFIG_NAME)
            .await
            .context(GetClusterConfigSnafu { kind })
    }

    /// Counts the objects of each kind in `kinds` across all namespaces.
    ///
    /// Kinds are resolved through API discovery, so both core and custom resources are
    /// supported. Kinds the cluster does not serve are left out of the result.
    #[instrument(skip(self))]
    pub async fn get_all_kubernetes_object_count(
        &self,
        kinds: &[String],
    ) -> Result<BTreeMap<String, u64>> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .context(DiscoverApiResourcesSnafu)?;

        let mut counts = BTreeMap::new();

        for kind in kinds {
            let served = discovery
                .groups_alphabetical()
                .into_iter()
                .flat_map(|group| group.recommended_resources());

            let Some(api_resource) = find_listable_resource(served, kind) else {
                tracing::debug!(
                    kind = kind.as_str(),
                    "kind is not served by the cluster, skipping"
                );
                continue;
            };

            let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &api_resource);
            let count = api
                .list_metadata(&ListParams::default())
                .await
                .context(CountObjectsSnafu { kind })?
                .items
                .len() as u64;

            tracing::debug!(kind = kind.as_str(), count, "counted objects");
            counts.insert(kind.clone(), count);
        }

        Ok(counts)
    }

    /// Returns the node classes of the cluster together with the taints of every node.
    #[instrument(skip(self))]
    pub async fn get_nodes_infos(&self) -> Result<(Vec<NodeInfo>, Vec<Taint>)> {
        let nodes = self.nodes(None).await?;

        Ok(nodes::summarize_nodes(&nodes))
    }
}

fn list_params(label_selector: Option<&str>) -> ListParams {
    match label_selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    }
}

fn string_at(object: &DynamicObject, pointer: &str) -> Option<String> {
    object
        .data
        .pointer(pointer)
        .and_then(serde_json::Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// Returns the first resource of `kind` which supports listing.
fn find_listable_resource(
    resources: impl IntoIterator<Item = (ApiResource, ApiCapabilities)>,
    kind: &str,
) -> Option<ApiResource> {
    resources
        .into_iter()
        .find(|(api_resource, capabilities)| {
            api_resource.kind == kind && capabilities.supports_operation(verbs::LIST)
        })
        .map(|(api_resource, _)| api_resource)
}
