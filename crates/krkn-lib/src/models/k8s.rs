//! Read-only snapshots of Kubernetes objects which chaos scenarios inspect.
//!
//! The snapshots only carry the handful of fields scenarios care about and are built from the
//! full [`k8s_openapi`] (or dynamic) objects returned by the API server.
use k8s_openapi::api::core::v1::{self as core, PersistentVolumeClaim};
use kube::{
    ResourceExt,
    api::{ApiResource, DynamicObject, GroupVersionKind},
};
use serde::Serialize;

/// API group of the Litmus chaos custom resources.
pub const LITMUS_GROUP: &str = "litmuschaos.io";

/// API version of the Litmus chaos custom resources.
pub const LITMUS_VERSION: &str = "v1alpha1";

/// A volume declared by a pod.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,

    /// Name of the claim, if the volume is backed by a persistent volume claim.
    pub pvc_name: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

/// A persistent volume claim together with the pods mounting it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pvc {
    pub name: String,

    /// Storage capacity as reported in the claim status, e.g. `10Gi`.
    pub capacity: String,

    /// Name of the bound persistent volume.
    pub volume_name: String,

    pub pod_names: Vec<String>,
    pub namespace: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image: String,
    pub name: String,
    pub volume_mounts: Vec<VolumeMount>,
    pub ready: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub name: String,
    #[serde(rename = "podIP")]
    pub pod_ip: Option<String>,
    pub namespace: String,
    pub containers: Vec<Container>,
    pub node_name: Option<String>,
    pub volumes: Vec<Volume>,
}

impl From<&core::Pod> for Pod {
    fn from(pod: &core::Pod) -> Self {
        let container_statuses = pod
            .status
            .as_ref()
            .and_then(|status| status.container_statuses.as_deref())
            .unwrap_or_default();

        let containers = pod
            .spec
            .iter()
            .flat_map(|spec| &spec.containers)
            .map(|container| Container {
                image: container.image.clone().unwrap_or_default(),
                name: container.name.clone(),
                volume_mounts: container
                    .volume_mounts
                    .iter()
                    .flatten()
                    .map(|mount| VolumeMount {
                        name: mount.name.clone(),
                        mount_path: mount.mount_path.clone(),
                    })
                    .collect(),
                ready: container_statuses
                    .iter()
                    .any(|status| status.name == container.name && status.ready),
            })
            .collect();

        let volumes = pod
            .spec
            .iter()
            .flat_map(|spec| spec.volumes.iter().flatten())
            .map(|volume| Volume {
                name: volume.name.clone(),
                pvc_name: volume
                    .persistent_volume_claim
                    .as_ref()
                    .map(|claim| claim.claim_name.clone()),
            })
            .collect();

        Self {
            name: pod.name_any(),
            pod_ip: pod.status.as_ref().and_then(|status| status.pod_ip.clone()),
            namespace: pod.namespace().unwrap_or_default(),
            containers,
            node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
            volumes,
        }
    }
}

impl Pvc {
    /// Builds the snapshot of `claim`. `pods` are searched for volumes referencing the claim.
    pub fn new(claim: &PersistentVolumeClaim, pods: &[core::Pod]) -> Self {
        let name = claim.name_any();
        let namespace = claim.namespace().unwrap_or_default();

        let pod_names = pods
            .iter()
            .filter(|pod| pod.namespace().as_deref() == Some(namespace.as_str()))
            .filter(|pod| {
                pod.spec
                    .iter()
                    .flat_map(|spec| spec.volumes.iter().flatten())
                    .filter_map(|volume| volume.persistent_volume_claim.as_ref())
                    .any(|source| source.claim_name == name)
            })
            .map(ResourceExt::name_any)
            .collect();

        let capacity = claim
            .status
            .as_ref()
            .and_then(|status| status.capacity.as_ref())
            .and_then(|capacity| capacity.get("storage"))
            .map(|quantity| quantity.0.clone())
            .unwrap_or_default();

        let volume_name = claim
            .spec
            .as_ref()
            .and_then(|spec| spec.volume_name.clone())
            .unwrap_or_default();

        Self {
            name,
            capacity,
            volume_name,
            pod_names,
            namespace,
        }
    }
}

/// Identity of a Litmus chaos custom object.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LitmusChaosObject {
    pub kind: String,
    pub group: String,
    pub namespace: String,
    pub name: String,
    pub plural: String,
    pub version: String,
}

impl LitmusChaosObject {
    fn new(api_resource: &ApiResource, object: &DynamicObject) -> Self {
        Self {
            kind: api_resource.kind.clone(),
            group: api_resource.group.clone(),
            namespace: object.namespace().unwrap_or_default(),
            name: object.name_any(),
            plural: api_resource.plural.clone(),
            version: api_resource.version.clone(),
        }
    }
}

fn string_at(object: &DynamicObject, pointer: &str) -> String {
    object
        .data
        .pointer(pointer)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Status of a Litmus `ChaosEngine`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosEngine {
    #[serde(flatten)]
    pub object: LitmusChaosObject,

    pub engine_status: String,

    /// Status of the first experiment run by the engine.
    pub exp_status: String,
}

impl ChaosEngine {
    pub fn api_resource() -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(LITMUS_GROUP, LITMUS_VERSION, "ChaosEngine"),
            "chaosengines",
        )
    }
}

impl From<&DynamicObject> for ChaosEngine {
    fn from(object: &DynamicObject) -> Self {
        Self {
            object: LitmusChaosObject::new(&Self::api_resource(), object),
            engine_status: string_at(object, "/status/engineStatus"),
            exp_status: string_at(object, "/status/experiments/0/status"),
        }
    }
}

/// Verdict of a Litmus `ChaosResult`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaosResult {
    #[serde(flatten)]
    pub object: LitmusChaosObject,

    pub verdict: String,
    pub fail_step: String,
}

impl ChaosResult {
    pub fn api_resource() -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(LITMUS_GROUP, LITMUS_VERSION, "ChaosResult"),
            "chaosresults",
        )
    }
}

impl From<&DynamicObject> for ChaosResult {
    fn from(object: &DynamicObject) -> Self {
        Self {
            object: LitmusChaosObject::new(&Self::api_resource(), object),
            verdict: string_at(object, "/status/experimentStatus/verdict"),
            fail_step: string_at(object, "/status/experimentStatus/failStep"),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;

    fn pod(yaml: &str) -> core::Pod {
        serde_yaml::from_str(yaml).expect("invalid test input")
    }

    const FEDTOOLS_POD: &str = indoc! {"
        apiVersion: v1
        kind: Pod
        metadata:
          name: fedtools
          namespace: test-ns
        spec:
          nodeName: worker-1
          containers:
            - name: fedtools
              image: quay.io/krkn-chaos/krkn:tools
              volumeMounts:
                - name: data
                  mountPath: /data
            - name: sidecar
              image: busybox
          volumes:
            - name: data
              persistentVolumeClaim:
                claimName: data-pvc
            - name: scratch
              emptyDir: {}
        status:
          podIP: 10.128.2.15
          containerStatuses:
            - name: fedtools
              ready: true
              restartCount: 0
              image: quay.io/krkn-chaos/krkn:tools
              imageID: ''
            - name: sidecar
              ready: false
              restartCount: 3
              image: busybox
              imageID: ''
    "};

    #[test]
    fn pod_snapshot_collects_containers_and_volumes() {
        let snapshot = Pod::from(&pod(FEDTOOLS_POD));

        assert_eq!(snapshot.name, "fedtools");
        assert_eq!(snapshot.namespace, "test-ns");
        assert_eq!(snapshot.pod_ip.as_deref(), Some("10.128.2.15"));
        assert_eq!(snapshot.node_name.as_deref(), Some("worker-1"));
        assert_eq!(
            snapshot.containers,
            [
                Container {
                    image: "quay.io/krkn-chaos/krkn:tools".to_owned(),
                    name: "fedtools".to_owned(),
                    volume_mounts: vec![VolumeMount {
                        name: "data".to_owned(),
                        mount_path: "/data".to_owned(),
                    }],
                    ready: true,
                },
                Container {
                    image: "busybox".to_owned(),
                    name: "sidecar".to_owned(),
                    volume_mounts: Vec::new(),
                    ready: false,
                },
            ]
        );
        assert_eq!(
            snapshot.volumes,
            [
                Volume {
                    name: "data".to_owned(),
                    pvc_name: Some("data-pvc".to_owned()),
                },
                Volume {
                    name: "scratch".to_owned(),
                    pvc_name: None,
                },
            ]
        );
    }

    #[test]
    fn pod_snapshot_serializes_with_camel_case_keys() {
        let json = serde_json::to_value(Pod::from(&pod(FEDTOOLS_POD))).unwrap();

        assert_eq!(json["podIP"], "10.128.2.15");
        assert_eq!(json["nodeName"], "worker-1");
        assert_eq!(json["volumes"][0]["pvcName"], "data-pvc");
        assert_eq!(json["containers"][0]["volumeMounts"][0]["mountPath"], "/data");
    }

    #[test]
    fn pvc_snapshot_lists_mounting_pods_of_its_namespace() {
        let claim: PersistentVolumeClaim = serde_yaml::from_str(indoc! {"
            apiVersion: v1
            kind: PersistentVolumeClaim
            metadata:
              name: data-pvc
              namespace: test-ns
            spec:
              volumeName: pv-0001
            status:
              capacity:
                storage: 10Gi
        "})
        .unwrap();

        let other_namespace = pod(&FEDTOOLS_POD.replace("namespace: test-ns", "namespace: other"));
        let unrelated = pod(indoc! {"
            apiVersion: v1
            kind: Pod
            metadata:
              name: unrelated
              namespace: test-ns
            spec:
              containers:
                - name: main
        "});

        let pvc = Pvc::new(&claim, &[pod(FEDTOOLS_POD), other_namespace, unrelated]);

        assert_eq!(
            pvc,
            Pvc {
                name: "data-pvc".to_owned(),
                capacity: "10Gi".to_owned(),
                volume_name: "pv-0001".to_owned(),
                pod_names: vec!["fedtools".to_owned()],
                namespace: "test-ns".to_owned(),
            }
        );
    }

    #[test]
    fn chaos_engine_reads_status() {
        let object: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "litmuschaos.io/v1alpha1",
            "kind": "ChaosEngine",
            "metadata": {"name": "nginx-chaos", "namespace": "litmus"},
            "status": {
                "engineStatus": "completed",
                "experiments": [{"name": "pod-delete", "status": "Completed"}]
            }
        }))
        .unwrap();

        let engine = ChaosEngine::from(&object);

        assert_eq!(engine.object.name, "nginx-chaos");
        assert_eq!(engine.object.namespace, "litmus");
        assert_eq!(engine.object.plural, "chaosengines");
        assert_eq!(engine.engine_status, "completed");
        assert_eq!(engine.exp_status, "Completed");
    }

    #[test]
    fn chaos_result_without_status_is_empty() {
        let object: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "litmuschaos.io/v1alpha1",
            "kind": "ChaosResult",
            "metadata": {"name": "nginx-chaos-pod-delete", "namespace": "litmus"}
        }))
        .unwrap();

        let result = ChaosResult::from(&object);

        assert_eq!(result.object.kind, "ChaosResult");
        assert_eq!(result.object.group, LITMUS_GROUP);
        assert!(result.verdict.is_empty());
        assert!(result.fail_step.is_empty());
    }
}
