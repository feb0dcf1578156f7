//! Extraction of telemetry node summaries and taints from [`Node`] objects.
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::models::telemetry::{NodeInfo, Taint};

/// Well-known label carrying the cloud instance type of a node.
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

/// Deprecated label still set by some cloud providers instead of [`INSTANCE_TYPE_LABEL`].
pub const LEGACY_INSTANCE_TYPE_LABEL: &str = "beta.kubernetes.io/instance-type";

/// Prefix of the labels marking the roles of a node, e.g. `node-role.kubernetes.io/worker`.
pub const NODE_ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

const UNKNOWN: &str = "unknown";

fn or_unknown(value: Option<&str>) -> String {
    match value {
        Some(value) if !value.is_empty() => value.to_owned(),
        _ => UNKNOWN.to_owned(),
    }
}

/// Builds the [`NodeInfo`] of a single node, with a count of one.
pub fn node_info(node: &Node) -> NodeInfo {
    let labels = node.labels();
    let system_info = node.status.as_ref().and_then(|status| status.node_info.as_ref());

    let instance_type = labels
        .get(INSTANCE_TYPE_LABEL)
        .or_else(|| labels.get(LEGACY_INSTANCE_TYPE_LABEL))
        .map(String::as_str);

    // Labels are sorted, so are the roles
    let roles = labels
        .keys()
        .filter_map(|key| key.strip_prefix(NODE_ROLE_LABEL_PREFIX))
        .filter(|role| !role.is_empty())
        .collect::<Vec<_>>()
        .join(",");

    NodeInfo {
        count: 1,
        architecture: or_unknown(system_info.map(|info| info.architecture.as_str())),
        instance_type: or_unknown(instance_type),
        node_type: or_unknown(Some(roles.as_str())),
        kernel_version: or_unknown(system_info.map(|info| info.kernel_version.as_str())),
        kubelet_version: or_unknown(system_info.map(|info| info.kubelet_version.as_str())),
        os_version: or_unknown(system_info.map(|info| info.os_image.as_str())),
    }
}

/// Returns every taint set on `node`.
pub fn node_taints(node: &Node) -> Vec<Taint> {
    let node_name = node.name_any();

    node.spec
        .iter()
        .flat_map(|spec| spec.taints.iter().flatten())
        .map(|taint| Taint {
            node_name: node_name.clone(),
            effect: taint.effect.clone(),
            key: taint.key.clone(),
            value: taint.value.clone().unwrap_or_default(),
        })
        .collect()
}

/// Summarizes `nodes` into node classes and collects the taints of all nodes.
pub fn summarize_nodes<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
) -> (Vec<NodeInfo>, Vec<Taint>) {
    let mut infos = Vec::new();
    let mut taints = Vec::new();

    for node in nodes {
        infos.push(node_info(node));
        taints.extend(node_taints(node));
    }

    (NodeInfo::summarize(infos), taints)
}

#[cfg(test)]
mod tests {
    use indoc::formatdoc;
    use rstest::rstest;

    use super::*;

    fn node(name: &str, role: &str, labels: &str, taints: &str) -> Node {
        serde_yaml::from_str(&formatdoc! {"
            apiVersion: v1
            kind: Node
            metadata:
              name: {name}
              labels:
                kubernetes.io/hostname: {name}
                node-role.kubernetes.io/{role}: ''
                {labels}
            spec:
              taints: {taints}
            status:
              nodeInfo:
                architecture: amd64
                bootID: ''
                containerRuntimeVersion: cri-o://1.27.1
                kernelVersion: 5.14.0-284.36.1.el9_2.x86_64
                kubeProxyVersion: ''
                kubeletVersion: v1.27.6+f67aeb3
                machineID: ''
                operatingSystem: linux
                osImage: Red Hat Enterprise Linux CoreOS 414.92
                systemUUID: ''
        "})
        .expect("invalid test input")
    }

    #[test]
    fn node_info_reads_system_info_and_labels() {
        let info = node_info(&node(
            "master-0",
            "master",
            "node.kubernetes.io/instance-type: m5.xlarge",
            "[]",
        ));

        assert_eq!(info.count, 1);
        assert_eq!(info.architecture, "amd64");
        assert_eq!(info.instance_type, "m5.xlarge");
        assert_eq!(info.node_type, "master");
        assert_eq!(info.kernel_version, "5.14.0-284.36.1.el9_2.x86_64");
        assert_eq!(info.kubelet_version, "v1.27.6+f67aeb3");
        assert_eq!(info.os_version, "Red Hat Enterprise Linux CoreOS 414.92");
    }

    #[rstest]
    #[case::current("node.kubernetes.io/instance-type: c5.large", "c5.large")]
    #[case::legacy("beta.kubernetes.io/instance-type: t3.small", "t3.small")]
    #[case::missing("topology.kubernetes.io/zone: eu-west-1a", "unknown")]
    fn instance_type_falls_back(#[case] label: &str, #[case] expected: &str) {
        let info = node_info(&node("worker-0", "worker", label, "[]"));

        assert_eq!(info.instance_type, expected);
    }

    #[test]
    fn multiple_roles_are_joined() {
        let info = node_info(&node(
            "master-0",
            "master",
            "node-role.kubernetes.io/control-plane: ''",
            "[]",
        ));

        assert_eq!(info.node_type, "control-plane,master");
    }

    #[test]
    fn node_without_status_is_unknown() {
        let node: Node =
            serde_yaml::from_str("apiVersion: v1\nkind: Node\nmetadata:\n  name: bare\n").unwrap();

        let info = node_info(&node);

        assert_eq!(info.architecture, "unknown");
        assert_eq!(info.node_type, "unknown");
        assert!(node_taints(&node).is_empty());
    }

    #[test]
    fn summary_groups_nodes_and_keeps_all_taints() {
        let nodes = [
            node(
                "master-0",
                "master",
                "node.kubernetes.io/instance-type: m5.xlarge",
                "[{key: node-role.kubernetes.io/master, effect: NoSchedule}]",
            ),
            node(
                "worker-0",
                "worker",
                "node.kubernetes.io/instance-type: m5.large",
                "[]",
            ),
            node(
                "worker-1",
                "worker",
                "node.kubernetes.io/instance-type: m5.large",
                "[{key: dedicated, value: chaos, effect: NoExecute}]",
            ),
        ];

        let (infos, taints) = summarize_nodes(&nodes);

        let classes: Vec<_> = infos
            .iter()
            .map(|info| (info.node_type.as_str(), info.count))
            .collect();
        assert_eq!(classes, [("master", 1), ("worker", 2)]);
        assert_eq!(
            taints,
            [
                Taint {
                    node_name: "master-0".to_owned(),
                    effect: "NoSchedule".to_owned(),
                    key: "node-role.kubernetes.io/master".to_owned(),
                    value: String::new(),
                },
                Taint {
                    node_name: "worker-1".to_owned(),
                    effect: "NoExecute".to_owned(),
                    key: "dedicated".to_owned(),
                    value: "chaos".to_owned(),
                },
            ]
        );
    }
}
