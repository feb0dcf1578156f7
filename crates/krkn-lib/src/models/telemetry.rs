//! The telemetry report collected during a chaos run and sent to the telemetry collector.
//!
//! The JSON projection of these types is the wire format of the collector, which is why
//! [`ScenarioTelemetry`] keeps its camelCase keys while [`ChaosRunTelemetry`] uses snake_case.
use std::{
    collections::BTreeMap,
    fmt::Display,
    hash::{Hash, Hasher},
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

type Result<T, E = Error> = std::result::Result<T, E>;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid parameters format: failed to decode base64 payload"))]
    DecodeParametersBase64 { source: base64::DecodeError },

    #[snafu(display("invalid parameters format: failed to parse decoded payload"))]
    ParseParameters { source: krkn_shared::yaml::Error },

    #[snafu(display("invalid parameters format: expected a mapping or a sequence"))]
    UnsupportedParameters,

    #[snafu(display("malformed scenario telemetry"))]
    MalformedScenario { source: serde_json::Error },

    #[snafu(display("scenarios param must be a list of object"))]
    ScenariosNotAList,

    #[snafu(display("invalid scenario at index {index}: {source}"))]
    InvalidScenario {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
        index: usize,
    },

    #[snafu(display("malformed chaos run telemetry"))]
    MalformedReport { source: serde_json::Error },
}

/// Telemetry of a single scenario executed during a chaos run.
///
/// Created with zeroed defaults when the scenario starts and filled in as it runs. The scenario
/// configuration is either pending in [`Self::parameters_base64`] (set by
/// [`KrknTelemetry::set_parameters_base64`](crate::telemetry::KrknTelemetry::set_parameters_base64))
/// or decoded into [`Self::parameters`]. Parsing a payload with [`TryFrom`] decodes it right away
/// and clears the encoded field.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", try_from = "serde_json::Value")]
pub struct ScenarioTelemetry {
    /// Epoch seconds when the scenario started.
    pub start_time_stamp: i64,

    /// Epoch seconds when the scenario ended.
    pub end_time_stamp: i64,

    /// Scenario file name.
    pub scenario: String,

    /// Exit status of the scenario run.
    pub exit_status: i32,

    /// Anonymized scenario configuration, YAML encoded as base64.
    pub parameters_base64: String,

    /// Decoded scenario configuration, either a mapping or a sequence.
    pub parameters: serde_json::Value,
}

impl Default for ScenarioTelemetry {
    fn default() -> Self {
        Self {
            start_time_stamp: 0,
            end_time_stamp: 0,
            scenario: String::new(),
            exit_status: 0,
            parameters_base64: String::new(),
            parameters: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScenarioTelemetry {
    start_time_stamp: Option<f64>,
    end_time_stamp: Option<f64>,
    scenario: Option<String>,
    exit_status: Option<i32>,
    parameters_base64: Option<String>,
    parameters: Option<serde_json::Value>,
}

impl TryFrom<serde_json::Value> for ScenarioTelemetry {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        let raw: RawScenarioTelemetry =
            serde_json::from_value(value).context(MalformedScenarioSnafu)?;
        let defaults = Self::default();

        let parameters_base64 = raw.parameters_base64.unwrap_or_default();
        let (parameters, parameters_base64) = if parameters_base64.is_empty() {
            (
                raw.parameters.unwrap_or(defaults.parameters),
                parameters_base64,
            )
        } else {
            (decode_parameters(&parameters_base64)?, String::new())
        };

        Ok(Self {
            // Timestamps are truncated to whole seconds
            start_time_stamp: raw.start_time_stamp.unwrap_or_default() as i64,
            end_time_stamp: raw.end_time_stamp.unwrap_or_default() as i64,
            scenario: raw.scenario.unwrap_or_default(),
            exit_status: raw.exit_status.unwrap_or_default(),
            parameters_base64,
            parameters,
        })
    }
}

fn decode_parameters(encoded: &str) -> Result<serde_json::Value> {
    let yaml = BASE64_STANDARD
        .decode(encoded.trim())
        .context(DecodeParametersBase64Snafu)?;
    let parameters: serde_json::Value =
        krkn_shared::yaml::from_slice(&yaml).context(ParseParametersSnafu)?;

    ensure!(
        parameters.is_object() || parameters.is_array(),
        UnsupportedParametersSnafu
    );

    Ok(parameters)
}

/// A taint observed on a cluster node.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(default)]
pub struct Taint {
    pub node_name: String,
    pub effect: String,
    pub key: String,
    pub value: String,
}

/// Summary of one class of cluster nodes.
///
/// Nodes sharing architecture, instance type, role and versions are collapsed into a single
/// entry, [`Self::count`] tracks how many nodes the entry stands for. Equality and hashing
/// ignore the count, see [`NodeInfo::summarize`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeInfo {
    /// Number of nodes of this class.
    pub count: u32,

    /// CPU architecture.
    pub architecture: String,

    /// Cloud instance type, if the node carries one.
    pub instance_type: String,

    /// Node roles, e.g. `master`, `worker` or `infra`.
    pub node_type: String,

    pub kernel_version: String,
    pub kubelet_version: String,
    pub os_version: String,
}

impl Default for NodeInfo {
    fn default() -> Self {
        Self {
            count: 1,
            architecture: String::new(),
            instance_type: String::new(),
            node_type: String::new(),
            kernel_version: String::new(),
            kubelet_version: String::new(),
            os_version: String::new(),
        }
    }
}

impl NodeInfo {
    fn class_key(&self) -> [&str; 6] {
        [
            self.architecture.as_str(),
            self.instance_type.as_str(),
            self.node_type.as_str(),
            self.kernel_version.as_str(),
            self.kubelet_version.as_str(),
            self.os_version.as_str(),
        ]
    }

    /// Collapses equal entries into one, summing their counts.
    ///
    /// The first occurrence of each class determines its position in the returned list.
    pub fn summarize(infos: impl IntoIterator<Item = Self>) -> Vec<Self> {
        let mut classes: IndexMap<Self, u32> = IndexMap::new();

        for info in infos {
            let count = info.count;
            *classes.entry(info).or_insert(0) += count;
        }

        classes
            .into_iter()
            .map(|(mut info, count)| {
                info.count = count;
                info
            })
            .collect()
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.class_key() == other.class_key()
    }
}

impl Eq for NodeInfo {}

impl Hash for NodeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class_key().hash(state);
    }
}

impl Display for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.class_key().join(" "))
    }
}

/// Root object of the telemetry collected during a chaos run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(try_from = "serde_json::Value")]
pub struct ChaosRunTelemetry {
    /// Scenarios performed during the chaos run, in execution order.
    pub scenarios: Vec<ScenarioTelemetry>,

    /// Node classes of the target cluster.
    pub node_summary_infos: Vec<NodeInfo>,

    /// Taints detected on the nodes of the target cluster.
    pub node_taints: Vec<Taint>,

    /// Number of objects per kind deployed in the cluster during the chaos run.
    pub kubernetes_objects_count: BTreeMap<String, u64>,

    /// Network plugins deployed in the target cluster.
    pub network_plugins: Vec<String>,

    /// Number of nodes of all classes, the sum of [`NodeInfo::count`].
    pub total_node_count: u32,

    /// Cloud infrastructure of the target cluster, if known.
    pub cloud_infrastructure: String,

    /// Run UUID generated by krkn for the run.
    pub run_uuid: String,
}

impl Default for ChaosRunTelemetry {
    fn default() -> Self {
        Self {
            scenarios: Vec::new(),
            node_summary_infos: Vec::new(),
            node_taints: Vec::new(),
            kubernetes_objects_count: BTreeMap::new(),
            network_plugins: vec![UNKNOWN.to_owned()],
            total_node_count: 0,
            cloud_infrastructure: UNKNOWN.to_owned(),
            run_uuid: String::new(),
        }
    }
}

impl ChaosRunTelemetry {
    /// Replaces the node summary and recomputes [`Self::total_node_count`] from it.
    pub fn set_node_summary_infos(&mut self, node_summary_infos: Vec<NodeInfo>) {
        self.total_node_count = node_summary_infos.iter().map(|info| info.count).sum();
        self.node_summary_infos = node_summary_infos;
    }

    /// Serializes the report into the JSON document accepted by the telemetry collector.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Deserialize)]
struct RawChaosRunTelemetry {
    scenarios: Option<serde_json::Value>,
    node_summary_infos: Option<Vec<NodeInfo>>,
    node_taints: Option<Vec<Taint>>,
    kubernetes_objects_count: Option<BTreeMap<String, u64>>,
    network_plugins: Option<Vec<String>>,
    total_node_count: Option<u32>,
    cloud_infrastructure: Option<String>,
    run_uuid: Option<String>,
}

impl TryFrom<serde_json::Value> for ChaosRunTelemetry {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        let raw: RawChaosRunTelemetry =
            serde_json::from_value(value).context(MalformedReportSnafu)?;

        let Some(serde_json::Value::Array(scenarios)) = raw.scenarios else {
            return ScenariosNotAListSnafu.fail();
        };

        let scenarios = scenarios
            .into_iter()
            .enumerate()
            .map(|(index, scenario)| {
                ScenarioTelemetry::try_from(scenario).context(InvalidScenarioSnafu { index })
            })
            .collect::<Result<Vec<_>>>()?;

        let defaults = Self::default();

        Ok(Self {
            scenarios,
            node_summary_infos: raw.node_summary_infos.unwrap_or_default(),
            node_taints: raw.node_taints.unwrap_or_default(),
            kubernetes_objects_count: raw.kubernetes_objects_count.unwrap_or_default(),
            network_plugins: raw.network_plugins.unwrap_or(defaults.network_plugins),
            total_node_count: raw.total_node_count.unwrap_or_default(),
            cloud_infrastructure: raw
                .cloud_infrastructure
                .unwrap_or(defaults.cloud_infrastructure),
            run_uuid: raw.run_uuid.unwrap_or_default(),
        })
    }
}

/// Kind of an entry in a remote storage listing.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum S3ObjectType {
    Folder,
    File,
}

/// An object stored in the telemetry bucket, as listed by the telemetry web service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct S3BucketObject {
    #[serde(rename = "type")]
    pub object_type: S3ObjectType,

    /// Path of a folder or name of a file.
    pub path: String,

    /// Size of the file in bytes, zero for folders.
    #[serde(default)]
    pub size: u64,

    /// When the file was created or last modified.
    #[serde(default)]
    pub modified: String,
}

impl S3BucketObject {
    pub fn is_file(&self) -> bool {
        self.object_type == S3ObjectType::File
    }
}
