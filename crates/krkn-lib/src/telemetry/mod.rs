//! Collection and delivery of the telemetry of a chaos run.
//!
//! A run creates one [`ScenarioTelemetry`] per scenario and attaches its anonymized configuration
//! with [`KrknTelemetry::set_parameters_base64`]. Once every scenario finished, the scenarios are
//! gathered into a [`ChaosRunTelemetry`] and [`KrknTelemetry::send_telemetry`] completes it with
//! data from the cluster and posts it to the telemetry collector.
//!
//! Delivery problems never fail the run. They are logged and reported as
//! [`Delivery::Failed`].
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use krkn_shared::{
    DeepAttributes,
    yaml::{self, SerializeOptions},
};
use reqwest::{
    StatusCode,
    header::{ACCEPT, CONTENT_TYPE},
};
use snafu::{ResultExt, Snafu, ensure};
use tracing::instrument;

use crate::{
    cluster::ClusterIntrospection,
    models::telemetry::{ChaosRunTelemetry, ScenarioTelemetry},
    telemetry::config::{DeliverySettings, TelemetryConfig},
};

pub mod config;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Object kinds which are always counted.
pub const DEFAULT_OBJECT_KINDS: [&str; 6] =
    ["Deployment", "Pod", "Secret", "ConfigMap", "Build", "Route"];

/// Key whose values are removed from scenario configurations.
pub const REDACTED_ATTRIBUTE: &str = "kubeconfig";

/// Value replacing every [`REDACTED_ATTRIBUTE`].
pub const REDACTED_VALUE: &str = "anonymized";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("scenario file {path:?} does not exist"))]
    ScenarioFileNotFound { path: PathBuf },

    #[snafu(display("failed to read scenario file {path:?}"))]
    ReadScenarioFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("scenario file {path:?} is empty"))]
    EmptyScenarioFile { path: PathBuf },

    #[snafu(display("failed to parse scenario file {path:?}: {source}"))]
    ParseScenarioFile {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to serialize anonymized scenario file {path:?}: {source}"))]
    SerializeScenarioFile { source: yaml::Error, path: PathBuf },

    #[snafu(display("failed to collect the {what} of the cluster"))]
    CollectClusterData {
        source: Box<dyn std::error::Error + Send + Sync>,
        what: &'static str,
    },

    #[snafu(display("telemetry collection settings are missing: {}", fields.join(", ")))]
    MissingTelemetrySettings { fields: Vec<&'static str> },

    #[snafu(display("failed to serialize the telemetry report"))]
    SerializeReport { source: serde_json::Error },
}

/// A failed delivery of a telemetry report.
///
/// This is never returned as an error, see [`Delivery::Failed`].
#[derive(Debug, Snafu)]
pub enum DeliveryWarning {
    #[snafu(display("telemetry collector responded with status {status}: {body}"))]
    UnexpectedStatus { status: StatusCode, body: String },

    #[snafu(display("failed to send the telemetry report to the collector"))]
    Transport { source: reqwest::Error },
}

/// Outcome of [`KrknTelemetry::send_telemetry`].
#[derive(Debug)]
pub enum Delivery {
    /// Telemetry is disabled, nothing was collected or sent.
    Disabled,

    /// The collector accepted the report.
    Delivered,

    /// The report could not be delivered. The warning has already been logged.
    Failed(DeliveryWarning),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Builds and delivers the telemetry of chaos runs.
#[derive(Clone, Debug)]
pub struct KrknTelemetry {
    http_client: reqwest::Client,
    object_kinds: Vec<String>,
}

impl Default for KrknTelemetry {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl KrknTelemetry {
    /// Creates a new instance sending reports with `http_client`.
    ///
    /// Timeouts and proxies of the delivery are configured on the client.
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            object_kinds: DEFAULT_OBJECT_KINDS.map(str::to_owned).to_vec(),
        }
    }

    /// Counts the objects of `kinds` in addition to the [`DEFAULT_OBJECT_KINDS`].
    pub fn with_extra_object_kinds<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        for kind in kinds {
            let kind = kind.into();
            if !self.object_kinds.contains(&kind) {
                self.object_kinds.push(kind);
            }
        }

        self
    }

    /// The object kinds counted in the cluster, in reporting order.
    pub fn object_kinds(&self) -> &[String] {
        &self.object_kinds
    }

    /// Reads the scenario configuration at `path`, anonymizes it and stores it base64 encoded in
    /// [`ScenarioTelemetry::parameters_base64`].
    ///
    /// Every value of a `kubeconfig` key is replaced with `anonymized`, at any nesting depth.
    pub async fn set_parameters_base64(
        &self,
        scenario_telemetry: &mut ScenarioTelemetry,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let path = path.as_ref();

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return ScenarioFileNotFoundSnafu { path }.fail();
            }
            Err(err) => return Err(err).context(ReadScenarioFileSnafu { path }),
        };

        ensure!(
            !content.trim().is_empty(),
            EmptyScenarioFileSnafu { path }
        );

        let anonymized = anonymize_parameters(&content, path)?;
        scenario_telemetry.parameters_base64 = BASE64_STANDARD.encode(anonymized);

        Ok(())
    }

    /// Completes `report` with data collected from `cluster` and posts it to the collector
    /// configured in `config`.
    ///
    /// Nothing happens if telemetry is disabled. Errors are returned for failed cluster lookups
    /// and missing settings, delivery failures are logged and returned as [`Delivery::Failed`].
    #[instrument(skip(self, config, report, cluster))]
    pub async fn send_telemetry<C>(
        &self,
        config: &TelemetryConfig,
        run_uuid: &str,
        report: &mut ChaosRunTelemetry,
        cluster: &C,
    ) -> Result<Delivery>
    where
        C: ClusterIntrospection,
    {
        if !config.enabled {
            tracing::debug!("telemetry is disabled, skipping collection");
            return Ok(Delivery::Disabled);
        }

        tracing::info!("collecting telemetry data");
        report.cloud_infrastructure = cluster
            .cluster_infrastructure()
            .await
            .map_err(boxed)
            .context(CollectClusterDataSnafu {
                what: "cloud infrastructure",
            })?;
        report.network_plugins = cluster
            .cluster_network_plugins()
            .await
            .map_err(boxed)
            .context(CollectClusterDataSnafu {
                what: "network plugins",
            })?;
        report.kubernetes_objects_count = cluster
            .object_count_by_kinds(&self.object_kinds)
            .await
            .map_err(boxed)
            .context(CollectClusterDataSnafu {
                what: "object counts",
            })?;

        let node_summary_infos = cluster
            .node_summary_infos()
            .await
            .map_err(boxed)
            .context(CollectClusterDataSnafu {
                what: "node summary",
            })?;
        report.set_node_summary_infos(node_summary_infos);
        report.node_taints = cluster
            .node_taints()
            .await
            .map_err(boxed)
            .context(CollectClusterDataSnafu { what: "node taints" })?;
        report.run_uuid = run_uuid.to_owned();

        let settings = config
            .delivery_settings()
            .map_err(|fields| MissingTelemetrySettingsSnafu { fields }.build())?;
        let body = report.to_json().context(SerializeReportSnafu)?;

        match self.deliver(settings, run_uuid, body).await {
            Ok(()) => {
                tracing::info!(
                    api_url = %settings.api_url,
                    total_node_count = report.total_node_count,
                    "telemetry data delivered"
                );
                Ok(Delivery::Delivered)
            }
            Err(warning) => {
                tracing::warn!(
                    api_url = %settings.api_url,
                    %warning,
                    "failed to deliver telemetry data"
                );
                Ok(Delivery::Failed(warning))
            }
        }
    }

    async fn deliver(
        &self,
        settings: DeliverySettings<'_>,
        run_uuid: &str,
        body: String,
    ) -> Result<(), DeliveryWarning> {
        let response = self
            .http_client
            .post(settings.api_url.clone())
            .basic_auth(settings.username, Some(settings.password))
            .query(&[("request_id", run_uuid)])
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/plain")
            .body(body)
            .send()
            .await
            .context(TransportSnafu)?;

        let status = response.status();
        if status != StatusCode::OK {
            // The body only adds detail to the warning
            let body = response.text().await.unwrap_or_default();
            return UnexpectedStatusSnafu { status, body }.fail();
        }

        Ok(())
    }
}

fn anonymize_parameters(content: &str, path: &Path) -> Result<String> {
    let mut document: serde_yaml::Value =
        serde_yaml::from_str(content).context(ParseScenarioFileSnafu { path })?;

    document.deep_set_attribute(REDACTED_ATTRIBUTE, &REDACTED_VALUE.into());

    yaml::to_string(&document, SerializeOptions::default())
        .context(SerializeScenarioFileSnafu { path })
}

fn boxed<E>(error: E) -> Box<dyn std::error::Error + Send + Sync>
where
    E: std::error::Error + Send + Sync + 'static,
{
    Box::new(error)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use indoc::indoc;
    use rstest::rstest;
    use tempfile::NamedTempFile;

    use super::*;

    fn scenario_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temporary file");
        file.write_all(content.as_bytes())
            .expect("failed to write temporary file");
        file
    }

    #[tokio::test]
    async fn parameters_are_anonymized_and_encoded() {
        let file = scenario_file(indoc! {"
            kubeconfig: /root/.kube/config
            scenarios:
              - action: delete
                namespace: openshift-etcd
                cluster:
                  kubeconfig:
                    path: ~/.kube/config
        "});
        let mut scenario = ScenarioTelemetry::default();

        KrknTelemetry::default()
            .set_parameters_base64(&mut scenario, file.path())
            .await
            .expect("scenario file must be encoded");

        let decoded = BASE64_STANDARD
            .decode(&scenario.parameters_base64)
            .expect("output must be valid base64");
        let document: serde_yaml::Value =
            serde_yaml::from_slice(&decoded).expect("output must be valid YAML");
        let expected: serde_yaml::Value = serde_yaml::from_str(indoc! {"
            kubeconfig: anonymized
            scenarios:
              - action: delete
                namespace: openshift-etcd
                cluster:
                  kubeconfig: anonymized
        "})
        .unwrap();
        assert_eq!(document, expected);
    }

    #[tokio::test]
    async fn encoded_parameters_decode_into_scenario() {
        let file = scenario_file("- id: node_stop_scenario\n  kubeconfig: secret\n");
        let mut scenario = ScenarioTelemetry::default();

        KrknTelemetry::default()
            .set_parameters_base64(&mut scenario, file.path())
            .await
            .unwrap();
        let parsed = ScenarioTelemetry::try_from(serde_json::to_value(&scenario).unwrap())
            .expect("encoded parameters must decode");

        assert_eq!(
            parsed.parameters,
            serde_json::json!([{"id": "node_stop_scenario", "kubeconfig": "anonymized"}])
        );
    }

    #[tokio::test]
    async fn missing_file_is_reported_with_its_path() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("does-not-exist.yaml");
        let mut scenario = ScenarioTelemetry::default();

        let error = KrknTelemetry::default()
            .set_parameters_base64(&mut scenario, &path)
            .await
            .unwrap_err();

        assert!(matches!(error, Error::ScenarioFileNotFound { .. }));
        assert!(error.to_string().contains("does-not-exist.yaml"));
        assert!(scenario.parameters_base64.is_empty());
    }

    #[rstest]
    #[case::empty("")]
    #[case::whitespace("  \n\n")]
    #[tokio::test]
    async fn empty_file_is_rejected(#[case] content: &str) {
        let file = scenario_file(content);
        let mut scenario = ScenarioTelemetry::default();

        let error = KrknTelemetry::default()
            .set_parameters_base64(&mut scenario, file.path())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::EmptyScenarioFile { .. }));
    }

    #[tokio::test]
    async fn broken_yaml_names_path_and_cause() {
        let file = scenario_file("scenarios: [unclosed\n");
        let mut scenario = ScenarioTelemetry::default();

        let error = KrknTelemetry::default()
            .set_parameters_base64(&mut scenario, file.path())
            .await
            .unwrap_err();

        let message = error.to_string();
        assert!(matches!(error, Error::ParseScenarioFile { .. }));
        assert!(message.contains(&file.path().display().to_string()));
        assert!(message.len() > "failed to parse scenario file".len() + 10);
    }

    #[test]
    fn extra_object_kinds_are_deduplicated() {
        let telemetry = KrknTelemetry::default().with_extra_object_kinds([
            "Pod",
            "StatefulSet",
            "Route",
            "StatefulSet",
            "DaemonSet",
        ]);

        assert_eq!(
            telemetry.object_kinds(),
            [
                "Deployment",
                "Pod",
                "Secret",
                "ConfigMap",
                "Build",
                "Route",
                "StatefulSet",
                "DaemonSet"
            ]
        );
    }

    #[test]
    fn missing_settings_error_lists_all_fields() {
        let error = MissingTelemetrySettingsSnafu {
            fields: vec!["api_url", "password"],
        }
        .build();

        assert_eq!(
            error.to_string(),
            "telemetry collection settings are missing: api_url, password"
        );
    }
}
