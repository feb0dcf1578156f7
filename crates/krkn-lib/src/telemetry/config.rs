use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use url::Url;

/// Settings of the telemetry delivery, read from the `telemetry` section of the krkn
/// configuration.
///
/// Additionally, this struct can be used as CLI arguments. This functionality is only available
/// if the feature `clap` is enabled.
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[derive(Clone, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Send the telemetry of the chaos run to the telemetry collector.
    #[cfg_attr(
        feature = "clap",
        arg(long = "telemetry-enabled", env = "KRKN_TELEMETRY_ENABLED")
    )]
    pub enabled: bool,

    /// Endpoint of the telemetry collector.
    #[cfg_attr(
        feature = "clap",
        arg(long = "telemetry-api-url", env = "KRKN_TELEMETRY_API_URL")
    )]
    pub api_url: Option<Url>,

    #[cfg_attr(
        feature = "clap",
        arg(long = "telemetry-username", env = "KRKN_TELEMETRY_USERNAME")
    )]
    pub username: Option<String>,

    #[cfg_attr(
        feature = "clap",
        arg(
            long = "telemetry-password",
            env = "KRKN_TELEMETRY_PASSWORD",
            hide_env_values = true
        )
    )]
    pub password: Option<String>,
}

/// The validated settings needed to deliver a report.
#[derive(Clone, Copy)]
pub(crate) struct DeliverySettings<'a> {
    pub api_url: &'a Url,
    pub username: &'a str,
    pub password: &'a str,
}

impl TelemetryConfig {
    /// Returns the names of the delivery settings which are not set, in declaration order.
    ///
    /// Empty strings count as not set.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();

        if self.api_url.is_none() {
            missing.push("api_url");
        }
        if non_empty(self.username.as_deref()).is_none() {
            missing.push("username");
        }
        if non_empty(self.password.as_deref()).is_none() {
            missing.push("password");
        }

        missing
    }

    pub(crate) fn delivery_settings(&self) -> Result<DeliverySettings<'_>, Vec<&'static str>> {
        match (
            self.api_url.as_ref(),
            non_empty(self.username.as_deref()),
            non_empty(self.password.as_deref()),
        ) {
            (Some(api_url), Some(username), Some(password)) => Ok(DeliverySettings {
                api_url,
                username,
                password,
            }),
            _ => Err(self.missing_fields()),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

// The password must never end up in logs
impl Debug for TelemetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("enabled", &self.enabled)
            .field("api_url", &self.api_url.as_ref().map(Url::as_str))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
