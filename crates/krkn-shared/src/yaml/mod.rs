//! Utility functions for processing data in the YAML file format
use std::io::Write;

use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

/// Represents every error which can be encountered during YAML (de)serialization.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to deserialize YAML"))]
    DeserializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to write YAML document separator"))]
    WriteDocumentSeparator { source: std::io::Error },

    #[snafu(display("failed to parse bytes as valid UTF-8 string"))]
    ParseUtf8Bytes { source: std::string::FromUtf8Error },
}

/// Provides configurable options during YAML serialization.
///
/// The default implementation produces a bare document (no leading `---`) and serializes enum
/// variants as singleton maps, which is what scenario documents look like on disk.
#[derive(Clone, Copy, Debug)]
pub struct SerializeOptions {
    /// Adds leading triple dashes (`---`) to the output string.
    pub explicit_document: bool,

    /// Serialize enum variants as YAML maps using the variant name as the key.
    pub singleton_map: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self {
            explicit_document: false,
            singleton_map: true,
        }
    }
}

/// Serializes the given data structure and writes it to a [`Writer`](Write).
pub fn serialize<T, W>(value: &T, mut writer: W, options: SerializeOptions) -> Result<()>
where
    T: serde::Serialize,
    W: Write,
{
    if options.explicit_document {
        writer
            .write_all(b"---\n")
            .context(WriteDocumentSeparatorSnafu)?;
    }

    let mut serializer = serde_yaml::Serializer::new(writer);

    if options.singleton_map {
        serde_yaml::with::singleton_map_recursive::serialize(value, &mut serializer)
            .context(SerializeYamlSnafu)?;
    } else {
        value
            .serialize(&mut serializer)
            .context(SerializeYamlSnafu)?;
    }

    Ok(())
}

/// Serializes the given data structure into a YAML [`String`].
pub fn to_string<T>(value: &T, options: SerializeOptions) -> Result<String>
where
    T: serde::Serialize,
{
    let mut buffer = Vec::new();
    serialize(value, &mut buffer, options)?;
    String::from_utf8(buffer).context(ParseUtf8BytesSnafu)
}

/// Deserializes a single YAML document from `input`.
///
/// An input which only consists of whitespace or comments deserializes into YAML `null`.
pub fn from_slice<T>(input: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    serde_yaml::from_slice(input).context(DeserializeYamlSnafu)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    #[serde(rename_all = "camelCase")]
    enum Target {
        Namespace(String),
        Selector(String),
    }

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Scenario {
        name: String,
        target: Target,
    }

    #[test]
    fn default_options_write_bare_document() {
        let scenario = Scenario {
            name: "pod-kill".to_owned(),
            target: Target::Namespace("openshift-etcd".to_owned()),
        };

        let yaml = to_string(&scenario, SerializeOptions::default()).unwrap();

        assert_eq!(
            yaml,
            indoc! {"
                name: pod-kill
                target:
                  namespace: openshift-etcd
            "}
        );
    }

    #[test]
    fn explicit_document_adds_separator() {
        let options = SerializeOptions {
            explicit_document: true,
            ..SerializeOptions::default()
        };

        let yaml = to_string(&vec!["a", "b"], options).unwrap();

        assert_eq!(yaml, "---\n- a\n- b\n");
    }

    #[test]
    fn parses_document_from_bytes() {
        let scenario: Scenario = from_slice(indoc! {b"
            name: node-hog
            target:
              selector: node-role.kubernetes.io/worker
        "})
        .unwrap();

        assert_eq!(
            scenario.target,
            Target::Selector("node-role.kubernetes.io/worker".to_owned())
        );
    }

    #[test]
    fn parse_error_is_reported() {
        let result = from_slice::<serde_yaml::Value>(b"key: [unclosed");

        assert!(matches!(result, Err(Error::DeserializeYaml { .. })));
    }
}
