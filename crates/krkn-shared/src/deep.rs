//! Recursive lookups and rewrites of named keys in dynamically typed documents.
//!
//! Both [`serde_yaml::Value`] and [`serde_json::Value`] are trees of scalars, sequences and
//! mappings. [`DeepAttributes`] walks these trees structurally, so documents loaded from scenario
//! files can be anonymized before they leave the machine.

/// Structural walks over a document tree looking for mapping keys with a given name.
pub trait DeepAttributes: Sized {
    /// Overwrites the value of every mapping entry whose key is `attribute` with `replacement`,
    /// at any nesting depth.
    ///
    /// Sequences are walked element by element. For mappings, nested containers are walked first,
    /// then the entry itself is replaced if its key matches, regardless of the type of its value.
    /// Calling this on a scalar root does nothing. Returns `self` for chaining.
    fn deep_set_attribute(&mut self, attribute: &str, replacement: &Self) -> &mut Self;

    /// Collects the values of every mapping entry whose key is `attribute`, in document order.
    fn deep_get_attribute(&self, attribute: &str) -> Vec<&Self>;
}

impl DeepAttributes for serde_yaml::Value {
    fn deep_set_attribute(&mut self, attribute: &str, replacement: &Self) -> &mut Self {
        match self {
            Self::Sequence(items) => {
                for item in items {
                    item.deep_set_attribute(attribute, replacement);
                }
            }
            Self::Mapping(mapping) => {
                for (key, value) in mapping.iter_mut() {
                    if matches!(value, Self::Sequence(_) | Self::Mapping(_) | Self::Tagged(_)) {
                        value.deep_set_attribute(attribute, replacement);
                    }

                    if key.as_str() == Some(attribute) {
                        *value = replacement.clone();
                    }
                }
            }
            Self::Tagged(tagged) => {
                tagged.value.deep_set_attribute(attribute, replacement);
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }

        self
    }

    fn deep_get_attribute(&self, attribute: &str) -> Vec<&Self> {
        let mut found = Vec::new();
        collect_yaml(self, attribute, &mut found);
        found
    }
}

fn collect_yaml<'a>(
    value: &'a serde_yaml::Value,
    attribute: &str,
    found: &mut Vec<&'a serde_yaml::Value>,
) {
    match value {
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                collect_yaml(item, attribute, found);
            }
        }
        serde_yaml::Value::Mapping(mapping) => {
            for (key, value) in mapping {
                if key.as_str() == Some(attribute) {
                    found.push(value);
                }
                collect_yaml(value, attribute, found);
            }
        }
        serde_yaml::Value::Tagged(tagged) => collect_yaml(&tagged.value, attribute, found),
        _ => {}
    }
}

impl DeepAttributes for serde_json::Value {
    fn deep_set_attribute(&mut self, attribute: &str, replacement: &Self) -> &mut Self {
        match self {
            Self::Array(items) => {
                for item in items {
                    item.deep_set_attribute(attribute, replacement);
                }
            }
            Self::Object(object) => {
                for (key, value) in object.iter_mut() {
                    if value.is_object() || value.is_array() {
                        value.deep_set_attribute(attribute, replacement);
                    }

                    if key == attribute {
                        *value = replacement.clone();
                    }
                }
            }
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => {}
        }

        self
    }

    fn deep_get_attribute(&self, attribute: &str) -> Vec<&Self> {
        let mut found = Vec::new();
        collect_json(self, attribute, &mut found);
        found
    }
}

fn collect_json<'a>(
    value: &'a serde_json::Value,
    attribute: &str,
    found: &mut Vec<&'a serde_json::Value>,
) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                collect_json(item, attribute, found);
            }
        }
        serde_json::Value::Object(object) => {
            for (key, value) in object {
                if key == attribute {
                    found.push(value);
                }
                collect_json(value, attribute, found);
            }
        }
        _ => {}
    }
}
