//! Serializer configuration, read from the string properties a stream
//! framework hands to `configure`.
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::path_de;
use crate::registry::SubjectNameStrategy;
use crate::walker::DynamicNaming;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerdeConfig {
    #[serde(rename = "schema.registry.url")]
    pub schema_registry_url: Option<String>,

    #[serde(rename = "auto.register.schemas", deserialize_with = "flag")]
    pub auto_register_schemas: bool,

    #[serde(rename = "subject.name.strategy")]
    pub subject_name_strategy: SubjectNameStrategy,

    /// Record name for values whose structure is inferred at runtime.
    #[serde(rename = "dynamic.record.name")]
    pub dynamic_record_name: String,

    #[serde(rename = "dynamic.record.namespace")]
    pub dynamic_record_namespace: Option<String>,
}

impl Default for SerdeConfig {
    fn default() -> Self {
        SerdeConfig {
            schema_registry_url: None,
            auto_register_schemas: true,
            subject_name_strategy: SubjectNameStrategy::default(),
            dynamic_record_name: DynamicNaming::default().root,
            dynamic_record_namespace: None,
        }
    }
}

impl SerdeConfig {
    /// Unknown keys are ignored; they usually belong to the host framework.
    pub fn from_props(props: &BTreeMap<String, String>) -> Result<Self> {
        let doc = Value::Object(props.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect());
        path_de::from_value_with_path(doc).map_err(Error::Config)
    }

    pub fn naming(&self) -> DynamicNaming {
        DynamicNaming { namespace: self.dynamic_record_namespace.clone(), root: self.dynamic_record_name.clone() }
    }
}

/// Accepts a JSON bool or the strings `true` / `false` in any case.
fn flag<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(de)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(serde::de::Error::custom(format!("expected true or false, found `{s}`"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_props_give_defaults() {
        assert_eq!(SerdeConfig::from_props(&BTreeMap::new()).unwrap(), SerdeConfig::default());
        assert!(SerdeConfig::default().auto_register_schemas);
    }

    #[test]
    fn known_keys_are_read_and_unknown_ignored() {
        let cfg = SerdeConfig::from_props(&props(&[
            ("schema.registry.url", "mock://cfg"),
            ("auto.register.schemas", "FALSE"),
            ("subject.name.strategy", "topic-record"),
            ("dynamic.record.name", "Event"),
            ("dynamic.record.namespace", "com.acme"),
            ("bootstrap.servers", "localhost:9092"),
        ]))
        .unwrap();
        assert_eq!(cfg.schema_registry_url.as_deref(), Some("mock://cfg"));
        assert!(!cfg.auto_register_schemas);
        assert_eq!(cfg.subject_name_strategy, SubjectNameStrategy::TopicRecord);
        assert_eq!(cfg.naming(), DynamicNaming { namespace: Some("com.acme".into()), root: "Event".into() });
    }

    #[test]
    fn bad_values_name_the_key() {
        let err = SerdeConfig::from_props(&props(&[("auto.register.schemas", "maybe")])).unwrap_err();
        let Error::Config(msg) = err else { panic!("not a config error") };
        assert!(msg.contains("auto.register.schemas"), "{msg}");
        assert!(msg.contains("maybe"), "{msg}");
    }

    #[test]
    fn confluent_strategy_class_names_are_accepted() {
        let cfg = SerdeConfig::from_props(&props(&[(
            "subject.name.strategy",
            "io.confluent.kafka.serializers.subject.RecordNameStrategy",
        )]))
        .unwrap();
        assert_eq!(cfg.subject_name_strategy, SubjectNameStrategy::Record);
    }
}
