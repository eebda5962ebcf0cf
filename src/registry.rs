//! Schema registries and subject naming.
//!
//! Framed payloads carry a schema id instead of the schema; the registry maps
//! subjects and schemas to ids and ids back to schemas. [`MemoryRegistry`] is
//! the in-process implementation; `mock://<scope>` urls resolve to a shared
//! one per scope.
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::Schema;

pub type SchemaId = u32;

pub trait SchemaRegistry: Send + Sync {
    /// Register `schema` under `subject`, returning its id. Registering an
    /// already known schema returns the existing id.
    fn register(&self, subject: &str, schema: &Schema) -> Result<SchemaId>;

    /// Id of `schema` if it is registered under `subject`; never registers.
    fn id_of(&self, subject: &str, schema: &Schema) -> Result<SchemaId>;

    fn resolve(&self, id: SchemaId) -> Result<Schema>;
}

#[derive(Default)]
struct State {
    ids: HashMap<String, SchemaId>,
    /// canonical text of id `n` at `n - 1`
    texts: Vec<String>,
    subjects: IndexMap<String, Vec<SchemaId>>,
}

/// Ids start at 1 and are shared by every subject registering the same schema.
#[derive(Default)]
pub struct MemoryRegistry {
    state: RwLock<State>,
}

static SCOPES: Lazy<Mutex<HashMap<String, Arc<MemoryRegistry>>>> = Lazy::new(Default::default);

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by everyone naming `scope`.
    pub fn scoped(scope: &str) -> Arc<MemoryRegistry> {
        Arc::clone(SCOPES.lock().entry(scope.to_string()).or_default())
    }

    pub fn subjects(&self) -> Vec<String> {
        self.state.read().subjects.keys().cloned().collect()
    }

    /// Schema ids registered under `subject`, oldest first.
    pub fn versions(&self, subject: &str) -> Vec<SchemaId> {
        self.state.read().subjects.get(subject).cloned().unwrap_or_default()
    }
}

impl SchemaRegistry for MemoryRegistry {
    fn register(&self, subject: &str, schema: &Schema) -> Result<SchemaId> {
        let text = schema.canonical_form();
        let mut guard = self.state.write();
        let state = &mut *guard;
        let id = match state.ids.get(&text).copied() {
            Some(id) => id,
            None => {
                let id = SchemaId::try_from(state.texts.len() + 1)
                    .map_err(|_| Error::Registry("schema id space exhausted".into()))?;
                state.texts.push(text.clone());
                state.ids.insert(text, id);
                id
            }
        };
        let versions = state.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
            debug!(subject, id, version = versions.len(), "registered schema");
        }
        Ok(id)
    }

    fn id_of(&self, subject: &str, schema: &Schema) -> Result<SchemaId> {
        let state = self.state.read();
        state
            .ids
            .get(&schema.canonical_form())
            .copied()
            .filter(|id| state.subjects.get(subject).is_some_and(|versions| versions.contains(id)))
            .ok_or_else(|| Error::Registry(format!("schema is not registered under subject `{subject}`")))
    }

    fn resolve(&self, id: SchemaId) -> Result<Schema> {
        let text = {
            let state = self.state.read();
            (id as usize)
                .checked_sub(1)
                .and_then(|i| state.texts.get(i))
                .cloned()
                .ok_or_else(|| Error::Registry(format!("unknown schema id {id}")))?
        };
        Schema::parse_str(&text)
    }
}

/// Registry client for `url`. Only in-process `mock://` registries are built
/// here; anything else must be passed in explicitly.
pub fn from_url(url: &str) -> Result<Arc<dyn SchemaRegistry>> {
    match url.strip_prefix("mock://") {
        Some(scope) => {
            let registry: Arc<dyn SchemaRegistry> = MemoryRegistry::scoped(scope);
            Ok(registry)
        }
        None => Err(Error::Config(format!(
            "no client for schema registry `{url}`; pass a SchemaRegistry implementation explicitly"
        ))),
    }
}

/// How a topic and a schema map to a registry subject.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubjectNameStrategy {
    /// `<topic>-key` / `<topic>-value`
    #[default]
    #[serde(alias = "io.confluent.kafka.serializers.subject.TopicNameStrategy")]
    Topic,
    /// The record's full name.
    #[serde(alias = "io.confluent.kafka.serializers.subject.RecordNameStrategy")]
    Record,
    /// `<topic>-<record full name>`
    #[serde(alias = "io.confluent.kafka.serializers.subject.TopicRecordNameStrategy")]
    TopicRecord,
}

impl SubjectNameStrategy {
    pub fn subject(self, topic: &str, is_key: bool, schema: &Schema) -> Result<String> {
        let record_name = || {
            schema
                .name()
                .map(|n| n.fullname())
                .ok_or_else(|| Error::Config(format!("subject strategy {self:?} needs a named schema")))
        };
        Ok(match self {
            SubjectNameStrategy::Topic => format!("{topic}-{}", if is_key { "key" } else { "value" }),
            SubjectNameStrategy::Record => record_name()?,
            SubjectNameStrategy::TopicRecord => format!("{topic}-{}", record_name()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Primitive;

    fn named(name: &str) -> Schema {
        Schema::parse_str(&format!(
            r#"{{"type":"record","name":"{name}","namespace":"ns","fields":[{{"name":"a","type":"int"}}]}}"#
        ))
        .unwrap()
    }

    #[test]
    fn ids_start_at_one_and_are_deduplicated() {
        let r = MemoryRegistry::new();
        let a = named("A");
        assert_eq!(r.register("t-value", &a).unwrap(), 1);
        assert_eq!(r.register("t-value", &a).unwrap(), 1);
        assert_eq!(r.register("u-value", &a).unwrap(), 1);
        assert_eq!(r.register("t-value", &named("B")).unwrap(), 2);
        assert_eq!(r.versions("t-value"), [1, 2]);
        assert_eq!(r.subjects(), ["t-value", "u-value"]);
        assert_eq!(r.resolve(2).unwrap(), named("B"));
    }

    #[test]
    fn lookups_never_register() {
        let r = MemoryRegistry::new();
        let a = named("A");
        assert!(matches!(r.id_of("t-value", &a), Err(Error::Registry(_))));
        r.register("t-value", &a).unwrap();
        assert_eq!(r.id_of("t-value", &a).unwrap(), 1);
        assert!(r.id_of("other", &a).is_err());
        assert!(r.resolve(0).is_err());
        assert!(r.resolve(9).is_err());
    }

    #[test]
    fn mock_urls_share_a_registry_per_scope() {
        let a = from_url("mock://registry-tests-shared").unwrap();
        let b = from_url("mock://registry-tests-shared").unwrap();
        let id = a.register("s", &named("Shared")).unwrap();
        assert_eq!(b.resolve(id).unwrap(), named("Shared"));
        assert!(from_url("http://localhost:8081").is_err());
    }

    #[test]
    fn subject_strategies() {
        let s = named("Person");
        assert_eq!(SubjectNameStrategy::Topic.subject("people", false, &s).unwrap(), "people-value");
        assert_eq!(SubjectNameStrategy::Topic.subject("people", true, &s).unwrap(), "people-key");
        assert_eq!(SubjectNameStrategy::Record.subject("people", false, &s).unwrap(), "ns.Person");
        assert_eq!(SubjectNameStrategy::TopicRecord.subject("people", false, &s).unwrap(), "people-ns.Person");
        let plain = Schema::primitive(Primitive::Long);
        assert!(SubjectNameStrategy::Record.subject("t", false, &plain).is_err());
    }
}
