//! Serializer and deserializer for stream frameworks that move byte arrays
//! keyed by `(topic, is_key)`.
//!
//! Payloads use the registry wire framing: magic byte `0`, the writer
//! schema id as a big-endian `u32`, then the Avro body.
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::codec::{Codec, datum};
use crate::config::SerdeConfig;
use crate::descriptor::{Reflect, TypeDescriptor, TypeKey};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::registry::{self, SchemaId, SchemaRegistry};
use crate::schema::Schema;

pub const MAGIC_BYTE: u8 = 0;
const HEADER_LEN: usize = 5;

/// Byte-array serializer contract of the host framework.
pub trait Serializer<T>: Send + Sync {
    fn configure(&mut self, props: &BTreeMap<String, String>, is_key: bool) -> Result<()>;

    /// `None` in, `None` out.
    fn serialize(&self, topic: &str, value: Option<&T>) -> Result<Option<Vec<u8>>>;
}

/// Byte-array deserializer contract of the host framework.
pub trait Deserializer<T>: Send + Sync {
    fn configure(&mut self, props: &BTreeMap<String, String>, is_key: bool) -> Result<()>;

    fn deserialize(&self, topic: &str, bytes: Option<&[u8]>) -> Result<Option<T>>;
}

fn configured_registry(
    current: Option<Arc<dyn SchemaRegistry>>,
    config: &SerdeConfig,
) -> Result<Arc<dyn SchemaRegistry>> {
    match (current, config.schema_registry_url.as_deref()) {
        (Some(registry), _) => Ok(registry),
        (None, Some(url)) => registry::from_url(url),
        (None, None) => Err(Error::Config("`schema.registry.url` is required".into())),
    }
}

fn no_registry() -> Error {
    Error::Config("no schema registry; call configure or with_registry first".into())
}

pub(crate) fn frame(id: SchemaId, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub(crate) fn split_frame(bytes: &[u8]) -> Result<(SchemaId, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::malformed(format!("frame of {} bytes is shorter than its header", bytes.len())));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(Error::malformed(format!("unknown magic byte {:#04x}", bytes[0])));
    }
    let id = SchemaId::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((id, &bytes[HEADER_LEN..]))
}

// ------------------------------ Serializer ------------------------------- //

pub struct ReflectSerializer<T> {
    engine: Arc<Engine>,
    registry: Option<Arc<dyn SchemaRegistry>>,
    config: SerdeConfig,
    is_key: bool,
    pinned: OnceCell<Arc<Codec>>,
    ids: RwLock<HashMap<String, SchemaId>>,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Reflect> Default for ReflectSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Reflect> ReflectSerializer<T> {
    pub fn new() -> Self {
        ReflectSerializer {
            engine: Engine::global(),
            registry: None,
            config: SerdeConfig::default(),
            is_key: false,
            pinned: OnceCell::new(),
            ids: RwLock::new(HashMap::new()),
            _marker: PhantomData,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_engine(mut self, engine: Arc<Engine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_config(mut self, config: SerdeConfig) -> Self {
        self.config = config;
        self
    }

    /// Write every value with the codec of `descriptor` instead of one
    /// derived from `T` or the first value.
    pub fn with_descriptor(self, descriptor: &TypeDescriptor) -> Result<Self> {
        let codec = self.engine.codec(descriptor)?;
        Ok(ReflectSerializer { pinned: OnceCell::with_value(codec), ..self })
    }

    /// The schema values are written with, once known.
    pub fn writer_schema(&self) -> Option<&Schema> {
        self.pinned.get().map(|codec| codec.schema())
    }

    fn codec(&self, value: &T) -> Result<&Arc<Codec>> {
        self.pinned.get_or_try_init(|| {
            if T::DYNAMIC {
                let codec = self.engine.codec_for_value(value, &self.config.naming())?;
                warn!(
                    record = %codec.type_name(),
                    "writer schema inferred from the first value; later values must share its shape"
                );
                Ok(codec)
            } else {
                self.engine.codec_for::<T>()
            }
        })
    }

    fn schema_id(&self, topic: &str, schema: &Schema) -> Result<SchemaId> {
        let subject = self.config.subject_name_strategy.subject(topic, self.is_key, schema)?;
        if let Some(id) = self.ids.read().get(&subject) {
            return Ok(*id);
        }
        let registry = self.registry.as_ref().ok_or_else(no_registry)?;
        let id = if self.config.auto_register_schemas {
            registry.register(&subject, schema)?
        } else {
            registry.id_of(&subject, schema)?
        };
        debug!(%subject, id, "resolved writer schema id");
        self.ids.write().insert(subject, id);
        Ok(id)
    }
}

impl<T: Reflect> Serializer<T> for ReflectSerializer<T> {
    fn configure(&mut self, props: &BTreeMap<String, String>, is_key: bool) -> Result<()> {
        let config = SerdeConfig::from_props(props)?;
        self.registry = Some(configured_registry(self.registry.take(), &config)?);
        self.config = config;
        self.is_key = is_key;
        self.ids.get_mut().clear();
        Ok(())
    }

    fn serialize(&self, topic: &str, value: Option<&T>) -> Result<Option<Vec<u8>>> {
        let Some(value) = value else {
            return Ok(None);
        };
        let codec = self.codec(value)?;
        let id = self.schema_id(topic, codec.schema())?;
        let body = codec.encode_to_vec(value as &dyn Any)?;
        Ok(Some(frame(id, &body)))
    }
}

// ----------------------------- Deserializer ------------------------------ //

struct WriterSchema {
    schema: Schema,
    /// Writer schema equals the reader's; only then is a typed decode allowed.
    matches_reader: bool,
}

pub struct ReflectDeserializer<T> {
    engine: Arc<Engine>,
    registry: Option<Arc<dyn SchemaRegistry>>,
    config: SerdeConfig,
    is_key: bool,
    reader: OnceCell<Arc<Codec>>,
    /// The reader codec came from an explicit descriptor.
    pinned: bool,
    writers: RwLock<HashMap<SchemaId, Arc<WriterSchema>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Reflect> Default for ReflectDeserializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Reflect> ReflectDeserializer<T> {
    pub fn new() -> Self {
        ReflectDeserializer {
            engine: Engine::global(),
            registry: None,
            config: SerdeConfig::default(),
            is_key: false,
            reader: OnceCell::new(),
            pinned: false,
            writers: RwLock::new(HashMap::new()),
            _marker: PhantomData,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_engine(mut self, engine: Arc<Engine>) -> Self {
        self.engine = engine;
        self
    }

    /// Read with the codec of `descriptor`. Only payloads whose writer
    /// schema equals its schema are decoded; a `serde_json::Value` reader
    /// then returns objects shaped by the descriptor instead of by each
    /// writer schema.
    pub fn with_descriptor(self, descriptor: &TypeDescriptor) -> Result<Self> {
        if !T::DYNAMIC && descriptor.key() != TypeKey::of::<T>() {
            return Err(Error::construction(
                T::type_name().fullname(),
                format!("reader descriptor `{}` describes another type", descriptor.name()),
            ));
        }
        let codec = self.engine.codec(descriptor)?;
        Ok(ReflectDeserializer { reader: OnceCell::with_value(codec), pinned: true, ..self })
    }

    /// The schema payloads are read with, once known.
    pub fn reader_schema(&self) -> Option<&Schema> {
        self.reader.get().map(|codec| codec.schema())
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn config(&self) -> &SerdeConfig {
        &self.config
    }

    fn reader(&self) -> Result<&Arc<Codec>> {
        self.reader.get_or_try_init(|| self.engine.codec_for::<T>())
    }

    fn writer(&self, id: SchemaId) -> Result<Arc<WriterSchema>> {
        if let Some(writer) = self.writers.read().get(&id) {
            return Ok(Arc::clone(writer));
        }
        let registry = self.registry.as_ref().ok_or_else(no_registry)?;
        let schema = registry.resolve(id)?;
        let matches_reader = if self.decodes_generically() {
            false
        } else {
            schema.canonical_form() == self.reader()?.schema().canonical_form()
        };
        debug!(id, matches_reader, "resolved writer schema");
        let writer = Arc::new(WriterSchema { schema, matches_reader });
        Ok(Arc::clone(self.writers.write().entry(id).or_insert(writer)))
    }

    /// Untyped readers without a pinned descriptor follow each writer schema.
    fn decodes_generically(&self) -> bool {
        T::DYNAMIC && !self.pinned
    }

    fn decode(&self, id: SchemaId, body: &[u8]) -> Result<T> {
        let writer = self.writer(id)?;
        if self.decodes_generically() {
            let value: Box<dyn Any> = Box::new(datum::decode_json(&writer.schema, body)?);
            return value
                .downcast::<T>()
                .map(|v| *v)
                .map_err(|_| Error::construction(T::type_name().fullname(), "dynamic target is not a JSON value"));
        }
        let reader = self.reader()?;
        if !writer.matches_reader {
            return Err(Error::SchemaMismatch {
                path: reader.type_name().to_string(),
                detail: format!(
                    "writer schema {id} differs from the reader schema; only identical schemas are decoded"
                ),
            });
        }
        reader.decode_as::<T>(body)
    }
}

impl<T: Reflect> Deserializer<T> for ReflectDeserializer<T> {
    fn configure(&mut self, props: &BTreeMap<String, String>, is_key: bool) -> Result<()> {
        let config = SerdeConfig::from_props(props)?;
        self.registry = Some(configured_registry(self.registry.take(), &config)?);
        self.config = config;
        self.is_key = is_key;
        self.writers.get_mut().clear();
        Ok(())
    }

    fn deserialize(&self, _topic: &str, bytes: Option<&[u8]>) -> Result<Option<T>> {
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let (id, body) = split_frame(bytes)?;
        self.decode(id, body).map(Some)
    }
}

// --------------------------------- Serde --------------------------------- //

/// A serializer and deserializer for `T` sharing one engine and registry.
pub struct ReflectSerde<T> {
    serializer: ReflectSerializer<T>,
    deserializer: ReflectDeserializer<T>,
}

impl<T: Reflect> Default for ReflectSerde<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Reflect> ReflectSerde<T> {
    pub fn new() -> Self {
        ReflectSerde { serializer: ReflectSerializer::new(), deserializer: ReflectDeserializer::new() }
    }

    pub fn with_registry(self, registry: Arc<dyn SchemaRegistry>) -> Self {
        ReflectSerde {
            serializer: self.serializer.with_registry(Arc::clone(&registry)),
            deserializer: self.deserializer.with_registry(registry),
        }
    }

    pub fn with_engine(self, engine: Arc<Engine>) -> Self {
        ReflectSerde {
            serializer: self.serializer.with_engine(Arc::clone(&engine)),
            deserializer: self.deserializer.with_engine(engine),
        }
    }

    pub fn configure(&mut self, props: &BTreeMap<String, String>, is_key: bool) -> Result<()> {
        Serializer::configure(&mut self.serializer, props, is_key)?;
        Deserializer::configure(&mut self.deserializer, props, is_key)
    }

    pub fn serializer(&self) -> &ReflectSerializer<T> {
        &self.serializer
    }

    pub fn deserializer(&self) -> &ReflectDeserializer<T> {
        &self.deserializer
    }

    pub fn serialize(&self, topic: &str, value: Option<&T>) -> Result<Option<Vec<u8>>> {
        self.serializer.serialize(topic, value)
    }

    pub fn deserialize(&self, topic: &str, bytes: Option<&[u8]>) -> Result<Option<T>> {
        self.deserializer.deserialize(topic, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::infer_descriptor;
    use crate::registry::MemoryRegistry;
    use crate::walker::DynamicNaming;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    #[derive(Debug, PartialEq)]
    struct Click {
        page: String,
        ms: i64,
    }
    crate::reflect_record!(Click { page, ms });

    #[derive(Debug, PartialEq)]
    struct Tap {
        page: String,
        ms: i32,
    }
    crate::reflect_record!(Tap { page, ms });

    fn serde<T: Reflect>(registry: &Arc<MemoryRegistry>) -> ReflectSerde<T> {
        let registry: Arc<dyn SchemaRegistry> = registry.clone();
        ReflectSerde::new().with_engine(Arc::new(Engine::new())).with_registry(registry)
    }

    #[test]
    fn frames_carry_magic_and_id() {
        let registry = Arc::new(MemoryRegistry::new());
        let serde = serde::<Click>(&registry);
        let click = Click { page: "/".into(), ms: 3 };
        let bytes = serde.serialize("clicks", Some(&click)).unwrap().unwrap();
        assert_eq!(&bytes[..5], &[0, 0, 0, 0, 1]);
        assert_eq!(registry.subjects(), ["clicks-value"]);
        assert_eq!(serde.deserialize("clicks", Some(&bytes)).unwrap(), Some(click));
    }

    #[test]
    fn null_passes_through() {
        let serde = serde::<Click>(&Arc::new(MemoryRegistry::new()));
        assert_eq!(serde.serialize("t", None).unwrap(), None);
        assert_eq!(serde.deserialize("t", None).unwrap(), None);
    }

    #[test]
    fn short_or_foreign_frames_are_malformed() {
        let serde = serde::<Click>(&Arc::new(MemoryRegistry::new()));
        assert!(matches!(serde.deserialize("t", Some(&[0, 0, 1])), Err(Error::Malformed(_))));
        assert!(matches!(serde.deserialize("t", Some(&[1, 0, 0, 0, 1, 2])), Err(Error::Malformed(_))));
    }

    #[test]
    fn typed_readers_reject_other_writer_schemas() {
        let registry = Arc::new(MemoryRegistry::new());
        let tap = Tap { page: "/".into(), ms: 1 };
        let bytes = serde::<Tap>(&registry).serialize("t", Some(&tap)).unwrap().unwrap();
        let err = serde::<Click>(&registry).deserialize("t", Some(&bytes)).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }), "{err}");
    }

    #[test]
    fn dynamic_values_pin_the_first_shape() {
        let registry = Arc::new(MemoryRegistry::new());
        let serde = serde::<Value>(&registry);
        let first = json!({"user": "ann", "n": 1});
        let bytes = serde.serialize("events", Some(&first)).unwrap().unwrap();
        assert_eq!(serde.deserialize("events", Some(&bytes)).unwrap(), Some(first));
        assert_eq!(serde.serializer().writer_schema().and_then(Schema::name).map(|n| n.name.as_str()), Some("Root"));

        let err = serde.serialize("events", Some(&json!({"user": 7}))).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }), "{err}");
    }

    #[test]
    fn pinned_readers_reject_other_writer_schemas() {
        let registry = Arc::new(MemoryRegistry::new());
        let engine = Arc::new(Engine::new());
        let reader_shape = infer_descriptor([&json!({"id": 1, "tag": "a"})], &DynamicNaming::default()).unwrap();
        let reader = ReflectDeserializer::<Value>::new()
            .with_engine(Arc::clone(&engine))
            .with_registry(registry.clone())
            .with_descriptor(&reader_shape)
            .unwrap();
        assert_eq!(reader.reader_schema().and_then(Schema::name).map(|n| n.name.as_str()), Some("Root"));

        let same = serde::<Value>(&registry).serialize("t", Some(&json!({"id": 2, "tag": "b"}))).unwrap();
        assert_eq!(reader.deserialize("t", same.as_deref()).unwrap(), Some(json!({"id": 2, "tag": "b"})));

        let other = serde::<Value>(&registry).serialize("t", Some(&json!({"id": "2"}))).unwrap();
        let err = reader.deserialize("t", other.as_deref()).unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }), "{err}");
    }

    #[test]
    fn typed_readers_refuse_a_descriptor_of_another_type() {
        let engine = Engine::new();
        let tap = engine.describe::<Tap>().unwrap();
        assert!(ReflectDeserializer::<Click>::new().with_descriptor(&tap).is_err());
        let click = engine.describe::<Click>().unwrap();
        assert!(ReflectDeserializer::<Click>::new().with_descriptor(&click).is_ok());
    }
}
