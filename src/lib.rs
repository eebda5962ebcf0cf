//! Reflective Avro schema inference and codec synthesis.
//!
//! Types describe themselves once through [`Reflect`]; the [`Walker`] turns
//! that into a [`TypeDescriptor`], the [`Synthesizer`] turns descriptors into an
//! Avro [`Schema`], and [`Codec`]s are built once per type and cached by the
//! [`Engine`]. The [`serdes`] module wraps all of it behind a stream
//! framework's byte-array serializer contract with schema-registry framing.
//!
//! ```ignore
//! struct Person { name: String, friends: Vec<Person> }
//! avro_reflect::reflect_record!(Person { name, friends });
//!
//! let bytes = avro_reflect::to_avro(&person)?;
//! let back: Person = avro_reflect::from_avro(&bytes)?;
//! ```
pub mod binary;
pub mod cache;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod dynamic;
pub mod engine;
pub mod error;
pub mod path_de;
pub mod registry;
pub mod schema;
pub mod serdes;
pub mod synth;
pub mod walker;

pub use cache::CodecCache;
pub use codec::Codec;
pub use config::SerdeConfig;
pub use descriptor::builder::{RecordBuilder, UnionBuilder};
pub use descriptor::{
    Bytes, Constructor, DynValue, EnumShape, FieldDescriptor, FieldValues, Kind, NativeType, Reflect, Scalar,
    Shape, TypeDescriptor, TypeKey, TypeName,
};
pub use engine::Engine;
pub use error::{Error, Result};
pub use registry::{MemoryRegistry, SchemaId, SchemaRegistry, SubjectNameStrategy};
pub use schema::{Name, Primitive, Schema};
pub use serdes::{Deserializer, ReflectDeserializer, ReflectSerde, ReflectSerializer, Serializer};
pub use synth::Synthesizer;
pub use walker::{DescriptorRegistry, DynamicNaming, Walker};

/// Avro schema of `T`, synthesized through the process-wide engine.
pub fn schema_of<T: Reflect>() -> Result<Schema> {
    Engine::global().schema_of::<T>()
}

/// Avro binary body of `value` (no registry framing).
pub fn to_avro<T: Reflect>(value: &T) -> Result<Vec<u8>> {
    Engine::global().encode(value)
}

/// Decode an Avro binary body written with the schema of `T`.
pub fn from_avro<T: Reflect>(bytes: &[u8]) -> Result<T> {
    Engine::global().decode(bytes)
}
