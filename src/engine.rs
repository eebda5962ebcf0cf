//! The engine ties the pipeline together: walk → synthesize → compile → cache.
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::cache::CodecCache;
use crate::codec::Codec;
use crate::descriptor::{Reflect, TypeDescriptor};
use crate::error::Result;
use crate::schema::Schema;
use crate::synth::Synthesizer;
use crate::walker::{DescriptorRegistry, DynamicNaming};

static GLOBAL: Lazy<Arc<Engine>> = Lazy::new(|| Arc::new(Engine::new()));

/// Descriptor registry plus codec cache. Cheap to share; every method takes `&self`.
#[derive(Default)]
pub struct Engine {
    descriptors: DescriptorRegistry,
    codecs: CodecCache,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide engine used by the free functions and default serdes.
    pub fn global() -> Arc<Engine> {
        Arc::clone(&GLOBAL)
    }

    pub fn descriptors(&self) -> &DescriptorRegistry {
        &self.descriptors
    }

    pub fn codecs(&self) -> &CodecCache {
        &self.codecs
    }

    pub fn describe<T: Reflect>(&self) -> Result<Arc<TypeDescriptor>> {
        self.descriptors.describe::<T>()
    }

    pub fn describe_value<T: Reflect>(&self, value: &T, naming: &DynamicNaming) -> Result<Arc<TypeDescriptor>> {
        self.descriptors.describe_value(value, naming)
    }

    pub fn synthesize(&self, descriptor: &TypeDescriptor) -> Result<Schema> {
        Synthesizer::new(&self.descriptors).synthesize(descriptor)
    }

    /// Schema of `T`, served from the codec cache when one exists.
    pub fn schema_of<T: Reflect>(&self) -> Result<Schema> {
        let d = self.describe::<T>()?;
        match self.codecs.get(d.key()) {
            Some(codec) => Ok(codec.schema().clone()),
            None => self.synthesize(&d),
        }
    }

    pub fn codec(&self, descriptor: &TypeDescriptor) -> Result<Arc<Codec>> {
        self.codecs.get_or_build(descriptor, |d| Codec::build(&self.descriptors, d))
    }

    pub fn codec_for<T: Reflect>(&self) -> Result<Arc<Codec>> {
        let d = self.describe::<T>()?;
        self.codec(&d)
    }

    /// Codec for one value; dynamic values get a codec for their inferred shape.
    pub fn codec_for_value<T: Reflect>(&self, value: &T, naming: &DynamicNaming) -> Result<Arc<Codec>> {
        if T::DYNAMIC {
            let d = self.describe_value(value, naming)?;
            self.codec(&d)
        } else {
            self.codec_for::<T>()
        }
    }

    pub fn encode<T: Reflect>(&self, value: &T) -> Result<Vec<u8>> {
        self.codec_for_value(value, &DynamicNaming::default())?.encode_to_vec(value)
    }

    /// Decode a body written with `T`'s own schema.
    pub fn decode<T: Reflect>(&self, bytes: &[u8]) -> Result<T> {
        self.codec_for::<T>()?.decode_as::<T>(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    #[derive(Debug, PartialEq)]
    struct Reading {
        sensor: String,
        celsius: f64,
    }
    crate::reflect_record!(Reading { sensor, celsius });

    #[test]
    fn schemas_are_identical_across_engines() {
        let a = Engine::new().schema_of::<Reading>().unwrap();
        let b = Engine::new().schema_of::<Reading>().unwrap();
        assert_eq!(a.canonical_form(), b.canonical_form());
    }

    #[test]
    fn typed_values_round_trip() {
        let engine = Engine::new();
        let r = Reading { sensor: "s1".into(), celsius: 21.5 };
        let bytes = engine.encode(&r).unwrap();
        assert_eq!(engine.decode::<Reading>(&bytes).unwrap(), r);
        assert_eq!(engine.codecs().builds(), 1);
    }

    #[test]
    fn dynamic_values_share_codecs_by_shape() {
        let engine = Engine::new();
        engine.encode(&json!({"id": 1, "name": "a"})).unwrap();
        engine.encode(&json!({"id": 2, "name": "b"})).unwrap();
        engine.encode(&json!({"id": "3"})).unwrap();
        assert_eq!(engine.codecs().builds(), 2);
    }

    #[test]
    fn json_values_cannot_be_described_statically() {
        let err = Engine::new().codec_for::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { .. }));
    }
}
