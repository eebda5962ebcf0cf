//! Descriptor graph → Avro [`Schema`].
//!
//! Traversal is depth-first in declaration order. A named type is registered
//! before its fields are visited, so any later occurrence (including a
//! recursive one) becomes a reference by full name. Two distinct types that
//! would share a full name are rejected rather than merged.
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::descriptor::{EnumShape, NativeType, RecordShape, Shape, TypeDescriptor, TypeKey, TypeName};
use crate::error::{Error, Result};
use crate::schema::{EnumSchema, FieldSchema, Name, Primitive, RecordSchema, Schema};
use crate::walker::DescriptorRegistry;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// Avro primitive for a host primitive, plus the host width when the two differ.
///
/// | host                            | avro      |
/// |---------------------------------|-----------|
/// | `()`                            | `null`    |
/// | `bool`                          | `boolean` |
/// | `i8` `i16` `u8` `u16` `i32`     | `int`     |
/// | `char`                          | `int`     |
/// | `i64` `isize` `u32` `u64` `usize` | `long`  |
/// | `f32` / `f64`                   | `float` / `double` |
/// | `String` / `Bytes`              | `string` / `bytes` |
pub fn promote(native: NativeType) -> (Primitive, Option<&'static str>) {
    use NativeType as N;
    match native {
        N::Unit => (Primitive::Null, None),
        N::Bool => (Primitive::Boolean, None),
        N::I8 | N::I16 | N::U8 | N::U16 | N::Char => (Primitive::Int, Some(native.rust_name())),
        N::I32 => (Primitive::Int, None),
        N::I64 => (Primitive::Long, None),
        N::Isize | N::U32 | N::U64 | N::Usize => (Primitive::Long, Some(native.rust_name())),
        N::F32 => (Primitive::Float, None),
        N::F64 => (Primitive::Double, None),
        N::String => (Primitive::String, None),
        N::Bytes => (Primitive::Bytes, None),
    }
}

fn valid_name(s: &str) -> bool {
    NAME_RE.is_match(s)
}

/// Checked Avro name for a described type.
pub(crate) fn avro_name(type_name: &TypeName) -> Result<Name> {
    if !valid_name(&type_name.name) {
        return Err(Error::unsupported(type_name.fullname(), format!("`{}` is not a valid avro name", type_name.name)));
    }
    if let Some(ns) = &type_name.namespace {
        if !ns.split('.').all(valid_name) {
            return Err(Error::unsupported(type_name.fullname(), format!("`{ns}` is not a valid avro namespace")));
        }
    }
    Ok(Name::new(type_name.namespace.clone(), type_name.name.clone()))
}

pub struct Synthesizer<'r> {
    registry: &'r DescriptorRegistry,
    /// Full names defined so far in this schema, and the type that owns each.
    named: IndexMap<String, TypeKey>,
}

impl<'r> Synthesizer<'r> {
    pub fn new(registry: &'r DescriptorRegistry) -> Self {
        Synthesizer { registry, named: IndexMap::new() }
    }

    pub fn synthesize(mut self, root: &TypeDescriptor) -> Result<Schema> {
        let schema = self.node(root)?;
        debug!(type_name = %root.name(), named_types = self.named.len(), "synthesized schema");
        Ok(schema)
    }

    fn node(&mut self, d: &TypeDescriptor) -> Result<Schema> {
        match d.shape() {
            Shape::Primitive(p) => {
                let (ty, rust_type) = promote(p.native);
                Ok(Schema::Primitive { ty, rust_type: rust_type.map(str::to_string) })
            }
            Shape::Record(r) => self.record(d, r),
            Shape::Enum(e) => self.enumeration(d, e),
            Shape::Reference => self.reference(d),
            Shape::Sequence(s) => Ok(Schema::Array(Box::new(self.node(&s.element)?))),
            Shape::Map(m) => {
                if !m.key.is_string_like() {
                    return Err(Error::unsupported(d.name().fullname(), "map keys must be strings"));
                }
                Ok(Schema::Map(Box::new(self.node(&m.value)?)))
            }
            Shape::Nullable(n) => {
                let inner = self.node(&n.inner)?;
                nullable(d.name(), inner)
            }
            Shape::Union(u) => {
                let members = u.variants.iter().map(|v| self.node(&v.ty)).collect::<Result<Vec<_>>>()?;
                check_union(d.name(), &members)?;
                Ok(Schema::Union(members))
            }
            Shape::Indirect(i) => self.node(&i.inner),
        }
    }

    /// `Some(name)` the first time a type is seen, `None` if it is already defined.
    fn define(&mut self, d: &TypeDescriptor) -> Result<Option<Name>> {
        let name = avro_name(d.name())?;
        let fullname = name.fullname();
        match self.named.get(&fullname) {
            Some(owner) if *owner == d.key() => Ok(None),
            Some(_) => Err(Error::unsupported(
                fullname,
                "two different types share this name; rename one of them",
            )),
            None => {
                self.named.insert(fullname, d.key());
                Ok(Some(name))
            }
        }
    }

    fn record(&mut self, d: &TypeDescriptor, r: &RecordShape) -> Result<Schema> {
        let Some(name) = self.define(d)? else {
            return Ok(Schema::Ref(avro_name(d.name())?));
        };
        let mut fields = Vec::with_capacity(r.fields.len());
        for f in &r.fields {
            if !valid_name(&f.name) {
                return Err(Error::unsupported(
                    d.name().fullname(),
                    format!("field `{}` is not a valid avro name", f.name),
                ));
            }
            fields.push(FieldSchema { name: f.name.clone(), schema: self.node(&f.ty)? });
        }
        Ok(Schema::Record(RecordSchema { name, fields }))
    }

    fn enumeration(&mut self, d: &TypeDescriptor, e: &EnumShape) -> Result<Schema> {
        let Some(name) = self.define(d)? else {
            return Ok(Schema::Ref(avro_name(d.name())?));
        };
        if let Some(bad) = e.symbols.iter().find(|s| !valid_name(s)) {
            return Err(Error::unsupported(d.name().fullname(), format!("enum symbol `{bad}` is not a valid avro name")));
        }
        Ok(Schema::Enum(EnumSchema { name, symbols: e.symbols.clone() }))
    }

    /// Back-edges point at a type defined further up; when a reference is the
    /// first sighting (a subgraph synthesized on its own) the full definition
    /// comes from the registry.
    fn reference(&mut self, d: &TypeDescriptor) -> Result<Schema> {
        let name = avro_name(d.name())?;
        match self.named.get(&name.fullname()) {
            Some(owner) if *owner == d.key() => Ok(Schema::Ref(name)),
            Some(_) => Err(Error::unsupported(name.fullname(), "two different types share this name; rename one of them")),
            None => {
                let full = self
                    .registry
                    .get(d.key())
                    .filter(|full| !full.is_reference())
                    .ok_or_else(|| Error::UnresolvedReference(name.fullname()))?;
                self.node(&full)
            }
        }
    }
}

/// `["null", T]`, flattening `T` when it is itself a union.
fn nullable(type_name: &TypeName, inner: Schema) -> Result<Schema> {
    match inner {
        Schema::Union(members) => {
            if members.iter().any(Schema::is_null) {
                return Err(Error::unsupported(type_name.fullname(), "nested optionals have no avro representation"));
            }
            let mut out = Vec::with_capacity(members.len() + 1);
            out.push(Schema::primitive(Primitive::Null));
            out.extend(members);
            Ok(Schema::Union(out))
        }
        s if s.is_null() => Err(Error::unsupported(type_name.fullname(), "an optional unit has no avro representation")),
        s => Ok(Schema::Union(vec![Schema::primitive(Primitive::Null), s])),
    }
}

fn member_key(s: &Schema) -> String {
    match s {
        Schema::Primitive { ty, .. } => ty.as_str().to_string(),
        Schema::Array(_) => "array".to_string(),
        Schema::Map(_) => "map".to_string(),
        Schema::Union(_) => "union".to_string(),
        Schema::Record(_) | Schema::Enum(_) | Schema::Ref(_) => s.name().map(Name::fullname).unwrap_or_default(),
    }
}

fn check_union(type_name: &TypeName, members: &[Schema]) -> Result<()> {
    let mut seen = Vec::with_capacity(members.len());
    for m in members {
        if matches!(m, Schema::Union(_)) {
            return Err(Error::unsupported(type_name.fullname(), "a union may not directly contain another union"));
        }
        let key = member_key(m);
        if seen.contains(&key) {
            return Err(Error::unsupported(type_name.fullname(), format!("union has two `{key}` branches")));
        }
        seen.push(key);
    }
    Ok(())
}
