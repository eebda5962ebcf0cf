//! Avro schema model and its JSON rendering.
//!
//! A named type is defined once, at its first occurrence in a depth-first,
//! declaration-ordered traversal; every later occurrence is a [`Schema::Ref`]
//! by full name. Emission preserves field order, so equal schemas always
//! render to identical text.
mod parse;

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value, json};

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
}

impl Primitive {
    pub fn as_str(self) -> &'static str {
        match self {
            Primitive::Null => "null",
            Primitive::Boolean => "boolean",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Bytes => "bytes",
            Primitive::String => "string",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "null" => Primitive::Null,
            "boolean" => Primitive::Boolean,
            "int" => Primitive::Int,
            "long" => Primitive::Long,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            "bytes" => Primitive::Bytes,
            "string" => Primitive::String,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Name {
    pub namespace: Option<String>,
    pub name: String,
}

impl Name {
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Name { namespace: namespace.filter(|ns| !ns.is_empty()), name: name.into() }
    }

    /// Split `a.b.C` into namespace `a.b` and name `C`.
    pub fn from_fullname(fullname: &str) -> Self {
        match fullname.rsplit_once('.') {
            Some((ns, name)) => Name::new(Some(ns.to_string()), name),
            None => Name::new(None, fullname),
        }
    }

    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fullname())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub schema: Schema,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordSchema {
    pub name: Name,
    pub fields: Vec<FieldSchema>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumSchema {
    pub name: Name,
    pub symbols: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Schema {
    /// `rust_type` records the host width when it differs from the Avro one
    /// (`u8` written as `int`); it is informational only.
    Primitive { ty: Primitive, rust_type: Option<String> },
    Record(RecordSchema),
    Enum(EnumSchema),
    Array(Box<Schema>),
    Map(Box<Schema>),
    Union(Vec<Schema>),
    Ref(Name),
}

impl Schema {
    pub fn primitive(ty: Primitive) -> Self {
        Schema::Primitive { ty, rust_type: None }
    }

    pub fn name(&self) -> Option<&Name> {
        match self {
            Schema::Record(r) => Some(&r.name),
            Schema::Enum(e) => Some(&e.name),
            Schema::Ref(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Schema::Primitive { ty: Primitive::Null, .. })
    }

    /// Avro JSON form. Named types carry an explicit `namespace` when they have one.
    pub fn to_json(&self) -> Value {
        match self {
            Schema::Primitive { ty, rust_type: None } => Value::String(ty.as_str().to_string()),
            Schema::Primitive { ty, rust_type: Some(rust) } => json!({ "type": ty.as_str(), "rust-type": rust }),
            Schema::Record(r) => {
                let mut obj = Map::new();
                obj.insert("type".into(), "record".into());
                obj.insert("name".into(), r.name.name.clone().into());
                if let Some(ns) = &r.name.namespace {
                    obj.insert("namespace".into(), ns.clone().into());
                }
                let fields = r
                    .fields
                    .iter()
                    .map(|f| json!({ "name": f.name, "type": f.schema.to_json() }))
                    .collect::<Vec<_>>();
                obj.insert("fields".into(), Value::Array(fields));
                Value::Object(obj)
            }
            Schema::Enum(e) => {
                let mut obj = Map::new();
                obj.insert("type".into(), "enum".into());
                obj.insert("name".into(), e.name.name.clone().into());
                if let Some(ns) = &e.name.namespace {
                    obj.insert("namespace".into(), ns.clone().into());
                }
                obj.insert("symbols".into(), json!(e.symbols));
                Value::Object(obj)
            }
            Schema::Array(items) => json!({ "type": "array", "items": items.to_json() }),
            Schema::Map(values) => json!({ "type": "map", "values": values.to_json() }),
            Schema::Union(members) => Value::Array(members.iter().map(Schema::to_json).collect()),
            Schema::Ref(name) => Value::String(name.fullname()),
        }
    }

    /// Compact single-line JSON. Used as the identity of a schema in registries.
    pub fn canonical_form(&self) -> String {
        self.to_json().to_string()
    }

    pub fn to_pretty_string(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_else(|_| self.canonical_form())
    }

    pub fn parse(json: &Value) -> Result<Schema> {
        parse::Parser::default().parse(json, None, "$")
    }

    pub fn parse_str(src: &str) -> Result<Schema> {
        let json: Value = crate::path_de::from_str_with_path(src).map_err(crate::Error::InvalidSchema)?;
        Schema::parse(&json)
    }

    /// Named definitions by full name, for resolving [`Schema::Ref`]s.
    pub fn named_types(&self) -> HashMap<String, &Schema> {
        let mut out = HashMap::new();
        self.collect_named(&mut out);
        out
    }

    fn collect_named<'s>(&'s self, out: &mut HashMap<String, &'s Schema>) {
        match self {
            Schema::Record(r) => {
                out.insert(r.name.fullname(), self);
                for f in &r.fields {
                    f.schema.collect_named(out);
                }
            }
            Schema::Enum(e) => {
                out.insert(e.name.fullname(), self);
            }
            Schema::Array(inner) | Schema::Map(inner) => inner.collect_named(out),
            Schema::Union(members) => members.iter().for_each(|m| m.collect_named(out)),
            Schema::Primitive { .. } | Schema::Ref(_) => {}
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_form())
    }
}
