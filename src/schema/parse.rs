//! Avro JSON → [`Schema`], with namespace inheritance and references to
//! types defined earlier in the same document.
use std::collections::HashSet;

use serde_json::{Map, Value};

use super::{EnumSchema, FieldSchema, Name, Primitive, RecordSchema, Schema};
use crate::error::{Error, Result};

#[derive(Default)]
pub(super) struct Parser {
    defined: HashSet<String>,
}

fn invalid(path: &str, msg: impl std::fmt::Display) -> Error {
    Error::InvalidSchema(format!("at {path}: {msg}"))
}

fn str_field<'v>(obj: &'v Map<String, Value>, key: &str, path: &str) -> Result<&'v str> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(path, format!("missing string `{key}`")))
}

impl Parser {
    pub(super) fn parse(&mut self, json: &Value, namespace: Option<&str>, path: &str) -> Result<Schema> {
        match json {
            Value::String(name) => self.named_or_primitive(name, namespace, path),
            Value::Array(members) => members
                .iter()
                .enumerate()
                .map(|(i, m)| self.parse(m, namespace, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>>>()
                .map(Schema::Union),
            Value::Object(obj) => self.complex(obj, namespace, path),
            other => Err(invalid(path, format!("expected a schema, found `{other}`"))),
        }
    }

    fn named_or_primitive(&self, name: &str, namespace: Option<&str>, path: &str) -> Result<Schema> {
        if let Some(ty) = Primitive::from_name(name) {
            return Ok(Schema::primitive(ty));
        }
        let fullname = match namespace {
            Some(ns) if !name.contains('.') => format!("{ns}.{name}"),
            _ => name.to_string(),
        };
        if self.defined.contains(&fullname) {
            Ok(Schema::Ref(Name::from_fullname(&fullname)))
        } else if self.defined.contains(name) {
            Ok(Schema::Ref(Name::from_fullname(name)))
        } else {
            Err(invalid(path, format!("unknown type `{name}`")))
        }
    }

    fn complex(&mut self, obj: &Map<String, Value>, namespace: Option<&str>, path: &str) -> Result<Schema> {
        let ty = obj.get("type").ok_or_else(|| invalid(path, "missing `type`"))?;
        let Some(ty) = ty.as_str() else {
            // {"type": {...}} or {"type": [...]}
            return self.parse(ty, namespace, &format!("{path}.type"));
        };
        match ty {
            "record" | "error" => self.record(obj, namespace, path),
            "enum" => self.enumeration(obj, namespace, path),
            "array" => {
                let items = obj.get("items").ok_or_else(|| invalid(path, "array without `items`"))?;
                Ok(Schema::Array(Box::new(self.parse(items, namespace, &format!("{path}.items"))?)))
            }
            "map" => {
                let values = obj.get("values").ok_or_else(|| invalid(path, "map without `values`"))?;
                Ok(Schema::Map(Box::new(self.parse(values, namespace, &format!("{path}.values"))?)))
            }
            other => match Primitive::from_name(other) {
                Some(p) => Ok(Schema::Primitive {
                    ty: p,
                    rust_type: obj.get("rust-type").and_then(Value::as_str).map(str::to_string),
                }),
                None => self.named_or_primitive(other, namespace, path),
            },
        }
    }

    fn declare(&mut self, obj: &Map<String, Value>, namespace: Option<&str>, path: &str) -> Result<Name> {
        let name = str_field(obj, "name", path)?;
        let name = if name.contains('.') {
            Name::from_fullname(name)
        } else {
            let ns = obj.get("namespace").and_then(Value::as_str).or(namespace);
            Name::new(ns.map(str::to_string), name)
        };
        if !self.defined.insert(name.fullname()) {
            return Err(invalid(path, format!("`{name}` is defined twice")));
        }
        Ok(name)
    }

    fn record(&mut self, obj: &Map<String, Value>, namespace: Option<&str>, path: &str) -> Result<Schema> {
        // registered before the fields so they may refer back to it
        let name = self.declare(obj, namespace, path)?;
        let fields_json = obj
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(path, "record without a `fields` array"))?;

        let inner_ns = name.namespace.clone();
        let mut fields = Vec::with_capacity(fields_json.len());
        for (i, f) in fields_json.iter().enumerate() {
            let fpath = format!("{path}.fields[{i}]");
            let f = f.as_object().ok_or_else(|| invalid(&fpath, "field is not an object"))?;
            let fname = str_field(f, "name", &fpath)?;
            if fields.iter().any(|existing: &FieldSchema| existing.name == fname) {
                return Err(invalid(&fpath, format!("duplicate field `{fname}`")));
            }
            let ty = f.get("type").ok_or_else(|| invalid(&fpath, "field without `type`"))?;
            let schema = self.parse(ty, inner_ns.as_deref(), &format!("{fpath}.type"))?;
            fields.push(FieldSchema { name: fname.to_string(), schema });
        }
        Ok(Schema::Record(RecordSchema { name, fields }))
    }

    fn enumeration(&mut self, obj: &Map<String, Value>, namespace: Option<&str>, path: &str) -> Result<Schema> {
        let name = self.declare(obj, namespace, path)?;
        let symbols = obj
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(path, "enum without a `symbols` array"))?
            .iter()
            .map(|s| s.as_str().map(str::to_string).ok_or_else(|| invalid(path, "enum symbol is not a string")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::Enum(EnumSchema { name, symbols }))
    }
}
