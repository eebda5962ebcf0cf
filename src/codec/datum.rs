//! Schema-driven decode into untyped JSON, for readers with no host type.
use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::binary::Decoder;
use crate::error::{Error, Result};
use crate::schema::{Primitive, Schema};

/// Decode one datum written with `schema`. Records become objects in field
/// order, enums their symbol, bytes an array of numbers.
pub fn decode_json(schema: &Schema, bytes: &[u8]) -> Result<Value> {
    let reader = DatumReader { named: schema.named_types() };
    let mut r = Decoder::new(bytes);
    let value = reader.read(schema, &mut r)?;
    r.finish()?;
    Ok(value)
}

struct DatumReader<'s> {
    named: HashMap<String, &'s Schema>,
}

impl<'s> DatumReader<'s> {
    fn read(&self, schema: &'s Schema, r: &mut Decoder<'_>) -> Result<Value> {
        Ok(match schema {
            Schema::Primitive { ty, .. } => match ty {
                Primitive::Null => Value::Null,
                Primitive::Boolean => Value::Bool(r.read_bool()?),
                Primitive::Int => Value::from(r.read_int()?),
                Primitive::Long => Value::from(r.read_long()?),
                Primitive::Float => float(f64::from(r.read_float()?))?,
                Primitive::Double => float(r.read_double()?)?,
                Primitive::Bytes => Value::from(r.read_bytes()?.to_vec()),
                Primitive::String => Value::String(r.read_string()?.to_string()),
            },
            Schema::Record(record) => r.nested(|r| {
                let mut obj = Map::with_capacity(record.fields.len());
                for f in &record.fields {
                    let v = self.read(&f.schema, r).map_err(|e| e.at(&f.name))?;
                    obj.insert(f.name.clone(), v);
                }
                Ok(Value::Object(obj))
            })?,
            Schema::Enum(e) => {
                let index = r.read_long()?;
                let symbol = usize::try_from(index)
                    .ok()
                    .and_then(|i| e.symbols.get(i))
                    .ok_or_else(|| Error::malformed(format!("enum index {index} out of range for `{}`", e.name)))?;
                Value::String(symbol.clone())
            }
            Schema::Array(items) => {
                let zero_width = self.zero_width(items, &mut Vec::new());
                let mut out = Vec::new();
                loop {
                    let count = r.next_block(zero_width, out.len())?;
                    if count == 0 {
                        break;
                    }
                    for _ in 0..count {
                        let i = out.len();
                        out.push(self.read(items, r).map_err(|e| e.at(&format!("[{i}]")))?);
                    }
                }
                Value::Array(out)
            }
            Schema::Map(values) => {
                let mut out = Map::new();
                let mut taken = 0usize;
                loop {
                    let count = r.next_block(false, taken)?;
                    taken += count;
                    if count == 0 {
                        break;
                    }
                    for _ in 0..count {
                        let key = r.read_string()?;
                        let v = self.read(values, r).map_err(|e| e.at(&format!("[{key:?}]")))?;
                        out.insert(key.to_string(), v);
                    }
                }
                Value::Object(out)
            }
            Schema::Union(members) => {
                let index = r.read_long()?;
                let member = usize::try_from(index)
                    .ok()
                    .and_then(|i| members.get(i))
                    .ok_or_else(|| Error::malformed(format!("union index {index} out of range")))?;
                self.read(member, r)?
            }
            Schema::Ref(name) => {
                let target = self
                    .named
                    .get(&name.fullname())
                    .copied()
                    .ok_or_else(|| Error::UnresolvedReference(name.fullname()))?;
                self.read(target, r)?
            }
        })
    }
}

impl DatumReader<'_> {
    /// True when a datum of `schema` may occupy no bytes.
    fn zero_width(&self, schema: &Schema, path: &mut Vec<String>) -> bool {
        match schema {
            Schema::Primitive { ty, .. } => *ty == Primitive::Null,
            Schema::Record(record) => record.fields.iter().all(|f| self.zero_width(&f.schema, path)),
            Schema::Ref(name) => {
                let full = name.fullname();
                if path.contains(&full) {
                    return false;
                }
                let Some(target) = self.named.get(&full).copied() else {
                    return false;
                };
                path.push(full);
                let empty = self.zero_width(target, path);
                path.pop();
                empty
            }
            Schema::Enum(_) | Schema::Array(_) | Schema::Map(_) | Schema::Union(_) => false,
        }
    }
}

fn float(v: f64) -> Result<Value> {
    Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| Error::mismatch(format!("{v} has no JSON representation")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary;
    use serde_json::json;

    #[test]
    fn records_decode_into_ordered_objects() {
        let schema = Schema::parse(&json!({
            "type": "record", "name": "R",
            "fields": [
                {"name": "id", "type": "long"},
                {"name": "tags", "type": {"type": "array", "items": "string"}},
                {"name": "next", "type": ["null", "R"]}
            ]
        }))
        .unwrap();

        let mut buf = Vec::new();
        binary::write_long(&mut buf, 7);
        binary::write_long(&mut buf, 1);
        binary::write_string(&mut buf, "a");
        binary::write_long(&mut buf, 0);
        binary::write_long(&mut buf, 1); // next: R
        binary::write_long(&mut buf, 8);
        binary::write_long(&mut buf, 0);
        binary::write_long(&mut buf, 0); // next: null

        let v = decode_json(&schema, &buf).unwrap();
        assert_eq!(v, json!({"id": 7, "tags": ["a"], "next": {"id": 8, "tags": [], "next": null}}));
        assert_eq!(v.as_object().unwrap().keys().collect::<Vec<_>>(), ["id", "tags", "next"]);
    }

    #[test]
    fn hostile_bodies_are_malformed() {
        let schema = Schema::parse(&json!({
            "type": "record", "name": "R",
            "fields": [{"name": "next", "type": ["null", "R"]}]
        }))
        .unwrap();
        let deep = vec![0x02; 10_000];
        assert!(matches!(decode_json(&schema, &deep), Err(Error::Malformed(_))));

        let nulls = Schema::parse(&json!({"type": "array", "items": "null"})).unwrap();
        let mut spin = Vec::new();
        binary::write_long(&mut spin, i64::MAX);
        assert!(matches!(decode_json(&nulls, &spin), Err(Error::Malformed(_))));
        let mut few = Vec::new();
        binary::write_long(&mut few, 3);
        binary::write_long(&mut few, 0);
        assert_eq!(decode_json(&nulls, &few).unwrap(), json!([null, null, null]));
    }
}
