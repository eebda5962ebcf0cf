//! Structure inference for untyped JSON values.
//!
//! Samples are folded into [`Evidence`] (one arm per JSON kind), joined with a
//! least-upper-bound that is associative, commutative on kinds and idempotent,
//! then lowered into a descriptor graph the synthesizer and codec treat like
//! any static type. Inferred shapes are keyed by a hash of their structure, so
//! two values with the same shape share one cached codec.
pub mod arr;
pub mod num;
pub mod obj;

use std::any::Any;
use std::borrow::Cow;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use serde_json::{Map, Number, Value};
use tracing::trace;

use crate::descriptor::{
    CheckFn, Constructor, DynValue, FieldDescriptor, FieldValues, NativeType, NullableShape, PrimitiveShape, RecordShape,
    Reflect, Scalar, SequenceShape, Shape, TypeDescriptor, TypeKey, TypeName, UnionShape, UnionVariant,
    downcast_owned, getter,
};
use crate::error::{Error, Result};
use crate::walker::{DynamicNaming, Walker};

pub use arr::ArrE;
pub use num::NumE;
pub use obj::{FieldE, ObjE};

// ------------------------------- Evidence -------------------------------- //

#[derive(Clone, Debug, Default)]
pub struct Evidence {
    pub nullable: bool,
    pub has_bool: bool,
    pub num: Option<NumE>,
    pub has_str: bool,
    pub arr: Option<ArrE>,
    pub obj: Option<ObjE>,
}

impl Evidence {
    pub fn is_bottom(&self) -> bool {
        !self.nullable && !self.has_bool && self.num.is_none() && !self.has_str && self.arr.is_none() && self.obj.is_none()
    }

    pub fn join(a: &Self, b: &Self) -> Self {
        Evidence {
            nullable: a.nullable || b.nullable,
            has_bool: a.has_bool || b.has_bool,
            num: join_arm(&a.num, &b.num, NumE::join),
            has_str: a.has_str || b.has_str,
            arr: join_arm(&a.arr, &b.arr, ArrE::join),
            obj: join_arm(&a.obj, &b.obj, ObjE::join),
        }
    }
}

fn join_arm<T: Clone>(a: &Option<T>, b: &Option<T>, join: fn(&T, &T) -> T) -> Option<T> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => Some(join(x, y)),
    }
}

pub fn observe(v: &Value) -> Evidence {
    match v {
        Value::Null => Evidence { nullable: true, ..Evidence::default() },
        Value::Bool(_) => Evidence { has_bool: true, ..Evidence::default() },
        Value::Number(n) => Evidence { num: Some(NumE::observe(n)), ..Evidence::default() },
        Value::String(_) => Evidence { has_str: true, ..Evidence::default() },
        Value::Array(xs) => {
            let item = xs.iter().fold(Evidence::default(), |acc, el| Evidence::join(&acc, &observe(el)));
            Evidence { arr: Some(ArrE { item: Box::new(item), samples: 1 }), ..Evidence::default() }
        }
        Value::Object(map) => {
            let fields = map
                .iter()
                .map(|(k, v)| (k.clone(), FieldE { ev: observe(v), present_in: 1 }))
                .collect();
            Evidence { obj: Some(ObjE { fields, seen: 1 }), ..Evidence::default() }
        }
    }
}

pub fn observe_all<'v>(samples: impl IntoIterator<Item = &'v Value>) -> Evidence {
    samples.into_iter().fold(Evidence::default(), |acc, v| Evidence::join(&acc, &observe(v)))
}

// ------------------------------- Lowering -------------------------------- //

/// Descriptor for the join of `samples`. Every sample must then encode
/// against it.
pub fn infer_descriptor<'v>(
    samples: impl IntoIterator<Item = &'v Value>,
    naming: &DynamicNaming,
) -> Result<Arc<TypeDescriptor>> {
    let ev = observe_all(samples);
    if ev.is_bottom() {
        return Err(Error::unsupported("serde_json::Value", "no samples to infer a structure from"));
    }
    let lowered = Lowering { naming }.lower(&ev, &naming.root, "$")?;
    trace!(signature = %lowered.signature, "inferred dynamic shape");
    Ok(lowered.descriptor)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JsonKind {
    Null,
    Bool,
    Long,
    Double,
    String,
    Array,
    Object,
    Union,
}

impl JsonKind {
    fn matches(self, v: &Value) -> bool {
        match self {
            JsonKind::Null => v.is_null(),
            JsonKind::Bool => v.is_boolean(),
            JsonKind::Long => v.is_i64(),
            JsonKind::Double => v.is_number(),
            JsonKind::String => v.is_string(),
            JsonKind::Array => v.is_array(),
            JsonKind::Object => v.is_object(),
            JsonKind::Union => false,
        }
    }
}

struct Lowered {
    kind: JsonKind,
    descriptor: Arc<TypeDescriptor>,
    signature: String,
}

struct Lowering<'n> {
    naming: &'n DynamicNaming,
}

fn shape_key(signature: &str) -> TypeKey {
    let mut h = DefaultHasher::new();
    signature.hash(&mut h);
    TypeKey::Shape(h.finish())
}

fn json_name(what: &str) -> TypeName {
    TypeName::new(Some("serde_json".to_string()), format!("Value({what})"))
}

fn pascal(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for piece in field.split(|c: char| !c.is_ascii_alphanumeric()).filter(|p| !p.is_empty()) {
        let mut chars = piece.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if out.is_empty() {
        out.push_str("Field");
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

impl Lowering<'_> {
    /// `slot` is the record name an object at this position would get.
    fn lower(&self, ev: &Evidence, slot: &str, path: &str) -> Result<Lowered> {
        let mut arms = Vec::new();
        if let Some(arr) = &ev.arr {
            arms.push(self.array(arr, slot, path)?);
        }
        if let Some(obj) = &ev.obj {
            arms.push(self.object(obj, slot, path)?);
        }
        if let Some(num) = &ev.num {
            arms.extend(numbers(num, path)?);
        }
        if ev.has_str {
            arms.push(leaf(JsonKind::String));
        }
        if ev.has_bool {
            arms.push(leaf(JsonKind::Bool));
        }

        let core = match arms.len() {
            0 if ev.nullable => return Ok(leaf(JsonKind::Null)),
            0 => return Err(Error::unsupported(path, "no value was ever observed here")),
            1 => arms.remove(0),
            _ => union(arms),
        };
        Ok(if ev.nullable { nullable(core) } else { core })
    }

    fn array(&self, arr: &ArrE, slot: &str, path: &str) -> Result<Lowered> {
        if arr.item.is_bottom() {
            return Err(Error::unsupported(
                path,
                "only empty arrays were observed; the element type cannot be inferred",
            ));
        }
        let element = self.lower(&arr.item, &format!("{slot}Item"), &format!("{path}[]"))?;
        let signature = format!("[{}]", element.signature);
        let descriptor = TypeDescriptor::new(
            shape_key(&signature),
            json_name("array"),
            Shape::Sequence(SequenceShape { element: element.descriptor, items: json_items, collect: json_collect }),
        );
        Ok(Lowered { kind: JsonKind::Array, descriptor: Arc::new(descriptor), signature })
    }

    fn object(&self, obj: &ObjE, slot: &str, path: &str) -> Result<Lowered> {
        if obj.fields.is_empty() {
            return Err(Error::unsupported(path, "only empty objects were observed; a record needs fields"));
        }
        let mut fields = Vec::with_capacity(obj.fields.len());
        let mut omit_null = Vec::with_capacity(obj.fields.len());
        let mut keys = Vec::with_capacity(obj.fields.len());
        let mut parts = Vec::with_capacity(obj.fields.len());
        for (key, field) in &obj.fields {
            let child_slot = format!("{slot}_{}", pascal(key));
            let mut lowered = self.lower(&field.ev, &child_slot, &format!("{path}.{key}"))?;
            let optional = obj.is_optional(field);
            if optional && !field.ev.nullable && lowered.kind != JsonKind::Null {
                lowered = nullable(lowered);
            }
            // absent on the wire reads back as absent when null was never seen
            let omit = field.present_in < obj.seen && !field.ev.nullable;
            let required = !lowered.descriptor.is_nullable() && lowered.kind != JsonKind::Null;
            omit_null.push(omit);
            keys.push((key.clone(), required));
            parts.push(format!("{key}{}={}", if omit { "~" } else { "" }, lowered.signature));

            let name = key.clone();
            fields.push(FieldDescriptor {
                name: key.clone(),
                nullable: lowered.descriptor.is_nullable(),
                ty: lowered.descriptor,
                read: getter(move |any| {
                    let map = any.downcast_ref::<Value>()?.as_object()?;
                    Some(map.get(name.as_str()).unwrap_or(&JSON_NULL) as &dyn Any)
                }),
                write: None,
            });
        }

        let type_name = TypeName::new(self.naming.namespace.clone(), slot);
        let signature = format!("{{{}:{}}}", type_name.fullname(), parts.join(","));
        let construct = Arc::new(move |values: &mut FieldValues<'_>| -> Result<DynValue> {
            let mut map = Map::with_capacity(values.len());
            for ((name, value), omit) in values.drain().zip(omit_null.iter()) {
                let value = downcast_owned::<Value>(value)?;
                if *omit && value.is_null() {
                    continue;
                }
                map.insert(name.to_string(), value);
            }
            Ok(Box::new(Value::Object(map)) as DynValue)
        });
        let descriptor = TypeDescriptor::new(
            shape_key(&signature),
            type_name,
            Shape::Record(RecordShape {
                fields,
                constructor: Constructor::Assemble(construct),
                check: Some(object_check(keys)),
            }),
        );
        Ok(Lowered { kind: JsonKind::Object, descriptor: Arc::new(descriptor), signature })
    }
}

/// An object must carry exactly the planned keys: nothing extra, and every
/// required one.
fn object_check(keys: Vec<(String, bool)>) -> CheckFn {
    Arc::new(move |any: &dyn Any| -> Result<()> {
        let value = as_json(any)?;
        let map = value.as_object().ok_or_else(|| expected("object", value))?;
        if let Some(extra) = map.keys().find(|k| !keys.iter().any(|(known, _)| known == *k)) {
            return Err(Error::mismatch("field is not part of the writer schema").at(extra));
        }
        if let Some((missing, _)) = keys.iter().find(|(key, required)| *required && !map.contains_key(key)) {
            return Err(Error::mismatch("required field is missing").at(missing));
        }
        Ok(())
    })
}

/// Integers stay `long` and floats `double`; a slot that saw both becomes
/// a union of the two so each value keeps its kind.
fn numbers(num: &NumE, path: &str) -> Result<Vec<Lowered>> {
    if num.saw_overflow {
        return Err(Error::unsupported(path, "integer beyond the signed 64-bit range"));
    }
    Ok(match (num.saw_int, num.saw_float) {
        (true, true) => vec![leaf(JsonKind::Long), leaf(JsonKind::Double)],
        (false, true) => vec![leaf(JsonKind::Double)],
        _ => vec![leaf(JsonKind::Long)],
    })
}

fn leaf(kind: JsonKind) -> Lowered {
    let (native, signature, read, make): (NativeType, &str, _, _) = match kind {
        JsonKind::Null => (NativeType::Unit, "null", read_null as ScalarReadFn, make_null as ScalarMakeFn),
        JsonKind::Bool => (NativeType::Bool, "boolean", read_bool as ScalarReadFn, make_bool as ScalarMakeFn),
        JsonKind::Long => (NativeType::I64, "long", read_long as ScalarReadFn, make_long as ScalarMakeFn),
        JsonKind::Double => (NativeType::F64, "double", read_double as ScalarReadFn, make_double as ScalarMakeFn),
        JsonKind::String => (NativeType::String, "string", read_string as ScalarReadFn, make_string as ScalarMakeFn),
        JsonKind::Array | JsonKind::Object | JsonKind::Union => unreachable!("containers are lowered structurally"),
    };
    let descriptor = TypeDescriptor::new(
        shape_key(signature),
        json_name(signature),
        Shape::Primitive(PrimitiveShape { native, read, make }),
    );
    Lowered { kind, descriptor: Arc::new(descriptor), signature: signature.to_string() }
}

fn nullable(core: Lowered) -> Lowered {
    let signature = format!("?{}", core.signature);
    let descriptor = TypeDescriptor::new(
        shape_key(&signature),
        json_name("nullable"),
        Shape::Nullable(NullableShape { inner: core.descriptor, get: json_option_get, wrap: json_option_wrap }),
    );
    Lowered { kind: core.kind, descriptor: Arc::new(descriptor), signature }
}

/// Arms arrive in a fixed kind order, so equal evidence gives equal unions.
fn union(arms: Vec<Lowered>) -> Lowered {
    let signature = format!("({})", arms.iter().map(|a| a.signature.as_str()).collect::<Vec<_>>().join("|"));
    let variants = arms
        .into_iter()
        .map(|arm| {
            let kind = arm.kind;
            UnionVariant {
                ty: arm.descriptor,
                get: getter(move |any| {
                    any.downcast_ref::<Value>().filter(|v| kind.matches(v)).map(|v| v as &dyn Any)
                }),
                wrap: Arc::new(|value: DynValue| -> Result<DynValue> { Ok(value) }),
            }
        })
        .collect();
    let descriptor = TypeDescriptor::new(
        shape_key(&signature),
        json_name("union"),
        Shape::Union(UnionShape { variants }),
    );
    Lowered { kind: JsonKind::Union, descriptor: Arc::new(descriptor), signature }
}

// ------------------------------- Accessors ------------------------------- //

type ScalarReadFn = for<'a> fn(&'a dyn Any) -> Result<Scalar<'a>>;
type ScalarMakeFn = fn(Scalar<'_>) -> Result<DynValue>;

static JSON_NULL: Value = Value::Null;

fn as_json(any: &dyn Any) -> Result<&Value> {
    any.downcast_ref::<Value>().ok_or_else(|| Error::mismatch("value is not a `serde_json::Value`"))
}

fn expected(what: &str, found: &Value) -> Error {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    Error::mismatch(format!("expected {what}, found {found}"))
}

fn read_null(any: &dyn Any) -> Result<Scalar<'_>> {
    match as_json(any)? {
        Value::Null => Ok(Scalar::Null),
        other => Err(expected("null", other)),
    }
}

fn read_bool(any: &dyn Any) -> Result<Scalar<'_>> {
    match as_json(any)? {
        Value::Bool(b) => Ok(Scalar::Boolean(*b)),
        other => Err(expected("boolean", other)),
    }
}

fn read_long(any: &dyn Any) -> Result<Scalar<'_>> {
    let v = as_json(any)?;
    v.as_i64().map(Scalar::Long).ok_or_else(|| expected("long", v))
}

fn read_double(any: &dyn Any) -> Result<Scalar<'_>> {
    let v = as_json(any)?;
    v.as_f64().map(Scalar::Double).ok_or_else(|| expected("double", v))
}

fn read_string(any: &dyn Any) -> Result<Scalar<'_>> {
    match as_json(any)? {
        Value::String(s) => Ok(Scalar::String(Cow::Borrowed(s.as_str()))),
        other => Err(expected("string", other)),
    }
}

fn make_null(scalar: Scalar<'_>) -> Result<DynValue> {
    match scalar {
        Scalar::Null => Ok(Box::new(Value::Null)),
        other => Err(Error::mismatch(format!("expected null, decoded {}", other.kind_name()))),
    }
}

fn make_bool(scalar: Scalar<'_>) -> Result<DynValue> {
    match scalar {
        Scalar::Boolean(b) => Ok(Box::new(Value::Bool(b))),
        other => Err(Error::mismatch(format!("expected boolean, decoded {}", other.kind_name()))),
    }
}

fn make_long(scalar: Scalar<'_>) -> Result<DynValue> {
    match scalar {
        Scalar::Long(v) => Ok(Box::new(Value::from(v))),
        other => Err(Error::mismatch(format!("expected long, decoded {}", other.kind_name()))),
    }
}

fn make_double(scalar: Scalar<'_>) -> Result<DynValue> {
    match scalar {
        Scalar::Double(v) => Number::from_f64(v)
            .map(|n| Box::new(Value::Number(n)) as DynValue)
            .ok_or_else(|| Error::mismatch(format!("{v} has no JSON representation"))),
        other => Err(Error::mismatch(format!("expected double, decoded {}", other.kind_name()))),
    }
}

fn make_string(scalar: Scalar<'_>) -> Result<DynValue> {
    match scalar {
        Scalar::String(s) => Ok(Box::new(Value::String(s.into_owned()))),
        other => Err(Error::mismatch(format!("expected string, decoded {}", other.kind_name()))),
    }
}

fn json_items(any: &dyn Any) -> Option<Vec<&dyn Any>> {
    let xs = any.downcast_ref::<Value>()?.as_array()?;
    Some(xs.iter().map(|x| x as &dyn Any).collect())
}

fn json_collect(items: Vec<DynValue>) -> Result<DynValue> {
    let items = items.into_iter().map(downcast_owned::<Value>).collect::<Result<Vec<_>>>()?;
    Ok(Box::new(Value::Array(items)))
}

fn json_option_get(any: &dyn Any) -> Option<Option<&dyn Any>> {
    let v = any.downcast_ref::<Value>()?;
    Some((!v.is_null()).then_some(v as &dyn Any))
}

fn json_option_wrap(value: Option<DynValue>) -> Result<DynValue> {
    Ok(value.unwrap_or_else(|| Box::new(Value::Null) as DynValue))
}

// -------------------------------- Reflect -------------------------------- //

/// Untyped JSON: the structure comes from the value, never from the type.
impl Reflect for Value {
    const DYNAMIC: bool = true;

    fn type_name() -> TypeName {
        TypeName::new(Some("serde_json".to_string()), "Value")
    }

    fn describe(_walker: &mut Walker<'_>) -> Result<Shape> {
        Err(Error::unsupported(
            "serde_json::Value",
            "untyped JSON has no static structure; describe an instance or infer from samples",
        ))
    }

    fn describe_instance(&self, walker: &mut Walker<'_>) -> Result<Arc<TypeDescriptor>> {
        infer_descriptor(std::iter::once(self), walker.naming())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Kind;
    use crate::engine::Engine;
    use serde_json::json;

    fn signature(samples: &[Value]) -> String {
        Lowering { naming: &DynamicNaming::default() }.lower(&observe_all(samples), "Root", "$").unwrap().signature
    }

    fn infer(samples: &[Value]) -> Result<Arc<TypeDescriptor>> {
        infer_descriptor(samples, &DynamicNaming::default())
    }

    #[test]
    fn join_laws_idempotent_commutative_associative() {
        let a = observe(&json!([1, "a"]));
        let b = observe(&json!([2.5, null]));
        let c = observe(&json!([true]));
        let sig = |ev: &Evidence| Lowering { naming: &DynamicNaming::default() }.lower(ev, "Root", "$").unwrap().signature;

        assert_eq!(sig(&a), sig(&Evidence::join(&a, &a)));
        assert_eq!(sig(&Evidence::join(&a, &b)), sig(&Evidence::join(&b, &a)));
        assert_eq!(
            sig(&Evidence::join(&Evidence::join(&a, &b), &c)),
            sig(&Evidence::join(&a, &Evidence::join(&b, &c)))
        );
    }

    #[test]
    fn mixed_numbers_keep_their_kind() {
        assert_eq!(signature(&[json!(1), json!(2.5)]), "(long|double)");
        assert_eq!(signature(&[json!(1), json!(2)]), "long");
        assert_eq!(signature(&[json!(0.5), json!(null)]), "?double");
    }

    #[test]
    fn fields_missing_from_some_samples_become_optional() {
        let d = infer(&[json!({"x": 1, "y": "a"}), json!({"x": 2})]).unwrap();
        assert_eq!(d.kind(), Kind::Record);
        assert!(!d.field("x").unwrap().nullable);
        assert!(d.field("y").unwrap().nullable);
        assert!(d.field("y").unwrap().ty.is_nullable());
    }

    #[test]
    fn nested_objects_are_named_after_their_path() {
        let naming = DynamicNaming { namespace: Some("events".into()), root: "Order".into() };
        let d = infer_descriptor([&json!({"ship_to": {"zip": "123"}})], &naming).unwrap();
        let nested = &d.field("ship_to").unwrap().ty;
        assert_eq!(nested.name().fullname(), "events.Order_ShipTo");
    }

    #[test]
    fn heterogeneous_slots_become_unions_in_kind_order() {
        assert_eq!(signature(&[json!("a"), json!(1), json!(true)]), "(long|string|boolean)");
        assert_eq!(signature(&[json!("a"), json!(null)]), "?string");
    }

    #[test]
    fn empty_arrays_cannot_be_inferred() {
        let err = infer(&[json!({"tags": []})]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { ref type_name, .. } if type_name == "$.tags"), "{err}");
    }

    #[test]
    fn elements_are_inferred_from_every_element() {
        // the first element alone would say "long"
        assert_eq!(signature(&[json!([1, 2.5, 3])]), "[(long|double)]");
    }

    #[test]
    fn oversized_integers_are_unsupported() {
        assert!(infer(&[json!(u64::MAX)]).is_err());
    }

    #[test]
    fn absent_and_null_fields_are_distinct_shapes() {
        let engine = Engine::new();
        let absent = infer(&[json!({"x": 1, "y": "a"}), json!({"x": 2})]).unwrap();
        let null = infer(&[json!({"x": 1, "y": "a"}), json!({"x": 2, "y": null})]).unwrap();
        assert_ne!(absent.key(), null.key());

        let absent = engine.codec(&absent).unwrap();
        let null = engine.codec(&null).unwrap();
        assert_eq!(engine.codecs().builds(), 2);
        let short = json!({"x": 2});
        let back = absent.decode_as::<Value>(&absent.encode_to_vec(&short).unwrap()).unwrap();
        assert_eq!(back, short);
        let back = null.decode_as::<Value>(&null.encode_to_vec(&short).unwrap()).unwrap();
        assert_eq!(back, json!({"x": 2, "y": null}));
    }

    #[test]
    fn objects_must_match_the_planned_fields() {
        let engine = Engine::new();
        let d = infer(&[json!({"a": 1, "b": "x"}), json!({"a": 2})]).unwrap();
        let codec = engine.codec(&d).unwrap();
        assert!(codec.encode_to_vec(&json!({"a": 3})).is_ok());

        let err = codec.encode_to_vec(&json!({"a": 3, "c": true})).unwrap_err();
        assert!(matches!(&err, Error::SchemaMismatch { path, .. } if path == "Root.c"), "{err}");
        let err = codec.encode_to_vec(&json!({"b": "y"})).unwrap_err();
        assert!(matches!(&err, Error::SchemaMismatch { path, .. } if path == "Root.a"), "{err}");
    }

    #[test]
    fn mixed_numbers_round_trip_exactly() {
        let engine = Engine::new();
        let doc = json!({"xs": [1, 2.5, -3], "n": 4});
        let codec = engine.codec(&infer(&[doc.clone(), json!({"xs": [], "n": 0.25})]).unwrap()).unwrap();
        let back = codec.decode_as::<Value>(&codec.encode_to_vec(&doc).unwrap()).unwrap();
        assert_eq!(back, doc);
        assert!(back["xs"][0].is_i64());
        assert!(back["n"].is_i64());
    }

    #[test]
    fn equal_shapes_share_a_key() {
        let a = infer(&[json!({"id": 1, "tags": ["x"]})]).unwrap();
        let b = infer(&[json!({"id": 99, "tags": ["y", "z"]})]).unwrap();
        let c = infer(&[json!({"id": "1", "tags": ["y"]})]).unwrap();
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }
}
