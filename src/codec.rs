//! Codecs: compiled encode/decode plans for one described type.
//!
//! A plan mirrors the schema. Records live in an arena indexed by
//! [`Plan::Record`]; a record's slot is reserved before its fields are
//! planned, so a recursive field points back at the reserved slot and the
//! build terminates. The finished codec holds no reference cycles.
pub mod datum;

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::binary::{self, Decoder};
use crate::descriptor::{
    BoxFn, CheckFn, CollectEntriesFn, CollectFn, Constructor, DerefFn, DynValue, EntriesFn, FieldValues,
    FromIndex, Getter, IndexOf, ItemsFn, OptionGet, OptionWrap, Scalar, ScalarMake, ScalarRead, Setter, Shape,
    TypeDescriptor, TypeKey, Wrap,
};
use crate::error::{Error, Result};
use crate::schema::{Primitive, Schema};
use crate::synth::{Synthesizer, promote};
use crate::walker::DescriptorRegistry;

struct ScalarPlan {
    target: Primitive,
    read: ScalarRead,
    make: ScalarMake,
}

struct FieldPlan {
    name: String,
    plan: Plan,
    read: Getter,
    write: Option<Setter>,
}

struct RecordPlan {
    type_name: String,
    fields: Vec<FieldPlan>,
    constructor: Constructor,
    check: Option<CheckFn>,
}

struct SequencePlan {
    element: Plan,
    items: ItemsFn,
    collect: CollectFn,
}

/// A string key, possibly behind boxes: `derefs` unwrap it outermost first.
struct KeyPlan {
    scalar: ScalarPlan,
    derefs: Vec<(DerefFn, BoxFn)>,
}

impl KeyPlan {
    fn read<'a>(&self, k: &'a dyn Any) -> Result<Cow<'a, str>> {
        let mut k = k;
        for (deref, _) in &self.derefs {
            k = deref(k).ok_or_else(|| Error::mismatch("expected a boxed map key"))?;
        }
        match (self.scalar.read)(k)? {
            Scalar::String(key) => Ok(key),
            other => Err(Error::mismatch(format!("map key is a {}", other.kind_name()))),
        }
    }

    fn make(&self, key: &str) -> Result<DynValue> {
        let mut value = (self.scalar.make)(Scalar::String(Cow::Borrowed(key)))?;
        for (_, wrap) in self.derefs.iter().rev() {
            value = wrap(value)?;
        }
        Ok(value)
    }
}

struct MapPlan {
    key: KeyPlan,
    value: Plan,
    entries: EntriesFn,
    collect: CollectEntriesFn,
}

struct NullablePlan {
    inner: Plan,
    get: OptionGet,
    wrap: OptionWrap,
}

struct Branch {
    plan: Plan,
    get: Getter,
    wrap: Wrap,
}

struct EnumPlan {
    type_name: String,
    symbols: usize,
    index_of: IndexOf,
    from_index: FromIndex,
}

struct IndirectPlan {
    inner: Plan,
    deref: DerefFn,
    wrap: BoxFn,
}

enum Plan {
    Scalar(ScalarPlan),
    Record(usize),
    Sequence(Box<SequencePlan>),
    Map(Box<MapPlan>),
    Nullable(Box<NullablePlan>),
    Union(Vec<Branch>),
    Enum(EnumPlan),
    Indirect(Box<IndirectPlan>),
}

pub struct Codec {
    key: TypeKey,
    type_name: String,
    schema: Schema,
    root: Plan,
    records: Vec<RecordPlan>,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("type_name", &self.type_name)
            .field("schema", &self.schema.canonical_form())
            .field("records", &self.records.len())
            .finish()
    }
}

// -------------------------------- Build ---------------------------------- //

struct PlanBuilder<'r> {
    registry: &'r DescriptorRegistry,
    records: Vec<RecordPlan>,
    slots: HashMap<TypeKey, usize>,
}

impl PlanBuilder<'_> {
    fn plan(&mut self, d: &TypeDescriptor) -> Result<Plan> {
        Ok(match d.shape() {
            Shape::Primitive(p) => Plan::Scalar(ScalarPlan { target: promote(p.native).0, read: p.read, make: p.make }),
            Shape::Record(r) => {
                if let Some(&slot) = self.slots.get(&d.key()) {
                    return Ok(Plan::Record(slot));
                }
                let type_name = d.name().fullname();
                if let Constructor::Populate(_) = r.constructor {
                    if let Some(f) = r.fields.iter().find(|f| f.write.is_none()) {
                        return Err(Error::construction(
                            type_name,
                            format!("field `{}` has no setter; default-then-populate needs one per field", f.name),
                        ));
                    }
                }

                // reserve the slot so recursive fields can point at it
                let slot = self.records.len();
                self.records.push(RecordPlan {
                    type_name,
                    fields: Vec::new(),
                    constructor: r.constructor.clone(),
                    check: r.check.clone(),
                });
                self.slots.insert(d.key(), slot);

                let mut fields = Vec::with_capacity(r.fields.len());
                for f in &r.fields {
                    fields.push(FieldPlan {
                        name: f.name.clone(),
                        plan: self.plan(&f.ty)?,
                        read: f.read.clone(),
                        write: f.write.clone(),
                    });
                }
                self.records[slot].fields = fields;
                Plan::Record(slot)
            }
            Shape::Reference => match self.slots.get(&d.key()) {
                Some(&slot) => Plan::Record(slot),
                None => {
                    let full = self
                        .registry
                        .get(d.key())
                        .filter(|full| !full.is_reference())
                        .ok_or_else(|| Error::UnresolvedReference(d.name().fullname()))?;
                    return self.plan(&full);
                }
            },
            Shape::Sequence(s) => Plan::Sequence(Box::new(SequencePlan {
                element: self.plan(&s.element)?,
                items: s.items,
                collect: s.collect,
            })),
            Shape::Map(m) => {
                let key = key_plan(&m.key)
                    .ok_or_else(|| Error::unsupported(d.name().fullname(), "map keys must be strings"))?;
                Plan::Map(Box::new(MapPlan { key, value: self.plan(&m.value)?, entries: m.entries, collect: m.collect }))
            }
            Shape::Nullable(n) => {
                Plan::Nullable(Box::new(NullablePlan { inner: self.plan(&n.inner)?, get: n.get, wrap: n.wrap }))
            }
            Shape::Union(u) => {
                let mut branches = Vec::with_capacity(u.variants.len());
                for v in &u.variants {
                    branches.push(Branch { plan: self.plan(&v.ty)?, get: v.get.clone(), wrap: v.wrap.clone() });
                }
                Plan::Union(branches)
            }
            Shape::Enum(e) => Plan::Enum(EnumPlan {
                type_name: d.name().fullname(),
                symbols: e.symbols.len(),
                index_of: e.index_of,
                from_index: e.from_index,
            }),
            Shape::Indirect(i) => {
                Plan::Indirect(Box::new(IndirectPlan { inner: self.plan(&i.inner)?, deref: i.deref, wrap: i.wrap }))
            }
        })
    }
}

/// Accepts exactly the keys [`TypeDescriptor::is_string_like`] accepts.
fn key_plan(d: &TypeDescriptor) -> Option<KeyPlan> {
    if !d.is_string_like() {
        return None;
    }
    let mut derefs = Vec::new();
    let mut current = d;
    loop {
        match current.shape() {
            Shape::Indirect(i) => {
                derefs.push((i.deref, i.wrap));
                current = i.inner.as_ref();
            }
            Shape::Primitive(p) => {
                let scalar = ScalarPlan { target: Primitive::String, read: p.read, make: p.make };
                return Some(KeyPlan { scalar, derefs });
            }
            _ => return None,
        }
    }
}

// ------------------------------- Scalars --------------------------------- //

fn write_scalar(target: Primitive, scalar: &Scalar<'_>, buf: &mut Vec<u8>) -> Result<()> {
    match (target, scalar) {
        (Primitive::Null, Scalar::Null) => {}
        (Primitive::Boolean, Scalar::Boolean(b)) => binary::write_bool(buf, *b),
        (Primitive::Int, Scalar::Int(v)) => binary::write_int(buf, *v),
        (Primitive::Long, Scalar::Long(v)) => binary::write_long(buf, *v),
        (Primitive::Float, Scalar::Float(v)) => binary::write_float(buf, *v),
        (Primitive::Double, Scalar::Double(v)) => binary::write_double(buf, *v),
        (Primitive::Bytes, Scalar::Bytes(v)) => binary::write_bytes(buf, v),
        (Primitive::String, Scalar::String(v)) => binary::write_string(buf, v),
        (target, other) => {
            return Err(Error::mismatch(format!("expected {}, found {}", target.as_str(), other.kind_name())));
        }
    }
    Ok(())
}

fn read_scalar<'a>(target: Primitive, r: &mut Decoder<'a>) -> Result<Scalar<'a>> {
    Ok(match target {
        Primitive::Null => Scalar::Null,
        Primitive::Boolean => Scalar::Boolean(r.read_bool()?),
        Primitive::Int => Scalar::Int(r.read_int()?),
        Primitive::Long => Scalar::Long(r.read_long()?),
        Primitive::Float => Scalar::Float(r.read_float()?),
        Primitive::Double => Scalar::Double(r.read_double()?),
        Primitive::Bytes => Scalar::Bytes(Cow::Borrowed(r.read_bytes()?)),
        Primitive::String => Scalar::String(Cow::Borrowed(r.read_string()?)),
    })
}

fn union_index(r: &mut Decoder<'_>) -> Result<usize> {
    let index = r.read_long()?;
    usize::try_from(index).map_err(|_| Error::malformed(format!("negative union index {index}")))
}

// -------------------------------- Codec ---------------------------------- //

impl Codec {
    /// Synthesize the schema of `descriptor` and compile its plan.
    pub fn build(registry: &DescriptorRegistry, descriptor: &TypeDescriptor) -> Result<Codec> {
        let schema = Synthesizer::new(registry).synthesize(descriptor)?;
        let mut builder = PlanBuilder { registry, records: Vec::new(), slots: HashMap::new() };
        let root = builder.plan(descriptor)?;
        trace!(type_name = %descriptor.name(), records = builder.records.len(), "compiled codec plan");
        Ok(Codec {
            key: descriptor.key(),
            type_name: descriptor.name().name.clone(),
            schema,
            root,
            records: builder.records,
        })
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Append the Avro body of `value` to `buf`. Mismatches carry the path
    /// from the root type to the offending component.
    pub fn encode(&self, value: &dyn Any, buf: &mut Vec<u8>) -> Result<()> {
        self.encode_plan(&self.root, value, buf).map_err(|e| e.at(&self.type_name))
    }

    pub fn encode_to_vec(&self, value: &dyn Any) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(64);
        self.encode(value, &mut buf)?;
        Ok(buf)
    }

    /// Decode exactly one datum; trailing bytes are an error.
    pub fn decode(&self, bytes: &[u8]) -> Result<DynValue> {
        let mut r = Decoder::new(bytes);
        let value = self.decode_plan(&self.root, &mut r).map_err(|e| e.at(&self.type_name))?;
        r.finish()?;
        Ok(value)
    }

    pub fn decode_as<T: Any>(&self, bytes: &[u8]) -> Result<T> {
        self.decode(bytes)?.downcast::<T>().map(|v| *v).map_err(|_| {
            Error::construction(
                std::any::type_name::<T>(),
                format!("codec for `{}` produces a different type", self.type_name),
            )
        })
    }

    fn encode_plan(&self, plan: &Plan, v: &dyn Any, buf: &mut Vec<u8>) -> Result<()> {
        match plan {
            Plan::Scalar(s) => write_scalar(s.target, &(s.read)(v)?, buf),
            Plan::Record(slot) => {
                let record = &self.records[*slot];
                if let Some(check) = &record.check {
                    check(v)?;
                }
                for f in &record.fields {
                    let field = (f.read)(v)
                        .ok_or_else(|| Error::mismatch(format!("value is not a `{}`", record.type_name)))?;
                    self.encode_plan(&f.plan, field, buf).map_err(|e| e.at(&f.name))?;
                }
                Ok(())
            }
            Plan::Sequence(s) => {
                let items = (s.items)(v).ok_or_else(|| Error::mismatch("expected a sequence"))?;
                if !items.is_empty() {
                    binary::write_long(buf, items.len() as i64);
                    for (i, item) in items.into_iter().enumerate() {
                        self.encode_plan(&s.element, item, buf).map_err(|e| e.at(&format!("[{i}]")))?;
                    }
                }
                binary::write_long(buf, 0);
                Ok(())
            }
            Plan::Map(m) => {
                let entries = (m.entries)(v).ok_or_else(|| Error::mismatch("expected a map"))?;
                if !entries.is_empty() {
                    binary::write_long(buf, entries.len() as i64);
                    for (k, value) in entries {
                        let key = m.key.read(k)?;
                        binary::write_string(buf, &key);
                        self.encode_plan(&m.value, value, buf).map_err(|e| e.at(&format!("[{key:?}]")))?;
                    }
                }
                binary::write_long(buf, 0);
                Ok(())
            }
            Plan::Nullable(n) => match (n.get)(v).ok_or_else(|| Error::mismatch("expected an optional"))? {
                None => {
                    binary::write_long(buf, 0);
                    Ok(())
                }
                Some(inner) => self.encode_branch(&n.inner, inner, buf, 1),
            },
            Plan::Union(_) => self.encode_branch(plan, v, buf, 0),
            Plan::Enum(e) => {
                let index = (e.index_of)(v)
                    .ok_or_else(|| Error::mismatch(format!("value is not a `{}` symbol", e.type_name)))?;
                binary::write_long(buf, index as i64);
                Ok(())
            }
            Plan::Indirect(i) => {
                let inner = (i.deref)(v).ok_or_else(|| Error::mismatch("expected a boxed value"))?;
                self.encode_plan(&i.inner, inner, buf)
            }
        }
    }

    /// Write the union index (shifted by `offset`, 1 under a leading `null`)
    /// and the selected branch. A union under an optional is flattened into it.
    fn encode_branch(&self, plan: &Plan, v: &dyn Any, buf: &mut Vec<u8>, offset: usize) -> Result<()> {
        match plan {
            Plan::Union(branches) => {
                for (i, b) in branches.iter().enumerate() {
                    if let Some(inner) = (b.get)(v) {
                        binary::write_long(buf, (offset + i) as i64);
                        return self.encode_plan(&b.plan, inner, buf);
                    }
                }
                Err(Error::mismatch("value matches no union branch"))
            }
            Plan::Indirect(i) => {
                let inner = (i.deref)(v).ok_or_else(|| Error::mismatch("expected a boxed value"))?;
                self.encode_branch(&i.inner, inner, buf, offset)
            }
            other => {
                binary::write_long(buf, offset as i64);
                self.encode_plan(other, v, buf)
            }
        }
    }

    fn decode_plan(&self, plan: &Plan, r: &mut Decoder<'_>) -> Result<DynValue> {
        match plan {
            Plan::Scalar(s) => (s.make)(read_scalar(s.target, r)?),
            Plan::Record(slot) => r.nested(|r| self.decode_record(&self.records[*slot], r)),
            Plan::Sequence(s) => {
                let zero_width = self.zero_width(&s.element, &mut Vec::new());
                let mut items = Vec::new();
                loop {
                    let count = r.next_block(zero_width, items.len())?;
                    if count == 0 {
                        break;
                    }
                    items.reserve(count);
                    for _ in 0..count {
                        let i = items.len();
                        items.push(self.decode_plan(&s.element, r).map_err(|e| e.at(&format!("[{i}]")))?);
                    }
                }
                (s.collect)(items)
            }
            Plan::Map(m) => {
                let mut entries = Vec::new();
                loop {
                    // every entry carries at least its key's length
                    let count = r.next_block(false, entries.len())?;
                    if count == 0 {
                        break;
                    }
                    entries.reserve(count);
                    for _ in 0..count {
                        let key = r.read_string()?;
                        let value = self.decode_plan(&m.value, r).map_err(|e| e.at(&format!("[{key:?}]")))?;
                        entries.push((m.key.make(key)?, value));
                    }
                }
                (m.collect)(entries)
            }
            Plan::Nullable(n) => match union_index(r)? {
                0 => (n.wrap)(None),
                index => (n.wrap)(Some(self.decode_branch(&n.inner, index - 1, r)?)),
            },
            Plan::Union(_) => {
                let index = union_index(r)?;
                self.decode_branch(plan, index, r)
            }
            Plan::Enum(e) => {
                let index = r.read_long()?;
                usize::try_from(index)
                    .ok()
                    .filter(|i| *i < e.symbols)
                    .and_then(e.from_index)
                    .ok_or_else(|| Error::malformed(format!("enum index {index} out of range for `{}`", e.type_name)))
            }
            Plan::Indirect(i) => (i.wrap)(self.decode_plan(&i.inner, r)?),
        }
    }

    /// True when a value of `plan` may occupy no bytes. `path` holds the
    /// records being inspected so a recursive record ends the search.
    fn zero_width(&self, plan: &Plan, path: &mut Vec<usize>) -> bool {
        match plan {
            Plan::Scalar(s) => s.target == Primitive::Null,
            Plan::Record(slot) => {
                if path.contains(slot) {
                    return false;
                }
                path.push(*slot);
                let empty = self.records[*slot].fields.iter().all(|f| self.zero_width(&f.plan, path));
                path.pop();
                empty
            }
            Plan::Indirect(i) => self.zero_width(&i.inner, path),
            Plan::Sequence(_) | Plan::Map(_) | Plan::Nullable(_) | Plan::Union(_) | Plan::Enum(_) => false,
        }
    }

    fn decode_branch(&self, plan: &Plan, index: usize, r: &mut Decoder<'_>) -> Result<DynValue> {
        match plan {
            Plan::Union(branches) => {
                let b = branches
                    .get(index)
                    .ok_or_else(|| Error::malformed(format!("union index {index} out of range")))?;
                (b.wrap)(self.decode_plan(&b.plan, r)?)
            }
            Plan::Indirect(i) => (i.wrap)(self.decode_branch(&i.inner, index, r)?),
            other if index == 0 => self.decode_plan(other, r),
            _ => Err(Error::malformed(format!("union index {index} out of range"))),
        }
    }

    fn decode_record(&self, record: &RecordPlan, r: &mut Decoder<'_>) -> Result<DynValue> {
        match &record.constructor {
            Constructor::Assemble(assemble) => {
                let mut values = FieldValues::new(&record.type_name, record.fields.len());
                for f in &record.fields {
                    let value = self.decode_plan(&f.plan, r).map_err(|e| e.at(&f.name))?;
                    values.push(&f.name, value);
                }
                assemble(&mut values)
            }
            Constructor::Populate(new) => {
                let mut target = new();
                for f in &record.fields {
                    let value = self.decode_plan(&f.plan, r).map_err(|e| e.at(&f.name))?;
                    let set = f.write.as_ref().ok_or_else(|| {
                        Error::construction(&record.type_name, format!("field `{}` has no setter", f.name))
                    })?;
                    let owner: &mut dyn Any = &mut *target;
                    set(owner, value)?;
                }
                Ok(target)
            }
            Constructor::Unavailable => Err(Error::construction(
                &record.type_name,
                "the type exposes no way to construct it; it can only be encoded",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bytes, Reflect, RecordBuilder, Walker};
    use std::collections::HashMap;

    fn codec<T: Reflect>() -> Result<Codec> {
        let registry = DescriptorRegistry::new();
        let d = registry.describe::<T>()?;
        Codec::build(&registry, &d)
    }

    #[derive(Debug, PartialEq)]
    struct Person {
        name: String,
        age: u8,
        email: Option<String>,
        friends: Vec<Person>,
    }
    crate::reflect_record!(Person { name, age, email, friends });

    #[derive(Debug, PartialEq)]
    struct Node {
        value: i32,
        next: Option<Box<Node>>,
    }
    crate::reflect_record!(Node { value, next });

    #[test]
    fn records_round_trip_through_the_arena() {
        let c = codec::<Person>().unwrap();
        let ada = Person {
            name: "Ada".into(),
            age: 36,
            email: None,
            friends: vec![Person { name: "Bob".into(), age: 41, email: Some("b@x".into()), friends: vec![] }],
        };
        let bytes = c.encode_to_vec(&ada).unwrap();
        assert_eq!(c.decode_as::<Person>(&bytes).unwrap(), ada);
    }

    #[test]
    fn recursive_codecs_build_and_round_trip() {
        let c = codec::<Node>().unwrap();
        let list = Node { value: 1, next: Some(Box::new(Node { value: 2, next: None })) };
        let bytes = c.encode_to_vec(&list).unwrap();
        // 1, branch 1, 2, branch 0
        assert_eq!(bytes, [0x02, 0x02, 0x04, 0x00]);
        assert_eq!(c.decode_as::<Node>(&bytes).unwrap(), list);
    }

    #[test]
    fn mismatches_report_the_component_path() {
        #[derive(Debug)]
        struct Counter {
            hits: Vec<u64>,
        }
        crate::reflect_record!(Counter { hits });

        let c = codec::<Counter>().unwrap();
        let err = c.encode_to_vec(&Counter { hits: vec![1, u64::MAX] }).unwrap_err();
        match err {
            Error::SchemaMismatch { path, .. } => assert_eq!(path, "Counter.hits[1]"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trailing_and_truncated_input_is_malformed() {
        let c = codec::<Node>().unwrap();
        assert!(matches!(c.decode(&[0x02, 0x00, 0x00]), Err(Error::Malformed(_))));
        assert!(matches!(c.decode(&[0x02]), Err(Error::Malformed(_))));
        assert!(matches!(c.decode(&[0x02, 0x04]), Err(Error::Malformed(_))));
    }

    #[derive(Debug, Default, PartialEq)]
    struct Config {
        name: String,
        tags: HashMap<String, Bytes>,
    }
    crate::reflect_record!(Config { name, tags } via Default);

    #[test]
    fn populated_records_round_trip() {
        let c = codec::<Config>().unwrap();
        let mut cfg = Config { name: "x".into(), ..Config::default() };
        cfg.tags.insert("k".into(), Bytes(vec![1, 2, 3]));
        let bytes = c.encode_to_vec(&cfg).unwrap();
        assert_eq!(c.decode_as::<Config>(&bytes).unwrap(), cfg);
    }

    struct Sealed {
        id: i64,
    }

    impl Reflect for Sealed {
        fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
            RecordBuilder::<Sealed>::new(walker).field("id", |s| &s.id)?.encode_only()
        }
    }

    #[test]
    fn encode_only_types_fail_to_decode() {
        let c = codec::<Sealed>().unwrap();
        let bytes = c.encode_to_vec(&Sealed { id: 7 }).unwrap();
        assert!(matches!(c.decode(&bytes), Err(Error::Construction { .. })));
    }

    #[derive(Default)]
    struct HalfSettable {
        a: i32,
        b: i32,
    }

    impl Reflect for HalfSettable {
        fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
            RecordBuilder::<HalfSettable>::new(walker)
                .field_with("a", |s| &s.a, |s, v| s.a = v)?
                .field("b", |s| &s.b)?
                .populate()
        }
    }

    #[test]
    fn populate_without_every_setter_fails_at_build() {
        let err = codec::<HalfSettable>().unwrap_err();
        assert!(matches!(&err, Error::Construction { reason, .. } if reason.contains("`b`")), "{err}");
    }

    #[test]
    fn nesting_past_the_depth_limit_is_malformed() {
        let c = codec::<Node>().unwrap();
        // value 0, next is Some, forever
        let bytes = [0x00, 0x02].repeat(100_000);
        assert!(matches!(c.decode(&bytes), Err(Error::Malformed(_))));

        let mut list = Node { value: 0, next: None };
        for value in 1..100 {
            list = Node { value, next: Some(Box::new(list)) };
        }
        let bytes = c.encode_to_vec(&list).unwrap();
        assert_eq!(c.decode_as::<Node>(&bytes).unwrap(), list);
    }

    #[derive(Debug, PartialEq)]
    struct Beats {
        ticks: Vec<()>,
        ids: Vec<i32>,
    }
    crate::reflect_record!(Beats { ticks, ids });

    #[test]
    fn block_counts_cannot_outrun_the_input() {
        let c = codec::<Beats>().unwrap();
        let beats = Beats { ticks: vec![(); 3], ids: vec![7] };
        assert_eq!(c.decode_as::<Beats>(&c.encode_to_vec(&beats).unwrap()).unwrap(), beats);

        let mut spin = Vec::new();
        binary::write_long(&mut spin, i64::MAX);
        assert!(matches!(c.decode(&spin), Err(Error::Malformed(_))));

        let mut short = Vec::new();
        binary::write_long(&mut short, 0);
        binary::write_long(&mut short, 1_000_000);
        short.extend_from_slice(&[0x02, 0x00]);
        assert!(matches!(c.decode(&short), Err(Error::Malformed(_))));
    }

    #[derive(Debug, PartialEq)]
    struct Aliases {
        by_name: HashMap<Box<String>, i32>,
    }
    crate::reflect_record!(Aliases { by_name });

    #[test]
    fn boxed_string_keys_are_map_keys() {
        let c = codec::<Aliases>().unwrap();
        let mut aliases = Aliases { by_name: HashMap::new() };
        aliases.by_name.insert(Box::new("ann".to_string()), 1);
        let bytes = c.encode_to_vec(&aliases).unwrap();
        assert_eq!(c.decode_as::<Aliases>(&bytes).unwrap(), aliases);
    }

    #[test]
    fn wrong_host_type_is_a_mismatch() {
        let c = codec::<Node>().unwrap();
        assert!(matches!(c.encode_to_vec(&"not a node"), Err(Error::SchemaMismatch { .. })));
    }
}
