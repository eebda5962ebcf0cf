//! Type descriptors: the engine's format-neutral view of a type's structure.
//!
//! A descriptor says what a type *is* (record, sequence, map, optional,
//! union, enum, primitive) and carries type-erased accessors so the codec can
//! read values and rebuild them without knowing the concrete Rust type.
//! Descriptors are produced by the [`Walker`] from [`Reflect`] impls and are
//! immutable once published.
pub mod builder;
mod std_impls;

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::walker::Walker;

/// An owned, type-erased value travelling through decode.
pub type DynValue = Box<dyn Any + Send>;

// ------------------------------ Identity --------------------------------- //

/// Descriptor identity. Static types are keyed by `TypeId`; shapes inferred
/// from untyped values are keyed by a hash of their structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Static(TypeId),
    Shape(u64),
}

impl TypeKey {
    pub fn of<T: Any>() -> Self {
        TypeKey::Static(TypeId::of::<T>())
    }
}

/// Qualified name of a described type: `namespace.name`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeName {
    pub namespace: Option<String>,
    pub name: String,
}

static PATH_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:::[A-Za-z_][A-Za-z0-9_]*)*").expect("static regex"));

impl TypeName {
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.filter(|ns| !ns.is_empty());
        TypeName { namespace, name: name.into() }
    }

    /// Name for a type declared in `module_path` (as given by `module_path!()`).
    pub fn qualified(module_path: &str, ident: &str) -> Self {
        TypeName::new(Some(module_path.replace("::", ".")), ident)
    }

    pub fn of<T: ?Sized>() -> Self {
        TypeName::from_rust_path(std::any::type_name::<T>())
    }

    /// `my_app::model::Pair<alloc::string::String, i64>` becomes namespace
    /// `my_app.model`, name `Pair_String_i64`. Generic arguments are folded into
    /// the name so distinct instantiations never share a record name.
    ///
    /// Standard library arguments fold to their last segment. Other arguments
    /// keep the module path left after removing the base type's own module,
    /// so `W<a::Id>` and `W<b::Id>` become `W_a_Id` and `W_b_Id`.
    pub fn from_rust_path(path: &str) -> Self {
        let (base, args) = match path.find('<') {
            Some(at) => (&path[..at], &path[at..]),
            None => (path, ""),
        };
        let mut segments: Vec<&str> = base.split("::").collect();
        let ident = segments.pop().unwrap_or(base);
        let own_module = segments.iter().map(|s| format!("{s}::")).collect::<String>();
        let mut name = ident.to_string();
        for token in PATH_TOKEN.find_iter(args) {
            let arg = token.as_str();
            let local = if ["std::", "core::", "alloc::"].iter().any(|p| arg.starts_with(p)) {
                arg.rsplit("::").next().unwrap_or(arg)
            } else if own_module.is_empty() {
                arg
            } else {
                arg.strip_prefix(own_module.as_str()).unwrap_or(arg)
            };
            name.push('_');
            name.push_str(&local.replace("::", "_"));
        }
        let namespace = (!segments.is_empty()).then(|| segments.join("."));
        TypeName::new(namespace, name)
    }

    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

// ------------------------------ Primitives ------------------------------- //

/// The host-side primitive a leaf descriptor was declared with. The
/// synthesizer maps it to an Avro primitive through the promotion table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeType {
    Unit,
    Bool,
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
    F32,
    F64,
    Char,
    String,
    Bytes,
}

impl NativeType {
    pub fn rust_name(self) -> &'static str {
        match self {
            NativeType::Unit => "()",
            NativeType::Bool => "bool",
            NativeType::I8 => "i8",
            NativeType::I16 => "i16",
            NativeType::I32 => "i32",
            NativeType::I64 => "i64",
            NativeType::Isize => "isize",
            NativeType::U8 => "u8",
            NativeType::U16 => "u16",
            NativeType::U32 => "u32",
            NativeType::U64 => "u64",
            NativeType::Usize => "usize",
            NativeType::F32 => "f32",
            NativeType::F64 => "f64",
            NativeType::Char => "char",
            NativeType::String => "String",
            NativeType::Bytes => "Bytes",
        }
    }
}

/// A leaf value in Avro's vocabulary, borrowed from the host value when possible.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar<'a> {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Cow<'a, [u8]>),
    String(Cow<'a, str>),
}

impl Scalar<'_> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Boolean(_) => "boolean",
            Scalar::Int(_) => "int",
            Scalar::Long(_) => "long",
            Scalar::Float(_) => "float",
            Scalar::Double(_) => "double",
            Scalar::Bytes(_) => "bytes",
            Scalar::String(_) => "string",
        }
    }
}

/// Owned byte string; maps to Avro `bytes` (a bare `Vec<u8>` is an array of ints).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);

impl Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Bytes(v)
    }
}

impl From<&[u8]> for Bytes {
    fn from(v: &[u8]) -> Self {
        Bytes(v.to_vec())
    }
}

// ------------------------------- Accessors ------------------------------- //

pub type ScalarRead = for<'a> fn(&'a dyn Any) -> Result<Scalar<'a>>;
pub type ScalarMake = fn(Scalar<'_>) -> Result<DynValue>;
pub type ItemsFn = for<'a> fn(&'a dyn Any) -> Option<Vec<&'a dyn Any>>;
pub type CollectFn = fn(Vec<DynValue>) -> Result<DynValue>;
pub type EntriesFn = for<'a> fn(&'a dyn Any) -> Option<Vec<(&'a dyn Any, &'a dyn Any)>>;
pub type CollectEntriesFn = fn(Vec<(DynValue, DynValue)>) -> Result<DynValue>;
pub type OptionGet = for<'a> fn(&'a dyn Any) -> Option<Option<&'a dyn Any>>;
pub type OptionWrap = fn(Option<DynValue>) -> Result<DynValue>;
pub type DerefFn = for<'a> fn(&'a dyn Any) -> Option<&'a dyn Any>;
pub type BoxFn = fn(DynValue) -> Result<DynValue>;
pub type IndexOf = fn(&dyn Any) -> Option<usize>;
pub type FromIndex = fn(usize) -> Option<DynValue>;

/// Reads a component out of its owner. `None` when the owner has another type
/// (or, for union variants, holds a different variant).
pub type Getter = Arc<dyn for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync>;
/// Stores a decoded component into a default-constructed owner.
pub type Setter = Arc<dyn Fn(&mut dyn Any, DynValue) -> Result<()> + Send + Sync>;
/// Lifts a decoded component into its owner (union variant constructors).
pub type Wrap = Arc<dyn Fn(DynValue) -> Result<DynValue> + Send + Sync>;

/// Validates a whole record value before its fields are encoded.
pub type CheckFn = Arc<dyn Fn(&dyn Any) -> Result<()> + Send + Sync>;

pub type AssembleFn = Arc<dyn Fn(&mut FieldValues<'_>) -> Result<DynValue> + Send + Sync>;
pub type NewFn = Arc<dyn Fn() -> DynValue + Send + Sync>;

pub(crate) fn getter<G>(get: G) -> Getter
where
    G: for<'a> Fn(&'a dyn Any) -> Option<&'a dyn Any> + Send + Sync + 'static,
{
    Arc::new(get)
}

pub(crate) fn downcast_owned<T: Any>(value: DynValue) -> Result<T> {
    value
        .downcast::<T>()
        .map(|v| *v)
        .map_err(|_| Error::construction(std::any::type_name::<T>(), "decoded component has a different type"))
}

/// Decoded field values of one record, in declaration order, handed to an
/// [`Constructor::Assemble`] function.
pub struct FieldValues<'a> {
    type_name: &'a str,
    entries: Vec<(&'a str, Option<DynValue>)>,
}

impl<'a> FieldValues<'a> {
    pub(crate) fn new(type_name: &'a str, capacity: usize) -> Self {
        FieldValues { type_name, entries: Vec::with_capacity(capacity) }
    }

    pub(crate) fn push(&mut self, name: &'a str, value: DynValue) {
        self.entries.push((name, Some(value)));
    }

    /// Move the decoded value of field `name` out as a `T`.
    pub fn take<T: Any>(&mut self, name: &str) -> Result<T> {
        let type_name = self.type_name;
        let slot = self
            .entries
            .iter_mut()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| Error::construction(type_name, format!("no decoded value for field `{name}`")))?;
        let value = slot
            .1
            .take()
            .ok_or_else(|| Error::construction(type_name, format!("field `{name}` was already taken")))?;
        value.downcast::<T>().map(|v| *v).map_err(|_| {
            Error::construction(
                type_name,
                format!("field `{name}` is not a `{}`", std::any::type_name::<T>()),
            )
        })
    }

    /// Remaining `(name, value)` pairs in declaration order.
    pub fn drain(&mut self) -> impl Iterator<Item = (&'a str, DynValue)> + '_ {
        self.entries.drain(..).filter_map(|(name, value)| value.map(|v| (name, v)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How decode instantiates a record.
#[derive(Clone)]
pub enum Constructor {
    /// All-fields constructor, fed the decoded fields in declaration order.
    Assemble(AssembleFn),
    /// Default-construct, then store each field through its setter.
    Populate(NewFn),
    /// Encode-only; decoding fails with a construction error.
    Unavailable,
}

// -------------------------------- Shapes --------------------------------- //

pub struct PrimitiveShape {
    pub native: NativeType,
    pub read: ScalarRead,
    pub make: ScalarMake,
}

pub struct FieldDescriptor {
    pub name: String,
    pub ty: Arc<TypeDescriptor>,
    /// The field may be absent; its schema is a `null` union.
    pub nullable: bool,
    pub read: Getter,
    pub write: Option<Setter>,
}

pub struct RecordShape {
    pub fields: Vec<FieldDescriptor>,
    pub constructor: Constructor,
    /// Static records need none; their fields are the whole value.
    pub check: Option<CheckFn>,
}

pub struct SequenceShape {
    pub element: Arc<TypeDescriptor>,
    pub items: ItemsFn,
    pub collect: CollectFn,
}

pub struct MapShape {
    pub key: Arc<TypeDescriptor>,
    pub value: Arc<TypeDescriptor>,
    pub entries: EntriesFn,
    pub collect: CollectEntriesFn,
}

pub struct NullableShape {
    pub inner: Arc<TypeDescriptor>,
    pub get: OptionGet,
    pub wrap: OptionWrap,
}

pub struct UnionVariant {
    pub ty: Arc<TypeDescriptor>,
    pub get: Getter,
    pub wrap: Wrap,
}

pub struct UnionShape {
    pub variants: Vec<UnionVariant>,
}

pub struct EnumShape {
    pub symbols: Vec<String>,
    pub index_of: IndexOf,
    pub from_index: FromIndex,
}

impl EnumShape {
    pub fn new(symbols: &[&str], index_of: IndexOf, from_index: FromIndex) -> Result<Self> {
        if symbols.is_empty() {
            return Err(Error::unsupported("enum", "an enum needs at least one symbol"));
        }
        for (i, s) in symbols.iter().enumerate() {
            if symbols[..i].contains(s) {
                return Err(Error::unsupported("enum", format!("duplicate symbol `{s}`")));
            }
        }
        Ok(EnumShape { symbols: symbols.iter().map(|s| s.to_string()).collect(), index_of, from_index })
    }
}

/// Transparent single-owner indirection (`Box<T>`); lets recursive types exist.
pub struct IndirectShape {
    pub inner: Arc<TypeDescriptor>,
    pub deref: DerefFn,
    pub wrap: BoxFn,
}

pub enum Shape {
    Primitive(PrimitiveShape),
    Record(RecordShape),
    Sequence(SequenceShape),
    Map(MapShape),
    Nullable(NullableShape),
    Union(UnionShape),
    Enum(EnumShape),
    Indirect(IndirectShape),
    /// Back-reference to a type whose walk was in progress; resolved by key.
    Reference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Primitive,
    Record,
    Sequence,
    Map,
    Union,
    Enum,
}

// ------------------------------ Descriptor ------------------------------- //

pub struct TypeDescriptor {
    key: TypeKey,
    name: TypeName,
    shape: Shape,
}

impl TypeDescriptor {
    pub fn new(key: TypeKey, name: TypeName, shape: Shape) -> Self {
        TypeDescriptor { key, name, shape }
    }

    pub fn reference(key: TypeKey, name: TypeName) -> Self {
        TypeDescriptor { key, name, shape: Shape::Reference }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn name(&self) -> &TypeName {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.shape, Shape::Reference)
    }

    pub fn kind(&self) -> Kind {
        match &self.shape {
            Shape::Primitive(_) => Kind::Primitive,
            Shape::Record(_) | Shape::Reference => Kind::Record,
            Shape::Sequence(_) => Kind::Sequence,
            Shape::Map(_) => Kind::Map,
            Shape::Nullable(_) | Shape::Union(_) => Kind::Union,
            Shape::Enum(_) => Kind::Enum,
            Shape::Indirect(i) => i.inner.kind(),
        }
    }

    pub fn is_nullable(&self) -> bool {
        match &self.shape {
            Shape::Nullable(_) => true,
            Shape::Indirect(i) => i.inner.is_nullable(),
            _ => false,
        }
    }

    /// True for descriptors whose values read as Avro strings.
    pub fn is_string_like(&self) -> bool {
        match &self.shape {
            Shape::Primitive(p) => p.native == NativeType::String,
            Shape::Indirect(i) => i.inner.is_string_like(),
            _ => false,
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        match &self.shape {
            Shape::Record(r) => &r.fields,
            _ => &[],
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.name == name)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name.fullname())
            .field("shape", &self.shape)
            .finish()
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Primitive(p) => write!(f, "Primitive({})", p.native.rust_name()),
            Shape::Record(r) => f.debug_list().entries(r.fields.iter()).finish(),
            Shape::Sequence(s) => write!(f, "Sequence({})", s.element.name),
            Shape::Map(m) => write!(f, "Map({} => {})", m.key.name, m.value.name),
            Shape::Nullable(n) => write!(f, "Nullable({})", n.inner.name),
            Shape::Union(u) => {
                f.debug_list().entries(u.variants.iter().map(|v| v.ty.name.fullname())).finish()
            }
            Shape::Enum(e) => write!(f, "Enum{:?}", e.symbols),
            Shape::Indirect(i) => write!(f, "Indirect({})", i.inner.name),
            Shape::Reference => f.write_str("Reference"),
        }
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("ty", &self.ty.name.fullname())
            .field("nullable", &self.nullable)
            .field("settable", &self.write.is_some())
            .finish()
    }
}

// -------------------------------- Reflect -------------------------------- //

/// A type that can describe its own structure.
///
/// Implement it with [`reflect_record!`](crate::reflect_record),
/// [`reflect_enum!`](crate::reflect_enum), or by hand with
/// [`RecordBuilder`](builder::RecordBuilder) / [`UnionBuilder`](builder::UnionBuilder).
pub trait Reflect: Any + Send + Sized {
    /// The static type says nothing about the value's structure; descriptors
    /// must come from [`Reflect::describe_instance`].
    const DYNAMIC: bool = false;

    fn type_name() -> TypeName {
        TypeName::of::<Self>()
    }

    fn describe(walker: &mut Walker<'_>) -> Result<Shape>;

    /// Descriptor for this particular value. Static types ignore the value.
    fn describe_instance(&self, walker: &mut Walker<'_>) -> Result<Arc<TypeDescriptor>> {
        walker.walk::<Self>()
    }
}
