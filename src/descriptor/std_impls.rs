//! `Reflect` for primitives and the standard containers.
use std::any::Any;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use indexmap::IndexMap;

use super::{
    Bytes, CollectEntriesFn, DynValue, EntriesFn, IndirectShape, MapShape, NativeType, NullableShape,
    PrimitiveShape, Reflect, Scalar, SequenceShape, Shape, TypeName, downcast_owned,
};
use crate::error::{Error, Result};
use crate::walker::Walker;

fn host_mismatch(expected: &str) -> Error {
    Error::mismatch(format!("value is not a `{expected}`"))
}

fn scalar_mismatch(expected: &str, found: &Scalar<'_>) -> Error {
    Error::mismatch(format!("expected {expected}, decoded {}", found.kind_name()))
}

// ------------------------------ Primitives ------------------------------- //

/// `$wide` is the Avro width (`i32` for int, `i64` for long). Values that do
/// not fit are mismatches, never silently truncated.
macro_rules! int_primitive {
    ($ty:ty, $native:ident, $variant:ident, $wide:ty) => {
        impl Reflect for $ty {
            fn type_name() -> TypeName {
                TypeName::new(None, stringify!($ty))
            }

            fn describe(_walker: &mut Walker<'_>) -> Result<Shape> {
                Ok(Shape::Primitive(PrimitiveShape {
                    native: NativeType::$native,
                    read: |any| {
                        let v = *any.downcast_ref::<$ty>().ok_or_else(|| host_mismatch(stringify!($ty)))?;
                        <$wide>::try_from(v).map(Scalar::$variant).map_err(|_| {
                            Error::mismatch(format!(
                                "{} value {v} exceeds the range of avro {}",
                                stringify!($ty),
                                Scalar::$variant(0).kind_name()
                            ))
                        })
                    },
                    make: |scalar| match scalar {
                        Scalar::$variant(v) => <$ty>::try_from(v)
                            .map(|v| Box::new(v) as DynValue)
                            .map_err(|_| Error::mismatch(format!("{v} is out of range for {}", stringify!($ty)))),
                        other => Err(scalar_mismatch(Scalar::$variant(0).kind_name(), &other)),
                    },
                }))
            }
        }
    };
}

int_primitive!(i8, I8, Int, i32);
int_primitive!(i16, I16, Int, i32);
int_primitive!(i32, I32, Int, i32);
int_primitive!(u8, U8, Int, i32);
int_primitive!(u16, U16, Int, i32);
int_primitive!(i64, I64, Long, i64);
int_primitive!(isize, Isize, Long, i64);
int_primitive!(u32, U32, Long, i64);
int_primitive!(u64, U64, Long, i64);
int_primitive!(usize, Usize, Long, i64);

impl Reflect for bool {
    fn type_name() -> TypeName {
        TypeName::new(None, "bool")
    }

    fn describe(_walker: &mut Walker<'_>) -> Result<Shape> {
        Ok(Shape::Primitive(PrimitiveShape {
            native: NativeType::Bool,
            read: |any| any.downcast_ref::<bool>().map(|b| Scalar::Boolean(*b)).ok_or_else(|| host_mismatch("bool")),
            make: |scalar| match scalar {
                Scalar::Boolean(b) => Ok(Box::new(b) as DynValue),
                other => Err(scalar_mismatch("boolean", &other)),
            },
        }))
    }
}

impl Reflect for f32 {
    fn type_name() -> TypeName {
        TypeName::new(None, "f32")
    }

    fn describe(_walker: &mut Walker<'_>) -> Result<Shape> {
        Ok(Shape::Primitive(PrimitiveShape {
            native: NativeType::F32,
            read: |any| any.downcast_ref::<f32>().map(|v| Scalar::Float(*v)).ok_or_else(|| host_mismatch("f32")),
            make: |scalar| match scalar {
                Scalar::Float(v) => Ok(Box::new(v) as DynValue),
                other => Err(scalar_mismatch("float", &other)),
            },
        }))
    }
}

impl Reflect for f64 {
    fn type_name() -> TypeName {
        TypeName::new(None, "f64")
    }

    fn describe(_walker: &mut Walker<'_>) -> Result<Shape> {
        Ok(Shape::Primitive(PrimitiveShape {
            native: NativeType::F64,
            read: |any| any.downcast_ref::<f64>().map(|v| Scalar::Double(*v)).ok_or_else(|| host_mismatch("f64")),
            make: |scalar| match scalar {
                Scalar::Double(v) => Ok(Box::new(v) as DynValue),
                other => Err(scalar_mismatch("double", &other)),
            },
        }))
    }
}

/// Written as its code point in an int.
impl Reflect for char {
    fn type_name() -> TypeName {
        TypeName::new(None, "char")
    }

    fn describe(_walker: &mut Walker<'_>) -> Result<Shape> {
        Ok(Shape::Primitive(PrimitiveShape {
            native: NativeType::Char,
            read: |any| {
                let c = *any.downcast_ref::<char>().ok_or_else(|| host_mismatch("char"))?;
                // every code point is below 0x110000
                Ok(Scalar::Int(u32::from(c) as i32))
            },
            make: |scalar| match scalar {
                Scalar::Int(v) => u32::try_from(v)
                    .ok()
                    .and_then(char::from_u32)
                    .map(|c| Box::new(c) as DynValue)
                    .ok_or_else(|| Error::mismatch(format!("{v} is not a unicode scalar value"))),
                other => Err(scalar_mismatch("int", &other)),
            },
        }))
    }
}

impl Reflect for String {
    fn type_name() -> TypeName {
        TypeName::new(None, "String")
    }

    fn describe(_walker: &mut Walker<'_>) -> Result<Shape> {
        Ok(Shape::Primitive(PrimitiveShape {
            native: NativeType::String,
            read: |any| {
                any.downcast_ref::<String>()
                    .map(|s| Scalar::String(Cow::Borrowed(s.as_str())))
                    .ok_or_else(|| host_mismatch("String"))
            },
            make: |scalar| match scalar {
                Scalar::String(s) => Ok(Box::new(s.into_owned()) as DynValue),
                other => Err(scalar_mismatch("string", &other)),
            },
        }))
    }
}

impl Reflect for Bytes {
    fn type_name() -> TypeName {
        TypeName::new(None, "Bytes")
    }

    fn describe(_walker: &mut Walker<'_>) -> Result<Shape> {
        Ok(Shape::Primitive(PrimitiveShape {
            native: NativeType::Bytes,
            read: |any| {
                any.downcast_ref::<Bytes>()
                    .map(|b| Scalar::Bytes(Cow::Borrowed(b.0.as_slice())))
                    .ok_or_else(|| host_mismatch("Bytes"))
            },
            make: |scalar| match scalar {
                Scalar::Bytes(b) => Ok(Box::new(Bytes(b.into_owned())) as DynValue),
                other => Err(scalar_mismatch("bytes", &other)),
            },
        }))
    }
}

impl Reflect for () {
    fn type_name() -> TypeName {
        TypeName::new(None, "unit")
    }

    fn describe(_walker: &mut Walker<'_>) -> Result<Shape> {
        Ok(Shape::Primitive(PrimitiveShape {
            native: NativeType::Unit,
            read: |any| any.downcast_ref::<()>().map(|_| Scalar::Null).ok_or_else(|| host_mismatch("()")),
            make: |scalar| match scalar {
                Scalar::Null => Ok(Box::new(()) as DynValue),
                other => Err(scalar_mismatch("null", &other)),
            },
        }))
    }
}

// ------------------------------ Containers ------------------------------- //

fn vec_items<T: Any>(any: &dyn Any) -> Option<Vec<&dyn Any>> {
    any.downcast_ref::<Vec<T>>().map(|xs| xs.iter().map(|x| x as &dyn Any).collect())
}

fn vec_collect<T: Any + Send>(items: Vec<DynValue>) -> Result<DynValue> {
    let items = items.into_iter().map(downcast_owned::<T>).collect::<Result<Vec<T>>>()?;
    Ok(Box::new(items) as DynValue)
}

impl<T: Reflect> Reflect for Vec<T> {
    fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
        let element = walker.walk::<T>()?;
        Ok(Shape::Sequence(SequenceShape { element, items: vec_items::<T>, collect: vec_collect::<T> }))
    }
}

fn option_get<T: Any>(any: &dyn Any) -> Option<Option<&dyn Any>> {
    any.downcast_ref::<Option<T>>().map(|o| o.as_ref().map(|v| v as &dyn Any))
}

fn option_wrap<T: Any + Send>(value: Option<DynValue>) -> Result<DynValue> {
    match value {
        None => Ok(Box::new(None::<T>) as DynValue),
        Some(v) => downcast_owned::<T>(v).map(|v| Box::new(Some(v)) as DynValue),
    }
}

impl<T: Reflect> Reflect for Option<T> {
    fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
        let inner = walker.walk::<T>()?;
        Ok(Shape::Nullable(NullableShape { inner, get: option_get::<T>, wrap: option_wrap::<T> }))
    }
}

fn box_deref<T: Any>(any: &dyn Any) -> Option<&dyn Any> {
    any.downcast_ref::<Box<T>>().map(|b| &**b as &dyn Any)
}

fn box_wrap<T: Any + Send>(value: DynValue) -> Result<DynValue> {
    downcast_owned::<T>(value).map(|v| Box::new(Box::new(v)) as DynValue)
}

impl<T: Reflect> Reflect for Box<T> {
    fn type_name() -> TypeName {
        T::type_name()
    }

    fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
        let inner = walker.walk::<T>()?;
        Ok(Shape::Indirect(IndirectShape { inner, deref: box_deref::<T>, wrap: box_wrap::<T> }))
    }
}

/// Maps need string-like keys; anything else has no Avro rendering.
fn map_shape<M: Reflect, K: Reflect, V: Reflect>(
    walker: &mut Walker<'_>,
    entries: EntriesFn,
    collect: CollectEntriesFn,
) -> Result<Shape> {
    let key = walker.walk::<K>()?;
    if !key.is_string_like() {
        return Err(Error::unsupported(
            M::type_name().fullname(),
            format!("map keys must be strings, found `{}`", key.name()),
        ));
    }
    let value = walker.walk::<V>()?;
    Ok(Shape::Map(MapShape { key, value, entries, collect }))
}

fn hash_entries<K: Any, V: Any>(any: &dyn Any) -> Option<Vec<(&dyn Any, &dyn Any)>> {
    any.downcast_ref::<HashMap<K, V>>()
        .map(|m| m.iter().map(|(k, v)| (k as &dyn Any, v as &dyn Any)).collect())
}

fn hash_collect<K: Any + Send + Eq + Hash, V: Any + Send>(entries: Vec<(DynValue, DynValue)>) -> Result<DynValue> {
    let mut out = HashMap::with_capacity(entries.len());
    for (k, v) in entries {
        out.insert(downcast_owned::<K>(k)?, downcast_owned::<V>(v)?);
    }
    Ok(Box::new(out) as DynValue)
}

impl<K: Reflect + Eq + Hash, V: Reflect> Reflect for HashMap<K, V> {
    fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
        map_shape::<Self, K, V>(walker, hash_entries::<K, V>, hash_collect::<K, V>)
    }
}

fn btree_entries<K: Any, V: Any>(any: &dyn Any) -> Option<Vec<(&dyn Any, &dyn Any)>> {
    any.downcast_ref::<BTreeMap<K, V>>()
        .map(|m| m.iter().map(|(k, v)| (k as &dyn Any, v as &dyn Any)).collect())
}

fn btree_collect<K: Any + Send + Ord, V: Any + Send>(entries: Vec<(DynValue, DynValue)>) -> Result<DynValue> {
    let mut out = BTreeMap::new();
    for (k, v) in entries {
        out.insert(downcast_owned::<K>(k)?, downcast_owned::<V>(v)?);
    }
    Ok(Box::new(out) as DynValue)
}

impl<K: Reflect + Ord, V: Reflect> Reflect for BTreeMap<K, V> {
    fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
        map_shape::<Self, K, V>(walker, btree_entries::<K, V>, btree_collect::<K, V>)
    }
}

fn index_entries<K: Any, V: Any>(any: &dyn Any) -> Option<Vec<(&dyn Any, &dyn Any)>> {
    any.downcast_ref::<IndexMap<K, V>>()
        .map(|m| m.iter().map(|(k, v)| (k as &dyn Any, v as &dyn Any)).collect())
}

fn index_collect<K: Any + Send + Eq + Hash, V: Any + Send>(entries: Vec<(DynValue, DynValue)>) -> Result<DynValue> {
    let mut out = IndexMap::with_capacity(entries.len());
    for (k, v) in entries {
        out.insert(downcast_owned::<K>(k)?, downcast_owned::<V>(v)?);
    }
    Ok(Box::new(out) as DynValue)
}

impl<K: Reflect + Eq + Hash, V: Reflect> Reflect for IndexMap<K, V> {
    fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
        map_shape::<Self, K, V>(walker, index_entries::<K, V>, index_collect::<K, V>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TypeDescriptor;
    use crate::walker::DescriptorRegistry;
    use std::sync::Arc;

    fn primitive(d: &TypeDescriptor) -> &PrimitiveShape {
        match d.shape() {
            Shape::Primitive(p) => p,
            other => panic!("not a primitive: {other:?}"),
        }
    }

    fn describe<T: Reflect>() -> Arc<TypeDescriptor> {
        DescriptorRegistry::new().describe::<T>().unwrap()
    }

    #[test]
    fn unsigned_longs_beyond_i64_are_rejected() {
        let d = describe::<u64>();
        let p = primitive(&d);
        let fits: &dyn Any = &42u64;
        assert_eq!((p.read)(fits).unwrap(), Scalar::Long(42));
        let huge: &dyn Any = &u64::MAX;
        assert!(matches!((p.read)(huge), Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn narrow_ints_reject_out_of_range_decodes() {
        let d = describe::<u8>();
        let p = primitive(&d);
        let back = (p.make)(Scalar::Int(200)).unwrap();
        assert_eq!(back.downcast_ref::<u8>(), Some(&200));
        assert!((p.make)(Scalar::Int(300)).is_err());
        assert!((p.make)(Scalar::Long(1)).is_err());
    }

    #[test]
    fn chars_travel_as_code_points() {
        let d = describe::<char>();
        let p = primitive(&d);
        let c: &dyn Any = &'λ';
        assert_eq!((p.read)(c).unwrap(), Scalar::Int(0x3bb));
        assert!((p.make)(Scalar::Int(0xD800)).is_err());
    }

    #[test]
    fn strings_are_read_without_copying() {
        let d = describe::<String>();
        let p = primitive(&d);
        let s = String::from("hello");
        let any: &dyn Any = &s;
        match (p.read)(any).unwrap() {
            Scalar::String(Cow::Borrowed(b)) => assert_eq!(b, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn composite_map_keys_are_unsupported() {
        let err = DescriptorRegistry::new().describe::<HashMap<Vec<String>, i32>>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { .. }), "{err}");
        let err = DescriptorRegistry::new().describe::<BTreeMap<i64, i32>>().unwrap_err();
        assert!(err.to_string().contains("map keys must be strings"));
    }

    #[test]
    fn boxes_are_transparent() {
        let d = describe::<Box<Option<i32>>>();
        assert!(d.is_nullable());
        assert_eq!(d.name(), &<Option<i32> as Reflect>::type_name());
    }
}
