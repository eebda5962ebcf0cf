//! Builders used by `Reflect` impls, plus the `reflect_record!` and
//! `reflect_enum!` macros that drive them.
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{
    Constructor, DynValue, FieldDescriptor, FieldValues, RecordShape, Setter, Shape, UnionShape, UnionVariant,
    Wrap, getter,
};
use crate::descriptor::Reflect;
use crate::error::{Error, Result};
use crate::walker::Walker;

/// Collects the fields of record type `O` in declaration order.
pub struct RecordBuilder<'w, 'r, O> {
    walker: &'w mut Walker<'r>,
    fields: Vec<FieldDescriptor>,
    _owner: PhantomData<fn() -> O>,
}

impl<'w, 'r, O: Reflect> RecordBuilder<'w, 'r, O> {
    pub fn new(walker: &'w mut Walker<'r>) -> Self {
        RecordBuilder { walker, fields: Vec::new(), _owner: PhantomData }
    }

    /// Read-only field. Enough for encoding and for [`RecordBuilder::assemble`].
    pub fn field<F: Reflect>(self, name: &str, get: fn(&O) -> &F) -> Result<Self> {
        self.push(name, get, None)
    }

    /// Field with a setter, required by [`RecordBuilder::populate`].
    pub fn field_with<F: Reflect>(self, name: &str, get: fn(&O) -> &F, set: fn(&mut O, F)) -> Result<Self> {
        let write: Setter = Arc::new(move |owner: &mut dyn Any, value: DynValue| -> Result<()> {
            let owner = owner
                .downcast_mut::<O>()
                .ok_or_else(|| Error::construction(O::type_name().fullname(), "setter applied to a foreign owner"))?;
            let value = super::downcast_owned::<F>(value)?;
            set(owner, value);
            Ok(())
        });
        self.push(name, get, Some(write))
    }

    fn push<F: Reflect>(mut self, name: &str, get: fn(&O) -> &F, write: Option<Setter>) -> Result<Self> {
        if self.fields.iter().any(|f| f.name == name) {
            return Err(Error::unsupported(O::type_name().fullname(), format!("field `{name}` declared twice")));
        }
        let ty = self.walker.walk::<F>()?;
        let read = getter(move |any| any.downcast_ref::<O>().map(|owner| get(owner) as &dyn Any));
        self.fields.push(FieldDescriptor { name: name.to_string(), nullable: ty.is_nullable(), ty, read, write });
        Ok(self)
    }

    /// Decode through an all-fields constructor.
    pub fn assemble(self, build: fn(&mut FieldValues<'_>) -> Result<O>) -> Result<Shape> {
        let construct = Arc::new(move |values: &mut FieldValues<'_>| -> Result<DynValue> {
            build(values).map(|owner| Box::new(owner) as DynValue)
        });
        self.finish(Constructor::Assemble(construct))
    }

    /// Decode by default-constructing `O` and calling each field's setter.
    pub fn populate(self) -> Result<Shape>
    where
        O: Default,
    {
        self.finish(Constructor::Populate(Arc::new(|| Box::new(O::default()) as DynValue)))
    }

    /// The type can be written but never read back.
    pub fn encode_only(self) -> Result<Shape> {
        self.finish(Constructor::Unavailable)
    }

    fn finish(self, constructor: Constructor) -> Result<Shape> {
        if self.fields.is_empty() {
            return Err(Error::unsupported(O::type_name().fullname(), "record exposes no fields"));
        }
        Ok(Shape::Record(RecordShape { fields: self.fields, constructor, check: None }))
    }
}

/// Collects the variants of a sum type `O`, each carrying one payload type.
pub struct UnionBuilder<'w, 'r, O> {
    walker: &'w mut Walker<'r>,
    variants: Vec<UnionVariant>,
    _owner: PhantomData<fn() -> O>,
}

impl<'w, 'r, O: Reflect> UnionBuilder<'w, 'r, O> {
    pub fn new(walker: &'w mut Walker<'r>) -> Self {
        UnionBuilder { walker, variants: Vec::new(), _owner: PhantomData }
    }

    /// `get` yields the payload when `O` holds this variant; `wrap` rebuilds `O`.
    pub fn variant<F: Reflect>(mut self, get: fn(&O) -> Option<&F>, wrap: fn(F) -> O) -> Result<Self> {
        let ty = self.walker.walk::<F>()?;
        let get = getter(move |any| any.downcast_ref::<O>().and_then(get).map(|payload| payload as &dyn Any));
        let wrap: Wrap = Arc::new(move |value: DynValue| -> Result<DynValue> {
            super::downcast_owned::<F>(value).map(|payload| Box::new(wrap(payload)) as DynValue)
        });
        self.variants.push(UnionVariant { ty, get, wrap });
        Ok(self)
    }

    pub fn finish(self) -> Result<Shape> {
        if self.variants.is_empty() {
            return Err(Error::unsupported(O::type_name().fullname(), "union declares no variants"));
        }
        Ok(Shape::Union(UnionShape { variants: self.variants }))
    }
}

/// Implement [`Reflect`](crate::Reflect) for a struct with named fields.
///
/// ```ignore
/// struct Person { name: String, age: i32 }
/// reflect_record!(Person { name, age });
///
/// // default-construct then set each field
/// #[derive(Default)]
/// struct Settings { retries: u32 }
/// reflect_record!(Settings { retries } via Default);
/// ```
///
/// The record is named after the struct, namespaced by the module it is
/// declared in. Fields are listed in wire order.
#[macro_export]
macro_rules! reflect_record {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        impl $crate::Reflect for $ty {
            fn type_name() -> $crate::TypeName {
                $crate::TypeName::qualified(module_path!(), stringify!($ty))
            }

            fn describe(walker: &mut $crate::Walker<'_>) -> $crate::Result<$crate::Shape> {
                $crate::RecordBuilder::<$ty>::new(walker)
                    $(.field(stringify!($field), |owner| &owner.$field)?)+
                    .assemble(|fields| Ok($ty { $($field: fields.take(stringify!($field))?,)+ }))
            }
        }
    };
    ($ty:ident { $($field:ident),+ $(,)? } via Default) => {
        impl $crate::Reflect for $ty {
            fn type_name() -> $crate::TypeName {
                $crate::TypeName::qualified(module_path!(), stringify!($ty))
            }

            fn describe(walker: &mut $crate::Walker<'_>) -> $crate::Result<$crate::Shape> {
                $crate::RecordBuilder::<$ty>::new(walker)
                    $(.field_with(stringify!($field), |owner| &owner.$field, |owner, value| owner.$field = value)?)+
                    .populate()
            }
        }
    };
}

/// Implement [`Reflect`](crate::Reflect) for a fieldless enum. The enum must
/// be `PartialEq`; symbols are written in the order listed.
///
/// ```ignore
/// #[derive(PartialEq)]
/// enum Suit { Hearts, Spades }
/// reflect_enum!(Suit { Hearts, Spades });
/// ```
#[macro_export]
macro_rules! reflect_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::Reflect for $ty {
            fn type_name() -> $crate::TypeName {
                $crate::TypeName::qualified(module_path!(), stringify!($ty))
            }

            fn describe(_walker: &mut $crate::Walker<'_>) -> $crate::Result<$crate::Shape> {
                $crate::EnumShape::new(
                    &[$(stringify!($variant)),+],
                    |any| {
                        let value = any.downcast_ref::<$ty>()?;
                        [$($ty::$variant),+].iter().position(|candidate| candidate == value)
                    },
                    |index| {
                        [$($ty::$variant),+]
                            .into_iter()
                            .nth(index)
                            .map(|symbol| ::std::boxed::Box::new(symbol) as $crate::DynValue)
                    },
                )
                .map($crate::Shape::Enum)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use crate::descriptor::{Constructor, Kind, Shape};
    use crate::walker::DescriptorRegistry;
    use crate::{Error, Reflect, Result, UnionBuilder, Walker};

    struct Point {
        x: i32,
        y: i32,
    }
    crate::reflect_record!(Point { x, y });

    #[derive(Default, Debug, PartialEq)]
    struct Settings {
        retries: u32,
        label: Option<String>,
    }
    crate::reflect_record!(Settings { retries, label } via Default);

    #[derive(Debug, PartialEq)]
    enum Figure {
        Circle(f64),
        Label(String),
    }

    impl Reflect for Figure {
        fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
            UnionBuilder::<Figure>::new(walker)
                .variant(|s| if let Figure::Circle(r) = s { Some(r) } else { None }, Figure::Circle)?
                .variant(|s| if let Figure::Label(l) = s { Some(l) } else { None }, Figure::Label)?
                .finish()
        }
    }

    struct Empty;

    impl Reflect for Empty {
        fn describe(walker: &mut Walker<'_>) -> Result<Shape> {
            crate::RecordBuilder::<Empty>::new(walker).encode_only()
        }
    }

    #[test]
    fn record_macro_keeps_declaration_order_and_module_namespace() {
        let registry = DescriptorRegistry::new();
        let d = registry.describe::<Point>().unwrap();
        assert_eq!(d.kind(), Kind::Record);
        assert_eq!(d.name().namespace.as_deref(), Some("avro_reflect.descriptor.builder.tests"));
        let names: Vec<_> = d.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["x", "y"]);

        let p: &dyn Any = &Point { x: 3, y: 4 };
        let y = (d.field("y").unwrap().read)(p).unwrap();
        assert_eq!(y.downcast_ref::<i32>(), Some(&4));
    }

    #[test]
    fn via_default_records_get_setters() {
        let registry = DescriptorRegistry::new();
        let d = registry.describe::<Settings>().unwrap();
        let Shape::Record(record) = d.shape() else { panic!("not a record") };
        assert!(matches!(record.constructor, Constructor::Populate(_)));
        assert!(record.fields.iter().all(|f| f.write.is_some()));
        assert!(d.field("label").unwrap().nullable);
        assert!(!d.field("retries").unwrap().nullable);
    }

    #[test]
    fn union_getters_select_the_held_variant() {
        let registry = DescriptorRegistry::new();
        let d = registry.describe::<Figure>().unwrap();
        let Shape::Union(u) = d.shape() else { panic!("not a union") };
        let value: &dyn Any = &Figure::Label("x".into());
        assert!((u.variants[0].get)(value).is_none());
        assert!((u.variants[1].get)(value).is_some());

        let rebuilt = (u.variants[0].wrap)(Box::new(2.5f64)).unwrap();
        assert_eq!(rebuilt.downcast_ref::<Figure>(), Some(&Figure::Circle(2.5)));
    }

    #[test]
    fn records_without_fields_are_unsupported() {
        let registry = DescriptorRegistry::new();
        let err = registry.describe::<Empty>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedType { .. }));
    }
}
