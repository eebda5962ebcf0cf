//! Structural walk from a type to its descriptor graph.
//!
//! Every type is described at most once per registry. A type met again while
//! its own walk is still running becomes a [`Shape::Reference`] marker, which
//! is how recursive types (`Node { next: Option<Box<Node>> }`) terminate.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::descriptor::{Reflect, Shape, TypeDescriptor, TypeKey};
use crate::error::{Error, Result};

/// Naming used for records inferred from untyped values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicNaming {
    pub namespace: Option<String>,
    pub root: String,
}

impl Default for DynamicNaming {
    fn default() -> Self {
        DynamicNaming { namespace: None, root: "Root".to_string() }
    }
}

/// Published descriptors, shared across threads. Entries are never replaced.
#[derive(Default)]
pub struct DescriptorRegistry {
    memo: RwLock<HashMap<TypeKey, Arc<TypeDescriptor>>>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: TypeKey) -> Option<Arc<TypeDescriptor>> {
        self.memo.read().get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.memo.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.read().is_empty()
    }

    /// Descriptor of `T`, walking it on first use.
    pub fn describe<T: Reflect>(&self) -> Result<Arc<TypeDescriptor>> {
        let key = TypeKey::of::<T>();
        if let Some(found) = self.get(key) {
            return Ok(found);
        }
        let mut walker = Walker::new(self);
        walker.walk::<T>()?;
        let walked = walker.finish();
        debug!(type_name = %T::type_name(), types = walked.len(), "walked type graph");
        self.publish(walked);
        self.get(key).ok_or_else(|| Error::UnresolvedReference(T::type_name().fullname()))
    }

    /// Descriptor for one value. Equals [`DescriptorRegistry::describe`] for
    /// static types; dynamic types infer from the value and are not memoized.
    pub fn describe_value<T: Reflect>(&self, value: &T, naming: &DynamicNaming) -> Result<Arc<TypeDescriptor>> {
        if !T::DYNAMIC {
            return self.describe::<T>();
        }
        let mut walker = Walker::new(self).with_naming(naming.clone());
        let described = value.describe_instance(&mut walker)?;
        self.publish(walker.finish());
        Ok(described)
    }

    /// First writer wins; a racing walk of the same type is dropped.
    fn publish(&self, walked: HashMap<TypeKey, Arc<TypeDescriptor>>) {
        if walked.is_empty() {
            return;
        }
        let mut memo = self.memo.write();
        for (key, descriptor) in walked {
            memo.entry(key).or_insert(descriptor);
        }
    }
}

/// One walk over a type graph. Descriptors stay local until the walk succeeds.
pub struct Walker<'r> {
    registry: &'r DescriptorRegistry,
    naming: DynamicNaming,
    in_progress: HashSet<TypeKey>,
    walked: HashMap<TypeKey, Arc<TypeDescriptor>>,
}

impl<'r> Walker<'r> {
    pub fn new(registry: &'r DescriptorRegistry) -> Self {
        Walker {
            registry,
            naming: DynamicNaming::default(),
            in_progress: HashSet::new(),
            walked: HashMap::new(),
        }
    }

    pub fn with_naming(mut self, naming: DynamicNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn naming(&self) -> &DynamicNaming {
        &self.naming
    }

    pub fn walk<T: Reflect>(&mut self) -> Result<Arc<TypeDescriptor>> {
        let key = TypeKey::of::<T>();
        if let Some(done) = self.walked.get(&key) {
            return Ok(done.clone());
        }
        if let Some(published) = self.registry.get(key) {
            return Ok(published);
        }
        let name = T::type_name();
        if self.in_progress.contains(&key) {
            trace!(type_name = %name, "cycle; emitting reference");
            return Ok(Arc::new(TypeDescriptor::reference(key, name)));
        }

        trace!(type_name = %name, "walking");
        self.in_progress.insert(key);
        let shape = T::describe(self);
        self.in_progress.remove(&key);
        let shape: Shape = shape?;

        let descriptor = Arc::new(TypeDescriptor::new(key, name, shape));
        self.walked.insert(key, descriptor.clone());
        Ok(descriptor)
    }

    fn finish(self) -> HashMap<TypeKey, Arc<TypeDescriptor>> {
        self.walked
    }
}
