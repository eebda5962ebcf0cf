//! At-most-once codec cache.
//!
//! Each type key owns a slot whose cell is initialized exactly once. Racing
//! callers block on the cell while one of them builds; all of them then see
//! the same codec, or the same failure.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::codec::Codec;
use crate::descriptor::{TypeDescriptor, TypeKey};
use crate::error::{Error, Result};

type Outcome = Result<Arc<Codec>, Arc<Error>>;

#[derive(Default)]
struct Slot {
    cell: OnceCell<Outcome>,
}

#[derive(Default)]
pub struct CodecCache {
    slots: RwLock<HashMap<TypeKey, Arc<Slot>>>,
    builds: AtomicUsize,
}

impl CodecCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The codec for `descriptor`, running `build` only if no call has before.
    /// A failed build is cached too and reported as [`Error::CacheBuild`].
    pub fn get_or_build<F>(&self, descriptor: &TypeDescriptor, build: F) -> Result<Arc<Codec>>
    where
        F: FnOnce(&TypeDescriptor) -> Result<Codec>,
    {
        let slot = self.slot(descriptor.key());
        if slot.cell.get().is_some() {
            trace!(type_name = %descriptor.name(), "codec cache hit");
        }
        let outcome = slot.cell.get_or_init(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            let started = Instant::now();
            match build(descriptor) {
                Ok(codec) => {
                    debug!(
                        type_name = %descriptor.name(),
                        schema_bytes = codec.schema().canonical_form().len(),
                        elapsed = ?started.elapsed(),
                        "built codec"
                    );
                    Ok(Arc::new(codec))
                }
                Err(err) => {
                    warn!(type_name = %descriptor.name(), error = %err, "codec build failed");
                    Err(Arc::new(err))
                }
            }
        });
        match outcome {
            Ok(codec) => Ok(Arc::clone(codec)),
            Err(cause) => Err(Error::CacheBuild { type_name: descriptor.name().fullname(), source: Arc::clone(cause) }),
        }
    }

    /// A finished, successful codec, without building.
    pub fn get(&self, key: TypeKey) -> Option<Arc<Codec>> {
        let slot = self.slots.read().get(&key).cloned()?;
        slot.cell.get().and_then(|outcome| outcome.as_ref().ok().cloned())
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// How many builds have run. Never exceeds the number of distinct keys.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    fn slot(&self, key: TypeKey) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(&key) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(key).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::DescriptorRegistry;
    use std::sync::Barrier;
    use std::thread;

    struct Point {
        x: i32,
        y: i32,
    }
    crate::reflect_record!(Point { x, y });

    #[test]
    fn concurrent_first_use_builds_once() {
        let registry = DescriptorRegistry::new();
        let cache = CodecCache::new();
        let d = registry.describe::<Point>().unwrap();
        let threads = 16;
        let barrier = Barrier::new(threads);

        let codecs: Vec<Arc<Codec>> = thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache.get_or_build(&d, |d| Codec::build(&registry, d)).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(cache.builds(), 1);
        assert!(codecs.iter().all(|c| Arc::ptr_eq(c, &codecs[0])));
        assert!(cache.get(d.key()).is_some());
    }

    #[test]
    fn failures_are_shared_not_retried() {
        let registry = DescriptorRegistry::new();
        let cache = CodecCache::new();
        let d = registry.describe::<Point>().unwrap();

        let first = cache.get_or_build(&d, |_| Err(Error::unsupported("Point", "boom"))).unwrap_err();
        let second = cache.get_or_build(&d, |d| Codec::build(&registry, d)).unwrap_err();

        assert_eq!(cache.builds(), 1);
        assert!(matches!(first.root_cause(), Error::UnsupportedType { .. }));
        assert!(matches!(second, Error::CacheBuild { .. }));
        assert!(cache.get(d.key()).is_none());
    }
}
