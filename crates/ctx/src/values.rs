use std::{
    any::{Any, TypeId},
    collections::HashMap,
    hash::{BuildHasherDefault, Hasher},
    sync::Arc,
};

type AnyMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>, BuildHasherDefault<IdHasher>>;

// TypeIds are already hashes, the hasher only carries their u64
#[derive(Default)]
struct IdHasher(u64);

impl Hasher for IdHasher {
    fn write(&mut self, _: &[u8]) {
        unreachable!("TypeId calls write_u64");
    }

    #[inline]
    fn write_u64(&mut self, id: u64) {
        self.0 = id;
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }
}

/// Values carried by a context, keyed by their type.
///
/// Cloning is cheap, values are shared.
#[derive(Clone, Default)]
pub struct Values {
    map: Option<Arc<AnyMap>>,
}

impl Values {
    pub fn new() -> Self {
        Values { map: None }
    }

    /// Returns a copy of these values with `val` added, replacing any value of the same type.
    pub fn with<T: Send + Sync + 'static>(&self, val: T) -> Self {
        let mut map = self.map.as_deref().cloned().unwrap_or_default();
        map.insert(TypeId::of::<T>(), Arc::new(val));
        Values {
            map: Some(Arc::new(map)),
        }
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .as_ref()
            .and_then(|map| map.get(&TypeId::of::<T>()))
            .and_then(|val| val.downcast_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.map.as_ref().map_or(true, |map| map.is_empty())
    }
}

impl std::fmt::Debug for Values {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Values")
            .field("len", &self.map.as_ref().map_or(0, |map| map.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct RequestId(&'static str);

    #[test]
    fn values_are_keyed_by_type() {
        let values = Values::new().with(5i32).with(RequestId("abc"));
        assert_eq!(values.get::<i32>(), Some(&5));
        assert_eq!(values.get::<RequestId>(), Some(&RequestId("abc")));
        assert_eq!(values.get::<u8>(), None);
    }

    #[test]
    fn with_does_not_mutate_the_original() {
        let base = Values::new().with(1i32);
        let derived = base.with(2i32);
        assert_eq!(base.get::<i32>(), Some(&1));
        assert_eq!(derived.get::<i32>(), Some(&2));
        assert!(Values::new().is_empty());
    }
}
