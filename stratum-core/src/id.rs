//! # IDs
//! Process-unique identifiers, namespaced by a marker type. `UniqueID<Node>` and `UniqueID<Document>`
//! may share a numeric value, but can never be compared with each other.
//!
//! Allocate one with `Default`, or reserve a batch with [`UniqueID::many`].

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};

// Next free value per namespace. Namespaces are created lazily on first allocation.
static COUNTERS: parking_lot::RwLock<std::collections::BTreeMap<TypeId, AtomicU64>> =
    parking_lot::const_rwlock(std::collections::BTreeMap::new());

/// An ID unique within this run of the program. Never serialize these, values are reassigned
/// every launch.
pub struct UniqueID<T: Any> {
    id: std::num::NonZeroU64,
    _namespace: std::marker::PhantomData<fn() -> T>,
}
impl<T: Any> Clone for UniqueID<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: Any> Copy for UniqueID<T> {}
impl<T: Any> PartialEq for UniqueID<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T: Any> Eq for UniqueID<T> {}
impl<T: Any> PartialOrd for UniqueID<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
/// Ordering follows allocation order within a namespace. Useful for deterministic iteration,
/// but carries no other meaning.
impl<T: Any> Ord for UniqueID<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}
impl<T: Any> std::hash::Hash for UniqueID<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: Any> UniqueID<T> {
    /// Raw numeric value. IDs from differing namespaces may share it!
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id.get()
    }
    /// Reserve `count` IDs at once, taking the namespace lock only once.
    ///
    /// IDs are reserved eagerly, dropping the iterator early does not return them.
    /// Exhausting the namespace aborts the process (panics under test).
    pub fn many(count: usize) -> impl ExactSizeIterator<Item = Self> {
        let count_u64 = count as u64;
        let ty = TypeId::of::<T>();

        let start = {
            let read = COUNTERS.upgradable_read();
            if let Some(counter) = read.get(&ty) {
                counter.fetch_add(count_u64, Ordering::Relaxed)
            } else {
                let mut write = parking_lot::RwLockUpgradableReadGuard::upgrade(read);
                // Another writer may have raced us between the read and the upgrade.
                write
                    .entry(ty)
                    .or_insert_with(|| AtomicU64::new(1))
                    .fetch_add(count_u64, Ordering::Relaxed)
            }
        };

        #[allow(clippy::manual_assert)]
        if start.checked_add(count_u64).is_none() {
            #[cfg(not(test))]
            {
                log::error!("{} namespace exhausted", std::any::type_name::<T>());
                log::logger().flush();
                std::process::abort();
            }
            #[cfg(test)]
            {
                panic!("{} namespace exhausted", std::any::type_name::<T>())
            }
        }

        (0..count).map(move |offset| Self {
            // Start is at least one and the range was checked for overflow above.
            id: std::num::NonZeroU64::new(start + offset as u64).unwrap(),
            _namespace: std::marker::PhantomData,
        })
    }
}
impl<T: Any> Default for UniqueID<T> {
    fn default() -> Self {
        Self::many(1).next().unwrap()
    }
}
impl<T: Any> std::fmt::Display for UniqueID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let namespace = std::any::type_name::<T>()
            .rsplit("::")
            .next()
            .unwrap_or_default();
        write!(f, "{namespace}#{}", self.id)
    }
}
impl<T: Any> std::fmt::Debug for UniqueID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::UniqueID;
    // Each test uses its own namespace, since the counters are process-global.

    #[test]
    fn zero_count_is_fine() {
        struct Namespace;
        type TestID = UniqueID<Namespace>;

        assert_eq!(TestID::many(0).len(), 0);
        let first = TestID::default();
        let second = TestID::default();
        assert_ne!(first, second);
        assert!(first < second);
    }
    #[test]
    fn batch_is_unique() {
        struct Namespace;
        type TestID = UniqueID<Namespace>;

        let mut ids: Vec<_> = TestID::many(512).chain(TestID::many(512)).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 1024, "had duplicate ids");
    }
    #[test]
    fn display_names_namespace() {
        struct Widget;
        let id = UniqueID::<Widget>::default();
        assert!(id.to_string().starts_with("Widget#"));
    }
    #[cfg(target_pointer_width = "64")]
    #[test]
    #[should_panic(expected = "namespace exhausted")]
    fn exhaustion_panics() {
        struct Namespace;
        type TestID = UniqueID<Namespace>;

        let _ = TestID::many((u64::MAX - 1) as usize);
        let _ = TestID::many(1);
    }
}
