//! Keyed store of owned entity records
//!
//! Every level of the host → VM → cloudlet tree is an [`EntityRegistry`].
//! Records are created through [`EntityRegistry::get_or_create`], which is
//! the only way a record enters a registry, so two records can never share
//! an id at the same level.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::Debug;

/// An entity that knows its own external id
pub trait Identified {
    type Id;

    fn id(&self) -> Self::Id;
}

/// Mapping from external id to owned record, ordered by id
#[derive(Debug, Clone)]
pub struct EntityRegistry<K, V> {
    entries: BTreeMap<K, V>,
}

impl<K, V> Default for EntityRegistry<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K, V> EntityRegistry<K, V>
where
    K: Ord + Copy + Debug,
    V: Identified<Id = K>,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the record for `id`, creating it with `factory` on first sight.
    ///
    /// The factory must only set identity and immutable attributes; timeline
    /// and metric writes belong to the caller.
    ///
    /// # Panics
    ///
    /// Panics if the factory builds a record whose id differs from `id`,
    /// which would break identity uniqueness.
    pub fn get_or_create(&mut self, id: K, factory: impl FnOnce(K) -> V) -> &mut V {
        match self.entries.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let record = factory(id);
                assert_eq!(
                    record.id(),
                    id,
                    "registry factory built a record for {:?} under key {:?}",
                    record.id(),
                    id
                );
                entry.insert(record)
            }
        }
    }

    pub fn get(&self, id: K) -> Option<&V> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: K) -> Option<&mut V> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: K) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.keys().copied()
    }
}
