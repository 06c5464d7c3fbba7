//! Keyed, dimensional counter storage.

use std::collections::BTreeMap;

use super::dimension::{DimensionSet, DimensionSpecification};
use super::value::DataValue;

/// A key tuple whose values follow the canonical ordering of the owning
/// [`DimensionSet`]. Arity always equals the set size.
pub type DimensionKey = Vec<String>;

/// Counter samples keyed by dimension tuple.
///
/// Writes land in a pending buffer; [`KeyedDataStore::merge`] folds them
/// into the sorted live region, collapsing duplicate keys with
/// [`DataValue::merge`]. Enumeration yields live entries only, in key
/// order, and must not overlap with mutation.
#[derive(Debug, Clone)]
pub struct KeyedDataStore<V: DataValue> {
    dimensions: DimensionSet,
    pending: Vec<(DimensionKey, V)>,
    live: BTreeMap<DimensionKey, V>,
}

impl<V: DataValue> KeyedDataStore<V> {
    pub fn new(dimensions: DimensionSet) -> Self {
        Self {
            dimensions,
            pending: Vec::new(),
            live: BTreeMap::new(),
        }
    }

    pub fn dimension_set(&self) -> &DimensionSet {
        &self.dimensions
    }

    /// Buffers a value for the given specification. O(1) amortised; the
    /// value is not visible to enumeration until the next [`merge`].
    ///
    /// [`merge`]: KeyedDataStore::merge
    pub fn add_value(&mut self, spec: &DimensionSpecification, value: V) {
        let key = self.dimensions.key_for(spec);
        self.pending.push((key, value));
    }

    /// Folds the pending buffer into the live region. Idempotent when the
    /// buffer is empty.
    pub fn merge(&mut self) {
        for (key, value) in self.pending.drain(..) {
            match self.live.entry(key) {
                std::collections::btree_map::Entry::Occupied(mut o) => o.get_mut().merge(&value),
                std::collections::btree_map::Entry::Vacant(v) => {
                    v.insert(value);
                }
            }
        }
    }

    /// Number of distinct live keys after the most recent merge.
    pub fn count(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Live entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DimensionKey, &V)> {
        self.live.iter()
    }

    /// Inserts directly into the live region, merging on key collision.
    /// Used when rehydrating a store from persisted data.
    pub(crate) fn insert_live(&mut self, key: DimensionKey, value: V) {
        match self.live.entry(key) {
            std::collections::btree_map::Entry::Occupied(mut o) => o.get_mut().merge(&value),
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(value);
            }
        }
    }
}
