//! Dimensional counter data: dimensions, value kinds, and the keyed store.

mod dimension;
mod store;
mod value;

pub use dimension::{Dimension, DimensionSet, DimensionSpecification};
pub use store::{DimensionKey, KeyedDataStore};
pub use value::{DataKind, DataValue, Histogram, HitCount};
