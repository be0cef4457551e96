mod backing_map;
mod error;

pub use backing_map::{BackingMap, InMemoryBackingMap};
pub use error::StorageError;
