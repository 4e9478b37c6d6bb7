// # State Store Implementations
//
// Applied-state caches consulted when `skip_unchanged` is enabled.

pub mod file;
pub mod memory;

pub use file::{FileStateStore, FileStateStoreFactory};
pub use memory::{MemoryStateStore, MemoryStateStoreFactory};

pub(crate) use file::{sibling, write_atomic};
