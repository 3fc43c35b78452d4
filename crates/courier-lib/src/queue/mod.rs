//! Offline request queue and its storage boundary

mod persisted;
mod storage;

pub use persisted::{PersistedQueue, QueueConfig, DEFAULT_NAMESPACE_KEY};
pub use storage::{FileStorage, MemoryStorage, Storage};

#[cfg(test)]
pub(crate) use storage::ReadOnlyStorage;
