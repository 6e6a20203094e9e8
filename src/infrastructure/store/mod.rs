//! Scoped key-value persistence

mod scoped_kv;

pub use scoped_kv::{KvTableConfig, ScopedKvStore, StoreError};
