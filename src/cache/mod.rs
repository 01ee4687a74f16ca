//! Session cache persistence and lifecycle policy.
//!
//! The [`policy`] half decides *when* a snapshot is loaded or written; the
//! [`store`] half does the actual reading and writing and knows nothing about
//! HTTP semantics.

mod policy;
mod store;

pub use policy::{
    CacheType, SaveEvent, cache_file_age, is_fresh, should_load, should_trigger_save,
};
pub use store::{CacheMiss, StoreError, read_snapshot, write_snapshot};
pub(crate) use store::load_if_fresh;
