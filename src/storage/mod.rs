//! Storage layer for contacts.
//!
//! [`ContactStore`] is the abstract interface the resolver runs against.
//! [`InMemoryContactStore`] is always available; the durable backend lives in
//! [`persistent`] behind the `persistent` feature.

mod index;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use index::ContactSnapshot;
pub use memory::InMemoryContactStore;
pub use traits::{ContactStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_store, PersistentConfig, PersistentContactStore};
