//! Filesystem-backed `DurableStore` for gridclaim.
//!
//! One JSON document per cell and per user, written atomically through a
//! temp file and rename. The storage directory is locked exclusively for
//! the lifetime of the store.

mod store;

pub use store::LocalStore;
