//! Durable state: the key-value store, checkpoints, and context archiving.

pub mod context;
pub mod store;

pub use context::{ContextBody, ContextEntry, ContextHandle, ContextLedger};
pub use store::{Checkpoint, StateStore, StoreOptions};
