//! Per-context preference persistence for kubepulse

pub mod preferences;
pub mod store;

pub use preferences::PreferencesStore;
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError, base_dir};
