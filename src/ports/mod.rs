//! Trait boundaries between the application layer and its adapters.

pub mod object_store;
pub mod staging;

pub use object_store::{ObjectStat, ObjectStoreClient};
pub use staging::{PendingFile, StagingStore};
