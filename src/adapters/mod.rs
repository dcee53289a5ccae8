//! Concrete implementations of the ports.

pub mod fs_staging;
pub mod opendal_object_store;

pub use fs_staging::FsStagingStore;
pub use opendal_object_store::OpendalObjectStore;
