//! Domain types for the upload gateway.
//!
//! ```text
//! UploadMetadata  -- typed recognized fields + passthrough bag
//! UploadDescriptor -- single input to the Finalization Orchestrator
//! MultipartAssembly -- in-memory fan-in state for one logical file
//! FailedUpload     -- in-memory record of a finalization failure
//! ```

pub mod assembly;
pub mod failure;
pub mod upload;

pub use assembly::{MultipartAssembly, PartRef};
pub use failure::FailedUpload;
pub use upload::{ObjectKey, UploadDescriptor, UploadMetadata, UploadRecord};
