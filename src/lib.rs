//! Resumable upload ingestion gateway.
//!
//! Clean Architecture / Ports & Adapters, same layering this codebase has
//! always used:
//!
//! ```text
//! protocol   -- Tus-like HTTP surface (CREATE/HEAD/PATCH)
//! operator   -- operator-facing debug/health HTTP surface
//! application -- orchestration: assembler, registry, reaper, finalize
//! ports      -- StagingStore, ObjectStoreClient trait boundaries
//! adapters   -- filesystem staging, opendal-backed object store
//! domain     -- upload/assembly/failure types with no I/O
//! ```

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod operator;
pub mod ports;
pub mod protocol;
pub mod sanitize;
pub mod state;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use state::AppState;
