//! Orchestration layer: routes finalized uploads to the single-file or
//! multi-part path, tracks failures, and runs the background reaper.

pub mod assembler;
pub mod finalize;
pub mod orchestrator;
pub mod reaper;
pub mod registry;

pub use assembler::MultipartAssembler;
pub use orchestrator::FinalizationOrchestrator;
pub use reaper::{Clock, Reaper, SystemClock};
pub use registry::FailureRegistry;
