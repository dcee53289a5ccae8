//! Shared application state threaded through every axum handler.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::application::{FailureRegistry, FinalizationOrchestrator, MultipartAssembler};
use crate::config::Config;
use crate::domain::UploadDescriptor;
use crate::ports::{ObjectStoreClient, StagingStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub staging: Arc<dyn StagingStore>,
    pub object_store: Arc<dyn ObjectStoreClient>,
    pub assembler: Arc<MultipartAssembler>,
    pub registry: Arc<FailureRegistry>,
    pub orchestrator: Arc<FinalizationOrchestrator>,
    /// The Protocol Endpoint's side of the finalization-event channel
    /// (§9's redesign flag: finalization is an explicit channel, not a
    /// callback into a protocol library). The orchestrator worker task
    /// owns the receiving end.
    pub finalize_tx: mpsc::Sender<UploadDescriptor>,
}
