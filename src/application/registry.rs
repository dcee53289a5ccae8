//! The Failure Registry (§4.6): an in-memory map of finalization failures,
//! guarded by a single lock held only across map mutations -- never across
//! I/O (§5).

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::domain::{FailedUpload, UploadMetadata};

pub struct FailureRegistry {
    entries: RwLock<HashMap<String, FailedUpload>>,
    history_limit: usize,
}

impl FailureRegistry {
    pub fn new(history_limit: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            history_limit,
        }
    }

    pub fn record_failure(
        &self,
        id: String,
        staged_path: std::path::PathBuf,
        metadata: UploadMetadata,
        error: String,
    ) {
        warn!(id = %id, error = %error, "recording finalization failure");
        let mut entries = self.entries.write();
        entries.insert(id.clone(), FailedUpload::new(id, staged_path, metadata, error));
        Self::evict_oldest_over_limit(&mut entries, self.history_limit);
    }

    /// Bounds the registry's memory footprint over a long-lived process
    /// (§6's `FAILED_UPLOAD_HISTORY_LIMIT`): oldest-by-`lastAttemptAt`
    /// entries are evicted once the limit is exceeded.
    fn evict_oldest_over_limit(entries: &mut HashMap<String, FailedUpload>, limit: usize) {
        if entries.len() <= limit {
            return;
        }
        let mut by_age: Vec<(String, chrono::DateTime<chrono::Utc>)> = entries
            .iter()
            .map(|(id, failed)| (id.clone(), failed.last_attempt_at))
            .collect();
        by_age.sort_by_key(|(_, at)| *at);
        for (id, _) in by_age.into_iter().take(entries.len() - limit) {
            entries.remove(&id);
        }
    }

    pub fn remove(&self, id: &str) {
        if self.entries.write().remove(id).is_some() {
            info!(id = %id, "cleared finalization failure after successful retry");
        }
    }

    pub fn get(&self, id: &str) -> Option<FailedUpload> {
        self.entries.read().get(id).cloned()
    }

    pub fn record_retry_failure(&self, id: &str, error: String) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(id) {
            entry.record_retry_failure(error);
        }
    }

    pub fn list(&self) -> Vec<FailedUpload> {
        self.entries.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn meta() -> UploadMetadata {
        UploadMetadata::from_raw("x", StdHashMap::new())
    }

    #[test]
    fn record_then_get_round_trips() {
        let registry = FailureRegistry::new(10);
        registry.record_failure("u1".into(), "/tmp/u1".into(), meta(), "boom".into());
        let entry = registry.get("u1").unwrap();
        assert_eq!(entry.last_error, "boom");
    }

    #[test]
    fn remove_clears_entry() {
        let registry = FailureRegistry::new(10);
        registry.record_failure("u1".into(), "/tmp/u1".into(), meta(), "boom".into());
        registry.remove("u1");
        assert!(registry.get("u1").is_none());
    }

    #[test]
    fn history_limit_evicts_oldest_first() {
        let registry = FailureRegistry::new(2);
        registry.record_failure("u1".into(), "/tmp/u1".into(), meta(), "e1".into());
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.record_failure("u2".into(), "/tmp/u2".into(), meta(), "e2".into());
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.record_failure("u3".into(), "/tmp/u3".into(), meta(), "e3".into());

        let remaining = registry.list();
        assert_eq!(remaining.len(), 2);
        assert!(registry.get("u1").is_none(), "oldest entry should be evicted");
    }
}
