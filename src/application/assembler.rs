//! The Multi-part Assembler's in-memory state (§4.5). Mutations happen
//! under a single lock with no I/O performed while it is held (§5); the
//! caller performs any resulting I/O (deleting a superseded part, doing
//! the actual byte concatenation) on the snapshot handed back here.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::domain::{MultipartAssembly, PartRef, UploadMetadata};

pub struct MultipartAssembler {
    assemblies: Mutex<HashMap<String, MultipartAssembly>>,
}

#[derive(Debug)]
pub enum PartOutcome {
    /// Recorded but the assembly is still waiting on more parts.
    Accepted { replaced: Option<PartRef> },
    /// This was the last missing part; the assembly has been removed from
    /// the map and its parts are ready to concatenate.
    ReadyToAssemble {
        parts: Vec<(i64, PartRef)>,
        metadata: UploadMetadata,
        replaced: Option<PartRef>,
    },
}

/// A fatal `PART_METADATA_CONFLICT` (§7): the assembly has already been
/// removed from the map; `stale_parts` lists every staged path the caller
/// must delete (the assembly's prior parts plus the rejected new one).
#[derive(Debug)]
pub struct PartConflict {
    pub multipart_id: String,
    pub stale_parts: Vec<PartRef>,
    pub reason: String,
}

impl Default for MultipartAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartAssembler {
    pub fn new() -> Self {
        Self {
            assemblies: Mutex::new(HashMap::new()),
        }
    }

    pub fn on_part_arrival(
        &self,
        multipart_id: &str,
        part_index: i64,
        total_parts: u32,
        part: PartRef,
        metadata: UploadMetadata,
    ) -> Result<PartOutcome, PartConflict> {
        let mut map = self.assemblies.lock();

        if let Some(existing) = map.get(multipart_id) {
            if !existing.matches(total_parts, &metadata.filename) {
                let assembly = map.remove(multipart_id).expect("just checked present");
                let mut stale: Vec<PartRef> = assembly.parts.into_values().collect();
                stale.push(part);
                return Err(PartConflict {
                    multipart_id: multipart_id.to_string(),
                    stale_parts: stale,
                    reason: format!(
                        "expected totalParts={} filename={:?}, got totalParts={} filename={:?}",
                        existing.total_parts, existing.canonical_filename, total_parts, metadata.filename
                    ),
                });
            }
        } else {
            map.insert(
                multipart_id.to_string(),
                MultipartAssembly::new(multipart_id.to_string(), total_parts, metadata.clone()),
            );
        }

        let assembly = map.get_mut(multipart_id).expect("inserted or present above");
        let replaced = assembly.record_part(part_index, part);

        if assembly.is_complete() {
            let assembly = map.remove(multipart_id).expect("just confirmed present");
            let parts = assembly
                .ordered_parts()
                .map(|(i, p)| (*i, p.clone()))
                .collect();
            Ok(PartOutcome::ReadyToAssemble {
                parts,
                metadata: assembly.canonical_metadata,
                replaced,
            })
        } else {
            Ok(PartOutcome::Accepted { replaced })
        }
    }

    /// Snapshot of assemblies older than `threshold`, for the Reaper
    /// (§4.5). Removes them from the map under the lock and returns their
    /// part paths for the caller to delete outside the lock.
    pub fn evict_stale(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        threshold: chrono::Duration,
    ) -> Vec<(String, Vec<PartRef>)> {
        let mut map = self.assemblies.lock();
        let stale_ids: Vec<String> = map
            .iter()
            .filter(|(_, assembly)| assembly.age(now) > threshold && !assembly.is_complete())
            .map(|(id, _)| id.clone())
            .collect();

        stale_ids
            .into_iter()
            .map(|id| {
                let assembly = map.remove(&id).expect("id came from this map");
                (id, assembly.parts.into_values().collect())
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.assemblies.lock().len()
    }

    /// True if `upload_id` is currently held as a part of any in-progress
    /// assembly. The Operator Surface's "process pending" sweep (§4.6)
    /// uses this to skip an in-flight multi-part upload rather than
    /// treating it as an orphaned single file.
    pub fn is_active_part(&self, upload_id: &str) -> bool {
        self.assemblies
            .lock()
            .values()
            .any(|assembly| assembly.parts.values().any(|p| p.upload_id == upload_id))
    }
}
