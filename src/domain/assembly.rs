//! In-memory fan-in state for one logical multi-part file (§3, §4.5).

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::upload::UploadMetadata;

#[derive(Debug, Clone)]
pub struct PartRef {
    pub upload_id: String,
    pub staged_path: PathBuf,
}

/// Tracks parts arriving for a single `multipartId`. Indexed by `BTreeMap`
/// so iteration is always in ascending numeric `partIndex` order -- the
/// ordering invariant the assembler depends on (§4.5: lexicographic
/// ordering is forbidden).
#[derive(Debug, Clone)]
pub struct MultipartAssembly {
    pub multipart_id: String,
    pub total_parts: u32,
    pub parts: BTreeMap<i64, PartRef>,
    pub canonical_filename: String,
    pub canonical_metadata: UploadMetadata,
    pub first_seen_at: DateTime<Utc>,
}

impl MultipartAssembly {
    pub fn new(multipart_id: String, total_parts: u32, metadata: UploadMetadata) -> Self {
        Self {
            multipart_id,
            total_parts,
            canonical_filename: metadata.filename.clone(),
            canonical_metadata: metadata,
            parts: BTreeMap::new(),
            first_seen_at: Utc::now(),
        }
    }

    /// Verifies a newly-arrived part's `totalParts`/filename agree with
    /// the assembly seeded by the first part. A mismatch is a fatal
    /// `PART_METADATA_CONFLICT` (§7).
    pub fn matches(&self, total_parts: u32, filename: &str) -> bool {
        self.total_parts == total_parts && self.canonical_filename == filename
    }

    /// Records or replaces a part. Returns the previously staged path for
    /// that index, if any -- the caller is responsible for deleting it
    /// (last-write-wins per §4.5 step 3).
    pub fn record_part(&mut self, part_index: i64, part: PartRef) -> Option<PartRef> {
        self.parts.insert(part_index, part)
    }

    pub fn is_complete(&self) -> bool {
        self.parts.len() as u32 == self.total_parts
    }

    /// Parts in strict ascending numeric `partIndex` order, ready for
    /// concatenation.
    pub fn ordered_parts(&self) -> impl Iterator<Item = (&i64, &PartRef)> {
        self.parts.iter()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.first_seen_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn meta(filename: &str) -> UploadMetadata {
        UploadMetadata::from_raw("x", {
            let mut m = HashMap::new();
            m.insert("filename".to_string(), filename.to_string());
            m
        })
    }

    #[test]
    fn ordered_parts_are_ascending_numeric_not_lexicographic() {
        let mut assembly = MultipartAssembly::new("M".to_string(), 3, meta("big.bin"));
        assembly.record_part(2, PartRef { upload_id: "u2".into(), staged_path: "p2".into() });
        assembly.record_part(10, PartRef { upload_id: "u10".into(), staged_path: "p10".into() });
        // only insert two of the three declared parts; still verifies ordering
        let indices: Vec<i64> = assembly.ordered_parts().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![2, 10], "must sort 2 before 10 numerically");
    }

    #[test]
    fn duplicate_index_is_last_write_wins() {
        let mut assembly = MultipartAssembly::new("M".to_string(), 1, meta("a.bin"));
        assembly.record_part(0, PartRef { upload_id: "first".into(), staged_path: "p1".into() });
        let replaced = assembly.record_part(
            0,
            PartRef { upload_id: "second".into(), staged_path: "p2".into() },
        );
        assert_eq!(replaced.unwrap().upload_id, "first");
        assert_eq!(assembly.parts.get(&0).unwrap().upload_id, "second");
    }

    #[test]
    fn matches_detects_total_parts_or_filename_conflict() {
        let assembly = MultipartAssembly::new("M".to_string(), 3, meta("a.bin"));
        assert!(assembly.matches(3, "a.bin"));
        assert!(!assembly.matches(4, "a.bin"));
        assert!(!assembly.matches(3, "b.bin"));
    }

    #[test]
    fn is_complete_when_recorded_parts_equal_total() {
        let mut assembly = MultipartAssembly::new("M".to_string(), 2, meta("a.bin"));
        assert!(!assembly.is_complete());
        assembly.record_part(0, PartRef { upload_id: "u0".into(), staged_path: "p0".into() });
        assembly.record_part(1, PartRef { upload_id: "u1".into(), staged_path: "p1".into() });
        assert!(assembly.is_complete());
    }
}
