//! File-backed slow tier.
//!
//! One JSON record per document:
//! ```text
//! { "document_id": "room-42", "state": "<base64>", "updated_at": 1718000000 }
//! ```
//! Upserts write `<name>.json.tmp` and rename it over the target so a
//! reader never observes a half-written record.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{PersistenceRecord, SlowStore, StoreError};

/// Slow tier storing one JSON file per document in a directory.
pub struct ArchiveSlowStore {
    dir: PathBuf,
}

impl ArchiveSlowStore {
    /// Open (and create if needed) the archive directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_file_name(document_id)))
    }
}

impl SlowStore for ArchiveSlowStore {
    fn load(&self, document_id: &str) -> Result<Option<PersistenceRecord>, StoreError> {
        let bytes = match fs::read(self.record_path(document_id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: PersistenceRecord = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(Some(record))
    }

    fn upsert(&self, record: &PersistenceRecord) -> Result<(), StoreError> {
        let target = self.record_path(&record.document_id);
        let tmp = target.with_extension("json.tmp");

        let json =
            serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }
}

/// Map a document id onto a safe file name.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte
/// becomes `%XX`. The mapping is injective, so distinct ids never share a file.
fn escape_file_name(document_id: &str) -> String {
    let mut out = String::with_capacity(document_id.len());
    for byte in document_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}
