//! File metadata and tracking-index records.
//!
//! The scanning side of the pipeline turns each discovered file into a
//! [`Metadata`] value; the writer side assigns the product UUID and hands
//! the result to the tracking-index collaborator. The index's record line
//! format is bit-exact: six fields joined by `<~>`, in order
//! `filePathHash(hex)`, `fileHash(hex)`, `dateCreated(decimal)`,
//! `dateModified(decimal)`, `permissions(decimal)`,
//! `fragment1ProductUUID(hex)`.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::PRODUCT_UUID_SIZE;

/// Field delimiter of the tracking record line format.
pub const RECORD_DELIMITER: &str = "<~>";

/// Errors raised while parsing tracking record lines.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("tracking record has {0} fields, expected 6")]
    FieldCount(usize),

    #[error("malformed {field} field: '{value}'")]
    Malformed { field: &'static str, value: String },
}

/// One line of the tracking index, keyed by the path hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingRecord {
    /// Hex SHA-256 of the absolute path string.
    pub path_hash: String,
    /// SHA-256 of the file contents.
    pub file_hash: [u8; 32],
    /// Creation timestamp, milliseconds since the epoch (0 if unknown).
    pub created_ms: u64,
    /// Modification timestamp, milliseconds since the epoch.
    pub modified_ms: u64,
    /// Permission bits (unix mode; 0 elsewhere).
    pub permissions: u32,
    /// Product UUID of the stream's first fragment, if assigned.
    pub product_uuid: Option<[u8; PRODUCT_UUID_SIZE]>,
}

impl TrackingRecord {
    /// Renders the bit-exact record line.
    pub fn to_line(&self) -> String {
        let uuid = self
            .product_uuid
            .map(hex::encode)
            .unwrap_or_default();
        [
            self.path_hash.clone(),
            hex::encode(self.file_hash),
            self.created_ms.to_string(),
            self.modified_ms.to_string(),
            self.permissions.to_string(),
            uuid,
        ]
        .join(RECORD_DELIMITER)
    }

    /// Parses a record line.
    pub fn from_line(line: &str) -> Result<Self, RecordError> {
        let fields: Vec<&str> = line.split(RECORD_DELIMITER).collect();
        if fields.len() != 6 {
            return Err(RecordError::FieldCount(fields.len()));
        }

        let file_hash_bytes = hex::decode(fields[1]).map_err(|_| RecordError::Malformed {
            field: "fileHash",
            value: fields[1].to_string(),
        })?;
        let file_hash: [u8; 32] =
            file_hash_bytes
                .try_into()
                .map_err(|_| RecordError::Malformed {
                    field: "fileHash",
                    value: fields[1].to_string(),
                })?;

        let created_ms = fields[2].parse().map_err(|_| RecordError::Malformed {
            field: "dateCreated",
            value: fields[2].to_string(),
        })?;
        let modified_ms = fields[3].parse().map_err(|_| RecordError::Malformed {
            field: "dateModified",
            value: fields[3].to_string(),
        })?;
        let permissions = fields[4].parse().map_err(|_| RecordError::Malformed {
            field: "permissions",
            value: fields[4].to_string(),
        })?;

        let product_uuid = if fields[5].is_empty() {
            None
        } else {
            let bytes = hex::decode(fields[5]).map_err(|_| RecordError::Malformed {
                field: "fragment1ProductUUID",
                value: fields[5].to_string(),
            })?;
            let uuid: [u8; PRODUCT_UUID_SIZE] =
                bytes.try_into().map_err(|_| RecordError::Malformed {
                    field: "fragment1ProductUUID",
                    value: fields[5].to_string(),
                })?;
            Some(uuid)
        };

        Ok(Self {
            path_hash: fields[0].to_string(),
            file_hash,
            created_ms,
            modified_ms,
            permissions,
            product_uuid,
        })
    }
}

/// Everything the pipeline knows about one tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// SHA-256 of the file contents.
    pub file_hash: [u8; 32],
    /// Creation timestamp, milliseconds since the epoch (0 if unknown).
    pub created_ms: u64,
    /// Modification timestamp, milliseconds since the epoch.
    pub modified_ms: u64,
    /// Permission bits (unix mode; 0 elsewhere).
    pub permissions: u32,
    /// Product UUID assigned by the writer worker, if any.
    pub product_uuid: Option<[u8; PRODUCT_UUID_SIZE]>,
    /// Set when the content is unchanged and only the index record needs
    /// refreshing, so the writer skips embedding entirely.
    pub metadata_update: bool,
}

impl Metadata {
    /// Builds metadata for a file on disk, hashing its contents.
    pub fn for_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut hasher = Sha256::new();
        let mut file = fs::File::open(&path)?;
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let stat = fs::metadata(&path)?;
        let created_ms = stat.created().ok().map(epoch_ms).unwrap_or(0);
        let modified_ms = stat.modified().ok().map(epoch_ms).unwrap_or(0);

        Ok(Self {
            path,
            file_hash: hasher.finalize().into(),
            created_ms,
            modified_ms,
            permissions: permission_bits(&stat),
            product_uuid: None,
            metadata_update: false,
        })
    }

    /// Hex SHA-256 of this file's path string.
    pub fn path_hash(&self) -> String {
        hash_path(&self.path)
    }

    /// The tracking record for this metadata.
    pub fn to_record(&self) -> TrackingRecord {
        TrackingRecord {
            path_hash: self.path_hash(),
            file_hash: self.file_hash,
            created_ms: self.created_ms,
            modified_ms: self.modified_ms,
            permissions: self.permissions,
            product_uuid: self.product_uuid,
        }
    }
}

/// Hex SHA-256 of a path string, the tracking index lookup key.
pub fn hash_path(path: &Path) -> String {
    hex::encode(Sha256::digest(path.to_string_lossy().as_bytes()))
}

fn epoch_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn permission_bits(stat: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    stat.permissions().mode()
}

#[cfg(not(unix))]
fn permission_bits(_stat: &fs::Metadata) -> u32 {
    0
}

/// The external tracking-index collaborator.
///
/// The pipeline only needs a lookup to skip unchanged files and a save to
/// record assigned UUIDs; the storage behind it is someone else's
/// concern. A stalled implementation blocks only the writer thread
/// calling it.
pub trait TrackingIndex: Send + Sync {
    /// Fetches the record stored under a path hash.
    fn lookup(&self, path_hash: &str) -> Option<TrackingRecord>;

    /// Stores (or replaces) a record.
    fn save(&self, record: TrackingRecord);
}

/// A map-backed tracking index for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    records: Mutex<HashMap<String, TrackingRecord>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored records, in no particular order.
    pub fn snapshot(&self) -> Vec<TrackingRecord> {
        self.records
            .lock()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl TrackingIndex for InMemoryIndex {
    fn lookup(&self, path_hash: &str) -> Option<TrackingRecord> {
        self.records.lock().ok()?.get(path_hash).cloned()
    }

    fn save(&self, record: TrackingRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.path_hash.clone(), record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> TrackingRecord {
        TrackingRecord {
            path_hash: "ab".repeat(32),
            file_hash: [0x5A; 32],
            created_ms: 1_700_000_000_123,
            modified_ms: 1_700_000_111_456,
            permissions: 33188,
            product_uuid: Some([1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 1]),
        }
    }

    #[test]
    fn test_record_line_layout() {
        let line = sample_record().to_line();
        let expected = format!(
            "{}<~>{}<~>1700000000123<~>1700000111456<~>33188<~>010203040506070800000001",
            "ab".repeat(32),
            "5a".repeat(32),
        );
        assert_eq!(line, expected);
    }

    #[test]
    fn test_record_line_roundtrip() {
        let record = sample_record();
        assert_eq!(TrackingRecord::from_line(&record.to_line()).unwrap(), record);
    }

    #[test]
    fn test_record_without_uuid_roundtrip() {
        let mut record = sample_record();
        record.product_uuid = None;
        let line = record.to_line();
        assert!(line.ends_with("<~>"));
        assert_eq!(TrackingRecord::from_line(&line).unwrap(), record);
    }

    #[test]
    fn test_record_wrong_field_count() {
        let result = TrackingRecord::from_line("a<~>b<~>c");
        assert!(matches!(result, Err(RecordError::FieldCount(3))));
    }

    #[test]
    fn test_record_malformed_hash() {
        let mut line = sample_record().to_line();
        line = line.replacen(&"5a".repeat(32), "zz", 1);
        let result = TrackingRecord::from_line(&line);
        assert!(matches!(
            result,
            Err(RecordError::Malformed {
                field: "fileHash",
                ..
            })
        ));
    }

    #[test]
    fn test_metadata_for_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracked.dat");
        fs::write(&path, b"file contents to hash").unwrap();

        let meta = Metadata::for_file(&path).unwrap();
        assert_eq!(
            meta.file_hash,
            <[u8; 32]>::from(Sha256::digest(b"file contents to hash"))
        );
        assert!(meta.modified_ms > 0);
        assert!(meta.product_uuid.is_none());
        assert!(!meta.metadata_update);
    }

    #[test]
    fn test_path_hash_is_path_dependent() {
        let a = hash_path(Path::new("/a/b"));
        let b = hash_path(Path::new("/a/c"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_in_memory_index_roundtrip() {
        let index = InMemoryIndex::new();
        assert!(index.is_empty());

        let record = sample_record();
        index.save(record.clone());
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(&record.path_hash), Some(record.clone()));

        // Saving under the same path hash replaces
        let mut updated = record.clone();
        updated.modified_ms += 1;
        index.save(updated.clone());
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(&record.path_hash), Some(updated));
    }
}
