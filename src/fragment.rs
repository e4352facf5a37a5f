//! Multi-carrier fragmentation protocol.
//!
//! A logical byte stream rarely fits one carrier, so the protocol spreads
//! it across a sequence of carrier instances ("fragments"). Every fragment
//! starts with a 12-byte product UUID header: an 8-byte big-endian stream
//! UUID shared by all fragments of the stream, followed by a 4-byte
//! big-endian sequence number starting at [`FIRST_FRAGMENT_SEQUENCE`].
//! The header is always written and read under the algorithm-constant
//! bootstrap seed, so a reader can identify a fragment before any key
//! material is applied; immediately after the header both sides switch to
//! the key-derived ordering (when the config asks for it) and the rest of
//! the carrier is bound to the key.
//!
//! Capacity exhaustion is the normal roll signal: when a carrier refuses a
//! byte the writer finalizes it under a sequence-derived name, opens the
//! next instance, and retries the byte there.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use crate::carrier::{CarrierCodec, CarrierError, CarrierFactory};
use crate::key::Key;
use crate::{FIRST_FRAGMENT_SEQUENCE, PRODUCT_UUID_SIZE, SEQUENCE_SIZE, STREAM_UUID_SIZE};

/// Errors raised by the fragmentation protocol.
#[derive(Error, Debug)]
pub enum FragmentError {
    #[error("carrier cannot hold the {PRODUCT_UUID_SIZE}-byte fragment header")]
    HeaderDoesNotFit,

    #[error("carrier accepts no payload beyond the header")]
    CarrierTooSmall,

    #[error("fragment stream mismatch: expected {expected:016x}, found {found:016x}")]
    StreamMismatch { expected: u64, found: u64 },

    #[error("fragment sequence mismatch: expected {expected}, found {found}")]
    SequenceMismatch { expected: u32, found: u32 },

    #[error("carrier error: {0}")]
    Carrier(#[from] CarrierError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// The self-describing header at the start of every fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Identifies the logical stream all fragments belong to.
    pub stream_uuid: u64,
    /// 1-based position of this fragment within the stream. Sequence 0
    /// means "not a fragment continuation".
    pub sequence: u32,
}

impl FragmentHeader {
    /// Serializes to the 12-byte wire layout.
    pub fn to_bytes(&self) -> [u8; PRODUCT_UUID_SIZE] {
        let mut bytes = [0u8; PRODUCT_UUID_SIZE];
        bytes[..STREAM_UUID_SIZE].copy_from_slice(&self.stream_uuid.to_be_bytes());
        bytes[STREAM_UUID_SIZE..].copy_from_slice(&self.sequence.to_be_bytes());
        bytes
    }

    /// Parses the 12-byte wire layout.
    pub fn from_bytes(bytes: &[u8; PRODUCT_UUID_SIZE]) -> Self {
        let mut uuid = [0u8; STREAM_UUID_SIZE];
        uuid.copy_from_slice(&bytes[..STREAM_UUID_SIZE]);
        let mut seq = [0u8; SEQUENCE_SIZE];
        seq.copy_from_slice(&bytes[STREAM_UUID_SIZE..]);
        Self {
            stream_uuid: u64::from_be_bytes(uuid),
            sequence: u32::from_be_bytes(seq),
        }
    }
}

/// The sequence-derived base name a fragment is persisted under.
pub fn fragment_name(stream_uuid: u64, sequence: u32) -> String {
    format!("{stream_uuid:016x}-{sequence:08x}")
}

/// Result of writing one logical stream.
#[derive(Debug, Clone)]
pub struct FragmentSummary {
    /// The stream UUID shared by all fragments.
    pub stream_uuid: u64,
    /// Finalized fragment files, in sequence order.
    pub fragments: Vec<PathBuf>,
    /// Total payload bytes written.
    pub bytes_written: u64,
}

impl FragmentSummary {
    /// Number of fragments the stream was split into.
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
}

/// Writes one logical byte stream across as many carriers as it needs.
#[derive(Debug)]
pub struct FragmentWriter {
    factory: CarrierFactory,
    key: Key,
    staging: PathBuf,
    header: FragmentHeader,
    carrier: Option<CarrierCodec>,
    finished: Vec<PathBuf>,
    bytes_written: u64,
    payload_in_current: u64,
}

impl FragmentWriter {
    /// Opens a writer with a freshly generated stream UUID and the first
    /// carrier instance ready for payload.
    pub fn create(
        factory: CarrierFactory,
        key: Key,
        staging: PathBuf,
    ) -> Result<Self, FragmentError> {
        Self::with_stream_uuid(factory, key, staging, OsRng.next_u64())
    }

    /// Opens a writer for a caller-chosen stream UUID.
    pub fn with_stream_uuid(
        factory: CarrierFactory,
        key: Key,
        staging: PathBuf,
        stream_uuid: u64,
    ) -> Result<Self, FragmentError> {
        fs::create_dir_all(&staging)?;
        let mut writer = Self {
            factory,
            key,
            staging,
            header: FragmentHeader {
                stream_uuid,
                sequence: FIRST_FRAGMENT_SEQUENCE,
            },
            carrier: None,
            finished: Vec::new(),
            bytes_written: 0,
            payload_in_current: 0,
        };
        writer.open_carrier()?;
        Ok(writer)
    }

    /// The stream UUID all fragments of this writer share.
    pub fn stream_uuid(&self) -> u64 {
        self.header.stream_uuid
    }

    /// The 12-byte product UUID of the stream's first fragment, which is
    /// what the tracking index records for later lookup.
    pub fn first_product_uuid(&self) -> [u8; PRODUCT_UUID_SIZE] {
        FragmentHeader {
            stream_uuid: self.header.stream_uuid,
            sequence: FIRST_FRAGMENT_SEQUENCE,
        }
        .to_bytes()
    }

    /// Writes one payload byte, rolling to a new fragment when the
    /// current carrier is exhausted.
    pub fn write(&mut self, byte: u8) -> Result<(), FragmentError> {
        let mut fresh_failures = 0;
        loop {
            let carrier = self.carrier.as_mut().ok_or(FragmentError::CarrierTooSmall)?;
            if carrier.write(byte) {
                self.payload_in_current += 1;
                self.bytes_written += 1;
                return Ok(());
            }
            // Two consecutive fresh carriers refusing payload means the
            // configured capacity cannot make progress at all
            if self.payload_in_current == 0 {
                fresh_failures += 1;
                if fresh_failures >= 2 {
                    return Err(FragmentError::CarrierTooSmall);
                }
            }
            self.roll()?;
        }
    }

    /// Writes a whole buffer.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), FragmentError> {
        for &byte in bytes {
            self.write(byte)?;
        }
        Ok(())
    }

    /// Finalizes the current (possibly partial) carrier and returns the
    /// stream summary. A partially filled tail carrier is persisted, not
    /// discarded.
    pub fn finish(mut self) -> Result<FragmentSummary, FragmentError> {
        self.finalize_current()?;
        debug!(
            stream_uuid = self.header.stream_uuid,
            fragments = self.finished.len(),
            bytes = self.bytes_written,
            "fragment stream finished"
        );
        Ok(FragmentSummary {
            stream_uuid: self.header.stream_uuid,
            fragments: self.finished,
            bytes_written: self.bytes_written,
        })
    }

    fn open_carrier(&mut self) -> Result<(), FragmentError> {
        let mut codec = self.factory.open_for_write()?;
        for byte in self.header.to_bytes() {
            if !codec.write(byte) {
                return Err(FragmentError::HeaderDoesNotFit);
            }
        }
        if self.factory.secure() {
            codec.secure_stream(&self.key, &self.header.to_bytes());
        }
        self.carrier = Some(codec);
        self.payload_in_current = 0;
        Ok(())
    }

    fn roll(&mut self) -> Result<(), FragmentError> {
        self.finalize_current()?;
        self.header.sequence += 1;
        self.open_carrier()
    }

    fn finalize_current(&mut self) -> Result<(), FragmentError> {
        if let Some(codec) = self.carrier.take() {
            let name = fragment_name(self.header.stream_uuid, self.header.sequence);
            let path = codec.finalize(&self.staging, &name)?;
            debug!(
                fragment = %path.display(),
                payload = self.payload_in_current,
                "carrier finalized"
            );
            self.finished.push(path);
        }
        Ok(())
    }
}

/// Locates fragment files for a reader. The next fragment of a stream is
/// a separate file the caller may have to find; returning None surfaces a
/// recoverable "more data expected, fragment not found" condition.
pub trait FragmentSource {
    fn locate(&mut self, stream_uuid: u64, sequence: u32) -> Option<PathBuf>;
}

/// Finds fragments by their sequence-derived names in one directory.
#[derive(Debug, Clone)]
pub struct DirectoryFragmentSource {
    dir: PathBuf,
}

impl DirectoryFragmentSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl FragmentSource for DirectoryFragmentSource {
    fn locate(&mut self, stream_uuid: u64, sequence: u32) -> Option<PathBuf> {
        let name = fragment_name(stream_uuid, sequence);
        for extension in ["png", "txt", "bin"] {
            let path = self.dir.join(format!("{name}.{extension}"));
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }
}

/// Outcome of a fragment read request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// The whole buffer was filled.
    Complete,
    /// The stream continues in a fragment the source could not find.
    /// `remaining` bytes of the request are still unfilled; the caller
    /// can supply the file and retry with the unfilled tail.
    MissingFragment { sequence: u32, remaining: usize },
}

/// Reads one logical byte stream back across its fragment files.
pub struct FragmentReader<S: FragmentSource> {
    factory: CarrierFactory,
    key: Key,
    source: S,
    stream_uuid: u64,
    first_header: FragmentHeader,
    next_sequence: u32,
    carrier: Option<CarrierCodec>,
}

impl<S: FragmentSource> FragmentReader<S> {
    /// Opens a stream at its first available fragment file.
    ///
    /// The header is read under the bootstrap seed, then the carrier is
    /// switched to key-bound ordering when the config asks for it --
    /// mirroring the writer exactly.
    pub fn open(
        mut factory: CarrierFactory,
        key: Key,
        source: S,
        first_fragment: &Path,
    ) -> Result<Self, FragmentError> {
        let mut codec = factory.open_for_read(first_fragment)?;
        let header = read_header(&mut codec)?;
        if factory.secure() {
            codec.secure_stream(&key, &header.to_bytes());
        }
        Ok(Self {
            factory,
            key,
            source,
            stream_uuid: header.stream_uuid,
            first_header: header,
            // Stepped once per exhausted carrier, so the first roll-over
            // lands on header.sequence + 1
            next_sequence: header.sequence,
            carrier: Some(codec),
        })
    }

    /// The stream UUID parsed from the first fragment.
    pub fn stream_uuid(&self) -> u64 {
        self.stream_uuid
    }

    /// The header of the fragment the reader was opened at.
    pub fn header(&self) -> FragmentHeader {
        self.first_header
    }

    /// Fills `buf` from the stream, crossing fragment boundaries as
    /// needed. When the next fragment cannot be located the unfilled
    /// remainder is reported instead of silently truncating the stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadProgress, FragmentError> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.carrier.is_none() && !self.open_next()? {
                return Ok(ReadProgress::MissingFragment {
                    sequence: self.next_sequence,
                    remaining: buf.len() - filled,
                });
            }
            if let Some(carrier) = self.carrier.as_mut() {
                filled += carrier.read(&mut buf[filled..]);
                if filled < buf.len() {
                    // Exhausted; the rest lives in the next fragment
                    self.carrier = None;
                    self.next_sequence += 1;
                }
            }
        }
        Ok(ReadProgress::Complete)
    }

    fn open_next(&mut self) -> Result<bool, FragmentError> {
        let Some(path) = self.source.locate(self.stream_uuid, self.next_sequence) else {
            return Ok(false);
        };
        let mut codec = self.factory.open_for_read(&path)?;
        let header = read_header(&mut codec)?;
        if header.stream_uuid != self.stream_uuid {
            return Err(FragmentError::StreamMismatch {
                expected: self.stream_uuid,
                found: header.stream_uuid,
            });
        }
        if header.sequence != self.next_sequence {
            return Err(FragmentError::SequenceMismatch {
                expected: self.next_sequence,
                found: header.sequence,
            });
        }
        if self.factory.secure() {
            codec.secure_stream(&self.key, &header.to_bytes());
        }
        debug!(fragment = %path.display(), sequence = header.sequence, "fragment opened");
        self.carrier = Some(codec);
        Ok(true)
    }
}

fn read_header(codec: &mut CarrierCodec) -> Result<FragmentHeader, FragmentError> {
    let mut bytes = [0u8; PRODUCT_UUID_SIZE];
    if codec.read(&mut bytes) != PRODUCT_UUID_SIZE {
        return Err(FragmentError::HeaderDoesNotFit);
    }
    Ok(FragmentHeader::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlgorithmRegistry, ParamValue, DIRECT_CHANNEL, RAW_BLOCK};

    fn direct_factory(width: i32, height: i32) -> CarrierFactory {
        let mut config = AlgorithmRegistry::builtin()
            .default_config(DIRECT_CHANNEL)
            .unwrap();
        config.set_value("width", ParamValue::Int(width)).unwrap();
        config.set_value("height", ParamValue::Int(height)).unwrap();
        CarrierFactory::new(config).unwrap()
    }

    fn raw_factory(size: i32) -> CarrierFactory {
        let mut config = AlgorithmRegistry::builtin()
            .default_config(RAW_BLOCK)
            .unwrap();
        config.set_value("size", ParamValue::Int(size)).unwrap();
        CarrierFactory::new(config).unwrap()
    }

    #[test]
    fn test_header_wire_layout_is_big_endian() {
        let header = FragmentHeader {
            stream_uuid: 0x0102_0304_0506_0708,
            sequence: 0x0A0B_0C0D,
        };
        let bytes = header.to_bytes();
        assert_eq!(
            bytes,
            [1, 2, 3, 4, 5, 6, 7, 8, 0x0A, 0x0B, 0x0C, 0x0D]
        );
        assert_eq!(FragmentHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn test_fragment_name_is_sequence_derived() {
        assert_eq!(
            fragment_name(0xDEAD_BEEF, 3),
            "00000000deadbeef-00000003"
        );
    }

    #[test]
    fn test_single_fragment_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let key = Key::from_password("pw");
        let data = b"fits in one carrier";

        let mut writer = FragmentWriter::create(
            direct_factory(8, 8),
            key.clone(),
            dir.path().to_path_buf(),
        )
        .unwrap();
        writer.write_all(data).unwrap();
        let summary = writer.finish().unwrap();
        assert_eq!(summary.fragment_count(), 1);
        assert_eq!(summary.bytes_written, data.len() as u64);

        let mut reader = FragmentReader::open(
            direct_factory(8, 8),
            key,
            DirectoryFragmentSource::new(dir.path().to_path_buf()),
            &summary.fragments[0],
        )
        .unwrap();
        assert_eq!(reader.stream_uuid(), summary.stream_uuid);
        assert_eq!(reader.header().sequence, FIRST_FRAGMENT_SEQUENCE);

        let mut out = vec![0u8; data.len()];
        assert_eq!(reader.read(&mut out).unwrap(), ReadProgress::Complete);
        assert_eq!(&out, data);
    }

    #[test]
    fn test_capacity_split_48_plus_12() {
        // 4x5x3 = 60 slots = 12 header + 48 payload per carrier
        let dir = tempfile::tempdir().unwrap();
        let key = Key::from_password("pw");
        let data: Vec<u8> = (0..60u32).map(|i| (i * 3 + 1) as u8).collect();

        let mut writer = FragmentWriter::with_stream_uuid(
            direct_factory(4, 5),
            key.clone(),
            dir.path().to_path_buf(),
            0xAB,
        )
        .unwrap();
        writer.write_all(&data).unwrap();
        let summary = writer.finish().unwrap();

        assert_eq!(summary.fragment_count(), 2);
        assert_eq!(
            summary.fragments[0].file_name().unwrap().to_str().unwrap(),
            "00000000000000ab-00000001.png"
        );
        assert_eq!(
            summary.fragments[1].file_name().unwrap().to_str().unwrap(),
            "00000000000000ab-00000002.png"
        );

        let mut reader = FragmentReader::open(
            direct_factory(4, 5),
            key,
            DirectoryFragmentSource::new(dir.path().to_path_buf()),
            &summary.fragments[0],
        )
        .unwrap();
        let mut out = vec![0u8; data.len()];
        assert_eq!(reader.read(&mut out).unwrap(), ReadProgress::Complete);
        assert_eq!(out, data);
    }

    #[test]
    fn test_missing_fragment_is_reported_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let key = Key::from_password("pw");
        let data: Vec<u8> = (0..100).collect();

        let mut writer = FragmentWriter::create(
            raw_factory(48),
            key.clone(),
            dir.path().to_path_buf(),
        )
        .unwrap();
        writer.write_all(&data).unwrap();
        let summary = writer.finish().unwrap();
        assert!(summary.fragment_count() >= 2);

        // Remove the second fragment
        std::fs::remove_file(&summary.fragments[1]).unwrap();

        let mut reader = FragmentReader::open(
            raw_factory(48),
            key,
            DirectoryFragmentSource::new(dir.path().to_path_buf()),
            &summary.fragments[0],
        )
        .unwrap();
        let mut out = vec![0u8; data.len()];
        let progress = reader.read(&mut out).unwrap();

        match progress {
            ReadProgress::MissingFragment {
                sequence,
                remaining,
            } => {
                assert_eq!(sequence, FIRST_FRAGMENT_SEQUENCE + 1);
                // First carrier held 48 - 12 = 36 payload bytes
                assert_eq!(remaining, data.len() - 36);
                assert_eq!(&out[..36], &data[..36]);
            }
            ReadProgress::Complete => panic!("expected a missing fragment"),
        }
    }

    #[test]
    fn test_foreign_fragment_fails_stream_check() {
        let dir = tempfile::tempdir().unwrap();
        let key = Key::from_password("pw");

        // Stream A: two fragments
        let mut writer = FragmentWriter::with_stream_uuid(
            raw_factory(20),
            key.clone(),
            dir.path().to_path_buf(),
            0x0A,
        )
        .unwrap();
        writer.write_all(&[7u8; 20]).unwrap();
        let summary_a = writer.finish().unwrap();
        assert_eq!(summary_a.fragment_count(), 3);

        // Replace A's second fragment with one from stream B
        let mut writer = FragmentWriter::with_stream_uuid(
            raw_factory(20),
            key.clone(),
            dir.path().to_path_buf(),
            0x0B,
        )
        .unwrap();
        writer.write_all(&[9u8; 4]).unwrap();
        let summary_b = writer.finish().unwrap();
        std::fs::remove_file(&summary_a.fragments[1]).unwrap();
        std::fs::rename(&summary_b.fragments[0], &summary_a.fragments[1]).unwrap();

        let mut reader = FragmentReader::open(
            raw_factory(20),
            key,
            DirectoryFragmentSource::new(dir.path().to_path_buf()),
            &summary_a.fragments[0],
        )
        .unwrap();
        let mut out = vec![0u8; 20];
        let result = reader.read(&mut out);
        assert!(matches!(result, Err(FragmentError::StreamMismatch { .. })));
    }

    #[test]
    fn test_header_too_large_for_carrier() {
        // 2x1x3 = 6 slots, header needs 12
        let result = FragmentWriter::create(
            direct_factory(2, 1),
            Key::from_password("pw"),
            tempfile::tempdir().unwrap().path().to_path_buf(),
        );
        assert!(matches!(result, Err(FragmentError::HeaderDoesNotFit)));
    }

    #[test]
    fn test_partial_carrier_finalized_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FragmentWriter::create(
            raw_factory(64),
            Key::from_password("pw"),
            dir.path().to_path_buf(),
        )
        .unwrap();

        // No payload at all: the opened carrier is still persisted
        let summary = writer.finish().unwrap();
        assert_eq!(summary.fragment_count(), 1);
        assert!(summary.fragments[0].is_file());
    }
}
