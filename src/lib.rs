//! # Stegback - hide backups in plain sight
//!
//! Stegback is a steganographic backup engine. It hides an arbitrary byte
//! stream (a tracked file) inside innocuous carrier media (images, text
//! blocks) using a deterministic, key-seeded pseudo-random placement
//! scheme, and reconstructs the original bytes from the carriers later.
//!
//! ## Overview
//!
//! - Placement is driven by a **keyed byte stream** (a self-rehashing
//!   SHA-256 block) and a **unique permutation** over the carrier's
//!   addressable slots, so every payload byte lands in a different,
//!   key-dependent location
//! - Payload bytes are XOR'd against the keystream before embedding
//! - Large inputs are **fragmented** across multiple carrier instances,
//!   each self-describing via a 12-byte product UUID header
//! - Headers are written under a fixed bootstrap seed so a reader can
//!   identify a fragment before any key material is applied; the body is
//!   re-seeded from the key and the header (**secure mode**)
//! - A bounded producer/consumer **pipeline** turns whole directory trees
//!   into finished carrier files during a backup run
//!
//! ## Example Usage
//!
//! ```no_run
//! use stegback::config::AlgorithmRegistry;
//! use stegback::fragment::{DirectoryFragmentSource, FragmentReader, FragmentWriter};
//! use stegback::carrier::CarrierFactory;
//! use stegback::key::Key;
//!
//! let registry = AlgorithmRegistry::builtin();
//! let config = registry.default_config("direct-channel").unwrap();
//! let key = Key::from_password("correct horse battery staple");
//!
//! // Write a payload across as many carrier images as it needs
//! let factory = CarrierFactory::new(config.clone()).unwrap();
//! let mut writer = FragmentWriter::create(factory, key.clone(), "staging".into()).unwrap();
//! writer.write_all(b"the bytes to hide").unwrap();
//! let summary = writer.finish().unwrap();
//!
//! // Read them back in sequence order
//! let factory = CarrierFactory::new(config).unwrap();
//! let source = DirectoryFragmentSource::new("staging".into());
//! let mut reader =
//!     FragmentReader::open(factory, key, source, &summary.fragments[0]).unwrap();
//! let mut restored = vec![0u8; 17];
//! reader.read(&mut restored).unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`keystream`]: deterministic keyed byte/int generator
//! - [`permutation`]: sample-without-replacement slot ordering
//! - [`key`]: opaque key material derived from passwords or key files
//! - [`config`]: named, versioned, validated algorithm parameter sets
//! - [`carrier`]: the carrier codec variants (direct-channel, stealth,
//!   text-block, raw-block)
//! - [`fragment`]: the multi-carrier fragmentation protocol
//! - [`pipeline`]: the concurrent backup ingestion pipeline

/// Size of the stream UUID on the wire, in bytes.
pub const STREAM_UUID_SIZE: usize = 8;

/// Size of the fragment sequence number on the wire, in bytes.
pub const SEQUENCE_SIZE: usize = 4;

/// Size of the full product UUID (stream UUID + sequence number).
pub const PRODUCT_UUID_SIZE: usize = STREAM_UUID_SIZE + SEQUENCE_SIZE;

/// Sequence number of the first fragment of a logical stream.
///
/// Sequence 0 is reserved to mean "not a fragment continuation".
pub const FIRST_FRAGMENT_SEQUENCE: u32 = 1;

/// The algorithm-constant seed every carrier starts from.
///
/// Fragment headers are always written and read under this seed, before
/// any key-derived reseed occurs, so a reader can bootstrap without key
/// material. Changing it breaks compatibility with every existing carrier.
pub const BOOTSTRAP_SEED: u64 = 0x517e_60ba_c4d1_8f2b;

pub mod carrier;
pub mod config;
pub mod fragment;
pub mod key;
pub mod keystream;
pub mod permutation;
pub mod pipeline;

// Re-export commonly used types at the crate root
pub use carrier::{CarrierCodec, CarrierError, CarrierFactory, CarrierFamily};
pub use config::{AlgorithmConfig, AlgorithmRegistry, ConfigError, ConfigNode};
pub use fragment::{
    DirectoryFragmentSource, FragmentHeader, FragmentReader, FragmentSource, FragmentWriter,
    ReadProgress,
};
pub use key::Key;
pub use keystream::KeyedByteStream;
pub use permutation::{ExhaustedError, UniquePermutation};
pub use pipeline::{
    IngestionPipeline, InMemoryIndex, Metadata, PipelineConfig, PipelineReport, TrackingGroup,
    TrackingIndex, TrackingRecord,
};
