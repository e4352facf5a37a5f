//! Carrier codecs for hiding payload bytes in media.
//!
//! Supports:
//! - Direct-channel embedding into fresh images (one byte per color channel)
//! - Difference-based stealth embedding into pre-existing clean images
//! - ASCII-safe text blocks (base64 or hex) and raw byte blocks
//!
//! All variants share the same machinery: a [`UniquePermutation`] decides
//! which slot receives the next byte and a [`KeyedByteStream`] masks the
//! byte before it lands. A single [`CarrierCodec`] enum fronts the
//! variants so the fragmentation and pipeline layers stay carrier-agnostic.
//!
//! Capacity exhaustion is ordinary control flow here: `write` returns
//! `false` and `read` returns a short count, and the fragment protocol
//! reacts by rolling to the next carrier instance.
//!
//! [`UniquePermutation`]: crate::permutation::UniquePermutation
//! [`KeyedByteStream`]: crate::keystream::KeyedByteStream

pub mod block;
pub mod direct;
pub mod stealth;

pub use block::{BlockCarrier, BlockEncoding};
pub use direct::DirectChannelCarrier;
pub use stealth::{CleanImagePool, MaskPattern, StealthCarrier};

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{
    AlgorithmConfig, ConfigError, DIRECT_CHANNEL, RAW_BLOCK, STEALTH, TEXT_BLOCK,
};
use crate::key::Key;
use crate::PRODUCT_UUID_SIZE;

/// Errors that can occur while opening, persisting or loading carriers.
#[derive(Error, Debug)]
pub enum CarrierError {
    #[error("carrier image load error: {0}")]
    ImageLoad(String),

    #[error("carrier save error: {0}")]
    Save(String),

    #[error("carrier payload length {got} does not match configured capacity {expected}")]
    CapacityMismatch { expected: usize, got: usize },

    #[error("clean carrier pool '{0}' has no remaining images")]
    PoolExhausted(String),

    #[error("unknown masking pattern '{0}'")]
    UnknownPattern(String),

    #[error("unknown text encoding '{0}'")]
    UnknownEncoding(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// The output family a carrier belongs to, which fixes its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierFamily {
    /// Image carriers, persisted as PNG.
    Image,
    /// ASCII-safe text carriers.
    Text,
    /// Untransformed byte blocks.
    Raw,
}

impl CarrierFamily {
    /// File extension (without the dot) for finalized carriers.
    pub fn extension(&self) -> &'static str {
        match self {
            CarrierFamily::Image => "png",
            CarrierFamily::Text => "txt",
            CarrierFamily::Raw => "bin",
        }
    }
}

/// A carrier instance, polymorphic over the embedding algorithm.
///
/// Every variant implements the same protocol: `write` a byte (false
/// signals the carrier is exhausted and the byte was not represented),
/// `read` into a buffer (a short count signals exhaustion), `skip`
/// payload bytes, report `remaining_capacity`, switch to key-bound
/// ordering with `secure_stream`, and `finalize` to a file.
#[derive(Debug)]
pub enum CarrierCodec {
    DirectChannel(DirectChannelCarrier),
    Stealth(StealthCarrier),
    TextBlock(BlockCarrier),
    RawBlock(BlockCarrier),
}

impl CarrierCodec {
    /// Embeds one byte. Returns false once the carrier is exhausted; the
    /// pending byte is then not represented in this carrier and must be
    /// retried against the next one.
    pub fn write(&mut self, byte: u8) -> bool {
        match self {
            CarrierCodec::DirectChannel(c) => c.write(byte),
            CarrierCodec::Stealth(c) => c.write(byte),
            CarrierCodec::TextBlock(c) | CarrierCodec::RawBlock(c) => c.write(byte),
        }
    }

    /// Extracts up to `buf.len()` bytes, mirroring the write order.
    /// Returns the number of bytes produced; a short count means the
    /// carrier is exhausted.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        match self {
            CarrierCodec::DirectChannel(c) => c.read(buf),
            CarrierCodec::Stealth(c) => c.read(buf),
            CarrierCodec::TextBlock(c) | CarrierCodec::RawBlock(c) => c.read(buf),
        }
    }

    /// Advances past `n` payload bytes without producing them. Returns the
    /// number actually skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        match self {
            CarrierCodec::DirectChannel(c) => c.skip(n),
            CarrierCodec::Stealth(c) => c.skip(n),
            CarrierCodec::TextBlock(c) | CarrierCodec::RawBlock(c) => c.skip(n),
        }
    }

    /// Remaining addressable slots. For the stealth variant a single byte
    /// may consume several slots, so this is an upper bound on bytes.
    pub fn remaining_capacity(&self) -> usize {
        match self {
            CarrierCodec::DirectChannel(c) => c.remaining_capacity(),
            CarrierCodec::Stealth(c) => c.remaining_capacity(),
            CarrierCodec::TextBlock(c) | CarrierCodec::RawBlock(c) => c.remaining_capacity(),
        }
    }

    /// Reseeds both the keystream and the permutation's stream with
    /// `sha256(key) || product_uuid`, binding everything after the header
    /// to the key. The reader must call this at the identical position.
    pub fn secure_stream(&mut self, key: &Key, product_uuid: &[u8; PRODUCT_UUID_SIZE]) {
        match self {
            CarrierCodec::DirectChannel(c) => c.secure_stream(key, product_uuid),
            CarrierCodec::Stealth(c) => c.secure_stream(key, product_uuid),
            CarrierCodec::TextBlock(c) | CarrierCodec::RawBlock(c) => {
                c.secure_stream(key, product_uuid)
            }
        }
    }

    /// Persists the carrier as `{name}.{extension}` in `dir` and returns
    /// the path written.
    pub fn finalize(&self, dir: &Path, name: &str) -> Result<PathBuf, CarrierError> {
        match self {
            CarrierCodec::DirectChannel(c) => c.finalize(dir, name),
            CarrierCodec::Stealth(c) => c.finalize(dir, name),
            CarrierCodec::TextBlock(c) | CarrierCodec::RawBlock(c) => c.finalize(dir, name),
        }
    }

    /// The output family of this carrier.
    pub fn family(&self) -> CarrierFamily {
        match self {
            CarrierCodec::DirectChannel(_) | CarrierCodec::Stealth(_) => CarrierFamily::Image,
            CarrierCodec::TextBlock(c) | CarrierCodec::RawBlock(c) => c.family(),
        }
    }
}

/// Builds carrier instances from an [`AlgorithmConfig`].
///
/// The config is validated once at construction and immutable afterwards.
/// For the stealth algorithm the factory owns the clean-image pool and
/// consumes one image per opened carrier.
#[derive(Debug)]
pub struct CarrierFactory {
    config: AlgorithmConfig,
    pool: Option<CleanImagePool>,
    secure: bool,
}

impl CarrierFactory {
    /// Creates a factory for the config's algorithm.
    ///
    /// For the stealth algorithm this scans the configured pool directory;
    /// an unreadable pool is fatal here rather than at first write.
    pub fn new(config: AlgorithmConfig) -> Result<Self, CarrierError> {
        let secure = match config.get("secure") {
            Some(p) if p.is_enabled() => p.value().as_bool().unwrap_or(false),
            _ => false,
        };

        let pool = if config.name().eq_ignore_ascii_case(STEALTH) {
            // Resolve the pattern now so a bad name fails fast
            let pattern_name = config.str_param("pattern")?;
            MaskPattern::from_name(pattern_name)
                .ok_or_else(|| CarrierError::UnknownPattern(pattern_name.to_string()))?;
            Some(CleanImagePool::open(config.file_param("pool")?)?)
        } else {
            None
        };

        Ok(Self {
            config,
            pool,
            secure,
        })
    }

    /// The algorithm name this factory builds carriers for.
    pub fn algorithm(&self) -> &str {
        self.config.name()
    }

    /// Whether carriers should be switched to key-bound ordering after the
    /// header.
    pub fn secure(&self) -> bool {
        self.secure
    }

    /// File extension for carriers produced by this factory.
    pub fn extension(&self) -> Result<&'static str, CarrierError> {
        let family = match self.config.name() {
            n if n.eq_ignore_ascii_case(DIRECT_CHANNEL) || n.eq_ignore_ascii_case(STEALTH) => {
                CarrierFamily::Image
            }
            n if n.eq_ignore_ascii_case(TEXT_BLOCK) => CarrierFamily::Text,
            n if n.eq_ignore_ascii_case(RAW_BLOCK) => CarrierFamily::Raw,
            other => {
                return Err(CarrierError::Config(ConfigError::UnknownAlgorithm(
                    other.to_string(),
                )))
            }
        };
        Ok(family.extension())
    }

    /// Opens a fresh carrier instance for writing.
    pub fn open_for_write(&mut self) -> Result<CarrierCodec, CarrierError> {
        match self.config.name() {
            n if n.eq_ignore_ascii_case(DIRECT_CHANNEL) => {
                let width = self.config.int_param("width")? as u32;
                let height = self.config.int_param("height")? as u32;
                Ok(CarrierCodec::DirectChannel(DirectChannelCarrier::new(
                    width, height,
                )))
            }
            n if n.eq_ignore_ascii_case(STEALTH) => {
                let pattern = self.pattern()?;
                let pool = self
                    .pool
                    .as_mut()
                    .expect("stealth factory always has a pool");
                let image = pool.take()?;
                Ok(CarrierCodec::Stealth(StealthCarrier::new(image, pattern)))
            }
            n if n.eq_ignore_ascii_case(TEXT_BLOCK) => {
                let size = self.config.int_param("size")? as usize;
                Ok(CarrierCodec::TextBlock(BlockCarrier::new(
                    size,
                    self.text_encoding()?,
                )))
            }
            n if n.eq_ignore_ascii_case(RAW_BLOCK) => {
                let size = self.config.int_param("size")? as usize;
                Ok(CarrierCodec::RawBlock(BlockCarrier::new(
                    size,
                    BlockEncoding::Raw,
                )))
            }
            other => Err(CarrierError::Config(ConfigError::UnknownAlgorithm(
                other.to_string(),
            ))),
        }
    }

    /// Loads a finalized carrier file for reading.
    pub fn open_for_read(&mut self, path: &Path) -> Result<CarrierCodec, CarrierError> {
        match self.config.name() {
            n if n.eq_ignore_ascii_case(DIRECT_CHANNEL) => Ok(CarrierCodec::DirectChannel(
                DirectChannelCarrier::load(path)?,
            )),
            n if n.eq_ignore_ascii_case(STEALTH) => {
                let pattern = self.pattern()?;
                Ok(CarrierCodec::Stealth(StealthCarrier::load(path, pattern)?))
            }
            n if n.eq_ignore_ascii_case(TEXT_BLOCK) => {
                let size = self.config.int_param("size")? as usize;
                let encoding = self.text_encoding()?;
                Ok(CarrierCodec::TextBlock(BlockCarrier::load(
                    path, size, encoding,
                )?))
            }
            n if n.eq_ignore_ascii_case(RAW_BLOCK) => {
                let size = self.config.int_param("size")? as usize;
                Ok(CarrierCodec::RawBlock(BlockCarrier::load(
                    path,
                    size,
                    BlockEncoding::Raw,
                )?))
            }
            other => Err(CarrierError::Config(ConfigError::UnknownAlgorithm(
                other.to_string(),
            ))),
        }
    }

    fn pattern(&self) -> Result<MaskPattern, CarrierError> {
        let name = self.config.str_param("pattern")?;
        MaskPattern::from_name(name).ok_or_else(|| CarrierError::UnknownPattern(name.to_string()))
    }

    fn text_encoding(&self) -> Result<BlockEncoding, CarrierError> {
        let name = self.config.str_param("encoding")?;
        match name {
            "base64" => Ok(BlockEncoding::Base64),
            "hex" => Ok(BlockEncoding::Hex),
            other => Err(CarrierError::UnknownEncoding(other.to_string())),
        }
    }
}
