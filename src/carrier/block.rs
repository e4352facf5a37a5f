//! Flat byte-block carriers.
//!
//! The text-block and raw-block algorithms use the same permutation+XOR
//! addressing as the image carriers, just over a flat byte buffer instead
//! of (pixel, channel) coordinates. On finalize the buffer is transformed
//! to an ASCII-safe textual encoding (base64 or hex) for the text family,
//! or written untouched for the raw family; loading reverses the
//! transform before decoding begins.

use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

use super::{CarrierError, CarrierFamily};
use crate::key::Key;
use crate::keystream::KeyedByteStream;
use crate::permutation::UniquePermutation;
use crate::PRODUCT_UUID_SIZE;

/// Output transform applied to the buffer on finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEncoding {
    /// Base64 text output.
    Base64,
    /// Lowercase hex text output.
    Hex,
    /// No transform.
    Raw,
}

/// A carrier over a flat byte buffer.
#[derive(Debug)]
pub struct BlockCarrier {
    buf: Vec<u8>,
    stream: KeyedByteStream,
    perm: UniquePermutation,
    exhausted: bool,
    encoding: BlockEncoding,
}

impl BlockCarrier {
    /// Allocates a fresh noise-filled block of `size` bytes.
    pub fn new(size: usize, encoding: BlockEncoding) -> Self {
        let mut buf = vec![0u8; size];
        OsRng.fill_bytes(&mut buf);
        Self::with_buffer(buf, encoding)
    }

    /// Loads a finalized block, reversing the output transform.
    ///
    /// The decoded payload must match the configured size exactly; a
    /// mismatch means the file is not a carrier produced under this
    /// config.
    pub fn load<P: AsRef<Path>>(
        path: P,
        size: usize,
        encoding: BlockEncoding,
    ) -> Result<Self, CarrierError> {
        let buf = match encoding {
            BlockEncoding::Base64 => {
                let text = fs::read_to_string(path)?;
                BASE64
                    .decode(text.trim())
                    .map_err(|e| CarrierError::ImageLoad(e.to_string()))?
            }
            BlockEncoding::Hex => {
                let text = fs::read_to_string(path)?;
                hex::decode(text.trim()).map_err(|e| CarrierError::ImageLoad(e.to_string()))?
            }
            BlockEncoding::Raw => fs::read(path)?,
        };

        if buf.len() != size {
            return Err(CarrierError::CapacityMismatch {
                expected: size,
                got: buf.len(),
            });
        }

        Ok(Self::with_buffer(buf, encoding))
    }

    fn with_buffer(buf: Vec<u8>, encoding: BlockEncoding) -> Self {
        let capacity = buf.len() as u32;
        Self {
            buf,
            stream: KeyedByteStream::bootstrap(),
            perm: UniquePermutation::new(KeyedByteStream::bootstrap(), capacity),
            exhausted: false,
            encoding,
        }
    }

    /// Total addressable capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Remaining writable/readable bytes.
    pub fn remaining_capacity(&self) -> usize {
        self.perm.remaining()
    }

    /// Embeds one byte. Returns false once every slot has been used.
    pub fn write(&mut self, byte: u8) -> bool {
        if self.exhausted {
            return false;
        }
        let Ok(idx) = self.perm.next() else {
            self.exhausted = true;
            return false;
        };
        self.buf[idx as usize] = byte ^ self.stream.next_byte();
        true
    }

    /// Extracts up to `buf.len()` bytes in the identical slot order.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            if self.exhausted {
                break;
            }
            let Ok(idx) = self.perm.next() else {
                self.exhausted = true;
                break;
            };
            out[n] = self.buf[idx as usize] ^ self.stream.next_byte();
            n += 1;
        }
        n
    }

    /// Advances past `n` bytes without producing them.
    pub fn skip(&mut self, n: usize) -> usize {
        let k = n.min(self.perm.remaining());
        if self.perm.skip(k).is_err() {
            return 0;
        }
        for _ in 0..k {
            self.stream.next_byte();
        }
        if k < n {
            self.exhausted = true;
        }
        k
    }

    /// Switches to key-bound ordering for the remainder of the carrier.
    pub fn secure_stream(&mut self, key: &Key, product_uuid: &[u8; PRODUCT_UUID_SIZE]) {
        let seed = key.secure_seed(product_uuid);
        self.stream.reseed(&seed);
        self.perm.reseed(&seed);
    }

    /// Persists the transformed buffer as `{name}.{extension}` in `dir`.
    pub fn finalize(&self, dir: &Path, name: &str) -> Result<PathBuf, CarrierError> {
        let path = dir.join(format!("{name}.{}", self.family().extension()));
        match self.encoding {
            BlockEncoding::Base64 => fs::write(&path, BASE64.encode(&self.buf))?,
            BlockEncoding::Hex => fs::write(&path, hex::encode(&self.buf))?,
            BlockEncoding::Raw => fs::write(&path, &self.buf)?,
        }
        Ok(path)
    }

    /// The output family implied by the encoding.
    pub fn family(&self) -> CarrierFamily {
        match self.encoding {
            BlockEncoding::Base64 | BlockEncoding::Hex => CarrierFamily::Text,
            BlockEncoding::Raw => CarrierFamily::Raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_roundtrip(data: &[u8], size: usize, encoding: BlockEncoding) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();

        let mut writer = BlockCarrier::new(size, encoding);
        for &b in data {
            assert!(writer.write(b));
        }
        let path = writer.finalize(dir.path(), "block").unwrap();

        let mut reader = BlockCarrier::load(&path, size, encoding).unwrap();
        let mut out = vec![0u8; data.len()];
        assert_eq!(reader.read(&mut out), data.len());
        out
    }

    #[test]
    fn test_base64_roundtrip() {
        let data = b"ascii armored payload";
        assert_eq!(file_roundtrip(data, 64, BlockEncoding::Base64), data);
    }

    #[test]
    fn test_hex_roundtrip() {
        let data = b"hex armored payload";
        assert_eq!(file_roundtrip(data, 64, BlockEncoding::Hex), data);
    }

    #[test]
    fn test_raw_roundtrip() {
        let data: Vec<u8> = (0..64).collect();
        assert_eq!(file_roundtrip(&data, 64, BlockEncoding::Raw), data);
    }

    #[test]
    fn test_roundtrip_boundary_lengths() {
        for len in [0usize, 1, 32] {
            let data: Vec<u8> = (0..len as u32).map(|i| (i * 13) as u8).collect();
            assert_eq!(file_roundtrip(&data, 32, BlockEncoding::Base64), data);
        }
    }

    #[test]
    fn test_text_output_is_ascii() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BlockCarrier::new(128, BlockEncoding::Base64);
        for b in 0..128u8 {
            writer.write(b);
        }
        let path = writer.finalize(dir.path(), "armor").unwrap();
        assert_eq!(path.extension().unwrap(), "txt");

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.is_ascii());
    }

    #[test]
    fn test_write_false_past_capacity() {
        let mut carrier = BlockCarrier::new(4, BlockEncoding::Raw);
        for i in 0..4 {
            assert!(carrier.write(i));
        }
        assert!(!carrier.write(0xFF));
    }

    #[test]
    fn test_load_wrong_size_fails_sanity_check() {
        let dir = tempfile::tempdir().unwrap();
        let writer = BlockCarrier::new(32, BlockEncoding::Hex);
        let path = writer.finalize(dir.path(), "block").unwrap();

        let result = BlockCarrier::load(&path, 64, BlockEncoding::Hex);
        assert!(matches!(
            result,
            Err(CarrierError::CapacityMismatch {
                expected: 64,
                got: 32
            })
        ));
    }

    #[test]
    fn test_secure_stream_divergence() {
        let uuid = [3u8; PRODUCT_UUID_SIZE];
        let data = b"key bound block bytes";

        let mut writer = BlockCarrier::new(64, BlockEncoding::Raw);
        writer.secure_stream(&Key::from_password("a"), &uuid);
        for &b in data {
            writer.write(b);
        }

        let mut right = BlockCarrier::with_buffer(writer.buf.clone(), BlockEncoding::Raw);
        right.secure_stream(&Key::from_password("a"), &uuid);
        let mut out = vec![0u8; data.len()];
        right.read(&mut out);
        assert_eq!(&out, data);

        let mut wrong = BlockCarrier::with_buffer(writer.buf.clone(), BlockEncoding::Raw);
        wrong.secure_stream(&Key::from_password("b"), &uuid);
        let mut garbage = vec![0u8; data.len()];
        wrong.read(&mut garbage);
        assert_ne!(&garbage, data);
    }
}
