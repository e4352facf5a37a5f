//! Direct-channel image embedding.
//!
//! Stores one payload byte per color channel of a fresh RGB image. The
//! permutation ranges over every (pixel, channel) slot, so payload bytes
//! are scattered across the whole image in key-dependent order, and each
//! stored byte is XOR'd against the keystream. Unwritten slots keep their
//! random fill, making the written region statistically indistinguishable
//! from the rest.

use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbImage};
use rand::rngs::OsRng;
use rand::RngCore;

use super::CarrierError;
use crate::key::Key;
use crate::keystream::KeyedByteStream;
use crate::permutation::UniquePermutation;
use crate::PRODUCT_UUID_SIZE;

/// Color channels used per pixel.
const CHANNELS: usize = 3;

/// A carrier that embeds one byte per color channel of an RGB image.
#[derive(Debug)]
pub struct DirectChannelCarrier {
    pixels: RgbImage,
    stream: KeyedByteStream,
    perm: UniquePermutation,
    exhausted: bool,
}

impl DirectChannelCarrier {
    /// Allocates a fresh noise-filled carrier of the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        let mut raw = vec![0u8; width as usize * height as usize * CHANNELS];
        OsRng.fill_bytes(&mut raw);
        let pixels =
            RgbImage::from_raw(width, height, raw).expect("buffer length matches dimensions");
        Self::with_image(pixels)
    }

    /// Loads an existing carrier image from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CarrierError> {
        let image =
            image::open(path).map_err(|e| CarrierError::ImageLoad(e.to_string()))?;
        Ok(Self::with_image(image.to_rgb8()))
    }

    /// Loads an existing carrier image from encoded bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CarrierError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| CarrierError::ImageLoad(e.to_string()))?;
        Ok(Self::with_image(image.to_rgb8()))
    }

    fn with_image(pixels: RgbImage) -> Self {
        let capacity = pixels.width() as usize * pixels.height() as usize * CHANNELS;
        Self {
            pixels,
            stream: KeyedByteStream::bootstrap(),
            perm: UniquePermutation::new(KeyedByteStream::bootstrap(), capacity as u32),
            exhausted: false,
        }
    }

    /// Total addressable capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.pixels.width() as usize * self.pixels.height() as usize * CHANNELS
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
        let (x, y, channel) = self.locate(idx);
        let masked = byte ^ self.stream.next_byte();
        self.pixels.get_pixel_mut(x, y).0[channel] = masked;
        true
    }

    /// Extracts up to `buf.len()` bytes in the identical slot order.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            if self.exhausted {
                break;
            }
            let Ok(idx) = self.perm.next() else {
                self.exhausted = true;
                break;
            };
            let (x, y, channel) = self.locate(idx);
            let stored = self.pixels.get_pixel(x, y).0[channel];
            buf[n] = stored ^ self.stream.next_byte();
            n += 1;
        }
        n
    }

    /// Advances past `n` bytes, consuming the same permutation and
    /// keystream state as reading them would.
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

    /// Persists the carrier as `{name}.png` in `dir`.
    pub fn finalize(&self, dir: &Path, name: &str) -> Result<PathBuf, CarrierError> {
        let path = dir.join(format!("{name}.png"));
        DynamicImage::ImageRgb8(self.pixels.clone())
            .save(&path)
            .map_err(|e| CarrierError::Save(e.to_string()))?;
        Ok(path)
    }

    /// Returns a reference to the underlying image.
    pub fn image(&self) -> &RgbImage {
        &self.pixels
    }

    fn locate(&self, idx: u32) -> (u32, u32, usize) {
        let channel = idx as usize % CHANNELS;
        let pixel = idx as usize / CHANNELS;
        let x = pixel as u32 % self.pixels.width();
        let y = pixel as u32 / self.pixels.width();
        (x, y, channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(data: &[u8], width: u32, height: u32) -> Vec<u8> {
        let mut writer = DirectChannelCarrier::new(width, height);
        for &b in data {
            assert!(writer.write(b));
        }

        let mut reader = DirectChannelCarrier::with_image(writer.image().clone());
        let mut out = vec![0u8; data.len()];
        assert_eq!(reader.read(&mut out), data.len());
        out
    }

    #[test]
    fn test_roundtrip_empty() {
        assert_eq!(roundtrip(&[], 4, 4), Vec::<u8>::new());
    }

    #[test]
    fn test_roundtrip_single_byte() {
        assert_eq!(roundtrip(&[0xA5], 4, 4), vec![0xA5]);
    }

    #[test]
    fn test_roundtrip_full_capacity() {
        let data: Vec<u8> = (0..48u32).map(|i| (i * 7) as u8).collect();
        // 4x4x3 = 48 slots
        assert_eq!(roundtrip(&data, 4, 4), data);
    }

    #[test]
    fn test_write_false_past_capacity() {
        let mut carrier = DirectChannelCarrier::new(2, 2);
        for i in 0..12 {
            assert!(carrier.write(i as u8));
        }
        assert!(!carrier.write(0xFF));
        assert!(!carrier.write(0xFF));
        assert_eq!(carrier.remaining_capacity(), 0);
    }

    #[test]
    fn test_read_short_past_capacity() {
        let mut writer = DirectChannelCarrier::new(2, 2);
        for i in 0..12 {
            writer.write(i as u8);
        }

        let mut reader = DirectChannelCarrier::with_image(writer.image().clone());
        let mut buf = vec![0u8; 20];
        assert_eq!(reader.read(&mut buf), 12);
    }

    #[test]
    fn test_secure_stream_roundtrip() {
        let key = Key::from_password("pw");
        let uuid = [7u8; PRODUCT_UUID_SIZE];
        let data = b"hidden after the header";

        let mut writer = DirectChannelCarrier::new(8, 8);
        writer.secure_stream(&key, &uuid);
        for &b in data {
            assert!(writer.write(b));
        }

        let mut reader = DirectChannelCarrier::with_image(writer.image().clone());
        reader.secure_stream(&key, &uuid);
        let mut out = vec![0u8; data.len()];
        reader.read(&mut out);
        assert_eq!(&out, data);
    }

    #[test]
    fn test_wrong_key_reads_garbage_not_error() {
        let uuid = [7u8; PRODUCT_UUID_SIZE];
        let data = b"payload bound to the right key";

        let mut writer = DirectChannelCarrier::new(8, 8);
        writer.secure_stream(&Key::from_password("right"), &uuid);
        for &b in data {
            writer.write(b);
        }

        let mut reader = DirectChannelCarrier::with_image(writer.image().clone());
        reader.secure_stream(&Key::from_password("wrong"), &uuid);
        let mut out = vec![0u8; data.len()];
        assert_eq!(reader.read(&mut out), data.len());
        assert_ne!(&out, data);
    }

    #[test]
    fn test_skip_mirrors_read() {
        let data: Vec<u8> = (0..30).collect();
        let mut writer = DirectChannelCarrier::new(4, 4);
        for &b in &data {
            writer.write(b);
        }

        let mut skipping = DirectChannelCarrier::with_image(writer.image().clone());
        assert_eq!(skipping.skip(10), 10);
        let mut tail = vec![0u8; 20];
        assert_eq!(skipping.read(&mut tail), 20);
        assert_eq!(tail, &data[10..]);
    }

    #[test]
    fn test_png_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"survives the PNG encoder";

        let mut writer = DirectChannelCarrier::new(8, 8);
        for &b in data {
            writer.write(b);
        }
        let path = writer.finalize(dir.path(), "carrier").unwrap();
        assert_eq!(path.extension().unwrap(), "png");

        let mut reader = DirectChannelCarrier::load(&path).unwrap();
        let mut out = vec![0u8; data.len()];
        reader.read(&mut out);
        assert_eq!(&out, data);
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"decoded from in-memory PNG bytes";

        let mut writer = DirectChannelCarrier::new(8, 8);
        for &b in data {
            writer.write(b);
        }
        let path = writer.finalize(dir.path(), "carrier").unwrap();
        let png_bytes = std::fs::read(&path).unwrap();

        let mut reader = DirectChannelCarrier::from_bytes(&png_bytes).unwrap();
        let mut out = vec![0u8; data.len()];
        assert_eq!(reader.read(&mut out), data.len());
        assert_eq!(&out, data);

        assert!(DirectChannelCarrier::from_bytes(b"not an image").is_err());
    }
}
