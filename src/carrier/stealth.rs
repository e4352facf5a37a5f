//! Difference-based stealth embedding.
//!
//! Unlike the direct-channel carrier, the stealth carrier never stores a
//! masked byte verbatim. A masking pattern partitions the image into
//! data-bearing and masking cells; each data cell encodes an amount
//! relative to its two masking neighbors (`diff = |c1 - c2|`,
//! `low = min(c1, c2)`), and values larger than `diff` carry over into
//! further data cells until fully represented. Masking cells are never
//! written, so the neighbor values a reader observes are the ones the
//! writer used.
//!
//! Carriers are pre-existing "clean" images consumed from a configured
//! pool, one per carrier instance, rather than freshly allocated buffers.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbImage};

use super::CarrierError;
use crate::key::Key;
use crate::keystream::KeyedByteStream;
use crate::permutation::UniquePermutation;
use crate::PRODUCT_UUID_SIZE;

/// Color channels used per data cell.
const CHANNELS: usize = 3;

/// A masking pattern: classifies every pixel as data-bearing or masking
/// and names the two masking neighbors of each data cell.
///
/// Every coordinate is unambiguously one or the other for a given
/// pattern and image dimensions; a pixel without two in-bounds masking
/// neighbors is classified as masking and never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskPattern {
    /// Even-parity pixels bear data; their odd-parity 4-neighbors mask.
    Checkerboard,
    /// Every third column bears data; the two columns to its right mask.
    Stride3,
}

impl MaskPattern {
    /// Parses a pattern name from configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "checkerboard" => Some(MaskPattern::Checkerboard),
            "stride3" => Some(MaskPattern::Stride3),
            _ => None,
        }
    }

    /// The configuration name of this pattern.
    pub fn name(&self) -> &'static str {
        match self {
            MaskPattern::Checkerboard => "checkerboard",
            MaskPattern::Stride3 => "stride3",
        }
    }

    /// Returns true if the pixel at (x, y) bears data under this pattern.
    pub fn is_data_bearing(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        match self {
            MaskPattern::Checkerboard => {
                (x + y) % 2 == 0 && self.masking_neighbors(x, y, width, height).is_some()
            }
            MaskPattern::Stride3 => x % 3 == 0 && x + 2 < width && y < height,
        }
    }

    /// The two in-bounds masking neighbors of a data cell, or None if the
    /// pixel cannot bear data at these dimensions.
    pub fn masking_neighbors(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Option<[(u32, u32); 2]> {
        match self {
            MaskPattern::Checkerboard => {
                if (x + y) % 2 != 0 {
                    return None;
                }
                // Left, right, up, down; all have opposite parity
                let mut picked = [(0u32, 0u32); 2];
                let mut count = 0;
                let candidates = [
                    (x.checked_sub(1), Some(y)),
                    (x.checked_add(1).filter(|&nx| nx < width), Some(y)),
                    (Some(x), y.checked_sub(1)),
                    (Some(x), y.checked_add(1).filter(|&ny| ny < height)),
                ];
                for (nx, ny) in candidates {
                    if let (Some(nx), Some(ny)) = (nx, ny) {
                        picked[count] = (nx, ny);
                        count += 1;
                        if count == 2 {
                            return Some(picked);
                        }
                    }
                }
                None
            }
            MaskPattern::Stride3 => {
                if x % 3 == 0 && x + 2 < width && y < height {
                    Some([(x + 1, y), (x + 2, y)])
                } else {
                    None
                }
            }
        }
    }
}

/// A pool of clean input images, consumed one per new carrier instance.
///
/// Files are ordered by name so a pool directory always yields carriers
/// in the same sequence.
#[derive(Debug)]
pub struct CleanImagePool {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl CleanImagePool {
    /// Scans a directory of clean images.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, CarrierError> {
        let dir = dir.as_ref().to_path_buf();
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        Ok(Self {
            dir,
            files,
            cursor: 0,
        })
    }

    /// Consumes the next clean image.
    pub fn take(&mut self) -> Result<RgbImage, CarrierError> {
        let path = self
            .files
            .get(self.cursor)
            .ok_or_else(|| CarrierError::PoolExhausted(self.dir.display().to_string()))?;
        self.cursor += 1;
        let image =
            image::open(path).map_err(|e| CarrierError::ImageLoad(e.to_string()))?;
        Ok(image.to_rgb8())
    }

    /// Images not yet consumed.
    pub fn remaining(&self) -> usize {
        self.files.len() - self.cursor
    }
}

/// A carrier that hides bytes in the differences between neighboring
/// pixel values of a clean image.
#[derive(Debug)]
pub struct StealthCarrier {
    pixels: RgbImage,
    pattern: MaskPattern,
    cells: Vec<(u32, u32)>,
    stream: KeyedByteStream,
    perm: UniquePermutation,
    exhausted: bool,
}

impl StealthCarrier {
    /// Wraps a clean image for embedding under the given pattern.
    pub fn new(pixels: RgbImage, pattern: MaskPattern) -> Self {
        let (width, height) = (pixels.width(), pixels.height());
        let mut cells = Vec::new();
        for y in 0..height {
            for x in 0..width {
                if pattern.is_data_bearing(x, y, width, height) {
                    cells.push((x, y));
                }
            }
        }
        let domain = (cells.len() * CHANNELS) as u32;
        Self {
            pixels,
            pattern,
            cells,
            stream: KeyedByteStream::bootstrap(),
            perm: UniquePermutation::new(KeyedByteStream::bootstrap(), domain),
            exhausted: false,
        }
    }

    /// Loads a finalized stealth carrier for reading.
    pub fn load<P: AsRef<Path>>(path: P, pattern: MaskPattern) -> Result<Self, CarrierError> {
        let image =
            image::open(path).map_err(|e| CarrierError::ImageLoad(e.to_string()))?;
        Ok(Self::new(image.to_rgb8(), pattern))
    }

    /// Total addressable data-cell slots. A single byte may consume more
    /// than one slot when its value carries, so this is an upper bound on
    /// payload bytes.
    pub fn capacity(&self) -> usize {
        self.cells.len() * CHANNELS
    }

    /// Remaining unconsumed data-cell slots.
    pub fn remaining_capacity(&self) -> usize {
        self.perm.remaining()
    }

    /// Embeds one byte, spreading it across as many data cells as its
    /// keystream-masked value requires. Returns false if the cell supply
    /// runs out before the value is fully represented; the byte is then
    /// not represented in this carrier and a mirrored read stops at the
    /// same point.
    pub fn write(&mut self, byte: u8) -> bool {
        if self.exhausted {
            return false;
        }
        let mut v = u32::from(byte ^ self.stream.next_byte());
        loop {
            let Ok(idx) = self.perm.next() else {
                self.exhausted = true;
                return false;
            };
            let (x, y, channel) = self.locate(idx);
            let (diff, low) = self.neighbor_stats(x, y, channel);
            let encoded = v.min(diff);
            self.pixels.get_pixel_mut(x, y).0[channel] = (low + encoded) as u8;
            v -= encoded;
            // A write that fills the whole difference saturates and
            // carries into the next data cell, even when v is now zero:
            // the terminating cell is what tells the reader to stop.
            if encoded < diff {
                return true;
            }
        }
    }

    /// Extracts up to `buf.len()` bytes by the inverse accumulation.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        'bytes: while n < buf.len() {
            if self.exhausted {
                break;
            }
            let mut acc: u32 = 0;
            loop {
                let Ok(idx) = self.perm.next() else {
                    self.exhausted = true;
                    break 'bytes;
                };
                let (x, y, channel) = self.locate(idx);
                let (diff, low) = self.neighbor_stats(x, y, channel);
                let cell = u32::from(self.pixels.get_pixel(x, y).0[channel]);
                let vadd = cell.saturating_sub(low);
                // Foreign or corrupted images can accumulate arbitrarily
                // long carry runs; they decode to garbage, not a panic
                acc = acc.wrapping_add(vadd);
                if vadd < diff {
                    break;
                }
            }
            buf[n] = (acc as u8) ^ self.stream.next_byte();
            n += 1;
        }
        n
    }

    /// Advances past `n` payload bytes. Cell consumption per byte varies,
    /// so skipping decodes and discards to stay mirrored with the writer.
    pub fn skip(&mut self, n: usize) -> usize {
        let mut scratch = [0u8; 64];
        let mut skipped = 0;
        while skipped < n {
            let want = (n - skipped).min(scratch.len());
            let got = self.read(&mut scratch[..want]);
            skipped += got;
            if got < want {
                break;
            }
        }
        skipped
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

    /// The pattern this carrier classifies cells under.
    pub fn pattern(&self) -> MaskPattern {
        self.pattern
    }

    fn locate(&self, idx: u32) -> (u32, u32, usize) {
        let channel = idx as usize % CHANNELS;
        let (x, y) = self.cells[idx as usize / CHANNELS];
        (x, y, channel)
    }

    fn neighbor_stats(&self, x: u32, y: u32, channel: usize) -> (u32, u32) {
        let [(ax, ay), (bx, by)] = self
            .pattern
            .masking_neighbors(x, y, self.pixels.width(), self.pixels.height())
            .expect("data cells always have two masking neighbors");
        let c1 = u32::from(self.pixels.get_pixel(ax, ay).0[channel]);
        let c2 = u32::from(self.pixels.get_pixel(bx, by).0[channel]);
        (c1.abs_diff(c2), c1.min(c2))
    }
}
