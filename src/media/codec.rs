//! Image normalization and base64 encoding for VLM requests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use thiserror::Error;
use tracing::warn;

/// Default cap on the shorter image side for cheap classification prompts.
pub const CLASSIFY_SHORT_SIDE: u32 = 768;

/// Default cap on the shorter image side for heavy multimodal schemas.
pub const DETAILED_SHORT_SIDE: u32 = 512;

/// JPEG quality used when re-encoding.
pub const JPEG_QUALITY: u8 = 85;

/// Default number of encoded images kept in memory.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Downscales, re-encodes and base64-encodes images, memoizing by path.
pub struct ImageCodec {
    max_short_side: u32,
    quality: u8,
    cache: Mutex<FifoCache>,
}

impl ImageCodec {
    pub fn new(max_short_side: u32) -> Self {
        Self {
            max_short_side,
            quality: JPEG_QUALITY,
            cache: Mutex::new(FifoCache::new(DEFAULT_CACHE_SIZE)),
        }
    }

    pub fn with_cache_size(self, capacity: usize) -> Self {
        Self {
            cache: Mutex::new(FifoCache::new(capacity)),
            ..self
        }
    }

    pub fn max_short_side(&self) -> u32 {
        self.max_short_side
    }

    /// Encode an image as raw base64 (no data-URI prefix).
    ///
    /// Images that fail to decode are sent as their original bytes.
    pub fn encode(&self, path: &Path) -> Result<Arc<str>, CodecError> {
        if let Some(hit) = self.lock_cache().get(path) {
            return Ok(hit);
        }

        let bytes = match self.compress(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "Image compression failed for {}: {}, using original",
                    path.display(),
                    e
                );
                std::fs::read(path).map_err(|source| CodecError::Read {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        };

        let encoded: Arc<str> = base64::engine::general_purpose::STANDARD
            .encode(bytes)
            .into();
        self.lock_cache().insert(path.to_path_buf(), encoded.clone());
        Ok(encoded)
    }

    /// Number of cached encodings.
    pub fn cached(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, FifoCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn compress(&self, path: &Path) -> image::ImageResult<Vec<u8>> {
        let decoded = image::open(path)?;
        let rgb = flatten_to_rgb(decoded);

        let (width, height) = rgb.dimensions();
        let short = width.min(height);
        let rgb = if short > self.max_short_side {
            let scale = |side: u32| -> u32 {
                ((u64::from(side) * u64::from(self.max_short_side)) / u64::from(short)).max(1) as u32
            };
            image::imageops::resize(&rgb, scale(width), scale(height), FilterType::Lanczos3)
        } else {
            rgb
        };

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality).encode_image(&rgb)?;
        Ok(bytes)
    }
}

/// Convert to RGB, compositing any alpha channel onto white.
fn flatten_to_rgb(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend =
            |channel: u8| -> u8 { ((u16::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8 };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

/// Insertion-ordered cache that evicts the oldest entry when full.
///
/// Lookups do not refresh an entry's position.
#[derive(Debug)]
struct FifoCache {
    capacity: usize,
    order: VecDeque<PathBuf>,
    entries: HashMap<PathBuf, Arc<str>>,
}

impl FifoCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, key: &Path) -> Option<Arc<str>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: PathBuf, value: Arc<str>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&key) {
            self.entries.insert(key, value);
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
