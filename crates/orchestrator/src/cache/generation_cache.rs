use super::lru::BoundedLru;
use crate::resources::DeviceCapabilities;
use crate::telemetry::{CacheStore, TelemetryRecorder};
use crate::types::ImageData;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub image_capacity: usize,
    pub text_capacity: usize,
    /// JPEG quality, 1..=100
    pub image_quality: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            image_capacity: 20,
            text_capacity: 50,
            image_quality: 85,
        }
    }
}

impl CacheConfig {
    /// Configured values, replaced by the device recommendation when
    /// `adapt_to_device` is set.
    pub fn resolve(base: &common::CacheConfigBase, capabilities: &DeviceCapabilities) -> Self {
        if base.adapt_to_device {
            Self {
                image_capacity: capabilities.recommended_cache_size,
                text_capacity: capabilities.recommended_text_cache_size,
                image_quality: capabilities.recommended_image_quality,
            }
        } else {
            Self {
                image_capacity: base.image_capacity,
                text_capacity: base.text_capacity,
                image_quality: base.image_quality,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CachedImage {
    bytes: Arc<Vec<u8>>,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone)]
struct CachedText {
    text: String,
    inserted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub image_count: usize,
    pub text_count: usize,
    pub image_hit_rate: f64,
    pub text_hit_rate: f64,
    pub total_evictions: u64,
    /// Compressed bytes held by the image store
    pub image_bytes: usize,
}

/// Image and text results keyed by request fingerprint.
///
/// Each store has its own lock. Lookups take the write lock because a hit
/// updates recency in the same critical section. Images are compressed and
/// decoded outside the lock.
#[derive(Debug)]
pub struct GenerationCache {
    config: CacheConfig,
    images: RwLock<BoundedLru<String, CachedImage>>,
    texts: RwLock<BoundedLru<String, CachedText>>,
    image_counters: Counters,
    text_counters: Counters,
    evictions: AtomicU64,
    telemetry: Arc<TelemetryRecorder>,
}

impl GenerationCache {
    pub fn new(config: CacheConfig, telemetry: Arc<TelemetryRecorder>) -> Self {
        debug!(
            image_capacity = config.image_capacity,
            text_capacity = config.text_capacity,
            quality = config.image_quality,
            "Generation cache created"
        );

        Self {
            images: RwLock::new(BoundedLru::new(config.image_capacity)),
            texts: RwLock::new(BoundedLru::new(config.text_capacity)),
            config,
            image_counters: Counters::default(),
            text_counters: Counters::default(),
            evictions: AtomicU64::new(0),
            telemetry,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Compress and store. Compression failures are logged, never raised.
    pub fn put_image(&self, key: &str, image: &ImageData) {
        let bytes = match self.compress(image) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(key, error = %e, "Failed to compress image for cache");
                self.telemetry.record_cache_error(CacheStore::Image);
                return;
            }
        };

        let entry = CachedImage {
            bytes: Arc::new(bytes),
            width: image.width(),
            height: image.height(),
        };
        let size = entry.bytes.len();

        let evicted = self.images.write().put(key.to_string(), entry);
        self.telemetry.record_cache_put(CacheStore::Image);
        debug!(key, size_bytes = size, "Cached image");

        if let Some((evicted_key, _)) = evicted {
            self.note_eviction(CacheStore::Image, &evicted_key);
        }
    }

    /// Decoded copy of the cached image. A corrupt entry is dropped and
    /// reported as a miss.
    pub fn get_image(&self, key: &str) -> Option<ImageData> {
        let entry = self.images.write().get(&key.to_string()).cloned();

        let Some(entry) = entry else {
            self.record_miss(CacheStore::Image);
            return None;
        };

        match image::load_from_memory_with_format(&entry.bytes, ImageFormat::Jpeg) {
            Ok(decoded) => {
                if decoded.width() != entry.width || decoded.height() != entry.height {
                    warn!(
                        key,
                        stored = ?(entry.width, entry.height),
                        decoded = ?(decoded.width(), decoded.height()),
                        "Cached image dimensions changed on decode"
                    );
                }
                self.record_hit(CacheStore::Image);
                Some(ImageData::from_dynamic(decoded))
            }
            Err(e) => {
                error!(key, error = %e, "Failed to decode cached image, dropping entry");
                self.images.write().remove(&key.to_string());
                self.telemetry.record_cache_error(CacheStore::Image);
                self.record_miss(CacheStore::Image);
                None
            }
        }
    }

    pub fn put_text(&self, key: &str, text: &str) {
        let entry = CachedText {
            text: text.to_string(),
            inserted_at: Utc::now(),
        };

        let evicted = self.texts.write().put(key.to_string(), entry);
        self.telemetry.record_cache_put(CacheStore::Text);

        if let Some((evicted_key, _)) = evicted {
            self.note_eviction(CacheStore::Text, &evicted_key);
        }
    }

    pub fn get_text(&self, key: &str) -> Option<String> {
        let found = self
            .texts
            .write()
            .get(&key.to_string())
            .map(|entry| entry.text.clone());

        match found {
            Some(text) => {
                self.record_hit(CacheStore::Text);
                Some(text)
            }
            None => {
                self.record_miss(CacheStore::Text);
                None
            }
        }
    }

    /// When the text entry was stored, without touching recency.
    pub fn text_inserted_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.texts
            .read()
            .peek(&key.to_string())
            .map(|entry| entry.inserted_at)
    }

    /// Membership check that records nothing and leaves recency alone.
    pub fn contains(&self, key: &str) -> bool {
        let key = key.to_string();
        self.images.read().contains(&key) || self.texts.read().contains(&key)
    }

    /// Empty both stores. Both locks are held together so no caller observes
    /// one store cleared and the other not.
    pub fn clear(&self) {
        let mut images = self.images.write();
        let mut texts = self.texts.write();
        images.clear();
        texts.clear();
        debug!("Generation cache cleared");
    }

    pub fn get_stats(&self) -> CacheStats {
        let (image_count, image_bytes) = {
            let images = self.images.read();
            (images.len(), images.values().map(|e| e.bytes.len()).sum::<usize>())
        };

        CacheStats {
            image_count,
            text_count: self.texts.read().len(),
            image_hit_rate: self.image_counters.hit_rate(),
            text_hit_rate: self.text_counters.hit_rate(),
            total_evictions: self.evictions.load(Ordering::Relaxed),
            image_bytes,
        }
    }

    fn compress(&self, image: &ImageData) -> Result<Vec<u8>, image::ImageError> {
        let rgb = image.as_dynamic().to_rgb8();
        let mut buffer = Vec::new();
        {
            let quality = self.config.image_quality.clamp(1, 100);
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
        }
        Ok(buffer)
    }

    fn counters(&self, store: CacheStore) -> &Counters {
        match store {
            CacheStore::Image => &self.image_counters,
            CacheStore::Text => &self.text_counters,
        }
    }

    fn record_hit(&self, store: CacheStore) {
        self.counters(store).hits.fetch_add(1, Ordering::Relaxed);
        self.telemetry.record_cache_hit(store);
    }

    fn record_miss(&self, store: CacheStore) {
        self.counters(store).misses.fetch_add(1, Ordering::Relaxed);
        self.telemetry.record_cache_miss(store);
    }

    fn note_eviction(&self, store: CacheStore, key: &str) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.telemetry.record_cache_eviction(store);
        debug!(key, store = ?store, "Evicted least recently used entry");
    }
}
