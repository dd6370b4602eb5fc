//! Mock collaborators for state-machine tests.

use crate::catalog::{CatalogError, ReferenceCatalog, ReferenceImage};
use async_trait::async_trait;
use facegate_camera::{
    CameraError, CameraSource, CaptureConstraints, CapturedPhoto, VideoSource,
};
use facegate_vision::analyzer::VisionError;
use facegate_vision::detector::DetectorError;
use facegate_vision::{Embedding, FaceAnalyzer};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn embedding(values: Vec<f32>) -> Embedding {
    Embedding {
        values,
        model_version: None,
    }
}

/// Scripted analyzer: `face_count` pops from a script, embeddings come
/// from a photo-tag table (first byte of the photo selects the vector).
pub struct MockAnalyzer {
    counts: Mutex<VecDeque<usize>>,
    /// Count returned once the script is exhausted; `None` yields a
    /// transient error instead.
    fallback_count: Option<usize>,
    embeddings: HashMap<u8, Vec<f32>>,
    fail_init: bool,
    detect_delay: Duration,
    pub detects_started: Arc<AtomicUsize>,
    pub embeds: Arc<AtomicUsize>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(VecDeque::new()),
            fallback_count: Some(1),
            embeddings: HashMap::new(),
            fail_init: false,
            detect_delay: Duration::ZERO,
            detects_started: Arc::new(AtomicUsize::new(0)),
            embeds: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_counts(mut self, counts: &[usize]) -> Self {
        self.counts = Mutex::new(counts.iter().copied().collect());
        self
    }

    pub fn with_fallback_count(mut self, fallback: Option<usize>) -> Self {
        self.fallback_count = fallback;
        self
    }

    pub fn with_embedding(mut self, tag: u8, values: Vec<f32>) -> Self {
        self.embeddings.insert(tag, values);
        self
    }

    pub fn with_fail_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn with_detect_delay(mut self, delay: Duration) -> Self {
        self.detect_delay = delay;
        self
    }

    fn transient() -> VisionError {
        VisionError::Detector(DetectorError::InferenceFailed("scripted failure".into()))
    }

    fn lookup(&self, image_bytes: &[u8]) -> Option<Embedding> {
        image_bytes
            .first()
            .and_then(|tag| self.embeddings.get(tag))
            .map(|values| embedding(values.clone()))
    }
}

impl FaceAnalyzer for MockAnalyzer {
    fn ensure_ready(&self) -> Result<(), VisionError> {
        if self.fail_init {
            Err(VisionError::Detector(DetectorError::ModelNotFound(
                "mock".into(),
            )))
        } else {
            Ok(())
        }
    }

    fn face_count(&self, _image_bytes: &[u8]) -> Result<usize, VisionError> {
        self.detects_started.fetch_add(1, Ordering::SeqCst);
        if !self.detect_delay.is_zero() {
            std::thread::sleep(self.detect_delay);
        }
        let next = self.counts.lock().unwrap().pop_front();
        match next.or(self.fallback_count) {
            Some(count) => Ok(count),
            None => Err(Self::transient()),
        }
    }

    fn embed_sole_face(&self, image_bytes: &[u8]) -> Result<Option<Embedding>, VisionError> {
        self.embeds.fetch_add(1, Ordering::SeqCst);
        Ok(self.lookup(image_bytes))
    }

    fn embed_primary_face(&self, image_bytes: &[u8]) -> Result<Option<Embedding>, VisionError> {
        Ok(self.lookup(image_bytes))
    }
}

/// Photo with a one-byte tag the mock analyzer resolves to an embedding.
pub fn tagged_photo(tag: u8) -> CapturedPhoto {
    CapturedPhoto {
        bytes: vec![tag],
        sequence: tag as u32,
    }
}

pub struct MockVideoSource {
    tag: u8,
    fail_flag: Arc<AtomicBool>,
    sequence: u32,
}

impl VideoSource for MockVideoSource {
    fn sample(&mut self) -> Result<CapturedPhoto, CameraError> {
        if self.fail_flag.load(Ordering::SeqCst) {
            return Err(CameraError::CaptureFailed("scripted".into()));
        }
        let sequence = self.sequence;
        self.sequence += 1;
        Ok(CapturedPhoto {
            bytes: vec![self.tag],
            sequence,
        })
    }
}

pub struct MockCameraSource {
    pub fail_acquire: bool,
    /// Flip at runtime to make subsequent samples fail.
    pub sample_fail_flag: Arc<AtomicBool>,
    pub photo_tag: u8,
}

impl MockCameraSource {
    pub fn new(photo_tag: u8) -> Self {
        Self {
            fail_acquire: false,
            sample_fail_flag: Arc::new(AtomicBool::new(false)),
            photo_tag,
        }
    }
}

impl CameraSource for MockCameraSource {
    fn acquire(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<Box<dyn VideoSource>, CameraError> {
        if self.fail_acquire {
            return Err(CameraError::DeviceNotFound("/dev/mock".into()));
        }
        Ok(Box::new(MockVideoSource {
            tag: self.photo_tag,
            fail_flag: self.sample_fail_flag.clone(),
            sequence: 0,
        }))
    }
}

/// Catalog serving in-memory images; a `None` body simulates a fetch
/// failure for that url.
pub struct MockCatalog {
    images: Vec<(String, Option<Vec<u8>>)>,
    fail_list: bool,
    list_delay: Duration,
}

impl MockCatalog {
    pub fn new(images: Vec<(String, Option<Vec<u8>>)>) -> Self {
        Self {
            images,
            fail_list: false,
            list_delay: Duration::ZERO,
        }
    }

    /// Catalog with one image per tag, each resolving through the mock
    /// analyzer's tag table.
    pub fn with_tags(tags: &[u8]) -> Self {
        Self::new(
            tags.iter()
                .map(|tag| (format!("http://catalog/img/{tag}"), Some(vec![*tag])))
                .collect(),
        )
    }

    pub fn with_fail_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }
}

#[async_trait]
impl ReferenceCatalog for MockCatalog {
    async fn list_reference_images(
        &self,
        _subject: &str,
    ) -> Result<Vec<ReferenceImage>, CatalogError> {
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        if self.fail_list {
            return Err(CatalogError::BadStatus {
                status: 500,
                url: "http://catalog".into(),
            });
        }
        Ok(self
            .images
            .iter()
            .map(|(url, _)| ReferenceImage { url: url.clone() })
            .collect())
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        match self.images.iter().find(|(u, _)| u == url) {
            Some((_, Some(bytes))) => Ok(bytes.clone()),
            _ => Err(CatalogError::BadStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}
