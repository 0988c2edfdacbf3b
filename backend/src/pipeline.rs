//! Request-level orchestration over the decoder, filters, classifier and store.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use log::{info, warn};
use shared::{FilterType, Prediction, PredictionMode, Variant};

use crate::imaging::decode::{DecodeError, decode_upload};
use crate::imaging::{PixelBuffer, filters};
use crate::inference::{InferenceError, InferencePipeline};
use crate::storage::{ArtifactFolder, ArtifactStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Failed to encode response image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Request was cancelled")]
    Cancelled,
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Coarse classification used by the HTTP layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Internal,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) | PipelineError::Decode(_) => ErrorKind::InvalidInput,
            PipelineError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            PipelineError::Store(StoreError::InvalidName(_)) => ErrorKind::InvalidInput,
            PipelineError::Inference(InferenceError::UnsupportedFormat(_)) => {
                ErrorKind::InvalidInput
            }
            _ => ErrorKind::Internal,
        }
    }
}

const RUNNING: u8 = 0;
const COMMITTED: u8 = 1;
const CANCELLED: u8 = 2;

/// Shared between a request handler and the blocking job it spawned. The first
/// side to move it out of the running state decides whether the job's output
/// is kept (`commit`) or discarded (`cancel`).
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicU8>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the job already committed its result.
    pub fn cancel(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == CANCELLED
    }

    /// Returns false if the handler cancelled first.
    pub fn commit(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Outcome of the batch "process image" operation.
#[derive(Debug)]
pub struct ProcessedImage {
    pub folder: String,
    /// Root-relative path per variant.
    pub paths: BTreeMap<Variant, String>,
}

pub fn predict_upload(
    inference: &InferencePipeline,
    bytes: &[u8],
    content_type: Option<&str>,
    mode: PredictionMode,
) -> Result<Vec<Prediction>, PipelineError> {
    let image = decode_upload(bytes, content_type)?;
    Ok(inference.predict(&image, mode)?)
}

/// Decodes the upload, then stores the original and all four filtered variants
/// under a fresh folder. Nothing touches disk if decoding fails.
pub fn process_image(
    store: &ArtifactStore,
    bytes: &[u8],
    content_type: Option<&str>,
    filename: &str,
    cancel: &Cancellation,
) -> Result<ProcessedImage, PipelineError> {
    let image = decode_upload(bytes, content_type)?;
    process_decoded(store, filename, &image, cancel)
}

/// Any failure after the folder exists removes it before the error surfaces,
/// including cancellation observed between saves or at commit time.
pub fn process_decoded(
    store: &ArtifactStore,
    filename: &str,
    image: &PixelBuffer,
    cancel: &Cancellation,
) -> Result<ProcessedImage, PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    let folder = store.create_folder(filename)?;
    info!("Processing image in: {}", folder.path().display());

    let saved = save_all_variants(store, &folder, image, cancel).and_then(|paths| {
        if cancel.commit() {
            Ok(paths)
        } else {
            Err(PipelineError::Cancelled)
        }
    });
    match saved {
        Ok(paths) => Ok(ProcessedImage {
            folder: folder.name().to_string(),
            paths,
        }),
        Err(e) => {
            warn!("Processing failed: {}", e);
            store.cleanup(&folder);
            Err(e)
        }
    }
}

fn save_all_variants(
    store: &ArtifactStore,
    folder: &ArtifactFolder,
    image: &PixelBuffer,
    cancel: &Cancellation,
) -> Result<BTreeMap<Variant, String>, PipelineError> {
    let mut paths = BTreeMap::new();
    let original = store.save_variant(folder, Variant::Original, image)?;
    info!("Original image saved: {}", original);
    paths.insert(Variant::Original, original);
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let variants = [
        (Variant::Grayscale, filters::grayscale(image)),
        (Variant::Threshold, filters::threshold(image, filters::DEFAULT_THRESHOLD)),
        (Variant::Edge, filters::edge(image)),
        (Variant::Invert, filters::invert(image)),
    ];
    for (variant, processed) in variants {
        let path = store.save_variant(folder, variant, &processed)?;
        info!("{} image saved: {}", variant, path);
        paths.insert(variant, path);
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
    }
    Ok(paths)
}

/// Re-derives the threshold variant of an existing folder from its stored original.
pub fn rethreshold(
    store: &ArtifactStore,
    folder_name: &str,
    cutoff: u8,
) -> Result<String, PipelineError> {
    let folder = store.open_folder(folder_name)?;
    info!("Applying threshold {} to {}", cutoff, folder.path().display());
    let original = store.load_variant(&folder, Variant::Original)?;
    let processed = filters::threshold(&original, cutoff);
    Ok(store.save_variant(&folder, Variant::Threshold, &processed)?)
}

/// Applies one named filter and returns PNG bytes. Unknown names return the
/// original image.
pub fn apply_filter(
    bytes: &[u8],
    content_type: Option<&str>,
    filter_type: &str,
    cutoff: u8,
) -> Result<Vec<u8>, PipelineError> {
    let image = decode_upload(bytes, content_type)?;
    let filter = FilterType::from_str(filter_type).unwrap_or_else(|_| {
        info!("Unknown filter '{}', returning original", filter_type);
        FilterType::Original
    });
    let processed = filters::apply(&image, filter, cutoff);
    Ok(processed.encode_png()?)
}

/// Validates a client-supplied threshold.
pub fn parse_cutoff(raw: i64) -> Result<u8, PipelineError> {
    u8::try_from(raw).map_err(|_| {
        PipelineError::InvalidInput(format!("threshold must be between 0 and 255, got {}", raw))
    })
}
