use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use log::{debug, info, warn};
use shared::Variant;

use super::folder::FolderName;
use crate::imaging::PixelBuffer;
use crate::imaging::decode::{DecodeError, decode_bytes};

const JPEG_QUALITY: u8 = 95;
const CREATE_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to encode {variant} image: {message}")]
    Encode { variant: Variant, message: String },
    #[error("File not created: {0}")]
    WriteVerification(PathBuf),
    #[error("{0}")]
    NotFound(String),
    #[error("Invalid folder name: {0}")]
    InvalidName(String),
    #[error("Stored image is unreadable: {0}")]
    Corrupt(#[from] DecodeError),
}

/// Folder created by one processing request.
#[derive(Debug, Clone)]
pub struct ArtifactFolder {
    name: FolderName,
    path: PathBuf,
}

impl ArtifactFolder {
    pub fn name(&self) -> &FolderName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Flat directory store: one folder per request, one JPEG per variant.
#[derive(Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Storage {
            path: root.clone(),
            source,
        })?;
        info!("Artifact directory initialized at: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, never-before-used folder for `original_filename`.
    pub fn create_folder(&self, original_filename: &str) -> Result<ArtifactFolder, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let name = FolderName::generate(original_filename, Local::now());
            let path = self.root.join(name.as_str());
            match fs::create_dir(&path) {
                Ok(()) => {
                    info!("Created artifact folder: {}", path.display());
                    return Ok(ArtifactFolder { name, path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < CREATE_ATTEMPTS => {
                    warn!("Artifact folder {} already exists, retrying", name);
                }
                Err(source) => return Err(StoreError::Storage { path, source }),
            }
        }
    }

    /// Resolves a folder name sent back by a client.
    pub fn open_folder(&self, raw_name: &str) -> Result<ArtifactFolder, StoreError> {
        let name = FolderName::parse(raw_name)
            .ok_or_else(|| StoreError::InvalidName(raw_name.to_string()))?;
        let path = self.root.join(name.as_str());
        if !path.is_dir() {
            return Err(StoreError::NotFound("Image folder not found".to_string()));
        }
        Ok(ArtifactFolder { name, path })
    }

    /// Writes `<variant>.jpg` into the folder and returns its root-relative path.
    ///
    /// Encoding happens in memory before anything touches disk, so an encoder
    /// failure leaves no file behind. An existing file is replaced.
    pub fn save_variant(
        &self,
        folder: &ArtifactFolder,
        variant: Variant,
        buffer: &PixelBuffer,
    ) -> Result<String, StoreError> {
        let bytes = encode_jpeg(variant, buffer)?;
        let output_path = folder.path.join(variant.file_name());
        debug!("Saving {} image to: {}", variant, output_path.display());

        fs::write(&output_path, &bytes).map_err(|source| StoreError::Storage {
            path: output_path.clone(),
            source,
        })?;
        if !output_path.is_file() {
            return Err(StoreError::WriteVerification(output_path));
        }
        Ok(format!("{}/{}", folder.name, variant.file_name()))
    }

    pub fn load_variant(
        &self,
        folder: &ArtifactFolder,
        variant: Variant,
    ) -> Result<PixelBuffer, StoreError> {
        let path = folder.path.join(variant.file_name());
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let label = capitalize(variant.as_ref());
                return Err(StoreError::NotFound(format!("{} image not found", label)));
            }
            Err(source) => return Err(StoreError::Storage { path, source }),
        };
        Ok(PixelBuffer::from(decode_bytes(&bytes)?))
    }

    /// Best-effort recursive delete. Never fails; problems are only logged.
    pub fn cleanup(&self, folder: &ArtifactFolder) {
        info!("Cleaning up failed upload: {}", folder.path.display());
        if let Err(e) = fs::remove_dir_all(&folder.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Cleanup of {} failed: {}", folder.path.display(), e);
            }
        }
    }
}

fn encode_jpeg(variant: Variant, buffer: &PixelBuffer) -> Result<Vec<u8>, StoreError> {
    if buffer.is_empty() {
        return Err(StoreError::Encode {
            variant,
            message: format!("zero-sized {}x{} buffer", buffer.width(), buffer.height()),
        });
    }
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    buffer
        .to_dynamic()
        .write_with_encoder(encoder)
        .map_err(|e| StoreError::Encode {
            variant,
            message: e.to_string(),
        })?;
    Ok(bytes)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
