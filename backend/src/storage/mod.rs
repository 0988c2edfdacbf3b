pub mod artifact_store;
pub mod folder;

pub use artifact_store::{ArtifactFolder, ArtifactStore, StoreError};
