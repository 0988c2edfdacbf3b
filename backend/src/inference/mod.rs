pub mod classifier;
pub mod labels;
pub mod preprocess;

use std::sync::Arc;

use log::{debug, warn};
use shared::{Prediction, PredictionMode};

use crate::config::{ModelConfig, TensorLayout};
use crate::imaging::PixelBuffer;
use classifier::Classifier;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Model inference error: {0}")]
    Classifier(String),
    #[error("Classifier returned {got} scores, expected at least {expected}")]
    OutputShape { got: usize, expected: usize },
    #[cfg(not(feature = "torch"))]
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),
}

/// Resize → normalize → classify → rank. Holds no per-request state.
#[derive(Clone)]
pub struct InferencePipeline {
    classifier: Arc<dyn Classifier>,
    image_size: u32,
    layout: TensorLayout,
}

impl InferencePipeline {
    pub fn new(classifier: Arc<dyn Classifier>, config: &ModelConfig) -> Self {
        Self {
            classifier,
            image_size: config.image_size,
            layout: config.layout,
        }
    }

    pub fn predict(
        &self,
        image: &PixelBuffer,
        mode: PredictionMode,
    ) -> Result<Vec<Prediction>, InferenceError> {
        let batch = preprocess::preprocess(image, self.image_size, self.layout)?;
        let probabilities = self.classifier.classify(&batch)?;
        if probabilities.len() != labels::num_classes() {
            warn!(
                "Classifier returned {} scores for {} labels",
                probabilities.len(),
                labels::num_classes()
            );
        }

        let k = mode.k();
        if probabilities.len() < k {
            return Err(InferenceError::OutputShape {
                got: probabilities.len(),
                expected: k,
            });
        }

        let predictions: Vec<Prediction> = top_k(&probabilities, k)
            .into_iter()
            .map(|(index, probability)| Prediction {
                disease: labels::label_for(index).to_string(),
                confidence: probability * 100.0,
            })
            .collect();
        debug!("Top-{} predictions: {:?}", k, predictions);
        Ok(predictions)
    }
}

/// Indices of the `k` highest scores, highest first.
///
/// Ties keep the lower index first; NaN scores rank below everything else.
pub fn top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| rank_key(b.1).total_cmp(&rank_key(a.1)));
    indexed.truncate(k);
    indexed
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() { f32::NEG_INFINITY } else { score }
}
