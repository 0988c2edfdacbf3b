use std::sync::Arc;

use ndarray::Array4;

use crate::config::ModelConfig;

use super::InferenceError;

/// Anything that maps a preprocessed batch to one probability per class.
pub trait Classifier: Send + Sync {
    fn classify(&self, batch: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;
}

#[cfg(feature = "torch")]
pub use torch::TorchClassifier;

#[cfg(feature = "torch")]
mod torch {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use log::info;
    use ndarray::Array4;
    use tch::{CModule, Device, Kind, Tensor};

    use super::{Classifier, InferenceError};

    impl From<tch::TchError> for InferenceError {
        fn from(err: tch::TchError) -> Self {
            InferenceError::Classifier(err.to_string())
        }
    }

    /// TorchScript module. `CModule` is not `Sync`, so calls are serialized.
    #[derive(Clone)]
    pub struct TorchClassifier {
        model: Arc<Mutex<CModule>>,
        device: Device,
        apply_softmax: bool,
    }

    /// Copies the batch into a tensor of the same shape on `device`.
    pub(super) fn input_tensor(
        batch: &Array4<f32>,
        device: Device,
    ) -> Result<Tensor, InferenceError> {
        let dims: Vec<i64> = batch.shape().iter().map(|&d| d as i64).collect();
        let contiguous = batch.as_standard_layout();
        let data = contiguous
            .as_slice()
            .ok_or_else(|| InferenceError::Classifier("batch is not contiguous".to_string()))?;
        Ok(Tensor::from_slice(data).view(dims.as_slice()).to_device(device))
    }

    impl TorchClassifier {
        pub fn load(model_path: &Path, apply_softmax: bool) -> Result<Self, InferenceError> {
            let device = Device::cuda_if_available();
            let model = CModule::load_on_device(model_path, device)?;
            info!("Loaded model {} on {:?}", model_path.display(), device);
            Ok(Self {
                model: Arc::new(Mutex::new(model)),
                device,
                apply_softmax,
            })
        }
    }

    impl Classifier for TorchClassifier {
        fn classify(&self, batch: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            let input = input_tensor(batch, self.device)?;

            let model = self
                .model
                .lock()
                .map_err(|_| InferenceError::Classifier("model lock poisoned".to_string()))?;
            let output = tch::no_grad(|| model.forward_ts(&[input]))?;
            let output = if self.apply_softmax {
                output.softmax(-1, Kind::Float)
            } else {
                output
            };
            let output_flat = output
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .view([-1]);
            Ok(Vec::<f32>::try_from(&output_flat)?)
        }
    }
}

/// Loads the configured classifier once at startup.
#[cfg(feature = "torch")]
pub fn load_classifier(config: &ModelConfig) -> Result<Arc<dyn Classifier>, InferenceError> {
    let classifier = TorchClassifier::load(&config.path, config.apply_softmax)?;
    Ok(Arc::new(classifier))
}

#[cfg(not(feature = "torch"))]
pub fn load_classifier(config: &ModelConfig) -> Result<Arc<dyn Classifier>, InferenceError> {
    Err(InferenceError::Unavailable(format!(
        "cannot load {}: built without the `torch` feature",
        config.path.display()
    )))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Returns a fixed probability vector regardless of input.
    pub struct FixedClassifier(pub Vec<f32>);

    impl Classifier for FixedClassifier {
        fn classify(&self, _batch: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    pub struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn classify(&self, _batch: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            Err(InferenceError::Classifier("forward pass failed".to_string()))
        }
    }

    /// Peaks on a class chosen by mean intensity, so different images rank differently.
    pub struct BrightnessClassifier;

    impl Classifier for BrightnessClassifier {
        fn classify(&self, batch: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            let mean = batch.mean().unwrap_or(0.0);
            let peak = (((mean + 1.0) / 2.0) * 19.0).round() as usize;
            let mut probs = vec![0.01f32; 20];
            probs[peak.min(19)] = 0.81;
            Ok(probs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "torch"))]
    #[test]
    fn test_load_without_backend_fails() {
        let result = load_classifier(&ModelConfig::default());
        assert!(matches!(result, Err(InferenceError::Unavailable(_))));
    }

    #[cfg(feature = "torch")]
    #[test]
    fn test_input_tensor_lands_on_model_device() {
        use tch::Device;

        let batch = Array4::<f32>::from_shape_fn((1, 4, 3, 3), |(_, h, w, c)| {
            (h * 9 + w * 3 + c) as f32
        });
        let device = Device::cuda_if_available();
        let tensor = torch::input_tensor(&batch, device).unwrap();
        assert_eq!(tensor.device(), device);
        assert_eq!(tensor.size(), vec![1, 4, 3, 3]);

        let values = Vec::<f32>::try_from(&tensor.to_device(Device::Cpu).view([-1])).unwrap();
        assert_eq!(values, batch.iter().copied().collect::<Vec<f32>>());
    }
}
