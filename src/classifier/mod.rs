//! Pneumonia classifier with a load-or-placeholder lifecycle.
//!
//! The wrapper is built once at startup. A missing or broken ONNX artifact
//! never stops the service: an untrained placeholder network takes its place
//! and every prediction it makes is tagged `DUMMY`.

mod onnx;
mod placeholder;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayView4};
use rand::Rng;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::imaging::PreparedTensor;
use crate::models::{ModelType, PredictionResult};

use onnx::OnnxNetwork;
use placeholder::PlaceholderNetwork;

/// Artifacts smaller than this are treated as corrupt.
pub const MIN_MODEL_BYTES: u64 = 1024;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("model file seems too small ({size} bytes), likely corrupted")]
    TooSmall { size: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to load model: {0}")]
    Load(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("failed to create placeholder model: {0}")]
    Placeholder(String),
}

/// A forward pass producing the raw two-class output.
pub trait Network: Send + Sync {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ModelError>;
}

#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub model_path: PathBuf,
    pub placeholder_hidden_units: usize,
    pub placeholder_seed: Option<u64>,
}

pub struct PneumoniaModel {
    network: Box<dyn Network>,
    model_type: ModelType,
}

impl PneumoniaModel {
    /// Loads the ONNX artifact, falling back to a placeholder. Only fails
    /// when the placeholder itself cannot be built.
    pub fn load(options: &ModelOptions) -> Result<Self, ModelError> {
        Self::load_with(options, |path| {
            OnnxNetwork::load(path).map(|network| Box::new(network) as Box<dyn Network>)
        })
    }

    fn load_with<F>(options: &ModelOptions, loader: F) -> Result<Self, ModelError>
    where
        F: FnOnce(&Path) -> Result<Box<dyn Network>, ModelError>,
    {
        match load_real(&options.model_path, loader) {
            Ok(network) => {
                info!("real model loaded from {}", options.model_path.display());
                Ok(PneumoniaModel {
                    network,
                    model_type: ModelType::Real,
                })
            }
            Err(e) => {
                error!(
                    "could not load model from {}: {}",
                    options.model_path.display(),
                    e
                );
                Self::placeholder(options.placeholder_hidden_units, options.placeholder_seed)
            }
        }
    }

    pub fn placeholder(hidden_units: usize, seed: Option<u64>) -> Result<Self, ModelError> {
        warn!("creating placeholder model, predictions will be random");
        let network = PlaceholderNetwork::new(hidden_units, seed).map_err(|e| {
            error!("{}", e);
            e
        })?;
        info!("placeholder model created with {} hidden units", hidden_units);

        Ok(PneumoniaModel {
            network: Box::new(network),
            model_type: ModelType::Dummy,
        })
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    /// Classifies `input`. Failures come back as an error-tagged result.
    pub fn predict(&self, input: &PreparedTensor) -> PredictionResult {
        match self.try_predict(input) {
            Ok(probs) => {
                let result = PredictionResult::from_probabilities(probs, self.model_type);
                info!(
                    class = result.label.as_str(),
                    confidence = result.confidence,
                    model_type = ?self.model_type,
                    "prediction"
                );
                if self.model_type == ModelType::Dummy {
                    warn!("prediction came from the placeholder model and is not a diagnosis");
                }
                result
            }
            Err(e) => {
                error!("prediction error: {}", e);
                PredictionResult::error(e.to_string())
            }
        }
    }

    fn try_predict(&self, input: &PreparedTensor) -> Result<[f32; 2], ModelError> {
        if !input.has_model_shape() {
            return Err(ModelError::Inference(format!(
                "expected input shape {:?}, got {:?}",
                PreparedTensor::SHAPE,
                input.shape()
            )));
        }
        let output = self.network.forward(input.view())?;
        to_distribution(&output)
    }
}

fn load_real<F>(path: &Path, loader: F) -> Result<Box<dyn Network>, ModelError>
where
    F: FnOnce(&Path) -> Result<Box<dyn Network>, ModelError>,
{
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ModelError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if size < MIN_MODEL_BYTES {
        return Err(ModelError::TooSmall { size });
    }

    info!("loading model from {} (size: {} bytes)", path.display(), size);
    let network = loader(path)?;

    let mut rng = rand::thread_rng();
    let sample = Array4::from_shape_fn(PreparedTensor::SHAPE, |_| rng.gen::<f32>());
    let output = network.forward(sample.view())?;
    let probs = to_distribution(&output)?;
    info!("model smoke test passed: {:?}", probs);

    Ok(network)
}

/// Numerically stable softmax.
pub(crate) fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Turns raw network output into a two-class distribution summing to one.
/// Outputs that are not already probabilities are treated as logits.
fn to_distribution(output: &[f32]) -> Result<[f32; 2], ModelError> {
    if output.len() != 2 {
        return Err(ModelError::Inference(format!(
            "expected 2 output values, got {}",
            output.len()
        )));
    }
    if output.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::Inference(format!(
            "model produced non-finite output {:?}",
            output
        )));
    }

    let sum: f32 = output.iter().sum();
    let probs = if output.iter().any(|&v| v < 0.0) || (sum - 1.0).abs() > 1e-3 {
        softmax(output)
    } else {
        output.iter().map(|v| v / sum).collect()
    };

    Ok([probs[0], probs[1]])
}
