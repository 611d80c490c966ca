use ndarray::{Array1, Array2, ArrayView4};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{softmax, ModelError, Network};
use crate::imaging::PreparedTensor;

const INPUT_FEATURES: usize =
    PreparedTensor::SHAPE[1] * PreparedTensor::SHAPE[2] * PreparedTensor::SHAPE[3];
const OUTPUT_CLASSES: usize = 2;

/// Untrained Flatten -> Dense(relu) -> Dense(softmax) network. Its output has
/// the right shape and nothing else.
pub struct PlaceholderNetwork {
    hidden_w: Array2<f32>,
    hidden_b: Array1<f32>,
    out_w: Array2<f32>,
    out_b: Array1<f32>,
}

impl PlaceholderNetwork {
    pub fn new(hidden_units: usize, seed: Option<u64>) -> Result<Self, ModelError> {
        if hidden_units == 0 {
            return Err(ModelError::Placeholder(
                "hidden layer needs at least one unit".to_string(),
            ));
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(PlaceholderNetwork {
            hidden_w: glorot_uniform(&mut rng, INPUT_FEATURES, hidden_units),
            hidden_b: Array1::zeros(hidden_units),
            out_w: glorot_uniform(&mut rng, hidden_units, OUTPUT_CLASSES),
            out_b: Array1::zeros(OUTPUT_CLASSES),
        })
    }
}

fn glorot_uniform(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> Array2<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((fan_in, fan_out), |_| dist.sample(&mut *rng))
}

impl Network for PlaceholderNetwork {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ModelError> {
        let flat = Array2::from_shape_vec((1, INPUT_FEATURES), input.iter().copied().collect())
            .map_err(|e| ModelError::Inference(format!("cannot flatten input: {}", e)))?;

        let hidden = (flat.dot(&self.hidden_w) + &self.hidden_b).mapv(|v| v.max(0.0));
        let logits = hidden.dot(&self.out_w) + &self.out_b;

        let logits: Vec<f32> = logits.iter().copied().collect();
        Ok(softmax(&logits))
    }
}
