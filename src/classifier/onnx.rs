use std::path::Path;

use ndarray::ArrayView4;
use tract_core::prelude::Tensor;
use tract_onnx::prelude::*;

use super::{ModelError, Network};
use crate::imaging::PreparedTensor;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Trained classifier deserialized from an ONNX artifact.
pub struct OnnxNetwork {
    plan: Plan,
}

impl OnnxNetwork {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let [n, h, w, c] = PreparedTensor::SHAPE;
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| {
                model.with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(n, h, w, c)))
            })
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| ModelError::Load(format!("{:#}", e)))?;

        Ok(OnnxNetwork { plan })
    }
}

impl Network for OnnxNetwork {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ModelError> {
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_shape(input.shape(), &data)
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| ModelError::Inference(format!("{:#}", e)))?;

        let output = outputs
            .first()
            .ok_or_else(|| ModelError::Inference("model produced no outputs".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        Ok(view.iter().copied().collect())
    }
}
