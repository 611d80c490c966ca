use serde::{Deserialize, Serialize};

pub const CLASS_NAMES: [&str; 2] = ["NORMAL", "PNEUMONIA"];
pub const INPUT_SIZE: [u32; 2] = [224, 224];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Normal,
    Pneumonia,
    Error,
}

impl Label {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Label::Normal),
            1 => Some(Label::Pneumonia),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Normal => "NORMAL",
            Label::Pneumonia => "PNEUMONIA",
            Label::Error => "ERROR",
        }
    }
}

/// Which network produced a prediction. `Dummy` output is meaningless and
/// must never be read as a diagnosis.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelType {
    Real,
    Dummy,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Probabilities {
    #[serde(rename = "NORMAL")]
    pub normal: f32,
    #[serde(rename = "PNEUMONIA")]
    pub pneumonia: f32,
}

impl Probabilities {
    pub fn sum(&self) -> f32 {
        self.normal + self.pneumonia
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictionResult {
    #[serde(rename = "class")]
    pub label: Label,
    pub confidence: f32,
    /// Arg-max class index, `-1` for the error result.
    pub prediction: i64,
    pub probabilities: Probabilities,
    pub model_type: ModelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PredictionResult {
    /// Builds a result from a two-class distribution. Ties go to NORMAL.
    pub fn from_probabilities(probs: [f32; 2], model_type: ModelType) -> Self {
        let index = if probs[1] > probs[0] { 1 } else { 0 };
        let label = Label::from_index(index).unwrap_or(Label::Error);

        PredictionResult {
            label,
            confidence: probs[index],
            prediction: index as i64,
            probabilities: Probabilities {
                normal: probs[0],
                pneumonia: probs[1],
            },
            model_type,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        PredictionResult {
            label: Label::Error,
            confidence: 0.0,
            prediction: -1,
            probabilities: Probabilities {
                normal: 0.5,
                pneumonia: 0.5,
            },
            model_type: ModelType::Error,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.label == Label::Error
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub prediction: PredictionResult,
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_loaded: bool,
    pub input_size: [u32; 2],
    pub classes: Vec<String>,
    pub model_type: ModelType,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_argmax_as_label_and_confidence() {
        let result = PredictionResult::from_probabilities([0.2, 0.8], ModelType::Real);
        assert_eq!(result.label, Label::Pneumonia);
        assert_eq!(result.prediction, 1);
        assert_eq!(result.confidence, 0.8);
        assert!(!result.is_error());
    }

    #[test]
    fn error_result_is_uniform() {
        let result = PredictionResult::error("shape mismatch");
        assert!(result.is_error());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.prediction, -1);
        assert_eq!(result.probabilities.normal, 0.5);
        assert_eq!(result.probabilities.pneumonia, 0.5);
        assert_eq!(result.model_type, ModelType::Error);
    }

    #[test]
    fn serializes_with_documented_field_names() {
        let result = PredictionResult::from_probabilities([0.75, 0.25], ModelType::Dummy);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({
                "class": "NORMAL",
                "confidence": 0.75,
                "prediction": 0,
                "probabilities": { "NORMAL": 0.75, "PNEUMONIA": 0.25 },
                "model_type": "DUMMY"
            })
        );

        let error = serde_json::to_value(PredictionResult::error("boom")).unwrap();
        assert_eq!(error["class"], "ERROR");
        assert_eq!(error["model_type"], "ERROR");
        assert_eq!(error["error"], "boom");
    }
}
