use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// How many ranked predictions the classifier endpoint returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMode {
    /// Best label only.
    Single,
    /// Three best labels, highest first.
    #[default]
    Top3,
}

impl PredictionMode {
    pub fn k(self) -> usize {
        match self {
            PredictionMode::Single => 1,
            PredictionMode::Top3 => 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Prediction {
    pub disease: String,
    /// Percentage in `[0, 100]`.
    pub confidence: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PredictionResponse {
    pub predictions: Vec<Prediction>,
}

/// Named image files stored inside an artifact folder.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Variant {
    Original,
    Grayscale,
    Threshold,
    Edge,
    Invert,
}

impl Variant {
    pub fn file_name(self) -> String {
        format!("{}.jpg", self.as_ref())
    }
}

/// Filters accepted by the single-filter endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FilterType {
    Original,
    Grayscale,
    Threshold,
    Edge,
    Invert,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessImageResponse {
    pub message: String,
    pub paths: BTreeMap<Variant, String>,
    pub folder: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ThresholdRequest {
    pub folder: String,
    pub threshold: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ThresholdResponse {
    pub path: String,
    pub threshold: u8,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorResponse {
    pub error: String,
}
