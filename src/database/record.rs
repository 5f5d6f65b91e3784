use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ml::engine::Prediction;

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z%z";

/// A string attribute in key-value store wire form: `{"S": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringAttribute {
    #[serde(rename = "S")]
    pub s: String,
}

impl From<String> for StringAttribute {
    fn from(s: String) -> Self {
        Self { s }
    }
}

/// One prediction, keyed by the source object path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictionRecord {
    pub s3_path: String,
    pub predicted: String,
    pub probability: String,
    pub date_created_utc: String,
}

impl PredictionRecord {
    pub fn new(s3_path: &str, prediction: &Prediction, created: DateTime<Utc>) -> Self {
        Self {
            s3_path: s3_path.to_string(),
            predicted: prediction.label.clone(),
            probability: format_probability(prediction.probability),
            date_created_utc: format_timestamp(created),
        }
    }

    pub fn to_item(&self) -> PredictionItem {
        PredictionItem {
            s3_path: self.s3_path.clone().into(),
            predicted: self.predicted.clone().into(),
            probability: self.probability.clone().into(),
            date_created_utc: self.date_created_utc.clone().into(),
        }
    }
}

/// Wire form of a [`PredictionRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionItem {
    #[serde(rename = "S3Path")]
    pub s3_path: StringAttribute,
    #[serde(rename = "Predicted")]
    pub predicted: StringAttribute,
    #[serde(rename = "Probability")]
    pub probability: StringAttribute,
    #[serde(rename = "DateCreatedUTC")]
    pub date_created_utc: StringAttribute,
}

impl From<PredictionItem> for PredictionRecord {
    fn from(item: PredictionItem) -> Self {
        Self {
            s3_path: item.s3_path.s,
            predicted: item.predicted.s,
            probability: item.probability.s,
            date_created_utc: item.date_created_utc.s,
        }
    }
}

pub fn format_probability(probability: f32) -> String {
    format!("{:.4}", probability)
}

pub fn format_timestamp(created: DateTime<Utc>) -> String {
    created.format(TIME_FORMAT).to_string()
}
