//! Request and response bodies of the prediction API.

use chrono::{DateTime, Utc};
use lumen_core::{GenerationRequest, Prediction};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Debug)]
pub struct PredictionRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub input: PredictionInput,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PredictionInput {
    #[serde(flatten)]
    pub generation: GenerationRequest,
    /// Base image for image-to-image, as a data URI or an http(s) URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Processing,
    Succeeded,
    Failed,
}

serde_plain::derive_display_from_serialize!(PredictionStatus);

#[derive(Serialize, Debug)]
pub struct Metrics {
    pub predict_time: f64,
}

#[derive(Serialize, Debug)]
pub struct PredictionResponse {
    pub id: String,
    pub input: PredictionInput,
    pub output: Option<String>,
    pub status: PredictionStatus,
    pub error: Option<String>,
    pub logs: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metrics: Option<Metrics>,
}

impl PredictionResponse {
    pub fn processing(id: String, input: PredictionInput, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            input,
            output: None,
            status: PredictionStatus::Processing,
            error: None,
            logs: String::new(),
            created_at,
            started_at: Some(Utc::now()),
            completed_at: None,
            metrics: None,
        }
    }

    pub fn succeed(&mut self, output: String, prediction: &Prediction) {
        self.logs = format!(
            "Using seed: {}\n{}\n",
            prediction.request.seed, prediction.mode
        );
        self.output = Some(output);
        self.status = PredictionStatus::Succeeded;
        self.completed_at = Some(Utc::now());
        self.metrics = Some(Metrics {
            predict_time: prediction.elapsed.as_secs_f64(),
        });
    }

    pub fn fail(&mut self, error: String) {
        self.error = Some(error);
        self.status = PredictionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Starting,
    Ready,
    Busy,
    SetupFailed,
}

#[derive(Serialize, Debug)]
pub struct SetupInfo {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: Option<PredictionStatus>,
    pub logs: String,
}

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: Health,
    pub setup: SetupInfo,
}
