use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::seed;

/// Generation parameters as supplied by a caller. Unset fields fall back to
/// the loaded model's [`GenerationDefaults`].
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, PartialOrd)]
pub struct GenerationRequest {
    pub prompt: String,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub steps: Option<usize>,
    pub guidance: Option<f64>,
    pub seed: Option<u64>,
    /// Fraction of the schedule that re-noises the input image (image-to-image only).
    pub strength: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationDefaults {
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance: f64,
    pub strength: f64,
}

/// A request with every field decided, including the seed.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub prompt: String,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance: f64,
    pub seed: u64,
    pub strength: f64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("image dimensions must be non-zero multiples of 8, got {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    #[error("the number of inference steps must be at least 1")]
    InvalidSteps,
    #[error("strength must be in (0, 1], got {0}")]
    InvalidStrength(f64),
    #[error("guidance scale must be a finite, non-negative number, got {0}")]
    InvalidGuidance(f64),
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Fills unset fields from `defaults`, picks a seed when none was given and
    /// validates the result.
    pub fn resolve(&self, defaults: &GenerationDefaults) -> Result<ResolvedRequest, RequestError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(RequestError::EmptyPrompt);
        }

        let width = self.width.unwrap_or(defaults.width);
        let height = self.height.unwrap_or(defaults.height);
        if width == 0 || height == 0 || width % 8 != 0 || height % 8 != 0 {
            return Err(RequestError::InvalidDimensions { width, height });
        }

        let steps = self.steps.unwrap_or(defaults.steps);
        if steps == 0 {
            return Err(RequestError::InvalidSteps);
        }

        let strength = self.strength.unwrap_or(defaults.strength);
        if !(strength > 0.0 && strength <= 1.0) {
            return Err(RequestError::InvalidStrength(strength));
        }

        let guidance = self.guidance.unwrap_or(defaults.guidance);
        if !guidance.is_finite() || guidance < 0.0 {
            return Err(RequestError::InvalidGuidance(guidance));
        }

        Ok(ResolvedRequest {
            prompt: prompt.to_string(),
            width,
            height,
            steps,
            guidance,
            seed: seed::resolve_seed(self.seed),
            strength,
        })
    }
}
