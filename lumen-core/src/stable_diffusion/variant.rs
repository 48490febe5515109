use candle_transformers::models::stable_diffusion::StableDiffusionConfig;
use serde::{Deserialize, Serialize};

use crate::GenerationDefaults;

/// Checkpoint families sharing the Stable Diffusion UNet/VAE/CLIP layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StableDiffusionVariant {
    /// SimianLuo/LCM_Dreamshaper_v7, a latent-consistency distilled v1.5 finetune.
    LcmDreamshaper,
    V1_5,
    V2_1,
}

serde_plain::derive_display_from_serialize!(StableDiffusionVariant);

impl StableDiffusionVariant {
    pub fn repo(&self) -> &'static str {
        match self {
            Self::LcmDreamshaper => "SimianLuo/LCM_Dreamshaper_v7",
            Self::V1_5 => "stable-diffusion-v1-5/stable-diffusion-v1-5",
            Self::V2_1 => "stabilityai/stable-diffusion-2-1",
        }
    }

    /// Hub repository with a `tokenizer.json` matching the text encoder.
    pub fn tokenizer_repo(&self) -> &'static str {
        "openai/clip-vit-base-patch32"
    }

    pub fn config(&self) -> StableDiffusionConfig {
        match self {
            Self::LcmDreamshaper | Self::V1_5 => StableDiffusionConfig::v1_5(None, None, None),
            Self::V2_1 => StableDiffusionConfig::v2_1(None, None, None),
        }
    }

    pub fn vae_scale(&self) -> f64 {
        0.18215
    }

    /// LCM checkpoints are distilled to run without classifier-free guidance;
    /// their guidance-embedding scale has no counterpart in this pipeline.
    pub fn defaults(&self) -> GenerationDefaults {
        match self {
            Self::LcmDreamshaper => GenerationDefaults {
                width: 512,
                height: 512,
                steps: 8,
                guidance: 1.0,
                strength: 0.75,
            },
            Self::V1_5 => GenerationDefaults {
                width: 512,
                height: 512,
                steps: 30,
                guidance: 7.5,
                strength: 0.75,
            },
            Self::V2_1 => GenerationDefaults {
                width: 768,
                height: 768,
                steps: 30,
                guidance: 7.5,
                strength: 0.75,
            },
        }
    }
}
