use anyhow::{anyhow, Result};
use hf_hub::api::tokio::Api;
use tracing::info;

use crate::{DeviceMap, Loader, ModelLike, StableDiffusionLoader, StableDiffusionVariant};
use std::sync::Arc;

/// Hub repository loaded when no model is named explicitly.
pub const DEFAULT_MODEL: &str = "SimianLuo/LCM_Dreamshaper_v7";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    StableDiffusion(StableDiffusionVariant),
    // Add more pipeline families as they become available
}

impl ModelVariant {
    /// Detect model variant from model name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("LCM") || name_upper.contains("DREAMSHAPER") {
            Some(ModelVariant::StableDiffusion(
                StableDiffusionVariant::LcmDreamshaper,
            ))
        } else if name_upper.contains("STABLE-DIFFUSION-2") || name_upper.contains("SD2") {
            Some(ModelVariant::StableDiffusion(StableDiffusionVariant::V2_1))
        } else if name_upper.contains("STABLE-DIFFUSION") || name_upper.contains("SD1") {
            Some(ModelVariant::StableDiffusion(StableDiffusionVariant::V1_5))
        } else {
            None
        }
    }
}

/// Load a model based on its name, automatically detecting the appropriate loader
pub async fn load_model(
    model_name: &str,
    api: Api,
    device_map: DeviceMap,
) -> Result<Arc<dyn ModelLike>> {
    let model_variant = ModelVariant::from_name(model_name)
        .ok_or_else(|| anyhow!("Unsupported model: {}", model_name))?;

    info!(
        "Loading model: {} (detected variant: {:?})",
        model_name, model_variant
    );

    match model_variant {
        ModelVariant::StableDiffusion(_) => {
            let model =
                StableDiffusionLoader::load(model_name.to_string(), model_variant, api, device_map)
                    .await?;
            Ok(Arc::new(model))
        }
    }
}
