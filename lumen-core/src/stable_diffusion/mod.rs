use std::path::Path;

use anyhow::{anyhow, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

mod variant;

pub use variant::StableDiffusionVariant;

use crate::{
    seed::SeededNoise, select_best_device, tensor_to_image, util::image_to_tensor, DeviceMap,
    GenerationDefaults, Loader, ModelLike, ModelVariant, ResolvedRequest,
};

/// Classifier-free guidance doubles the UNet batch, so it only runs above 1.0.
pub(crate) fn uses_guidance(guidance: f64) -> bool {
    guidance > 1.0
}

/// First timestep index run in image-to-image: the last `floor(steps * strength)`
/// steps of the schedule denoise the re-noised input.
pub(crate) fn img2img_start_step(steps: usize, strength: f64) -> usize {
    let denoised = ((steps as f64 * strength) as usize).min(steps);
    steps - denoised
}

/// CLIP, VAE and UNet of a Stable Diffusion checkpoint, ready for inference.
pub struct StableDiffusionModel {
    variant: StableDiffusionVariant,
    device: Device,
    dtype: DType,
    max_tokens: usize,
    tokenizer: Tokenizer,
    pad_id: u32,
    text_model: ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
}

impl StableDiffusionModel {
    pub fn variant(&self) -> StableDiffusionVariant {
        self.variant
    }

    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let max_len = self.max_tokens;
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > max_len {
            warn!(
                "prompt is {} tokens long, truncating to {}",
                tokens.len(),
                max_len
            );
            tokens.truncate(max_len);
        }
        tokens.resize(max_len, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }

    /// Conditional embeddings, preceded by the unconditional ones when guidance is on.
    fn text_embeddings(&self, prompt: &str, use_guidance: bool) -> Result<Tensor> {
        let cond = self.encode_prompt(prompt)?;
        let embeddings = if use_guidance {
            let uncond = self.encode_prompt("")?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        };
        Ok(embeddings.to_dtype(self.dtype)?)
    }
}

impl ModelLike for StableDiffusionModel {
    fn run(
        &self,
        request: &ResolvedRequest,
        init_image: Option<&DynamicImage>,
    ) -> Result<DynamicImage> {
        let (width, height) = (request.width, request.height);
        let use_guidance = uses_guidance(request.guidance);
        let vae_scale = self.variant.vae_scale();

        if !self.device.is_cpu() {
            self.device.set_seed(request.seed)?;
        }
        let mut noise = SeededNoise::new(request.seed);

        let text_embeddings = self.text_embeddings(&request.prompt, use_guidance)?;

        let mut scheduler = self.variant.config().build_scheduler(request.steps)?;
        let timesteps = scheduler.timesteps().to_vec();

        let t_start = match init_image {
            Some(_) => img2img_start_step(request.steps, request.strength),
            None => 0,
        };

        let latents = match init_image {
            Some(image) => {
                let pixels = image_to_tensor(image, width, height, &self.device)?;
                let latents = (self.vae.encode(&pixels)?.sample()? * vae_scale)?;
                if t_start < timesteps.len() {
                    let noise = noise.tensor(latents.dims4()?, &self.device)?;
                    scheduler.add_noise(&latents, noise, timesteps[t_start])?
                } else {
                    latents
                }
            }
            None => {
                let latents = noise.tensor((1, 4, height / 8, width / 8), &self.device)?;
                (latents * scheduler.init_noise_sigma())?
            }
        };
        let mut latents = latents.to_dtype(self.dtype)?;

        for (index, &timestep) in timesteps.iter().enumerate().skip(t_start) {
            debug!(step = index + 1, total = timesteps.len(), timestep, "denoising");
            let model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * request.guidance)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }
        debug!("denoising finished, decoding latents");

        let latents = latents.to_dtype(DType::F32)?;
        let decoded = self.vae.decode(&(latents / vae_scale)?)?;
        let img = ((decoded / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let img = (img.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?;

        tensor_to_image(&img.i(0)?)
    }

    fn defaults(&self) -> GenerationDefaults {
        self.variant.defaults()
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// Reads the UNet's input channel count from its `conv_in` weight, and notes
/// weights this pipeline leaves unused.
fn inspect_unet(unet_file: &Path) -> Result<usize> {
    let tensors = unsafe { candle_core::safetensors::MmapedSafetensors::new(unet_file)? };
    let conv_in = tensors
        .get("conv_in.weight")
        .context("UNet weights have no conv_in.weight")?;
    let in_channels = match conv_in.shape() {
        [_, in_channels, _, _] => *in_channels,
        shape => anyhow::bail!("unexpected conv_in.weight shape {:?}", shape),
    };
    if tensors.get("time_embedding.cond_proj.weight").is_ok() {
        warn!("UNet has a guidance-embedding projection, it is ignored by this pipeline");
    }
    Ok(in_channels)
}

pub struct StableDiffusionLoader;

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    async fn load(
        model_id: String,
        variant: ModelVariant,
        api: Api,
        device_map: DeviceMap,
    ) -> Result<Self::Model> {
        let ModelVariant::StableDiffusion(variant) = variant;

        // --- Fetch weights ---
        info!("fetching {} weights", model_id);
        let tokenizer_file = api
            .model(variant.tokenizer_repo().to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        let repo = api.model(model_id);
        let clip_file = repo
            .get("text_encoder/model.safetensors")
            .await
            .context("failed to get CLIP model file")?;
        let vae_file = repo
            .get("vae/diffusion_pytorch_model.safetensors")
            .await
            .context("failed to get VAE model file")?;
        let unet_file = repo
            .get("unet/diffusion_pytorch_model.safetensors")
            .await
            .context("failed to get UNet model file")?;

        // Configure device.
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = device.bf16_default_to_f32();
        let sd_config = variant.config();
        info!(?device, ?dtype, "building {:?} pipeline", variant);

        // --- Load tokenizer ---
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(anyhow::Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = sd_config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .ok_or_else(|| anyhow!("tokenizer has no {pad_token} token"))?;

        // --- Load CLIP text encoder ---
        let text_model =
            stable_diffusion::build_clip_transformer(&sd_config.clip, clip_file, &device, dtype)
                .context("failed to load CLIP model")?;

        // --- Load VAE (always f32, half precision produces artifacts) ---
        let vae = sd_config
            .build_vae(vae_file, &device, DType::F32)
            .context("failed to load VAE")?;

        // --- Load UNet ---
        let in_channels = inspect_unet(&unet_file)?;
        let unet = sd_config
            .build_unet(
                unet_file,
                &device,
                in_channels,
                cfg!(feature = "flash-attn"),
                dtype,
            )
            .context("failed to load UNet")?;

        info!("model ready");
        Ok(StableDiffusionModel {
            variant,
            device,
            dtype,
            max_tokens: sd_config.clip.max_position_embeddings,
            tokenizer,
            pad_id,
            text_model,
            vae,
            unet,
        })
    }
}
