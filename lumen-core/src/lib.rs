#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod device_map;
pub mod loader;
mod loader_factory;
pub mod output;
pub mod predictor;
pub mod request;
pub mod seed;
mod stable_diffusion;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
mod util;

use candle_core::Device;
pub use device_map::*;
use image::DynamicImage;
pub use loader::*;
pub use loader_factory::*;
pub use output::{sanitize_prompt, NamingScheme, OutputWriter};
pub use predictor::{GenerationMode, PredictError, Prediction, Predictor};
pub use request::{GenerationDefaults, GenerationRequest, RequestError, ResolvedRequest};
pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionModel, StableDiffusionVariant};
pub use util::{accelerator_available, select_best_device, tensor_to_image};

/// A loaded pipeline that turns a fully resolved request into an image.
///
/// Implementations serve both text-to-image (no `init_image`) and
/// image-to-image (with `init_image`) generation.
pub trait ModelLike: Send + Sync {
    fn run(
        &self,
        request: &ResolvedRequest,
        init_image: Option<&DynamicImage>,
    ) -> anyhow::Result<DynamicImage>;

    /// Values used for every field a request leaves unset.
    fn defaults(&self) -> GenerationDefaults;

    fn device(&self) -> &Device;
}
