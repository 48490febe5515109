use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{GenerationDefaults, GenerationRequest, ModelLike, RequestError, ResolvedRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenerationMode {
    #[serde(rename = "txt2img")]
    TextToImage,
    #[serde(rename = "img2img")]
    ImageToImage,
}

serde_plain::derive_display_from_serialize!(GenerationMode);

#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("failed to read input image {}", path.display())]
    InputImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}

/// One finished generation.
pub struct Prediction {
    pub image: DynamicImage,
    pub request: ResolvedRequest,
    pub mode: GenerationMode,
    pub elapsed: Duration,
}

/// Front door to a loaded pipeline: resolves parameters and seed, then hands
/// the call to text-to-image or image-to-image generation.
#[derive(Clone)]
pub struct Predictor {
    model: Arc<dyn ModelLike>,
}

impl Predictor {
    pub fn new(model: Arc<dyn ModelLike>) -> Self {
        Self { model }
    }

    pub fn defaults(&self) -> GenerationDefaults {
        self.model.defaults()
    }

    pub fn model(&self) -> &Arc<dyn ModelLike> {
        &self.model
    }

    pub fn predict(
        &self,
        request: &GenerationRequest,
        init_image: Option<&DynamicImage>,
    ) -> Result<Prediction, PredictError> {
        let request = request.resolve(&self.model.defaults())?;
        info!("Using seed: {}", request.seed);

        let mode = match init_image {
            Some(_) => GenerationMode::ImageToImage,
            None => GenerationMode::TextToImage,
        };
        info!(
            %mode,
            width = request.width,
            height = request.height,
            steps = request.steps,
            "{}",
            mode
        );

        let start = Instant::now();
        let image = self.model.run(&request, init_image)?;
        let elapsed = start.elapsed();
        info!("generated image in {:.2}s", elapsed.as_secs_f64());

        Ok(Prediction {
            image,
            request,
            mode,
            elapsed,
        })
    }

    /// Like [`Predictor::predict`], reading the input image from disk when a path is given.
    pub fn predict_from_path(
        &self,
        request: &GenerationRequest,
        image_path: Option<&Path>,
    ) -> Result<Prediction, PredictError> {
        let init_image = image_path
            .map(|path| {
                image::open(path).map_err(|source| PredictError::InputImage {
                    path: path.to_path_buf(),
                    source,
                })
            })
            .transpose()?;
        self.predict(request, init_image.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SolidColorModel;
    use image::{Rgb, RgbImage};

    fn predictor() -> (Predictor, Arc<SolidColorModel>) {
        let model = Arc::new(SolidColorModel::new());
        (Predictor::new(model.clone()), model)
    }

    #[test]
    fn text_prompt_runs_text_to_image_with_defaults() {
        let (predictor, model) = predictor();
        let prediction = predictor
            .predict(&GenerationRequest::new("a red barn"), None)
            .unwrap();

        assert_eq!(prediction.mode, GenerationMode::TextToImage);
        assert_eq!(prediction.image.width(), 512);
        assert_eq!(prediction.request.steps, 8);
        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].with_init_image);
    }

    #[test]
    fn input_image_switches_to_image_to_image() {
        let (predictor, model) = predictor();
        let init = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([1, 2, 3])));
        let request = GenerationRequest {
            seed: Some(99),
            ..GenerationRequest::new("a red barn")
        };
        let prediction = predictor.predict(&request, Some(&init)).unwrap();

        assert_eq!(prediction.mode, GenerationMode::ImageToImage);
        assert_eq!(prediction.request.seed, 99);
        assert!(model.calls()[0].with_init_image);
    }

    #[test]
    fn invalid_request_never_reaches_the_pipeline() {
        let (predictor, model) = predictor();
        let err = predictor
            .predict(&GenerationRequest::new(""), None)
            .err()
            .unwrap();
        assert!(matches!(err, PredictError::Request(RequestError::EmptyPrompt)));
        assert!(model.calls().is_empty());
    }

    #[test]
    fn missing_input_file_is_reported_with_its_path() {
        let (predictor, _) = predictor();
        let err = predictor
            .predict_from_path(
                &GenerationRequest::new("x"),
                Some(Path::new("/nonexistent/input.png")),
            )
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nonexistent/input.png"));
    }

    #[test]
    fn input_file_is_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.png");
        RgbImage::from_pixel(16, 16, Rgb([9, 9, 9])).save(&path).unwrap();

        let (predictor, model) = predictor();
        let prediction = predictor
            .predict_from_path(&GenerationRequest::new("x"), Some(&path))
            .unwrap();
        assert_eq!(prediction.mode, GenerationMode::ImageToImage);
        assert!(model.calls()[0].with_init_image);
    }

    #[test]
    fn modes_display_like_their_log_lines() {
        assert_eq!(GenerationMode::TextToImage.to_string(), "txt2img");
        assert_eq!(GenerationMode::ImageToImage.to_string(), "img2img");
    }
}
