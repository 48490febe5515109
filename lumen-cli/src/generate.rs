use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use lumen_core::{GenerationRequest, OutputWriter, Predictor};
use tracing::info;

/// Generation parameters shared by every prompt of a run.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub steps: Option<usize>,
    pub seed: Option<u64>,
    pub guidance: Option<f64>,
    pub strength: Option<f64>,
    pub image: Option<PathBuf>,
    pub html: bool,
}

pub struct Session {
    predictor: Predictor,
    writer: OutputWriter,
    settings: Settings,
    prompts: Vec<String>,
}

impl Session {
    pub fn new(
        predictor: Predictor,
        writer: OutputWriter,
        settings: Settings,
        prompts: Vec<String>,
    ) -> Self {
        Self {
            predictor,
            writer,
            settings,
            prompts,
        }
    }

    fn request(&self, prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            width: self.settings.width,
            height: self.settings.height,
            steps: self.settings.steps,
            guidance: self.settings.guidance,
            seed: self.settings.seed,
            strength: self.settings.strength,
        }
    }

    fn generate(&self, prompt: &str, image: Option<&Path>) -> Result<PathBuf> {
        let prediction = self
            .predictor
            .predict_from_path(&self.request(prompt), image)?;
        let path = self.writer.save(&prediction)?;
        println!("Output image saved to: {}", path.display());
        Ok(path)
    }

    /// One image per prompt.
    pub fn run_once(&self) -> Result<Vec<PathBuf>> {
        let mut outputs = Vec::with_capacity(self.prompts.len());
        for prompt in &self.prompts {
            let path = self.generate(prompt, self.settings.image.as_deref())?;
            if self.settings.html {
                self.writer.write_html_index(&path)?;
            }
            outputs.push(path);
        }
        Ok(outputs)
    }

    /// Cycles through the prompts until `stop` is raised, feeding each output
    /// back in as the next base image. Returns how many images were written.
    pub fn run_continuous(&self, stop: &AtomicBool) -> Result<usize> {
        let mut base = self.settings.image.clone();
        let mut count = 0;
        for prompt in self.prompts.iter().cycle() {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let path = self.generate(prompt, base.as_deref())?;
            self.writer.write_html_index(&path)?;
            base = Some(path);
            count += 1;
        }
        info!("continuous generation stopped after {} images", count);
        Ok(count)
    }
}
