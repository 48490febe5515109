use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use lumen_core::{DeviceMap, NamingScheme, DEFAULT_MODEL};

use crate::generate::Settings;

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate images based on text prompts.")]
pub struct Args {
    /// A single text prompt for image generation.
    pub prompt: Option<String>,

    /// The width of the generated image [default: 512 for LCM Dreamshaper].
    #[arg(long)]
    pub width: Option<usize>,

    /// The height of the generated image [default: 512 for LCM Dreamshaper].
    #[arg(long)]
    pub height: Option<usize>,

    /// The number of inference steps [default: 8 for LCM Dreamshaper].
    #[arg(long)]
    pub steps: Option<usize>,

    /// Seed for random number generation. Random when omitted; 0 is used as a seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// The path to the image to be used as a base (image-to-image).
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// How much of the base image gets re-noised, in (0, 1] [default: 0.75].
    #[arg(long)]
    pub strength: Option<f64>,

    /// Classifier-free guidance scale, off at 1.0 or below [default: 1.0 for LCM Dreamshaper].
    #[arg(long)]
    pub guidance_scale: Option<f64>,

    /// Enable continuous generation, feeding every image back as the next base.
    #[arg(long)]
    pub continuous: bool,

    /// Store an html page showing the latest image.
    #[arg(long)]
    pub html: bool,

    /// Read prompts from a file, one per line.
    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    /// Hugging Face model repository.
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Use CPU instead of GPU.
    #[arg(long)]
    pub cpu: bool,

    /// Directory the images are written to.
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Output file naming: `timestamp` or `descriptive`.
    #[arg(long, default_value_t = NamingScheme::Timestamp)]
    pub naming: NamingScheme,
}

impl Args {
    /// The positional prompt followed by every prompt in `--prompt-file`.
    pub fn prompts(&self) -> Result<Vec<String>> {
        let mut prompts: Vec<String> = self
            .prompt
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if let Some(path) = &self.prompt_file {
            prompts.extend(read_prompt_file(path)?);
        }
        Ok(prompts)
    }

    pub fn device_map(&self) -> DeviceMap {
        DeviceMap::from_cpu_flag(self.cpu)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            width: self.width,
            height: self.height,
            steps: self.steps,
            seed: self.seed,
            guidance: self.guidance_scale,
            strength: self.strength,
            image: self.image.clone(),
            html: self.html,
        }
    }
}

/// Non-empty lines of `path`; lines starting with `#` are comments.
pub fn read_prompt_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt file {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
