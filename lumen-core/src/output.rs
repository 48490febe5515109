//! Output file naming and persistence.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::ImageFormat;
use thiserror::Error;
use tracing::debug;

use crate::{Prediction, ResolvedRequest};

const MAX_PROMPT_CHARS: usize = 64;
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingScheme {
    /// `out-20240131-235959.png`
    #[default]
    Timestamp,
    /// `20240131-235959-a_red_barn-1234-512x512-8.png`
    Descriptive,
}

#[derive(Debug, Error)]
#[error("unknown naming scheme `{0}`, expected `timestamp` or `descriptive`")]
pub struct UnknownNamingScheme(String);

impl FromStr for NamingScheme {
    type Err = UnknownNamingScheme;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "timestamp" => Ok(Self::Timestamp),
            "descriptive" => Ok(Self::Descriptive),
            _ => Err(UnknownNamingScheme(s.to_string())),
        }
    }
}

impl fmt::Display for NamingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp => f.write_str("timestamp"),
            Self::Descriptive => f.write_str("descriptive"),
        }
    }
}

/// Replaces characters that are unsafe in file names with `_` and caps the length.
pub fn sanitize_prompt(prompt: &str) -> String {
    let replaced: String = prompt
        .chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) || c.is_control() || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .take(MAX_PROMPT_CHARS)
        .collect();
    let trimmed = replaced.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Writes generated images into a directory under a [`NamingScheme`].
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
    naming: NamingScheme,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>, naming: NamingScheme) -> Self {
        Self {
            dir: dir.into(),
            naming,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self, request: &ResolvedRequest, now: DateTime<Local>) -> String {
        let timestamp = now.format("%Y%m%d-%H%M%S");
        match self.naming {
            NamingScheme::Timestamp => format!("out-{timestamp}.png"),
            NamingScheme::Descriptive => format!(
                "{timestamp}-{}-{}-{}x{}-{}.png",
                sanitize_prompt(&request.prompt),
                request.seed,
                request.width,
                request.height,
                request.steps
            ),
        }
    }

    /// Saves the prediction as PNG and returns the path written. Never overwrites
    /// an existing file.
    pub fn save(&self, prediction: &Prediction) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = unique_path(self.dir.join(self.file_name(&prediction.request, Local::now())));
        prediction
            .image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!("wrote {}", path.display());
        Ok(path)
    }

    /// Rewrites `index.html` in the output directory to show `image_path`.
    pub fn write_html_index(&self, image_path: &Path) -> Result<PathBuf> {
        let src = image_path
            .strip_prefix(&self.dir)
            .unwrap_or(image_path)
            .to_string_lossy()
            .replace('&', "&amp;")
            .replace('"', "&quot;")
            .replace('<', "&lt;");
        let index = self.dir.join("index.html");
        std::fs::write(&index, format!("<img src=\"{src}\">"))
            .with_context(|| format!("failed to write {}", index.display()))?;
        Ok(index)
    }
}

fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = path.with_file_name(format!("{stem}-{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenerationMode;
    use chrono::TimeZone;
    use image::{DynamicImage, RgbImage};
    use std::time::Duration;

    fn request(prompt: &str) -> ResolvedRequest {
        ResolvedRequest {
            prompt: prompt.to_string(),
            width: 512,
            height: 768,
            steps: 8,
            guidance: 8.0,
            seed: 4242,
            strength: 0.75,
        }
    }

    fn prediction(prompt: &str) -> Prediction {
        Prediction {
            image: DynamicImage::ImageRgb8(RgbImage::new(8, 8)),
            request: request(prompt),
            mode: GenerationMode::TextToImage,
            elapsed: Duration::from_millis(5),
        }
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 12, 5, 7).unwrap()
    }

    #[test]
    fn timestamp_names() {
        let writer = OutputWriter::new(".", NamingScheme::Timestamp);
        assert_eq!(
            writer.file_name(&request("anything"), noon()),
            "out-20240309-120507.png"
        );
    }

    #[test]
    fn descriptive_names_embed_parameters() {
        let writer = OutputWriter::new(".", NamingScheme::Descriptive);
        assert_eq!(
            writer.file_name(&request("a cat: on/a mat?"), noon()),
            "20240309-120507-a_cat__on_a_mat-4242-512x768-8.png"
        );
    }

    #[test]
    fn sanitizes_forbidden_characters() {
        assert_eq!(sanitize_prompt(r#"a<b>c:d"e/f\g|h?i*j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_prompt("line\nbreak\ttab"), "line_break_tab");
        assert_eq!(sanitize_prompt("  ...  "), "untitled");
        assert_eq!(sanitize_prompt("café crème"), "café_crème");
    }

    #[test]
    fn sanitized_prompt_is_capped() {
        let long = "é".repeat(200);
        assert_eq!(sanitize_prompt(&long).chars().count(), MAX_PROMPT_CHARS);
    }

    #[test]
    fn naming_scheme_parses_case_insensitively() {
        assert_eq!("Descriptive".parse::<NamingScheme>().unwrap(), NamingScheme::Descriptive);
        assert_eq!("timestamp".parse::<NamingScheme>().unwrap(), NamingScheme::Timestamp);
        assert!("prompt".parse::<NamingScheme>().is_err());
    }

    #[test]
    fn save_writes_exactly_one_png_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path().join("nested"), NamingScheme::Timestamp);

        let first = writer.save(&prediction("x")).unwrap();
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("out-") && name.ends_with(".png"), "{name}");
        assert_eq!(image::open(&first).unwrap().width(), 8);

        // A second save within the same second gets a suffixed name.
        let second = writer.save(&prediction("x")).unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn unique_path_appends_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("out.png");
        std::fs::write(&taken, b"").unwrap();
        std::fs::write(dir.path().join("out-1.png"), b"").unwrap();
        assert_eq!(unique_path(taken), dir.path().join("out-2.png"));
    }

    #[test]
    fn html_index_points_at_the_image() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), NamingScheme::Timestamp);
        let index = writer
            .write_html_index(&dir.path().join("out-20240309-120507.png"))
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(index).unwrap(),
            r#"<img src="out-20240309-120507.png">"#
        );
    }
}
