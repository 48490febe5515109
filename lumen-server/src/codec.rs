//! Moving images in and out of JSON bodies.

use std::io::Cursor;

use anyhow::Result;
use base64::{prelude::BASE64_STANDARD, Engine};
use image::{DynamicImage, ImageFormat};

use crate::error::ApiError;

/// Largest input image accepted from a URL.
pub const MAX_DOWNLOAD_BYTES: usize = 32 * 1024 * 1024;

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64_STANDARD.encode(png))
}

/// Decodes the payload of a base64 `data:` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, ApiError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| ApiError::InvalidInput("image is not a data URI".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| ApiError::InvalidInput("malformed data URI".to_string()))?;
    if !meta.ends_with(";base64") {
        return Err(ApiError::InvalidInput(
            "only base64 data URIs are supported".to_string(),
        ));
    }
    BASE64_STANDARD
        .decode(payload.trim())
        .map_err(|e| ApiError::InvalidInput(format!("invalid base64 in data URI: {e}")))
}

/// Resolves the `image` input, either inline as a data URI or fetched over http(s).
pub async fn load_input_image(
    http: &reqwest::Client,
    source: &str,
) -> Result<DynamicImage, ApiError> {
    let bytes = if source.starts_with("data:") {
        decode_data_uri(source)?
    } else if source.starts_with("http://") || source.starts_with("https://") {
        fetch(http, source, MAX_DOWNLOAD_BYTES)
            .await
            .map_err(|e| ApiError::InvalidInput(format!("failed to download {source}: {e:#}")))?
    } else {
        return Err(ApiError::InvalidInput(
            "image must be a data URI or an http(s) URL".to_string(),
        ));
    };
    image::load_from_memory(&bytes)
        .map_err(|e| ApiError::InvalidInput(format!("failed to decode image: {e}")))
}

async fn fetch(http: &reqwest::Client, url: &str, limit: usize) -> Result<Vec<u8>> {
    let mut response = http.get(url).send().await?.error_for_status()?;
    if let Some(len) = response.content_length() {
        anyhow::ensure!(
            len <= limit as u64,
            "image is {len} bytes, the limit is {limit}"
        );
    }
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        bytes.extend_from_slice(&chunk);
        anyhow::ensure!(bytes.len() <= limit, "image exceeds {limit} bytes");
    }
    Ok(bytes)
}
