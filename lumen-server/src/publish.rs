use anyhow::Result;
use image::DynamicImage;
use reqwest::header::CONTENT_TYPE;
use tracing::info;

use crate::codec::{encode_png, png_data_uri};

/// Where finished images go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Returned inline as a data URI.
    Inline,
    /// PUT to `{url}/{file name}`; the response carries the uploaded location.
    Upload { url: String },
}

impl OutputSink {
    pub fn from_upload_url(url: Option<String>) -> Self {
        match url {
            Some(url) if !url.trim().is_empty() => Self::Upload { url },
            _ => Self::Inline,
        }
    }

    pub async fn publish(
        &self,
        http: &reqwest::Client,
        image: &DynamicImage,
        file_name: &str,
    ) -> Result<String> {
        let png = encode_png(image)?;
        match self {
            Self::Inline => Ok(png_data_uri(&png)),
            Self::Upload { url } => {
                let target = format!("{}/{}", url.trim_end_matches('/'), file_name);
                let response = http
                    .put(&target)
                    .header(CONTENT_TYPE, "image/png")
                    .body(png)
                    .send()
                    .await?
                    .error_for_status()?;
                let mut location = response.url().clone();
                location.set_query(None);
                info!("uploaded output to {}", location);
                Ok(location.to_string())
            }
        }
    }
}
