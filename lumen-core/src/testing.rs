//! In-memory pipeline for exercising callers without model weights.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use candle_core::Device;
use image::{DynamicImage, Rgb, RgbImage};

use crate::{GenerationDefaults, ModelLike, ResolvedRequest};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: ResolvedRequest,
    pub with_init_image: bool,
}

/// Returns a solid image of the requested size and records every call.
pub struct SolidColorModel {
    device: Device,
    color: Rgb<u8>,
    calls: Mutex<Vec<RecordedCall>>,
    stop_after: Option<(usize, Arc<AtomicBool>)>,
    fail: bool,
}

impl SolidColorModel {
    pub fn new() -> Self {
        Self {
            device: Device::Cpu,
            color: Rgb([200, 40, 90]),
            calls: Mutex::new(Vec::new()),
            stop_after: None,
            fail: false,
        }
    }

    /// Raises `flag` once `calls` generations have completed.
    pub fn stop_after(mut self, calls: usize, flag: Arc<AtomicBool>) -> Self {
        self.stop_after = Some((calls, flag));
        self
    }

    /// Makes every generation fail.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for SolidColorModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLike for SolidColorModel {
    fn run(
        &self,
        request: &ResolvedRequest,
        init_image: Option<&DynamicImage>,
    ) -> anyhow::Result<DynamicImage> {
        if self.fail {
            anyhow::bail!("pipeline exploded");
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push(RecordedCall {
            request: request.clone(),
            with_init_image: init_image.is_some(),
        });
        if let Some((limit, flag)) = &self.stop_after {
            if calls.len() >= *limit {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            request.width as u32,
            request.height as u32,
            self.color,
        )))
    }

    fn defaults(&self) -> GenerationDefaults {
        GenerationDefaults {
            width: 512,
            height: 512,
            steps: 8,
            guidance: 8.0,
            strength: 0.75,
        }
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
