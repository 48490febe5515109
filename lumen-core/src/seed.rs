//! Seed selection and host-side Gaussian noise.
//!
//! Latent noise is drawn on the host from a seeded [`StdRng`] and then moved to
//! the target device, so one seed yields the same starting latents on CPU, CUDA
//! and Metal.

use std::f32::consts::TAU;

use candle_core::{Device, Result, Shape, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Returns `seed`, or a fresh random 16-bit seed when none was requested.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| rand::random::<u16>() as u64)
}

/// Standard normal samples via the Box-Muller transform.
pub struct SeededNoise {
    rng: StdRng,
    spare: Option<f32>,
}

impl SeededNoise {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            spare: None,
        }
    }

    pub fn sample(&mut self) -> f32 {
        if let Some(value) = self.spare.take() {
            return value;
        }
        // `random` yields [0, 1); shift to (0, 1] so the log stays finite.
        let u1 = 1.0 - self.rng.random::<f32>();
        let u2 = self.rng.random::<f32>();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = TAU * u2;
        self.spare = Some(radius * angle.sin());
        radius * angle.cos()
    }

    /// An f32 tensor of standard normal samples placed on `device`.
    pub fn tensor<S: Into<Shape>>(&mut self, shape: S, device: &Device) -> Result<Tensor> {
        let shape = shape.into();
        let data: Vec<f32> = (0..shape.elem_count()).map(|_| self.sample()).collect();
        Tensor::from_vec(data, shape, &Device::Cpu)?.to_device(device)
    }
}
