//! Diagonal Gaussian posterior over the latent.

use ndarray::{Array5, Axis, Zip, s};
use rand::Rng;
use rand_distr::StandardNormal;

const LOGVAR_MIN: f32 = -30.0;
const LOGVAR_MAX: f32 = 20.0;

#[derive(Debug, Clone)]
pub struct Posterior {
    mean: Array5<f32>,
    logvar: Array5<f32>,
}

impl Posterior {
    /// Splits encoder moments `(N, 2C, T, H, W)` into mean and log-variance.
    pub fn from_moments(moments: Array5<f32>) -> anyhow::Result<Self> {
        let channels = moments.len_of(Axis(1));
        if channels == 0 || channels % 2 != 0 {
            anyhow::bail!(
                "encoder moments need an even channel count, got shape {:?}",
                moments.shape()
            );
        }
        let half = channels / 2;
        let mean = moments.slice(s![.., ..half, .., .., ..]).to_owned();
        let logvar = moments
            .slice(s![.., half.., .., .., ..])
            .mapv(|v| v.clamp(LOGVAR_MIN, LOGVAR_MAX));
        Ok(Self { mean, logvar })
    }

    pub fn mode(self) -> Array5<f32> {
        self.mean
    }

    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R) -> Array5<f32> {
        let mut latent = self.mean;
        Zip::from(&mut latent)
            .and(&self.logvar)
            .for_each(|m, &logvar| {
                let eps: f32 = rng.sample(StandardNormal);
                *m += (0.5 * logvar).exp() * eps;
            });
        latent
    }
}
