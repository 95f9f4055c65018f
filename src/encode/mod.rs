//! Encoding orchestration: one item at a time through a [`VideoEncoder`],
//! then a cast into the storage precision on the host.
//!
//! ```text
//! EncodeItem (1, 3, T, H, W) ─► temporal windows ─► [spatial tiles] ─► moments
//!                                                                        │
//!                                        Latent (cast) ◄─ mean / sample ◄┘
//! ```

pub mod onnx;
pub mod plan;
pub mod posterior;

use std::fmt;
use std::str::FromStr;

use half::{bf16, f16};
use ndarray::{Array5, ArrayView5};

use crate::dataset::EncodeItem;

pub use onnx::OnnxVideoEncoder;

/// Spatial downsampling of the encoder, per side.
pub const SPATIAL_COMPRESSION: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Draw from the posterior instead of taking its mean.
    pub sample: bool,
    pub window_size: usize,
    pub temporal_chunk: bool,
    /// Spatial size above which memory-saving mode splits frames into tiles.
    pub tile_min_size: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            sample: true,
            window_size: 16,
            temporal_chunk: true,
            tile_min_size: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    Full,
    Half,
    #[default]
    Bf16,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown precision {0:?} (expected fp32, fp16 or bf16)")]
pub struct UnknownPrecision(String);

impl FromStr for Precision {
    type Err = UnknownPrecision;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fp32" | "full" => Ok(Precision::Full),
            "fp16" | "half" => Ok(Precision::Half),
            "bf16" => Ok(Precision::Bf16),
            _ => Err(UnknownPrecision(s.to_string())),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Precision::Full => "fp32",
            Precision::Half => "fp16",
            Precision::Bf16 => "bf16",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LatentData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
}

/// Encoder output in host memory, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Latent {
    pub shape: Vec<usize>,
    pub data: LatentData,
}

impl Latent {
    pub fn from_array(array: ArrayView5<'_, f32>, precision: Precision) -> Self {
        let shape = array.shape().to_vec();
        let data = match precision {
            Precision::Full => LatentData::F32(array.iter().copied().collect()),
            Precision::Half => LatentData::F16(array.iter().map(|&v| f16::from_f32(v)).collect()),
            Precision::Bf16 => {
                LatentData::BF16(array.iter().map(|&v| bf16::from_f32(v)).collect())
            }
        };
        Self { shape, data }
    }

    pub fn precision(&self) -> Precision {
        match self.data {
            LatentData::F32(_) => Precision::Full,
            LatentData::F16(_) => Precision::Half,
            LatentData::BF16(_) => Precision::Bf16,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            LatentData::F32(v) => v.len(),
            LatentData::F16(v) => v.len(),
            LatentData::BF16(v) => v.len(),
        }
    }

    /// Little-endian bytes of the elements.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.data {
            LatentData::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            LatentData::F16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            LatentData::BF16(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }

    pub fn to_f32(&self) -> Vec<f32> {
        match &self.data {
            LatentData::F32(v) => v.clone(),
            LatentData::F16(v) => v.iter().map(|x| x.to_f32()).collect(),
            LatentData::BF16(v) => v.iter().map(|x| x.to_f32()).collect(),
        }
    }
}

/// The device-side encoder. Implementations hold the model and whatever
/// device state it needs; calls are never concurrent.
pub trait VideoEncoder: Send {
    /// Encodes a `(1, 3, T, H, W)` clip in `[-1, 1]` into a latent
    /// `(1, C, T', H', W')`.
    fn encode(
        &mut self,
        video: ArrayView5<'_, f32>,
        options: &EncodeOptions,
    ) -> anyhow::Result<Array5<f32>>;

    /// Switches to spatially tiled encoding.
    fn enable_memory_saving_mode(&mut self);
}

pub struct EncodeOrchestrator<E> {
    encoder: E,
    options: EncodeOptions,
    precision: Precision,
}

impl<E: VideoEncoder> EncodeOrchestrator<E> {
    pub fn new(mut encoder: E, options: EncodeOptions, precision: Precision, save_memory: bool) -> Self {
        if save_memory {
            encoder.enable_memory_saving_mode();
        }
        log::info!(
            "encoder ready: precision {}, window {} (chunked: {}), tile {}, sample {}, save memory {}",
            precision,
            options.window_size,
            options.temporal_chunk,
            options.tile_min_size,
            options.sample,
            save_memory
        );
        Self {
            encoder,
            options,
            precision,
        }
    }

    pub fn encode_item(&mut self, item: &EncodeItem) -> anyhow::Result<Latent> {
        let latent = self.encoder.encode(item.input.view(), &self.options)?;
        log::debug!(
            "encoded {}: {:?} -> {:?}",
            item.source_path.display(),
            item.input.shape(),
            latent.shape()
        );
        Ok(Latent::from_array(latent.view(), self.precision))
    }
}
