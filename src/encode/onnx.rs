//! [`VideoEncoder`] backed by an ONNX export of the causal video VAE encoder.
//!
//! The graph takes one clip `(1, 3, t, h, w)` and, when it declares one, a
//! boolean `is_init` input marking the first temporal window. It returns the
//! posterior moments `(1, 2C, t', h / 8, w / 8)`.

use std::fmt::Debug;
use std::path::Path;

use half::{bf16, f16};
use ndarray::{Array5, ArrayD, ArrayView5, Ix5, IxDyn, arr1};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::tensor::PrimitiveTensorElementType;
use ort::value::Value;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::plan::{ChunkModel, encode_moments};
use super::posterior::Posterior;
use super::{EncodeOptions, Precision, VideoEncoder};

const VIDEO_INPUT: &str = "video";
const IS_INIT_INPUT: &str = "is_init";

/// Element types the encoder graph can be exported with.
trait ModelElement: PrimitiveTensorElementType + Debug + Clone + Copy + 'static {
    fn from_f32(v: f32) -> Self;
    fn to_f32(self) -> f32;
}

impl ModelElement for f32 {
    fn from_f32(v: f32) -> Self {
        v
    }
    fn to_f32(self) -> f32 {
        self
    }
}

impl ModelElement for f16 {
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
}

impl ModelElement for bf16 {
    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }
}

/// The loaded graph plus what is needed to feed it.
struct OnnxModel {
    session: Session,
    precision: Precision,
    input_name: String,
    has_is_init: bool,
}

pub struct OnnxVideoEncoder {
    model: OnnxModel,
    tiling: bool,
    rng: StdRng,
}

impl OnnxVideoEncoder {
    /// Loads the model on CUDA device `device_id`, falling back to CPU.
    /// `seed` fixes the posterior noise; without it the noise is seeded from
    /// the OS.
    pub fn load(
        model_path: &Path,
        device_id: i32,
        precision: Precision,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        log::info!(
            "loading encoder {} on device {} ({})",
            model_path.display(),
            device_id,
            precision
        );
        let session = Session::builder()
            .map_err(|e| anyhow::anyhow!("session builder: {}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow::anyhow!("session optimization level: {}", e))?
            .with_execution_providers([
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ])
            .map_err(|e| anyhow::anyhow!("session execution providers: {}", e))?
            .commit_from_file(model_path)
            .map_err(|e| anyhow::anyhow!("load model {}: {}", model_path.display(), e))?;

        let names = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect::<Vec<_>>();
        let input_name = if names.iter().any(|n| n == VIDEO_INPUT) {
            VIDEO_INPUT.to_string()
        } else {
            names
                .iter()
                .find(|n| n.as_str() != IS_INIT_INPUT)
                .cloned()
                .ok_or_else(|| {
                    anyhow::anyhow!("model {} has no video input", model_path.display())
                })?
        };
        let has_is_init = names.iter().any(|n| n == IS_INIT_INPUT);
        log::debug!("encoder inputs {:?}, video input {}", names, input_name);

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            model: OnnxModel {
                session,
                precision,
                input_name,
                has_is_init,
            },
            tiling: false,
            rng,
        })
    }
}

impl ChunkModel for OnnxModel {
    fn run_chunk(
        &mut self,
        chunk: ArrayView5<'_, f32>,
        is_init: bool,
    ) -> anyhow::Result<Array5<f32>> {
        match self.precision {
            Precision::Full => self.run_typed::<f32>(chunk, is_init),
            Precision::Half => self.run_typed::<f16>(chunk, is_init),
            Precision::Bf16 => self.run_typed::<bf16>(chunk, is_init),
        }
    }
}

impl OnnxModel {
    fn run_typed<T: ModelElement>(
        &mut self,
        chunk: ArrayView5<'_, f32>,
        is_init: bool,
    ) -> anyhow::Result<Array5<f32>> {
        let input = Value::from_array(chunk.mapv(T::from_f32))
            .map_err(|e| anyhow::anyhow!("build input tensor: {}", e))?;
        let result = if self.has_is_init {
            let flag = Value::from_array(arr1(&[is_init]))
                .map_err(|e| anyhow::anyhow!("build is_init tensor: {}", e))?;
            self.session.run(ort::inputs![
                self.input_name.as_str() => input,
                IS_INIT_INPUT => flag,
            ])
        } else {
            self.session
                .run(ort::inputs![self.input_name.as_str() => input])
        };
        let outputs = result.map_err(|e| anyhow::anyhow!("encoder inference: {}", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<T>()
            .map_err(|e| anyhow::anyhow!("extract encoder output: {}", e))?;
        let dims = shape.iter().map(|&d| d as usize).collect::<Vec<_>>();
        let values = data.iter().map(|&v| v.to_f32()).collect::<Vec<_>>();
        ArrayD::from_shape_vec(IxDyn(&dims), values)
            .map_err(|e| anyhow::anyhow!("encoder output shape {:?}: {}", dims, e))?
            .into_dimensionality::<Ix5>()
            .map_err(|e| anyhow::anyhow!("encoder output is not 5-d: {}", e))
    }
}

impl VideoEncoder for OnnxVideoEncoder {
    fn encode(
        &mut self,
        video: ArrayView5<'_, f32>,
        options: &EncodeOptions,
    ) -> anyhow::Result<Array5<f32>> {
        let moments = encode_moments(&mut self.model, video, self.tiling, options)?;
        let posterior = Posterior::from_moments(moments)?;
        Ok(if options.sample {
            posterior.sample(&mut self.rng)
        } else {
            posterior.mode()
        })
    }

    fn enable_memory_saving_mode(&mut self) {
        self.tiling = true;
    }
}
