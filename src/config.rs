//! Command-line flags and their validated form.

use std::path::PathBuf;

use clap::Parser;
use video_frames::{FrameSize, TEMPORAL_COMPRESSION};

use crate::dataset::LoaderConfig;
use crate::dist::ProcessGroup;
use crate::encode::{EncodeOptions, Precision, SPATIAL_COMPRESSION};

#[derive(Debug, Clone, Parser)]
#[command(name = "latent-extract", version, about = "Encode videos into VAE latents")]
pub struct Args {
    /// JSON-lines manifest of {"video", "latent", "frames"?} entries.
    #[arg(long)]
    pub anno_file: PathBuf,

    /// ONNX export of the video VAE encoder.
    #[arg(long)]
    pub model_path: PathBuf,

    /// Model and storage precision: fp32, fp16 or bf16.
    #[arg(long, default_value = "bf16")]
    pub model_dtype: Precision,

    #[arg(long, default_value_t = 640)]
    pub width: u32,

    #[arg(long, default_value_t = 384)]
    pub height: u32,

    /// Frame budget per video before temporal alignment.
    #[arg(long, default_value_t = 121)]
    pub num_frames: usize,

    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 6)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 2)]
    pub prefetch_batches: usize,

    /// Concurrent latent writes.
    #[arg(long, default_value_t = 16)]
    pub max_writers: usize,

    #[arg(long, default_value_t = 16)]
    pub window_size: usize,

    #[arg(long)]
    pub no_temporal_chunk: bool,

    #[arg(long, default_value_t = 256)]
    pub tile_min_size: usize,

    /// Encode in spatial tiles.
    #[arg(long)]
    pub save_memory: bool,

    /// Store the posterior mean instead of a sample.
    #[arg(long)]
    pub no_sample: bool,

    /// Seed for posterior sampling.
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, env = "RANK", default_value_t = 0)]
    pub rank: usize,

    #[arg(long, env = "WORLD_SIZE", default_value_t = 1)]
    pub world_size: usize,

    /// Device index for this process.
    #[arg(long, env = "LOCAL_RANK", default_value_t = 0)]
    pub local_rank: usize,

    /// Directory shared by all ranks for barriers.
    #[arg(long, env = "RENDEZVOUS_DIR")]
    pub rendezvous_dir: Option<PathBuf>,

    #[arg(long, default_value = "default")]
    pub run_id: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--{0} must be at least 1")]
    Zero(&'static str),
    #[error("--width and --height must be multiples of 8, got {0}x{1}")]
    Unaligned(u32, u32),
    #[error("--tile-min-size must be a multiple of 8, got {0}")]
    UnalignedTile(usize),
    #[error("--local-rank {0} does not fit a device id")]
    DeviceId(usize),
}

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub anno_file: PathBuf,
    pub model_path: PathBuf,
    pub precision: Precision,
    pub frame_size: FrameSize,
    pub frame_budget: usize,
    pub loader: LoaderConfig,
    pub max_writers: usize,
    pub encode: EncodeOptions,
    pub save_memory: bool,
    pub seed: Option<u64>,
    pub device_id: i32,
    pub rank: usize,
    pub world_size: usize,
    pub rendezvous_dir: Option<PathBuf>,
    pub run_id: String,
}

impl ExtractConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("num-frames", args.num_frames),
            ("batch-size", args.batch_size),
            ("num-workers", args.num_workers),
            ("prefetch-batches", args.prefetch_batches),
            ("max-writers", args.max_writers),
            ("window-size", args.window_size),
            ("world-size", args.world_size),
            ("width", args.width as usize),
            ("height", args.height as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        let factor = SPATIAL_COMPRESSION as u32;
        if args.width % factor != 0 || args.height % factor != 0 {
            return Err(ConfigError::Unaligned(args.width, args.height));
        }
        if args.tile_min_size < SPATIAL_COMPRESSION
            || args.tile_min_size % SPATIAL_COMPRESSION != 0
        {
            return Err(ConfigError::UnalignedTile(args.tile_min_size));
        }
        let device_id =
            i32::try_from(args.local_rank).map_err(|_| ConfigError::DeviceId(args.local_rank))?;

        if args.num_frames % TEMPORAL_COMPRESSION != 1 {
            log::warn!(
                "--num-frames {} is not k*{}+1; clips are cut to {}",
                args.num_frames,
                TEMPORAL_COMPRESSION,
                video_frames::align_frame_count(args.num_frames).unwrap_or(0)
            );
        }

        Ok(Self {
            anno_file: args.anno_file,
            model_path: args.model_path,
            precision: args.model_dtype,
            frame_size: FrameSize::new(args.width, args.height),
            frame_budget: args.num_frames,
            loader: LoaderConfig {
                batch_size: args.batch_size,
                num_workers: args.num_workers,
                prefetch_batches: args.prefetch_batches,
            },
            max_writers: args.max_writers,
            encode: EncodeOptions {
                sample: !args.no_sample,
                window_size: args.window_size,
                temporal_chunk: !args.no_temporal_chunk,
                tile_min_size: args.tile_min_size,
            },
            save_memory: args.save_memory,
            seed: args.seed,
            device_id,
            rank: args.rank,
            world_size: args.world_size,
            rendezvous_dir: args.rendezvous_dir,
            run_id: args.run_id,
        })
    }

    pub fn process_group(&self) -> anyhow::Result<ProcessGroup> {
        ProcessGroup::new(
            self.rank,
            self.world_size,
            self.rendezvous_dir.clone(),
            &self.run_id,
        )
    }
}
