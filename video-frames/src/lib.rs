/// Registers FFmpeg components. Call once at startup, before any worker thread
/// opens a video.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod align;
pub mod decoder;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
pub mod frame;
pub mod input;
pub mod packet;
pub mod sampler;
pub mod scaler;
pub mod stream;
pub mod transform;

pub use align::{TEMPORAL_COMPRESSION, align_frame_count};
pub use sampler::{SampleRequest, sample_frames};
pub use transform::FrameSize;
