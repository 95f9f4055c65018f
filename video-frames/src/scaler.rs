use ffmpeg_next::{
    format::Pixel,
    software::scaling::{Context, Flags},
};

use crate::frame::{RawVideoFrame, RgbFrame};

/// Converts decoded frames of any pixel format to packed RGB24 at their native
/// size. The swscale context is rebuilt whenever the source format or size
/// changes mid-stream.
pub struct Scaler {
    context: Option<(ScalerKey, Context)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct ScalerKey {
    format: Pixel,
    width: u32,
    height: u32,
}

impl Scaler {
    pub fn new() -> Self {
        Self { context: None }
    }

    pub fn to_rgb(&mut self, frame: &RawVideoFrame) -> anyhow::Result<RgbFrame> {
        let key = ScalerKey {
            format: frame.format(),
            width: frame.width(),
            height: frame.height(),
        };
        if frame.format() == Pixel::RGB24 {
            return RgbFrame::from_rgb24(frame.as_video());
        }

        let stale = !matches!(&self.context, Some((k, _)) if *k == key);
        if stale {
            let context = Context::get(
                key.format,
                key.width,
                key.height,
                Pixel::RGB24,
                key.width,
                key.height,
                Flags::BICUBIC,
            )?;
            self.context = Some((key, context));
        }

        let (_, context) = self
            .context
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("scaler context missing"))?;
        let mut rgb = ffmpeg_next::frame::Video::empty();
        context.run(frame.as_video(), &mut rgb)?;
        RgbFrame::from_rgb24(&rgb)
    }
}

impl Default for Scaler {
    fn default() -> Self {
        Self::new()
    }
}
