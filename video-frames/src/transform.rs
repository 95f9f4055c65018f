//! Frame geometry and value normalization ahead of encoding.

use image::{
    ImageBuffer, Rgb,
    imageops::{self, FilterType},
};
use ndarray::Array4;

use crate::frame::RgbFrame;

/// Per-channel mean and std applied after scaling pixels to `[0, 1]`, which
/// maps them onto `[-1, 1]`.
pub const NORM_MEAN: f32 = 0.5;
pub const NORM_STD: f32 = 0.5;

type Rgb32FImage = ImageBuffer<Rgb<f32>, Vec<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Size that `src` scales to so it covers `target` with its aspect ratio kept.
///
/// The scale is `max(target.w / src.w, target.h / src.h)`; at least one side
/// matches the target and the other overhangs it.
pub fn cover_size(src: FrameSize, target: FrameSize) -> FrameSize {
    let scale = f64::max(
        target.width as f64 / src.width as f64,
        target.height as f64 / src.height as f64,
    );
    let width = (src.width as f64 * scale).round_ties_even() as u32;
    let height = (src.height as f64 * scale).round_ties_even() as u32;
    FrameSize {
        width: width.max(target.width),
        height: height.max(target.height),
    }
}

/// Top-left corner `(left, top)` of a `target` sized window centered in `src`.
pub fn center_crop_origin(src: FrameSize, target: FrameSize) -> (u32, u32) {
    let left = (src.width.saturating_sub(target.width) as f64 / 2.0).round_ties_even() as u32;
    let top = (src.height.saturating_sub(target.height) as f64 / 2.0).round_ties_even() as u32;
    (left, top)
}

/// Bicubic scale-to-cover followed by a center crop to exactly `target`.
fn resize_cover_crop(image: &Rgb32FImage, target: FrameSize) -> Rgb32FImage {
    let src = FrameSize::new(image.width(), image.height());
    let covered = cover_size(src, target);
    let resized = imageops::resize(
        image,
        covered.width,
        covered.height,
        FilterType::CatmullRom,
    );
    let (left, top) = center_crop_origin(covered, target);
    imageops::crop_imm(&resized, left, top, target.width, target.height).to_image()
}

fn to_unit_image(frame: &RgbFrame) -> Rgb32FImage {
    ImageBuffer::from_fn(frame.width, frame.height, |x, y| {
        let [r, g, b] = frame.pixel(x, y);
        Rgb([r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0])
    })
}

/// Stacks frames into a `(C, T, H, W)` tensor normalized to `[-1, 1]`.
///
/// With `resize` set, every frame is scaled to cover the target and center
/// cropped; otherwise the source size is kept. All frames must share one size.
pub fn frames_to_tensor(
    frames: &[RgbFrame],
    resize: Option<FrameSize>,
) -> anyhow::Result<Array4<f32>> {
    let first = frames
        .first()
        .ok_or_else(|| anyhow::anyhow!("no frames to stack"))?;
    let src = FrameSize::new(first.width, first.height);
    if src.width == 0 || src.height == 0 {
        anyhow::bail!("invalid frame size {}x{}", src.width, src.height);
    }
    let out = resize.unwrap_or(src);
    if out.width == 0 || out.height == 0 {
        anyhow::bail!("invalid target size {}x{}", out.width, out.height);
    }

    let mut tensor = Array4::<f32>::zeros((3, frames.len(), out.height as usize, out.width as usize));
    for (t, frame) in frames.iter().enumerate() {
        if frame.width != src.width || frame.height != src.height {
            anyhow::bail!(
                "frame {} is {}x{}, expected {}x{}",
                t,
                frame.width,
                frame.height,
                src.width,
                src.height
            );
        }
        let image = to_unit_image(frame);
        let image = if out != src {
            resize_cover_crop(&image, out)
        } else {
            image
        };
        for (x, y, px) in image.enumerate_pixels() {
            for c in 0..3 {
                tensor[[c, t, y as usize, x as usize]] = (px[c] - NORM_MEAN) / NORM_STD;
            }
        }
    }

    Ok(tensor)
}
