//! Decode a video once and keep only the requested frames.
//!
//! Decoding stops as soon as the last requested index (or the frame budget) is
//! reached, so short prefixes of long videos stay cheap. A video that cannot
//! be opened or yields no requested frame is reported as `None`, never as an
//! error.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::Path;

use ndarray::Array4;

use crate::{
    align::cap_and_align,
    decoder::FrameDecoder,
    frame::{RawVideoFrame, RgbFrame},
    input::VideoSource,
    scaler::Scaler,
    transform::{FrameSize, frames_to_tensor},
};

#[derive(Debug, Clone)]
pub struct SampleRequest<'a> {
    /// Frame indices to keep, counted from 0 in decode order.
    pub indices: &'a [usize],
    /// Frame budget applied before temporal alignment.
    pub max_frames: usize,
    /// Output size; `None` keeps the source size.
    pub resize: Option<FrameSize>,
}

/// Samples `request.indices` from `path` into a `(C, T, H, W)` tensor in `[-1, 1]`.
///
/// Any failure is logged and turned into `None`.
pub fn sample_frames(path: &Path, request: &SampleRequest<'_>) -> Option<Array4<f32>> {
    match try_sample_frames(path, request) {
        Ok(Some(tensor)) => Some(tensor),
        Ok(None) => {
            log::info!("empty video {}", path.display());
            None
        }
        Err(e) => {
            log::warn!("loading video {} failed: {:#}", path.display(), e);
            None
        }
    }
}

/// Like [`sample_frames`] but surfaces open/decode failures as errors.
/// `Ok(None)` means the video produced no usable frames.
pub fn try_sample_frames(
    path: &Path,
    request: &SampleRequest<'_>,
) -> anyhow::Result<Option<Array4<f32>>> {
    let Some(&last) = request.indices.iter().max() else {
        return Ok(None);
    };

    let mut frames = collect_frames(path, request.indices, last, request.max_frames)?;
    if !cap_and_align(&mut frames, request.max_frames) {
        return Ok(None);
    }
    frames_to_tensor(&frames, request.resize).map(Some)
}

struct FrameCollector {
    wanted: HashSet<usize>,
    last: usize,
    budget: usize,
    next_index: usize,
    frames: Vec<RgbFrame>,
    scaler: Scaler,
}

impl FrameCollector {
    fn new(wanted: &[usize], last: usize, budget: usize) -> Self {
        Self {
            wanted: wanted.iter().copied().collect(),
            last,
            budget,
            next_index: 0,
            frames: Vec::new(),
            scaler: Scaler::new(),
        }
    }

    fn push(&mut self, frame: RawVideoFrame) -> anyhow::Result<ControlFlow<()>> {
        let index = self.next_index;
        if index > self.last || self.frames.len() >= self.budget {
            return Ok(ControlFlow::Break(()));
        }
        self.next_index += 1;

        if self.wanted.contains(&index) {
            self.frames.push(self.scaler.to_rgb(&frame)?);
        }

        if index >= self.last || self.frames.len() >= self.budget {
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }

    fn finish(self) -> Vec<RgbFrame> {
        self.frames
    }
}

fn collect_frames(
    path: &Path,
    wanted: &[usize],
    last: usize,
    budget: usize,
) -> anyhow::Result<Vec<RgbFrame>> {
    let mut input = VideoSource::open(path)?;
    let stream = input
        .best_video_stream()
        .ok_or_else(|| anyhow::anyhow!("no video stream in {}", path.display()))?;
    let mut decoder = FrameDecoder::new(&stream)?;
    let mut collector = FrameCollector::new(wanted, last, budget);

    while let Some(packet) = input.read_packet() {
        if packet.stream_index() != decoder.stream_index() {
            continue;
        }
        // a packet the decoder rejects ends the readable part of the file
        if let Err(e) = decoder.send_packet(packet) {
            log::debug!("{}: send packet error: {:#}", path.display(), e);
            return Ok(collector.finish());
        }
        if drain_decoder(path, &mut decoder, &mut collector)?.is_break() {
            return Ok(collector.finish());
        }
    }

    if let Err(e) = decoder.send_eof() {
        log::debug!("{}: decoder send eof error: {:#}", path.display(), e);
        return Ok(collector.finish());
    }
    drain_decoder(path, &mut decoder, &mut collector)?;
    Ok(collector.finish())
}

fn drain_decoder(
    path: &Path,
    decoder: &mut FrameDecoder,
    collector: &mut FrameCollector,
) -> anyhow::Result<ControlFlow<()>> {
    loop {
        match decoder.receive_frame() {
            Ok(Some(frame)) => {
                if collector.push(frame)?.is_break() {
                    return Ok(ControlFlow::Break(()));
                }
            }
            Ok(None) => return Ok(ControlFlow::Continue(())),
            Err(e) => {
                log::debug!("{}: receive frame error: {:#}", path.display(), e);
                return Ok(ControlFlow::Break(()));
            }
        }
    }
}

#[cfg(test)]
#[path = "sampler_test.rs"]
mod sampler_test;
