//! Synthetic clips for tests.
//!
//! Every frame is flat gray and its luma steps with the frame index, so a
//! decoded pixel tells which frame it came from. Clips are FFV1, which is
//! lossless.

use std::path::Path;

use ffmpeg_next::{Dictionary, Packet, Rational, codec, encoder, format, frame};

const FPS: i32 = 10;

/// Luma written for frame `index`.
pub fn gray_level(index: usize) -> u8 {
    (20 + index * 7).min(235) as u8
}

/// What frame `index` reads back as after RGB conversion and normalization
/// to `[-1, 1]` (limited-range luma expanded to full range).
pub fn normalized_level(index: usize) -> f32 {
    let rgb = ((gray_level(index) as f32 - 16.0) * 255.0 / 219.0)
        .round()
        .clamp(0.0, 255.0);
    rgb / 127.5 - 1.0
}

/// Writes `frames` frames of `width`x`height` to `path`. The container
/// follows the extension; `.mkv` is known to work. `frames == 0` gives a
/// file with a video stream and no packets.
pub fn write_gray_clip(path: &Path, frames: usize, width: u32, height: u32) -> anyhow::Result<()> {
    let codec = encoder::find(codec::Id::FFV1)
        .ok_or_else(|| anyhow::anyhow!("ffv1 encoder not available"))?;
    let mut output = format::output(path)
        .map_err(|e| anyhow::anyhow!("create {}: {}", path.display(), e))?;
    let global_header = output
        .format()
        .flags()
        .contains(format::Flags::GLOBAL_HEADER);

    let time_base = Rational::new(1, FPS);
    let mut video = codec::Context::new_with_codec(codec).encoder().video()?;
    video.set_width(width);
    video.set_height(height);
    video.set_format(format::Pixel::YUV420P);
    video.set_time_base(time_base);
    video.set_frame_rate(Some(Rational::new(FPS, 1)));
    if global_header {
        video.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = video.open_with(Dictionary::new())?;

    let stream_index = {
        let mut stream = output.add_stream(codec)?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);
        stream.index()
    };
    output.write_header()?;
    let stream_time_base = output
        .stream(stream_index)
        .ok_or_else(|| anyhow::anyhow!("stream {} vanished", stream_index))?
        .time_base();

    let mut picture = frame::Video::new(format::Pixel::YUV420P, width, height);
    for index in 0..frames {
        picture.data_mut(0).fill(gray_level(index));
        picture.data_mut(1).fill(128);
        picture.data_mut(2).fill(128);
        picture.set_pts(Some(index as i64));
        encoder.send_frame(&picture)?;
        mux_packets(&mut encoder, &mut output, stream_index, time_base, stream_time_base)?;
    }
    encoder.send_eof()?;
    mux_packets(&mut encoder, &mut output, stream_index, time_base, stream_time_base)?;
    output.write_trailer()?;
    Ok(())
}

fn mux_packets(
    encoder: &mut encoder::Video,
    output: &mut format::context::Output,
    stream_index: usize,
    from: Rational,
    to: Rational,
) -> anyhow::Result<()> {
    let mut packet = Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(from, to);
        packet.write_interleaved(output)?;
    }
    Ok(())
}
