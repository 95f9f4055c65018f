use ffmpeg_next::{Rational, codec, format::Pixel, util::error::EAGAIN};

use crate::{frame::RawVideoFrame, packet::DemuxedPacket, stream::StreamInfo};

/// Video decoder bound to one stream of a [`VideoSource`](crate::input::VideoSource).
pub struct FrameDecoder {
    stream_index: usize,
    inner: codec::decoder::Video,
    time_base: Rational,
}

impl FrameDecoder {
    pub fn new(stream: &StreamInfo) -> anyhow::Result<Self> {
        if !stream.is_video() {
            anyhow::bail!("stream {} is not video", stream.index());
        }

        let mut context = codec::Context::new();
        unsafe {
            (*context.as_mut_ptr()).time_base = stream.time_base().into();
        }
        context.set_parameters(stream.parameters().clone())?;

        let video = context.decoder().video()?;
        if video.format() == Pixel::None || video.width() == 0 || video.height() == 0 {
            anyhow::bail!("stream {} has incomplete codec parameters", stream.index());
        }
        let time_base = video.time_base();

        Ok(Self {
            stream_index: stream.index(),
            inner: video,
            time_base,
        })
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn send_packet(&mut self, packet: DemuxedPacket) -> anyhow::Result<()> {
        let packet = packet.rescaled(self.time_base);
        self.inner.send_packet(&packet)?;
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        Ok(())
    }

    /// Next decoded frame; `None` when the decoder wants more input or is
    /// fully drained.
    pub fn receive_frame(&mut self) -> anyhow::Result<Option<RawVideoFrame>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(RawVideoFrame::from(frame))),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
