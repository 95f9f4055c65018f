use std::path::Path;

use ffmpeg_next::{format::context::Input, media};

use crate::{packet::DemuxedPacket, stream::StreamInfo};

/// Demuxer over a local video file.
pub struct VideoSource {
    inner: Input,
}

impl VideoSource {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let inner = ffmpeg_next::format::input(path)
            .map_err(|e| anyhow::anyhow!("open {}: {}", path.display(), e))?;
        Ok(Self { inner })
    }

    /// The stream FFmpeg ranks first for video (`av_find_best_stream`).
    pub fn best_video_stream(&self) -> Option<StreamInfo> {
        self.inner
            .streams()
            .best(media::Type::Video)
            .map(StreamInfo::from)
    }

    /// Next packet in file order, or `None` at end of file.
    pub fn read_packet(&mut self) -> Option<DemuxedPacket> {
        self.inner
            .packets()
            .next()
            .map(|(stream, packet)| DemuxedPacket::new(packet, stream.time_base()))
    }
}
