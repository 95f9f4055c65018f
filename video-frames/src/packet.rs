use ffmpeg_next::{Packet, Rational};

/// A packet read from the container, with the time base its timestamps use.
pub struct DemuxedPacket {
    packet: Packet,
    time_base: Rational,
}

impl DemuxedPacket {
    pub fn new(packet: Packet, time_base: Rational) -> Self {
        Self { packet, time_base }
    }

    pub fn stream_index(&self) -> usize {
        self.packet.stream()
    }

    /// Converts the timestamps to `target` and hands out the packet.
    pub fn rescaled(mut self, target: Rational) -> Packet {
        self.packet.rescale_ts(self.time_base, target);
        self.packet
    }
}
