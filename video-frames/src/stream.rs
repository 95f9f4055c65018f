use ffmpeg_next::{Rational, codec::Parameters, format::stream::Stream, media};

/// What the sampler needs to know about one demuxed stream.
#[derive(Clone)]
pub struct StreamInfo {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
}

impl StreamInfo {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn is_video(&self) -> bool {
        self.parameters.medium() == media::Type::Video
    }
}

impl From<Stream<'_>> for StreamInfo {
    fn from(stream: Stream<'_>) -> Self {
        Self {
            index: stream.index(),
            parameters: stream.parameters(),
            time_base: stream.time_base(),
        }
    }
}
