use ffmpeg_next::format::Pixel;

/// A decoded frame in the decoder's native pixel format.
pub struct RawVideoFrame {
    frame: ffmpeg_next::frame::Video,
}

impl From<ffmpeg_next::frame::Video> for RawVideoFrame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }
}

impl RawVideoFrame {
    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> Pixel {
        self.frame.format()
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }
}

/// Packed, row-contiguous RGB24 pixels (`height * width * 3` bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> anyhow::Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            anyhow::bail!(
                "rgb frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            );
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Copies plane 0 of an RGB24 ffmpeg frame, dropping per-row alignment padding.
    pub fn from_rgb24(frame: &ffmpeg_next::frame::Video) -> anyhow::Result<Self> {
        if frame.format() != Pixel::RGB24 {
            anyhow::bail!("expected rgb24 frame, got {:?}", frame.format());
        }
        let width = frame.width();
        let height = frame.height();
        let row = width as usize * 3;
        let stride = frame.stride(0);
        let plane = frame.data(0);

        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            data.extend_from_slice(&plane[start..start + row]);
        }
        Self::new(width, height, data)
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}
