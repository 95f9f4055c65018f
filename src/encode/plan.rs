//! Temporal windows and spatial tiles for chunked encoding.

use std::ops::Range;

use ndarray::{Array5, ArrayView5, ArrayViewMut5, Axis, s};

use super::{EncodeOptions, SPATIAL_COMPRESSION};

/// One forward pass of the encoder graph over a clip chunk. Returns the
/// posterior moments of the chunk.
pub trait ChunkModel {
    fn run_chunk(
        &mut self,
        chunk: ArrayView5<'_, f32>,
        is_init: bool,
    ) -> anyhow::Result<Array5<f32>>;
}

/// Splits `0..num_frames` into encoder windows.
///
/// The first window carries the leading frame on top of `window_size`, the
/// following ones are `window_size` long, and the last takes the remainder.
pub fn plan_temporal_windows(
    num_frames: usize,
    window_size: usize,
    temporal_chunk: bool,
) -> Vec<Range<usize>> {
    if num_frames == 0 {
        return Vec::new();
    }
    if !temporal_chunk || window_size == 0 {
        return vec![0..num_frames];
    }

    let first_end = (window_size + 1).min(num_frames);
    let mut windows = vec![0..first_end];
    let mut start = first_end;
    while start < num_frames {
        let end = (start + window_size).min(num_frames);
        windows.push(start..end);
        start = end;
    }
    windows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    /// Tile extent in pixels.
    pub sample_size: usize,
    /// Distance between tile origins in pixels.
    pub stride: usize,
    /// Tile extent in latent cells.
    pub latent_size: usize,
    pub blend_extent: usize,
    /// Latent cells each tile contributes after blending.
    pub row_limit: usize,
}

impl TileLayout {
    const OVERLAP: f64 = 0.25;

    pub fn new(tile_min_size: usize) -> Self {
        let sample_size = tile_min_size.max(SPATIAL_COMPRESSION);
        let latent_size = sample_size / SPATIAL_COMPRESSION;
        let stride = ((sample_size as f64 * (1.0 - Self::OVERLAP)) as usize).max(1);
        let blend_extent = (latent_size as f64 * Self::OVERLAP) as usize;
        Self {
            sample_size,
            stride,
            latent_size,
            blend_extent,
            row_limit: latent_size - blend_extent,
        }
    }

    pub fn needs_tiling(&self, height: usize, width: usize) -> bool {
        height > self.sample_size || width > self.sample_size
    }

    /// Pixel ranges of the tiles along an axis of length `extent`.
    pub fn tiles(&self, extent: usize) -> Vec<Range<usize>> {
        (0..extent)
            .step_by(self.stride)
            .map(|start| start..(start + self.sample_size).min(extent))
            .collect()
    }
}

/// Blends the bottom edge of `above` into the top rows of `tile`.
fn blend_vertical(above: &Array5<f32>, tile: &mut ArrayViewMut5<'_, f32>, extent: usize) {
    let extent = extent.min(above.len_of(Axis(3))).min(tile.len_of(Axis(3)));
    let width = above.len_of(Axis(4)).min(tile.len_of(Axis(4)));
    let above_rows = above.len_of(Axis(3));
    for y in 0..extent {
        let weight = y as f32 / extent as f32;
        let source = above.slice(s![.., .., .., above_rows - extent + y, ..width]);
        let mut target = tile.slice_mut(s![.., .., .., y, ..width]);
        target.zip_mut_with(&source, |b, &a| *b = a * (1.0 - weight) + *b * weight);
    }
}

/// Blends the right edge of `left` into the first columns of `tile`.
fn blend_horizontal(left: &Array5<f32>, tile: &mut ArrayViewMut5<'_, f32>, extent: usize) {
    let extent = extent.min(left.len_of(Axis(4))).min(tile.len_of(Axis(4)));
    let height = left.len_of(Axis(3)).min(tile.len_of(Axis(3)));
    let left_cols = left.len_of(Axis(4));
    for x in 0..extent {
        let weight = x as f32 / extent as f32;
        let source = left.slice(s![.., .., .., ..height, left_cols - extent + x]);
        let mut target = tile.slice_mut(s![.., .., .., ..height, x]);
        target.zip_mut_with(&source, |b, &a| *b = a * (1.0 - weight) + *b * weight);
    }
}

/// Blends a row-major grid of encoded tiles into one moments tensor.
///
/// Tiles are blended in place, top to bottom and left to right, so each edge
/// blends against a neighbour that has already been blended itself.
pub fn stitch_tiles(
    mut grid: Vec<Vec<Array5<f32>>>,
    layout: &TileLayout,
) -> anyhow::Result<Array5<f32>> {
    if grid.is_empty() || grid.iter().any(|row| row.is_empty()) {
        anyhow::bail!("empty tile grid");
    }

    for i in 0..grid.len() {
        for j in 0..grid[i].len() {
            if i > 0 {
                let (above, current) = grid.split_at_mut(i);
                let above = above[i - 1]
                    .get(j)
                    .ok_or_else(|| anyhow::anyhow!("ragged tile grid"))?;
                blend_vertical(above, &mut current[0][j].view_mut(), layout.blend_extent);
            }
            if j > 0 {
                let (left, current) = grid[i].split_at_mut(j);
                blend_horizontal(&left[j - 1], &mut current[0].view_mut(), layout.blend_extent);
            }
        }
    }

    let mut rows = Vec::with_capacity(grid.len());
    for row in &grid {
        let cropped = row
            .iter()
            .map(|tile| {
                let height = layout.row_limit.min(tile.len_of(Axis(3)));
                let width = layout.row_limit.min(tile.len_of(Axis(4)));
                tile.slice(s![.., .., .., ..height, ..width])
            })
            .collect::<Vec<_>>();
        rows.push(ndarray::concatenate(Axis(4), &cropped)?);
    }
    let rows = rows.iter().map(|row| row.view()).collect::<Vec<_>>();
    Ok(ndarray::concatenate(Axis(3), &rows)?)
}

/// Encodes one temporal chunk, in overlapping tiles when `tiling` is on and
/// the frame is larger than a tile.
pub fn encode_spatial<M: ChunkModel + ?Sized>(
    model: &mut M,
    chunk: ArrayView5<'_, f32>,
    is_init: bool,
    tiling: bool,
    options: &EncodeOptions,
) -> anyhow::Result<Array5<f32>> {
    let layout = TileLayout::new(options.tile_min_size);
    let (height, width) = (chunk.len_of(Axis(3)), chunk.len_of(Axis(4)));
    if !tiling || !layout.needs_tiling(height, width) {
        return model.run_chunk(chunk, is_init);
    }

    let mut grid = Vec::new();
    for rows in layout.tiles(height) {
        let mut row = Vec::new();
        for cols in layout.tiles(width) {
            let tile = chunk.slice(s![.., .., .., rows.clone(), cols]);
            row.push(model.run_chunk(tile, is_init)?);
        }
        grid.push(row);
    }
    stitch_tiles(grid, &layout)
}

/// Encodes a whole clip window by window and joins the moments along time.
/// Only the first window is fed as the start of the clip.
pub fn encode_moments<M: ChunkModel + ?Sized>(
    model: &mut M,
    video: ArrayView5<'_, f32>,
    tiling: bool,
    options: &EncodeOptions,
) -> anyhow::Result<Array5<f32>> {
    let frames = video.len_of(Axis(2));
    let windows = plan_temporal_windows(frames, options.window_size, options.temporal_chunk);
    if windows.is_empty() {
        anyhow::bail!("cannot encode a clip with no frames");
    }

    let mut moments = Vec::with_capacity(windows.len());
    for (i, window) in windows.into_iter().enumerate() {
        let chunk = video.slice(s![.., .., window, .., ..]);
        moments.push(encode_spatial(model, chunk, i == 0, tiling, options)?);
    }
    let views = moments.iter().map(|m| m.view()).collect::<Vec<_>>();
    Ok(ndarray::concatenate(Axis(2), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_cover_all_frames_in_order() {
        for frames in 1..=130 {
            for window in [1usize, 4, 8, 16] {
                let plan = plan_temporal_windows(frames, window, true);
                assert_eq!(plan[0].start, 0);
                assert_eq!(plan.last().unwrap().end, frames);
                for pair in plan.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }
                assert!(plan.iter().all(|w| !w.is_empty()));
            }
        }
    }

    #[test]
    fn test_window_shapes() {
        assert_eq!(plan_temporal_windows(121, 16, true), {
            let mut expected = vec![0..17];
            expected.extend((17..121).step_by(16).map(|s| s..(s + 16).min(121)));
            expected
        });
        assert_eq!(plan_temporal_windows(9, 16, true), vec![0..9]);
        assert_eq!(plan_temporal_windows(25, 16, true), vec![0..17, 17..25]);
        assert_eq!(plan_temporal_windows(25, 16, false), vec![0..25]);
        assert!(plan_temporal_windows(0, 16, true).is_empty());
    }

    #[test]
    fn test_tile_layout_defaults() {
        let layout = TileLayout::new(256);
        assert_eq!(layout.stride, 192);
        assert_eq!(layout.latent_size, 32);
        assert_eq!(layout.blend_extent, 8);
        assert_eq!(layout.row_limit, 24);
        assert_eq!(layout.tiles(384), vec![0..256, 192..384]);
        assert_eq!(layout.tiles(640), vec![0..256, 192..448, 384..640, 576..640]);
        assert!(layout.needs_tiling(384, 640));
        assert!(!layout.needs_tiling(256, 256));
    }

    #[test]
    fn test_stitch_constant_field() {
        let layout = TileLayout::new(256);
        let (height, width) = (384, 640);
        let grid = layout
            .tiles(height)
            .into_iter()
            .map(|rows| {
                layout
                    .tiles(width)
                    .into_iter()
                    .map(|cols| {
                        Array5::from_elem(
                            (1, 4, 3, rows.len() / SPATIAL_COMPRESSION, cols.len() / SPATIAL_COMPRESSION),
                            0.5f32,
                        )
                    })
                    .collect()
            })
            .collect();

        let stitched = stitch_tiles(grid, &layout).unwrap();
        assert_eq!(stitched.shape(), &[1, 4, 3, height / 8, width / 8]);
        assert!(stitched.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_stitch_blends_seam_linearly() {
        let layout = TileLayout::new(64);
        let left = Array5::from_elem((1, 1, 1, 8, 8), 0.0f32);
        let right = Array5::from_elem((1, 1, 1, 8, 8), 1.0f32);
        let stitched = stitch_tiles(vec![vec![left, right]], &layout).unwrap();

        assert_eq!(stitched.shape(), &[1, 1, 1, 6, 12]);
        // the first column of the right tile is taken entirely from the left tile
        assert_eq!(stitched[[0, 0, 0, 0, 6]], 0.0);
        assert!((stitched[[0, 0, 0, 0, 7]] - 0.5).abs() < 1e-6);
        assert_eq!(stitched[[0, 0, 0, 0, 8]], 1.0);
    }

    // ------------------------------------------------------------------------
    // Chunked encoding
    // ------------------------------------------------------------------------

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Call {
        first_frame: usize,
        frames: usize,
        origin: (usize, usize),
        size: (usize, usize),
        is_init: bool,
    }

    /// Records every chunk it sees. The moments' mean is the chunk's first
    /// frame index plus the latent frame offset, constant over space.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
    }

    impl ChunkModel for Recorder {
        fn run_chunk(
            &mut self,
            chunk: ArrayView5<'_, f32>,
            is_init: bool,
        ) -> anyhow::Result<Array5<f32>> {
            let (t, h, w) = (chunk.len_of(Axis(2)), chunk.len_of(Axis(3)), chunk.len_of(Axis(4)));
            let first_frame = chunk[[0, 0, 0, 0, 0]] as usize;
            self.calls.push(Call {
                first_frame,
                frames: t,
                origin: (chunk[[0, 1, 0, 0, 0]] as usize, chunk[[0, 2, 0, 0, 0]] as usize),
                size: (h, w),
                is_init,
            });
            let latent_frames = if is_init { (t - 1) / 8 + 1 } else { t.div_ceil(8) };
            Ok(Array5::from_shape_fn(
                (1, 8, latent_frames, h / 8, w / 8),
                |(_, c, lt, _, _)| if c < 4 { (first_frame + lt) as f32 } else { 0.0 },
            ))
        }
    }

    /// Channel 0 holds the frame index, channels 1 and 2 the pixel row and column.
    fn indexed_clip(frames: usize, height: usize, width: usize) -> Array5<f32> {
        Array5::from_shape_fn((1, 3, frames, height, width), |(_, c, t, y, x)| match c {
            0 => t as f32,
            1 => y as f32,
            _ => x as f32,
        })
    }

    #[test]
    fn test_encode_moments_windows_in_order() {
        let video = indexed_clip(121, 16, 16);
        let mut model = Recorder::default();
        let moments =
            encode_moments(&mut model, video.view(), false, &EncodeOptions::default()).unwrap();

        let mut expected = vec![(0, 17, true)];
        expected.extend((17..121).step_by(16).map(|s| (s, (121 - s).min(16), false)));
        let seen = model
            .calls
            .iter()
            .map(|c| (c.first_frame, c.frames, c.is_init))
            .collect::<Vec<_>>();
        assert_eq!(seen, expected);
        assert!(model.calls.iter().all(|c| c.size == (16, 16)));

        assert_eq!(moments.shape(), &[1, 8, 16, 2, 2]);
        let mut means = vec![0.0, 1.0, 2.0];
        for (start, frames, _) in &expected[1..] {
            means.extend((0..frames.div_ceil(8)).map(|lt| (start + lt) as f32));
        }
        let got = moments.slice(s![0, 0, .., 0, 0]).to_vec();
        assert_eq!(got, means);
    }

    #[test]
    fn test_encode_moments_without_chunking_is_one_call() {
        let video = indexed_clip(25, 16, 16);
        let options = EncodeOptions {
            temporal_chunk: false,
            ..Default::default()
        };
        let mut model = Recorder::default();
        let moments = encode_moments(&mut model, video.view(), false, &options).unwrap();
        assert_eq!(model.calls.len(), 1);
        assert_eq!((model.calls[0].frames, model.calls[0].is_init), (25, true));
        assert_eq!(moments.shape(), &[1, 8, 4, 2, 2]);
    }

    #[test]
    fn test_encode_moments_tiles_each_window() {
        let (height, width) = (384, 640);
        let video = indexed_clip(10, height, width);
        let options = EncodeOptions {
            window_size: 8,
            ..Default::default()
        };
        let mut model = Recorder::default();
        let moments = encode_moments(&mut model, video.view(), true, &options).unwrap();

        let layout = TileLayout::new(options.tile_min_size);
        let mut expected = Vec::new();
        for (first_frame, frames, is_init) in [(0, 9, true), (9, 1, false)] {
            for rows in layout.tiles(height) {
                for cols in layout.tiles(width) {
                    expected.push(Call {
                        first_frame,
                        frames,
                        origin: (rows.start, cols.start),
                        size: (rows.len(), cols.len()),
                        is_init,
                    });
                }
            }
        }
        assert_eq!(model.calls, expected);
        assert_eq!(model.calls.len(), 16);

        assert_eq!(moments.shape(), &[1, 8, 3, height / 8, width / 8]);
        for (lt, mean) in [0.0f32, 1.0, 9.0].into_iter().enumerate() {
            let plane = moments.slice(s![0, ..4, lt, .., ..]);
            assert!(plane.iter().all(|&v| (v - mean).abs() < 1e-5), "frame {lt}");
        }
    }

    #[test]
    fn test_encode_spatial_tiles_only_when_enabled_and_needed() {
        let options = EncodeOptions::default();
        let large = indexed_clip(1, 264, 264);

        let mut model = Recorder::default();
        let whole = encode_spatial(&mut model, large.view(), true, false, &options).unwrap();
        assert_eq!(model.calls.len(), 1);
        assert_eq!(model.calls[0].size, (264, 264));
        assert_eq!(whole.shape(), &[1, 8, 1, 33, 33]);

        let mut model = Recorder::default();
        encode_spatial(&mut model, large.view(), true, true, &options).unwrap();
        let origins = model.calls.iter().map(|c| c.origin).collect::<Vec<_>>();
        assert_eq!(origins, vec![(0, 0), (0, 192), (192, 0), (192, 192)]);

        let small = indexed_clip(1, 64, 64);
        let mut model = Recorder::default();
        encode_spatial(&mut model, small.view(), true, true, &options).unwrap();
        assert_eq!(model.calls.len(), 1);
    }

    #[test]
    fn test_encode_moments_rejects_empty_clip() {
        let video = Array5::<f32>::zeros((1, 3, 0, 16, 16));
        let mut model = Recorder::default();
        assert!(encode_moments(&mut model, video.view(), false, &EncodeOptions::default()).is_err());
        assert!(model.calls.is_empty());
    }
}
