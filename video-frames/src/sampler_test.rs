use std::io::Write as _;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use ffmpeg_next::format::Pixel;
use ndarray::{Array4, s};

use super::FrameCollector;
use crate::fixture::{normalized_level, write_gray_clip};
use crate::frame::RawVideoFrame;
use crate::sampler::{SampleRequest, sample_frames, try_sample_frames};
use crate::transform::FrameSize;

/// Writes a 64x48 gray clip of `frames` frames into `dir`.
fn clip(dir: &Path, frames: usize) -> PathBuf {
    crate::init().unwrap();
    let path = dir.join(format!("gray{frames}.mkv"));
    write_gray_clip(&path, frames, 64, 48).unwrap();
    path
}

/// Asserts frame `t` of `tensor` is the flat gray of source frame `source[t]`.
fn assert_frames(tensor: &Array4<f32>, source: &[usize]) {
    assert_eq!(tensor.shape()[1], source.len());
    for (t, &index) in source.iter().enumerate() {
        let expected = normalized_level(index);
        let frame = tensor.slice(s![.., t, .., ..]);
        assert!(
            frame.iter().all(|v| (v - expected).abs() < 0.025),
            "frame {t}: expected source frame {index} ({expected}), got {:?}",
            frame.iter().take(3).collect::<Vec<_>>()
        );
    }
}

fn blank_frame() -> RawVideoFrame {
    let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, 16, 16);
    for plane in 0..3 {
        frame.data_mut(plane).fill(128);
    }
    RawVideoFrame::from(frame)
}

// ------------------------------------------------------------------------
// FrameCollector
// ------------------------------------------------------------------------

#[test]
fn test_collector_stops_at_last_wanted_index() {
    let mut collector = FrameCollector::new(&[1, 3], 3, 25);
    let flow = (0..6)
        .map(|_| collector.push(blank_frame()).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        flow,
        vec![
            ControlFlow::Continue(()),
            ControlFlow::Continue(()),
            ControlFlow::Continue(()),
            ControlFlow::Break(()),
            ControlFlow::Break(()),
            ControlFlow::Break(()),
        ]
    );
    let frames = collector.finish();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| (f.width, f.height) == (16, 16)));
}

#[test]
fn test_collector_stops_at_budget() {
    let wanted = (0..10).collect::<Vec<_>>();
    let mut collector = FrameCollector::new(&wanted, 9, 2);
    assert_eq!(collector.push(blank_frame()).unwrap(), ControlFlow::Continue(()));
    assert_eq!(collector.push(blank_frame()).unwrap(), ControlFlow::Break(()));
    assert_eq!(collector.finish().len(), 2);
}

// ------------------------------------------------------------------------
// Decoding
// ------------------------------------------------------------------------

#[test]
fn test_missing_file_is_absent() {
    crate::init().unwrap();
    let indices: Vec<usize> = (0..9).collect();
    let request = SampleRequest {
        indices: &indices,
        max_frames: 9,
        resize: None,
    };
    let path = Path::new("/nonexistent/definitely-missing.mp4");
    assert!(sample_frames(path, &request).is_none());
    assert!(try_sample_frames(path, &request).is_err());
}

#[test]
fn test_corrupt_file_is_absent() {
    crate::init().unwrap();
    let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    file.write_all(&[0x42u8; 4096]).unwrap();
    file.flush().unwrap();

    let indices: Vec<usize> = (0..9).collect();
    let request = SampleRequest {
        indices: &indices,
        max_frames: 9,
        resize: Some(FrameSize::new(64, 32)),
    };
    assert!(sample_frames(file.path(), &request).is_none());
}

#[test]
fn test_empty_indices_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = clip(dir.path(), 30);
    let request = SampleRequest {
        indices: &[],
        max_frames: 9,
        resize: None,
    };
    assert!(sample_frames(&path, &request).is_none());
    assert!(matches!(try_sample_frames(&path, &request), Ok(None)));
}

#[test]
fn test_clip_without_frames_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = clip(dir.path(), 0);
    let indices: Vec<usize> = (0..9).collect();
    let request = SampleRequest {
        indices: &indices,
        max_frames: 9,
        resize: None,
    };
    assert!(sample_frames(&path, &request).is_none());
}

#[test]
fn test_sample_prefix_is_capped_and_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let path = clip(dir.path(), 30);

    let indices: Vec<usize> = (0..30).collect();
    let request = SampleRequest {
        indices: &indices,
        max_frames: 25,
        resize: None,
    };
    let tensor = sample_frames(&path, &request).expect("frames");
    assert_eq!(tensor.shape(), &[3, 25, 48, 64]);
    assert_frames(&tensor, &(0..25).collect::<Vec<_>>());

    // budget above the clip length: all 30 frames align down to 25
    let request = SampleRequest {
        indices: &indices,
        max_frames: 121,
        resize: None,
    };
    let tensor = sample_frames(&path, &request).expect("frames");
    assert_frames(&tensor, &(0..25).collect::<Vec<_>>());
}

#[test]
fn test_sample_sparse_indices() {
    let dir = tempfile::tempdir().unwrap();
    let path = clip(dir.path(), 30);

    let indices: Vec<usize> = (0..9).map(|i| i * 3).collect();
    let request = SampleRequest {
        indices: &indices,
        max_frames: 121,
        resize: None,
    };
    let tensor = sample_frames(&path, &request).expect("frames");
    assert_eq!(tensor.shape(), &[3, 9, 48, 64]);
    assert_frames(&tensor, &indices);
}

#[test]
fn test_sample_resizes_to_cover() {
    let dir = tempfile::tempdir().unwrap();
    let path = clip(dir.path(), 30);

    let indices: Vec<usize> = (10..19).collect();
    let request = SampleRequest {
        indices: &indices,
        max_frames: 121,
        resize: Some(FrameSize::new(32, 32)),
    };
    let tensor = sample_frames(&path, &request).expect("frames");
    assert_eq!(tensor.shape(), &[3, 9, 32, 32]);
    assert_frames(&tensor, &indices);
}

#[test]
fn test_short_clip_aligns_down() {
    let dir = tempfile::tempdir().unwrap();
    let path = clip(dir.path(), 5);

    let indices: Vec<usize> = (0..25).collect();
    let request = SampleRequest {
        indices: &indices,
        max_frames: 25,
        resize: None,
    };
    // 5 decoded frames keep only the leading one
    let tensor = sample_frames(&path, &request).expect("frames");
    assert_frames(&tensor, &[0]);
}

#[test]
fn test_indices_past_end_are_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = clip(dir.path(), 30);

    let indices = [1_000_000usize];
    let request = SampleRequest {
        indices: &indices,
        max_frames: 121,
        resize: None,
    };
    assert!(sample_frames(&path, &request).is_none());
    assert!(matches!(try_sample_frames(&path, &request), Ok(None)));
}
