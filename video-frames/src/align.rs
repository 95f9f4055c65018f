//! Temporal alignment of sampled clips.
//!
//! The causal video encoder compresses time by a factor of 8 after keeping the
//! first frame on its own, so a clip must hold `k * 8 + 1` frames.

pub const TEMPORAL_COMPRESSION: usize = 8;

/// Largest count `<= frames` of the form `k * TEMPORAL_COMPRESSION + 1`.
///
/// Returns `None` for an empty clip.
pub fn align_frame_count(frames: usize) -> Option<usize> {
    if frames == 0 {
        return None;
    }
    Some((frames - 1) / TEMPORAL_COMPRESSION * TEMPORAL_COMPRESSION + 1)
}

/// Caps `frames` to `budget` and then truncates to the aligned length.
///
/// Returns `false` when nothing is left.
pub fn cap_and_align<T>(frames: &mut Vec<T>, budget: usize) -> bool {
    frames.truncate(budget);
    match align_frame_count(frames.len()) {
        Some(n) => {
            frames.truncate(n);
            true
        }
        None => {
            frames.clear();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_matches_formula() {
        for f in 1..=200usize {
            let aligned = align_frame_count(f).unwrap();
            assert_eq!(aligned, ((f - 1) / 8) * 8 + 1);
            assert!(aligned <= f);
            assert_eq!(aligned % 8, 1);
            // nothing larger fits
            assert!(aligned + 8 > f);
        }
    }

    #[test]
    fn test_align_known_values() {
        assert_eq!(align_frame_count(0), None);
        assert_eq!(align_frame_count(1), Some(1));
        assert_eq!(align_frame_count(8), Some(1));
        assert_eq!(align_frame_count(9), Some(9));
        assert_eq!(align_frame_count(25), Some(25));
        assert_eq!(align_frame_count(30), Some(25));
        assert_eq!(align_frame_count(121), Some(121));
    }

    #[test]
    fn test_cap_then_align() {
        let mut frames: Vec<usize> = (0..30).collect();
        assert!(cap_and_align(&mut frames, 25));
        assert_eq!(frames, (0..25).collect::<Vec<_>>());

        let mut frames: Vec<usize> = (0..30).collect();
        assert!(cap_and_align(&mut frames, 121));
        assert_eq!(frames.len(), 25);
        assert_eq!(frames.last(), Some(&24));

        let mut frames: Vec<usize> = (0..5).collect();
        assert!(!cap_and_align(&mut frames, 0));
        assert!(frames.is_empty());
    }
}
