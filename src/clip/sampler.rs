//! Frame-index sampling over a video of arbitrary length.
//!
//! A video of `D` frames is split into `segments` windows; each window yields
//! `clip_length` positions spaced `step` apart, starting at the segment
//! offset. Positions past the end of the video are clamped to the last frame,
//! so short videos repeat their final frame instead of failing.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::clip::config::{Mode, SamplingConfig};
use crate::clip::error::{ClipError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledIndices {
    /// 0-based start frame of each segment.
    pub segment_offsets: Vec<usize>,
    /// Per-position jitter in `[0, step)`, one entry per clip position.
    pub skip_offsets: Vec<usize>,
    pub step: usize,
}

impl SampledIndices {
    /// Expands segment offsets into concrete frame positions, segment by
    /// segment, each clamped into `[0, frame_count)`.
    pub fn frame_ids(&self, frame_count: usize) -> Vec<usize> {
        let last = frame_count.saturating_sub(1);
        let step = self.step;
        self.segment_offsets
            .iter()
            .flat_map(|&start| {
                self.skip_offsets
                    .iter()
                    .enumerate()
                    .map(move |(i, jitter)| (start + i * step + jitter).min(last))
            })
            .collect()
    }

    pub fn clip_length(&self) -> usize {
        self.skip_offsets.len()
    }
}

/// Samples indices for `mode`. `rng` is only consulted in training mode or
/// when temporal jitter is enabled.
pub fn sample<R: Rng + ?Sized>(
    cfg: &SamplingConfig,
    frame_count: usize,
    mode: Mode,
    rng: &mut R,
) -> Result<SampledIndices> {
    check_inputs(cfg, frame_count)?;
    match mode {
        Mode::Train => sample_train_indices(cfg, frame_count, rng),
        Mode::Val => {
            let min_exclusive = (cfg.segments + cfg.skip_length()).saturating_sub(1);
            sample_centered(cfg, frame_count, min_exclusive, rng)
        }
        Mode::Test => sample_centered(cfg, frame_count, cfg.skip_length().saturating_sub(1), rng),
    }
}

/// Deterministic inference-time sampling: each segment window is centered in
/// its share of the video.
pub fn sample_test_indices(cfg: &SamplingConfig, frame_count: usize) -> Result<SampledIndices> {
    if cfg.temporal_jitter {
        return Err(ClipError::InvalidConfig(
            "temporal jitter requires an rng, use sample()".to_string(),
        ));
    }
    // Without jitter the rng is never consulted.
    sample(cfg, frame_count, Mode::Test, &mut StdRng::seed_from_u64(0))
}

fn sample_centered<R: Rng + ?Sized>(
    cfg: &SamplingConfig,
    frame_count: usize,
    min_exclusive: usize,
    rng: &mut R,
) -> Result<SampledIndices> {
    check_inputs(cfg, frame_count)?;
    let skip_length = cfg.skip_length();

    let segment_offsets = if frame_count > min_exclusive {
        let tick = (frame_count + 1 - skip_length) as f64 / cfg.segments as f64;
        (0..cfg.segments)
            .map(|x| (tick / 2.0 + tick * x as f64) as usize)
            .collect()
    } else {
        vec![0; cfg.segments]
    };

    Ok(SampledIndices {
        segment_offsets,
        skip_offsets: skip_offsets(cfg, rng),
        step: cfg.step,
    })
}

/// Training-time sampling with a random start inside each segment.
pub fn sample_train_indices<R: Rng + ?Sized>(
    cfg: &SamplingConfig,
    frame_count: usize,
    rng: &mut R,
) -> Result<SampledIndices> {
    check_inputs(cfg, frame_count)?;
    let skip_length = cfg.skip_length();
    let span = (frame_count + 1).saturating_sub(skip_length);
    let average_duration = span / cfg.segments;

    let segment_offsets = if average_duration > 0 {
        (0..cfg.segments)
            .map(|x| x * average_duration + rng.random_range(0..average_duration))
            .collect()
    } else if frame_count > cfg.segments.max(skip_length) {
        let mut offsets: Vec<usize> = (0..cfg.segments).map(|_| rng.random_range(0..span)).collect();
        offsets.sort_unstable();
        offsets
    } else {
        vec![0; cfg.segments]
    };

    Ok(SampledIndices {
        segment_offsets,
        skip_offsets: skip_offsets(cfg, rng),
        step: cfg.step,
    })
}

fn skip_offsets<R: Rng + ?Sized>(cfg: &SamplingConfig, rng: &mut R) -> Vec<usize> {
    if cfg.temporal_jitter {
        (0..cfg.clip_length).map(|_| rng.random_range(0..cfg.step)).collect()
    } else {
        vec![0; cfg.clip_length]
    }
}

fn check_inputs(cfg: &SamplingConfig, frame_count: usize) -> Result<()> {
    cfg.validate()?;
    if frame_count == 0 {
        return Err(ClipError::EmptyVideo);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centered_window_for_long_video() {
        let cfg = SamplingConfig::default();
        let sampled = sample_test_indices(&cfg, 300).unwrap();
        // tick = 300 - 32 + 1 = 269, start = floor(134.5)
        assert_eq!(sampled.segment_offsets, vec![134]);

        let ids = sampled.frame_ids(300);
        assert_eq!(ids.len(), 32);
        assert_eq!(ids, (134..166).collect::<Vec<_>>());
    }

    #[test]
    fn test_indices_in_range_and_non_decreasing() {
        for (frames, len, step) in [(32, 32, 1), (64, 8, 8), (301, 16, 2), (1000, 32, 4)] {
            let cfg = SamplingConfig::default().with_clip_length(len).with_step(step);
            let ids = sample_test_indices(&cfg, frames).unwrap().frame_ids(frames);
            assert_eq!(ids.len(), len);
            assert!(ids.iter().all(|&i| i < frames));
            assert!(ids.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_oversized_request_is_rejected_before_allocating() {
        let mut rng = StdRng::seed_from_u64(0);
        for mode in [Mode::Train, Mode::Val, Mode::Test] {
            let huge = SamplingConfig::default().with_clip_length(usize::MAX);
            assert!(matches!(
                sample(&huge, 300, mode, &mut rng),
                Err(ClipError::InvalidConfig(_))
            ));
            let overflowing = SamplingConfig::default().with_clip_length(2).with_step(usize::MAX);
            assert!(sample(&overflowing, 300, mode, &mut rng).is_err());
        }
    }

    #[test]
    fn test_deterministic_across_calls() {
        let cfg = SamplingConfig::default().with_step(2);
        let a = sample_test_indices(&cfg, 517).unwrap();
        let b = sample_test_indices(&cfg, 517).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.frame_ids(517), b.frame_ids(517));
    }

    #[test]
    fn test_short_video_clamps_to_last_frame() {
        let cfg = SamplingConfig::default();
        let ids = sample_test_indices(&cfg, 10).unwrap().frame_ids(10);
        assert_eq!(ids.len(), 32);
        assert_eq!(&ids[..10], &(0..10).collect::<Vec<_>>()[..]);
        assert!(ids[10..].iter().all(|&i| i == 9));
    }

    #[test]
    fn test_single_frame_video() {
        let cfg = SamplingConfig::default().with_clip_length(4);
        let ids = sample_test_indices(&cfg, 1).unwrap().frame_ids(1);
        assert_eq!(ids, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_empty_video_is_an_error() {
        let cfg = SamplingConfig::default();
        assert!(matches!(
            sample_test_indices(&cfg, 0),
            Err(ClipError::EmptyVideo)
        ));
    }

    #[test]
    fn test_val_threshold_differs_from_test() {
        let mut cfg = SamplingConfig::default().with_clip_length(8);
        cfg.segments = 2;
        let mut rng = StdRng::seed_from_u64(0);
        // 9 frames: test mode still spreads segments, val mode needs more than 9.
        let test = sample(&cfg, 9, Mode::Test, &mut rng).unwrap();
        let val = sample(&cfg, 9, Mode::Val, &mut rng).unwrap();
        assert_eq!(test.segment_offsets, vec![0, 1]);
        assert_eq!(val.segment_offsets, vec![0, 0]);
    }

    #[test]
    fn test_multi_segment_offsets() {
        let mut cfg = SamplingConfig::default().with_clip_length(4);
        cfg.segments = 2;
        let sampled = sample_test_indices(&cfg, 101).unwrap();
        // tick = 98 / 2 = 49
        assert_eq!(sampled.segment_offsets, vec![24, 73]);
        assert_eq!(sampled.frame_ids(101).len(), 8);
    }

    #[test]
    fn test_train_sampling_is_seeded_and_bounded() {
        let cfg = SamplingConfig::default().with_clip_length(16).with_step(2);
        let a = sample_train_indices(&cfg, 120, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = sample_train_indices(&cfg, 120, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);

        // 120 - 32 + 1 = 89 admissible starts
        assert!(a.segment_offsets[0] < 89);
        assert!(a.frame_ids(120).iter().all(|&i| i < 120));
    }

    #[test]
    fn test_train_sampling_short_video_starts_at_zero() {
        let cfg = SamplingConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let sampled = sample_train_indices(&cfg, 10, &mut rng).unwrap();
        assert_eq!(sampled.segment_offsets, vec![0]);
    }

    #[test]
    fn test_temporal_jitter_stays_below_step() {
        let mut cfg = SamplingConfig::default().with_clip_length(8).with_step(4);
        cfg.temporal_jitter = true;
        let mut rng = StdRng::seed_from_u64(3);
        let sampled = sample(&cfg, 200, Mode::Test, &mut rng).unwrap();
        assert!(sampled.skip_offsets.iter().all(|&j| j < 4));
        assert!(sample_test_indices(&cfg, 200).is_err());
    }
}
