use crate::clip::error::{ClipError, Result};

pub const DEFAULT_CLIP_LENGTH: usize = 32;
pub const DEFAULT_CROP_SIZE: u32 = 224;
/// Upper bounds on request-supplied sizes.
pub const MAX_CLIP_LENGTH: usize = 1024;
pub const MAX_SEGMENTS: usize = 64;
/// ImageNet channel statistics, RGB order.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Selects between the augmented training path and the deterministic
/// evaluation paths of the sampler and the transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Val,
    Test,
}

impl Mode {
    pub fn is_train(self) -> bool {
        matches!(self, Mode::Train)
    }
}

impl std::str::FromStr for Mode {
    type Err = ClipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Mode::Train),
            "val" => Ok(Mode::Val),
            "test" => Ok(Mode::Test),
            other => Err(ClipError::InvalidConfig(format!("unknown mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderMode {
    Standard,
    /// Two-pathway sampling. Positions divisible by `fast_stride` feed the
    /// fast pathway, those also divisible by `slow_stride` feed the slow one.
    SlowFast { fast_stride: usize, slow_stride: usize },
}

impl LoaderMode {
    pub fn slowfast() -> Self {
        LoaderMode::SlowFast {
            fast_stride: 2,
            slow_stride: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    pub clip_length: usize,
    pub step: usize,
    pub segments: usize,
    pub crop_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub temporal_jitter: bool,
    pub loader_mode: LoaderMode,
    pub scale_ratios: Vec<f32>,
    pub max_distort: usize,
    pub flip_prob: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            clip_length: DEFAULT_CLIP_LENGTH,
            step: 1,
            segments: 1,
            crop_size: DEFAULT_CROP_SIZE,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            temporal_jitter: false,
            loader_mode: LoaderMode::Standard,
            scale_ratios: vec![1.0, 0.8],
            max_distort: 1,
            flip_prob: 0.5,
        }
    }
}

impl SamplingConfig {
    pub fn with_clip_length(mut self, clip_length: usize) -> Self {
        self.clip_length = clip_length;
        self
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_crop_size(mut self, crop_size: u32) -> Self {
        self.crop_size = crop_size;
        self
    }

    /// Number of source frames one segment spans.
    pub fn skip_length(&self) -> usize {
        self.clip_length.saturating_mul(self.step)
    }

    /// Frames produced per segment once the loader mode is applied.
    pub fn frames_per_segment(&self) -> usize {
        match self.loader_mode {
            LoaderMode::Standard => self.clip_length,
            LoaderMode::SlowFast {
                fast_stride,
                slow_stride,
            } => (1..=self.clip_length)
                .filter(|i| i % fast_stride == 0)
                .map(|i| if i % slow_stride == 0 { 2 } else { 1 })
                .sum(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.clip_length == 0 {
            return Err(ClipError::InvalidConfig("clip_length must be > 0".to_string()));
        }
        if self.step == 0 {
            return Err(ClipError::InvalidConfig("step must be > 0".to_string()));
        }
        if self.segments == 0 {
            return Err(ClipError::InvalidConfig("segments must be > 0".to_string()));
        }
        if self.clip_length > MAX_CLIP_LENGTH {
            return Err(ClipError::InvalidConfig(format!(
                "clip_length {} exceeds {}",
                self.clip_length, MAX_CLIP_LENGTH
            )));
        }
        if self.segments > MAX_SEGMENTS {
            return Err(ClipError::InvalidConfig(format!(
                "segments {} exceeds {}",
                self.segments, MAX_SEGMENTS
            )));
        }
        if self.clip_length.checked_mul(self.step).is_none() {
            return Err(ClipError::InvalidConfig(format!(
                "clip_length {} x step {} overflows",
                self.clip_length, self.step
            )));
        }
        if self.crop_size == 0 {
            return Err(ClipError::InvalidConfig("crop_size must be > 0".to_string()));
        }
        if self.std.iter().any(|s| !(*s > 0.0)) {
            return Err(ClipError::InvalidConfig("std entries must be > 0".to_string()));
        }
        if self.scale_ratios.is_empty() || self.scale_ratios.iter().any(|r| !(*r > 0.0 && *r <= 1.0)) {
            return Err(ClipError::InvalidConfig(
                "scale_ratios must be non-empty and within (0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.flip_prob) {
            return Err(ClipError::InvalidConfig("flip_prob must be within [0, 1]".to_string()));
        }
        if let LoaderMode::SlowFast {
            fast_stride,
            slow_stride,
        } = self.loader_mode
        {
            if fast_stride == 0 || slow_stride == 0 {
                return Err(ClipError::InvalidConfig(
                    "slowfast strides must be > 0".to_string(),
                ));
            }
            if self.frames_per_segment() == 0 {
                return Err(ClipError::InvalidConfig(format!(
                    "clip_length {} yields no frames with fast stride {}",
                    self.clip_length, fast_stride
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = SamplingConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.skip_length(), 32);
        assert_eq!(cfg.frames_per_segment(), 32);
    }

    #[test]
    fn test_rejects_zero_clip_length_and_bad_std() {
        let cfg = SamplingConfig::default().with_clip_length(0);
        assert!(matches!(cfg.validate(), Err(ClipError::InvalidConfig(_))));

        let mut cfg = SamplingConfig::default();
        cfg.std = [0.2, 0.0, 0.2];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_clips() {
        assert!(SamplingConfig::default().with_clip_length(MAX_CLIP_LENGTH).validate().is_ok());
        assert!(SamplingConfig::default()
            .with_clip_length(MAX_CLIP_LENGTH + 1)
            .validate()
            .is_err());
        assert!(SamplingConfig::default().with_clip_length(usize::MAX).validate().is_err());
        assert!(SamplingConfig::default().with_step(usize::MAX).validate().is_err());

        let mut cfg = SamplingConfig::default();
        cfg.segments = MAX_SEGMENTS + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_slowfast_frames_per_segment() {
        let mut cfg = SamplingConfig::default();
        cfg.loader_mode = LoaderMode::slowfast();
        // 16 fast + 2 slow
        assert_eq!(cfg.frames_per_segment(), 18);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("TEST".parse::<Mode>().unwrap(), Mode::Test);
        assert_eq!("train".parse::<Mode>().unwrap(), Mode::Train);
        assert!("eval".parse::<Mode>().is_err());
    }
}
