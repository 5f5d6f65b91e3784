use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, RgbImage};
use rayon::prelude::*;
use tracing::debug;

use crate::clip::config::{LoaderMode, SamplingConfig};
use crate::clip::error::{ClipError, Result};
use crate::clip::sampler::SampledIndices;
use crate::media::ffmpeg::{self, VideoInfo};

/// Positional access to decoded frames.
pub trait FrameSource {
    fn frame_count(&self) -> usize;

    /// Decodes the frames at `indices`, returned in the same order.
    fn frames_at(&self, indices: &[usize]) -> Result<Vec<RgbImage>>;
}

fn check_bounds(indices: &[usize], frame_count: usize) -> Result<()> {
    match indices.iter().find(|&&i| i >= frame_count) {
        Some(&index) => Err(ClipError::IndexOutOfBounds { index, frame_count }),
        None => Ok(()),
    }
}

/// An encoded video container decoded through ffmpeg.
pub struct VideoFile {
    path: PathBuf,
    info: VideoInfo,
}

impl VideoFile {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ClipError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        let info = ffmpeg::probe(path).map_err(|e| ClipError::Decode(format!("{e:#}")))?;
        if info.frame_count == 0 {
            return Err(ClipError::EmptyVideo);
        }
        debug!(
            "Opened {:?}: {} frames {}x{}",
            path, info.frame_count, info.width, info.height
        );
        Ok(Self {
            path: path.to_path_buf(),
            info,
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }
}

impl FrameSource for VideoFile {
    fn frame_count(&self) -> usize {
        self.info.frame_count
    }

    fn frames_at(&self, indices: &[usize]) -> Result<Vec<RgbImage>> {
        check_bounds(indices, self.info.frame_count)?;

        let decoded = ffmpeg::extract_frames(&self.path, &self.info, indices)
            .map_err(|e| ClipError::Decode(format!("{e:#}")))?;

        let mut by_index = HashMap::with_capacity(decoded.len());
        for (index, raw) in decoded {
            let frame: RgbImage = ImageBuffer::from_raw(self.info.width, self.info.height, raw)
                .ok_or_else(|| ClipError::Decode(format!("frame {index} has a short buffer")))?;
            by_index.insert(index, frame);
        }

        indices
            .iter()
            .map(|i| {
                by_index
                    .get(i)
                    .cloned()
                    .ok_or_else(|| ClipError::Decode(format!("frame {i} was not decoded")))
            })
            .collect()
    }
}

/// A directory of pre-extracted frames (`img_00001.jpg`, ...), numbered from 1
/// on disk.
pub struct FrameDirectory {
    dir: PathBuf,
    frame_count: usize,
    prefix: String,
    digits: usize,
    extension: String,
}

impl FrameDirectory {
    pub fn new(dir: impl Into<PathBuf>, frame_count: usize) -> Self {
        Self {
            dir: dir.into(),
            frame_count,
            prefix: "img_".to_string(),
            digits: 5,
            extension: "jpg".to_string(),
        }
    }

    pub fn with_naming(mut self, prefix: &str, digits: usize, extension: &str) -> Self {
        self.prefix = prefix.to_string();
        self.digits = digits;
        self.extension = extension.to_string();
        self
    }

    pub fn frame_path(&self, index: usize) -> PathBuf {
        let name = format!(
            "{}{:0width$}.{}",
            self.prefix,
            index + 1,
            self.extension,
            width = self.digits
        );
        self.dir.join(name)
    }
}

impl FrameSource for FrameDirectory {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn frames_at(&self, indices: &[usize]) -> Result<Vec<RgbImage>> {
        check_bounds(indices, self.frame_count)?;
        indices
            .par_iter()
            .map(|&i| {
                let path = self.frame_path(i);
                image::open(&path)
                    .map(|img| img.to_rgb8())
                    .map_err(|e| ClipError::Decode(format!("{}: {}", path.display(), e)))
            })
            .collect()
    }
}

/// Frames already held in memory.
pub struct DecodedFrames {
    frames: Vec<RgbImage>,
}

impl DecodedFrames {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self { frames }
    }
}

impl FrameSource for DecodedFrames {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn frames_at(&self, indices: &[usize]) -> Result<Vec<RgbImage>> {
        check_bounds(indices, self.frames.len())?;
        Ok(indices.iter().map(|&i| self.frames[i].clone()).collect())
    }
}

/// Frame positions to decode for `sampled`, ordered as the model expects.
pub fn clip_frame_ids(cfg: &SamplingConfig, sampled: &SampledIndices, frame_count: usize) -> Vec<usize> {
    let ids = sampled.frame_ids(frame_count);
    match cfg.loader_mode {
        LoaderMode::Standard => ids,
        LoaderMode::SlowFast {
            fast_stride,
            slow_stride,
        } => {
            let per_segment = sampled.clip_length().max(1);
            let mut ordered = Vec::with_capacity(ids.len());
            for segment in ids.chunks(per_segment) {
                let mut fast = Vec::new();
                let mut slow = Vec::new();
                for (i, &frame_id) in segment.iter().enumerate() {
                    if (i + 1) % fast_stride == 0 {
                        fast.push(frame_id);
                        if (i + 1) % slow_stride == 0 {
                            slow.push(frame_id);
                        }
                    }
                }
                ordered.extend(fast);
                ordered.extend(slow);
            }
            ordered
        }
    }
}

/// Decodes the clip described by `sampled` from `source`.
pub fn load_clip<S: FrameSource + ?Sized>(
    source: &S,
    cfg: &SamplingConfig,
    sampled: &SampledIndices,
) -> Result<Vec<RgbImage>> {
    let ids = clip_frame_ids(cfg, sampled, source.frame_count());
    source.frames_at(&ids)
}
