use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::clip::loader::VideoFile;
use crate::clip::{prepare_clip, ClipTensor, Mode, SamplingConfig};
use crate::media::mimetype;

/// Turns a local video file into the model input for one prediction.
///
/// Sampling is deterministic, so the same file always yields the same tensor.
pub fn read_video_data(path: &Path, cfg: &SamplingConfig) -> Result<ClipTensor> {
    let start = Instant::now();

    if !mimetype::looks_like_video(path)? {
        let mime = mimetype::detect_mimetype(path)?;
        return Err(anyhow!("{:?} is not a video ({})", path, mime));
    }

    let video = VideoFile::open(path).with_context(|| format!("Failed to open video {:?}", path))?;
    // Test-mode sampling never draws from the rng unless jitter is enabled.
    let mut rng = StdRng::seed_from_u64(0);
    let tensor = prepare_clip(&video, cfg, Mode::Test, &mut rng)
        .with_context(|| format!("Failed to prepare clip from {:?}", path))?;

    info!(
        "Loaded video {:?} ({} frames) into {:?} in {:.3}s",
        path,
        video.info().frame_count,
        tensor.shape(),
        start.elapsed().as_secs_f64()
    );
    Ok(tensor)
}

/// Produces a model input from a local video file.
pub trait ClipReader {
    fn read_clip(&self, path: &Path, cfg: &SamplingConfig) -> Result<ClipTensor>;
}

/// Decodes through ffprobe/ffmpeg.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegClipReader;

impl ClipReader for FfmpegClipReader {
    fn read_clip(&self, path: &Path, cfg: &SamplingConfig) -> Result<ClipTensor> {
        read_video_data(path, cfg)
    }
}
