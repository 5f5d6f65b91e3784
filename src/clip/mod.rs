//! Clip sampling and tensor preparation shared by training and inference.

pub mod assembler;
pub mod config;
pub mod error;
pub mod loader;
pub mod sampler;
pub mod transform;

use rand::Rng;
use tracing::debug;

pub use assembler::ClipTensor;
pub use config::{LoaderMode, Mode, SamplingConfig};
pub use error::ClipError;
pub use loader::FrameSource;

/// Samples, decodes, transforms and assembles one clip from `source`.
pub fn prepare_clip<S, R>(source: &S, cfg: &SamplingConfig, mode: Mode, rng: &mut R) -> error::Result<ClipTensor>
where
    S: FrameSource + ?Sized,
    R: Rng + ?Sized,
{
    let frame_count = source.frame_count();
    let sampled = sampler::sample(cfg, frame_count, mode, rng)?;
    let frames = loader::load_clip(source, cfg, &sampled)?;
    let transformed = transform::ClipTransform::new(cfg).apply(mode, &frames, rng)?;
    let tensor = assembler::assemble(&transformed, cfg.frames_per_segment())?;
    debug!("Prepared clip {:?} from {} frames", tensor.shape(), frame_count);
    Ok(tensor)
}
