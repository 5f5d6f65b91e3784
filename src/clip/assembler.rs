use ndarray::{concatenate, stack, Array3, Array4, Array5, ArrayD, Axis};

use crate::clip::error::{ClipError, Result};

/// Network input for one or more clips.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipTensor {
    /// `(batch, channel, time, height, width)`
    Video(Array5<f32>),
    /// `(batch, channel, height, width)`, single-frame clips.
    Image(Array4<f32>),
}

impl ClipTensor {
    pub fn shape(&self) -> &[usize] {
        match self {
            ClipTensor::Video(a) => a.shape(),
            ClipTensor::Image(a) => a.shape(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ClipTensor::Video(a) => a.len(),
            ClipTensor::Image(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.shape()[0]
    }

    pub fn into_dyn(self) -> ArrayD<f32> {
        match self {
            ClipTensor::Video(a) => a.into_dyn(),
            ClipTensor::Image(a) => a.into_dyn(),
        }
    }
}

/// Stacks `(3, C, C)` frames into a clip tensor.
///
/// Frames are grouped `clip_length` at a time into batch entries; the frame
/// count must be a multiple of `clip_length`. A clip length of one drops the
/// time axis.
pub fn assemble(frames: &[Array3<f32>], clip_length: usize) -> Result<ClipTensor> {
    if frames.is_empty() || clip_length == 0 {
        return Err(ClipError::InvalidConfig(format!(
            "cannot assemble {} frames into clips of {}",
            frames.len(),
            clip_length
        )));
    }
    if frames.len() % clip_length != 0 {
        return Err(ClipError::InvalidConfig(format!(
            "{} frames do not split into clips of {}",
            frames.len(),
            clip_length
        )));
    }

    let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
    // (N * L, 3, H, W)
    let stacked = stack(Axis(0), &views)?;
    let (_, channels, height, width) = stacked.dim();
    let batch = frames.len() / clip_length;

    // (N, L, 3, H, W) -> (N, 3, L, H, W)
    let clips = stacked.into_shape_with_order((batch, clip_length, channels, height, width))?;
    let clips = clips.permuted_axes([0, 2, 1, 3, 4]).as_standard_layout().into_owned();

    if clip_length == 1 {
        let squeezed = clips.index_axis_move(Axis(2), 0);
        return Ok(ClipTensor::Image(squeezed));
    }
    Ok(ClipTensor::Video(clips))
}

/// Concatenates per-sample tensors along the batch axis.
pub fn concat_batch(samples: &[ClipTensor]) -> Result<ClipTensor> {
    let Some(first) = samples.first() else {
        return Err(ClipError::InvalidConfig("empty batch".to_string()));
    };
    match first {
        ClipTensor::Video(_) => {
            let views = samples
                .iter()
                .map(|s| match s {
                    ClipTensor::Video(a) => Ok(a.view()),
                    ClipTensor::Image(_) => Err(mixed_batch()),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ClipTensor::Video(concatenate(Axis(0), &views)?))
        }
        ClipTensor::Image(_) => {
            let views = samples
                .iter()
                .map(|s| match s {
                    ClipTensor::Image(a) => Ok(a.view()),
                    ClipTensor::Video(_) => Err(mixed_batch()),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ClipTensor::Image(concatenate(Axis(0), &views)?))
        }
    }
}

fn mixed_batch() -> ClipError {
    ClipError::InvalidConfig("batch mixes video and image clips".to_string())
}
