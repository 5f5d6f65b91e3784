//! Geometric and photometric normalization of decoded frames.
//!
//! Evaluation uses a center crop. Training uses a multi-scale crop taken at
//! one of a fixed set of offsets, resized back to the crop size and flipped at
//! random. Crop geometry and flipping are decided once per clip so every frame
//! of a clip is transformed identically.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;
use rand::Rng;

use crate::clip::config::{Mode, SamplingConfig};
use crate::clip::error::{ClipError, Result};

/// Chosen crop for one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub flip: bool,
}

pub struct ClipTransform<'a> {
    cfg: &'a SamplingConfig,
}

impl<'a> ClipTransform<'a> {
    pub fn new(cfg: &'a SamplingConfig) -> Self {
        Self { cfg }
    }

    /// Transforms every frame of a clip into a `(3, C, C)` normalized array.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        mode: Mode,
        frames: &[RgbImage],
        rng: &mut R,
    ) -> Result<Vec<Array3<f32>>> {
        self.cfg.validate()?;
        let Some(first) = frames.first() else {
            return Ok(Vec::new());
        };
        if frames.iter().any(|f| f.dimensions() != first.dimensions()) {
            return Err(ClipError::Decode("frames of one clip differ in size".to_string()));
        }

        let size = self.cfg.crop_size;
        if mode.is_train() {
            let window = self.train_window(first.width(), first.height(), rng)?;
            Ok(frames
                .iter()
                .map(|frame| {
                    let cropped =
                        imageops::crop_imm(frame, window.x, window.y, window.width, window.height).to_image();
                    let mut scaled = imageops::resize(&cropped, size, size, FilterType::Triangle);
                    if window.flip {
                        imageops::flip_horizontal_in_place(&mut scaled);
                    }
                    self.normalize(&scaled)
                })
                .collect())
        } else {
            Ok(frames.iter().map(|frame| self.normalize(&center_crop(frame, size))).collect())
        }
    }

    /// Maps each pixel through `(p / 255 - mean[c]) / std[c]` into a
    /// channel-first array.
    pub fn normalize(&self, frame: &RgbImage) -> Array3<f32> {
        let (width, height) = frame.dimensions();
        let mut array = Array3::zeros((3, height as usize, width as usize));

        for (x, y, pixel) in frame.enumerate_pixels() {
            for c in 0..3 {
                array[[c, y as usize, x as usize]] =
                    (pixel[c] as f32 / 255.0 - self.cfg.mean[c]) / self.cfg.std[c];
            }
        }

        array
    }

    fn train_window<R: Rng + ?Sized>(&self, width: u32, height: u32, rng: &mut R) -> Result<CropWindow> {
        let sizes = crop_sizes(height, width, &self.cfg.scale_ratios, self.cfg.max_distort, self.cfg.crop_size);
        if sizes.is_empty() {
            return Err(ClipError::InvalidConfig(format!(
                "no usable crop for a {width}x{height} frame"
            )));
        }
        let (crop_h, crop_w) = sizes[rng.random_range(0..sizes.len())];
        let flip = rng.random_bool(self.cfg.flip_prob);

        let offsets = fixed_offsets(height, width, crop_h, crop_w);
        let (y, x) = offsets[rng.random_range(0..offsets.len())];

        Ok(CropWindow {
            x,
            y,
            width: crop_w,
            height: crop_h,
            flip,
        })
    }
}

/// Center crop to `size x size`, upscaling first when the frame is smaller
/// than the crop on either side.
pub fn center_crop(frame: &RgbImage, size: u32) -> RgbImage {
    let frame = ensure_min_side(frame, size);
    let (width, height) = frame.dimensions();
    let x = ((width - size) as f64 / 2.0).round_ties_even() as u32;
    let y = ((height - size) as f64 / 2.0).round_ties_even() as u32;
    imageops::crop_imm(&*frame, x, y, size, size).to_image()
}

fn ensure_min_side(frame: &RgbImage, size: u32) -> Cow<'_, RgbImage> {
    let (width, height) = frame.dimensions();
    if width >= size && height >= size {
        return Cow::Borrowed(frame);
    }
    let scale = size as f64 / width.min(height) as f64;
    let new_w = ((width as f64 * scale).round() as u32).max(size);
    let new_h = ((height as f64 * scale).round() as u32).max(size);
    Cow::Owned(imageops::resize(frame, new_w, new_h, FilterType::Triangle))
}

/// Candidate `(height, width)` crops: the short side scaled by every pair of
/// ratios whose positions differ by at most `max_distort`. A side within 3 px
/// of `target` becomes `target`, never larger than the frame.
pub fn crop_sizes(height: u32, width: u32, ratios: &[f32], max_distort: usize, target: u32) -> Vec<(u32, u32)> {
    let base = height.min(width) as f32;
    let snap = |side: u32, limit: u32| {
        if side.abs_diff(target) < 3 {
            target.min(limit)
        } else {
            side
        }
    };
    let mut sizes = Vec::new();
    for (hi, rh) in ratios.iter().enumerate() {
        let crop_h = snap((base * rh) as u32, height);
        for (wi, rw) in ratios.iter().enumerate() {
            let crop_w = snap((base * rw) as u32, width);
            if hi.abs_diff(wi) <= max_distort && crop_h > 0 && crop_w > 0 {
                sizes.push((crop_h, crop_w));
            }
        }
    }
    sizes
}

/// Thirteen `(y, x)` crop origins: corners, center, edge midpoints and the
/// four quarter points.
pub fn fixed_offsets(height: u32, width: u32, crop_h: u32, crop_w: u32) -> Vec<(u32, u32)> {
    let h = (height - crop_h) / 4;
    let w = (width - crop_w) / 4;
    vec![
        (0, 0),
        (0, 4 * w),
        (4 * h, 0),
        (4 * h, 4 * w),
        (2 * h, 2 * w),
        (0, 2 * w),
        (4 * h, 2 * w),
        (2 * h, 0),
        (2 * h, 4 * w),
        (h, w),
        (h, 3 * w),
        (3 * h, w),
        (3 * h, 3 * w),
    ]
}
