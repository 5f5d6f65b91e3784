//! Video classification datasets described by a setting file.
//!
//! Each non-blank line of the setting file reads `path num_frames label`,
//! where `path` is relative to the dataset root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rand::Rng;

use crate::clip::loader::{FrameDirectory, VideoFile};
use crate::clip::{prepare_clip, ClipTensor, Mode, SamplingConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSample {
    pub path: PathBuf,
    pub frame_count: usize,
    pub label: usize,
}

pub fn parse_setting(content: &str) -> Result<Vec<VideoSample>> {
    let mut samples = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [path, frames, label] = fields.as_slice() else {
            return Err(anyhow!(
                "setting line {}: expected 'path num_frames label', got '{}'",
                line_no + 1,
                line
            ));
        };
        let frame_count = frames
            .parse()
            .with_context(|| format!("setting line {}: bad frame count '{}'", line_no + 1, frames))?;
        let label = label
            .parse()
            .with_context(|| format!("setting line {}: bad label '{}'", line_no + 1, label))?;
        samples.push(VideoSample {
            path: PathBuf::from(path),
            frame_count,
            label,
        });
    }
    Ok(samples)
}

/// How a sample's path is turned into frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleFormat {
    /// A directory of extracted frames, `img_00001.jpg` onwards.
    Frames,
    /// An encoded video at `path.<ext>`.
    Video { extension: String },
}

/// `path.<ext>`, appended so dots already in the sample name are kept.
fn video_path(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

pub struct VideoDataset {
    root: PathBuf,
    samples: Vec<VideoSample>,
    sampling: SamplingConfig,
    mode: Mode,
    format: SampleFormat,
}

impl VideoDataset {
    pub fn new(root: impl Into<PathBuf>, samples: Vec<VideoSample>, sampling: SamplingConfig, mode: Mode) -> Self {
        Self {
            root: root.into(),
            samples,
            sampling,
            mode,
            format: SampleFormat::Frames,
        }
    }

    pub fn from_setting_file(root: &Path, setting: &Path, sampling: SamplingConfig, mode: Mode) -> Result<Self> {
        let content = fs::read_to_string(setting)
            .with_context(|| format!("Failed to read setting file {:?}", setting))?;
        let samples = parse_setting(&content)?;
        if samples.is_empty() {
            return Err(anyhow!("Setting file {:?} lists no samples", setting));
        }
        sampling.validate()?;
        Ok(Self::new(root, samples, sampling, mode))
    }

    pub fn with_format(mut self, format: SampleFormat) -> Self {
        self.format = format;
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[VideoSample] {
        &self.samples
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn num_classes(&self) -> usize {
        self.samples.iter().map(|s| s.label + 1).max().unwrap_or(0)
    }

    /// Loads sample `index` as a clip tensor with its label.
    pub fn get<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<(ClipTensor, usize)> {
        let sample = self
            .samples
            .get(index)
            .ok_or_else(|| anyhow!("sample {} out of range ({} samples)", index, self.samples.len()))?;
        let path = self.root.join(&sample.path);

        let tensor = match &self.format {
            SampleFormat::Frames => {
                let source = FrameDirectory::new(&path, sample.frame_count);
                prepare_clip(&source, &self.sampling, self.mode, rng)
            }
            SampleFormat::Video { extension } => VideoFile::open(&video_path(&path, extension))
                .and_then(|source| prepare_clip(&source, &self.sampling, self.mode, rng)),
        }
        .with_context(|| format!("Failed to load sample {:?}", path))?;

        Ok((tensor, sample.label))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Writes `videos` frame directories of `frames` 12x10 frames each under
    /// `root` and returns the matching setting text. Labels cycle over three
    /// classes.
    pub(crate) fn write_frame_dataset(root: &Path, videos: usize, frames: usize) -> String {
        let mut setting = String::new();
        for v in 0..videos {
            let dir = root.join(format!("class{}/v_{:02}", v % 3, v));
            fs::create_dir_all(&dir).unwrap();
            for f in 0..frames {
                let frame = RgbImage::from_pixel(12, 10, Rgb([f as u8, v as u8, 0]));
                frame.save(dir.join(format!("img_{:05}.jpg", f + 1))).unwrap();
            }
            setting.push_str(&format!("class{}/v_{:02} {} {}\n", v % 3, v, frames, v % 3));
        }
        setting
    }

    #[test]
    fn test_parse_setting() {
        let samples = parse_setting("ApplyEyeMakeup/v_01 120 0\n\n  Archery/v_07 96 2  \n").unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(
            samples[1],
            VideoSample {
                path: PathBuf::from("Archery/v_07"),
                frame_count: 96,
                label: 2,
            }
        );
    }

    #[test]
    fn test_parse_setting_reports_bad_lines() {
        let err = parse_setting("a 10 0\nb ten 1\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
        assert!(parse_setting("only_two 10\n").is_err());
    }

    #[test]
    fn test_loads_frame_directory_sample() {
        let root = tempfile::tempdir().unwrap();
        let setting = write_frame_dataset(root.path(), 2, 6);
        let setting_path = root.path().join("train.txt");
        fs::write(&setting_path, setting).unwrap();

        let sampling = SamplingConfig::default().with_clip_length(4).with_crop_size(8);
        let dataset = VideoDataset::from_setting_file(root.path(), &setting_path, sampling, Mode::Train).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.num_classes(), 2);

        let (tensor, label) = dataset.get(1, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 4, 8, 8]);
        assert_eq!(label, 1);
        assert!(dataset.get(2, &mut StdRng::seed_from_u64(3)).is_err());
    }

    #[test]
    fn test_missing_frames_fail_with_sample_path() {
        let root = tempfile::tempdir().unwrap();
        let dataset = VideoDataset::new(
            root.path(),
            parse_setting("nowhere 8 0").unwrap(),
            SamplingConfig::default().with_clip_length(2).with_crop_size(4),
            Mode::Val,
        );
        let err = dataset.get(0, &mut StdRng::seed_from_u64(0)).unwrap_err();
        assert!(format!("{err:#}").contains("nowhere"));
    }

    #[test]
    fn test_video_format_opens_path_with_extension() {
        let root = tempfile::tempdir().unwrap();
        let dataset = VideoDataset::new(
            root.path(),
            parse_setting("Archery/v_07.c01 96 2").unwrap(),
            SamplingConfig::default().with_clip_length(2).with_crop_size(4),
            Mode::Train,
        )
        .with_format(SampleFormat::Video {
            extension: "avi".to_string(),
        });
        assert_eq!(
            video_path(&root.path().join("Archery/v_07.c01"), "avi"),
            root.path().join("Archery/v_07.c01.avi")
        );

        let err = dataset.get(0, &mut StdRng::seed_from_u64(0)).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("v_07.c01.avi does not exist"), "{message}");
    }

    #[test]
    fn test_empty_setting_file_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let setting_path = root.path().join("empty.txt");
        fs::write(&setting_path, "\n\n").unwrap();
        let result = VideoDataset::from_setting_file(root.path(), &setting_path, SamplingConfig::default(), Mode::Train);
        assert!(result.is_err());
    }
}
