use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array2, Axis, Ix2};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use crate::clip::ClipTensor;
use crate::ml::device::Device;
use crate::ml::labels::ClassLabels;

/// Maps a clip tensor to a `(batch, classes)` probability matrix.
pub trait Classifier {
    fn predict(&self, input: &ClipTensor) -> Result<Array2<f32>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_id: usize,
    pub label: String,
    pub probability: f32,
}

pub struct InferenceEngine {
    session: Session,
    apply_softmax: bool,
}

impl InferenceEngine {
    pub fn new(model_path: &Path, device: &Device) -> Result<Self> {
        // A second init is a no-op for our purposes, the first environment wins.
        let _ = ort::init()
            .with_name("action-recognition-inference")
            .commit();

        let builder = Session::builder()?;
        let builder = match device {
            Device::Cpu => builder,
            Device::Cuda { device_id } => builder.with_execution_providers([
                CUDAExecutionProvider::default()
                    .with_device_id(*device_id)
                    .build(),
            ])?,
        };

        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model from {:?}", model_path))?;

        info!("Loaded model {:?} on {}", model_path, device);

        Ok(Self {
            session,
            apply_softmax: true,
        })
    }

    /// Set to false when the exported graph already ends in a softmax.
    pub fn with_softmax(mut self, apply_softmax: bool) -> Self {
        self.apply_softmax = apply_softmax;
        self
    }
}

impl Classifier for InferenceEngine {
    fn predict(&self, input: &ClipTensor) -> Result<Array2<f32>> {
        let tensor = Tensor::from_array(input.clone().into_dyn())?.into_dyn();
        let outputs = self.session.run(ort::inputs![tensor]?)?;

        let scores = outputs[0]
            .try_extract_tensor::<f32>()?
            .into_dimensionality::<Ix2>()
            .context("Model output is not a (batch, classes) matrix")?
            .to_owned();

        Ok(if self.apply_softmax {
            softmax_rows(scores)
        } else {
            scores
        })
    }
}

/// Row-wise softmax, shifted by the row maximum for stability.
pub fn softmax_rows(mut scores: Array2<f32>) -> Array2<f32> {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    scores
}

/// Arg-max and max of the first row.
pub fn top1(probs: &Array2<f32>) -> Result<(usize, f32)> {
    if probs.nrows() == 0 {
        return Err(anyhow!("Model returned no rows"));
    }
    probs
        .row(0)
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
        .ok_or_else(|| anyhow!("Model returned an empty class vector"))
}

/// Runs the classifier and resolves the top-1 label.
pub fn classify<C: Classifier + ?Sized>(
    classifier: &C,
    labels: &ClassLabels,
    input: &ClipTensor,
) -> Result<Prediction> {
    let probs = classifier.predict(input)?;
    let (class_id, probability) = top1(&probs)?;
    let label = labels.get(class_id)?.to_string();
    Ok(Prediction {
        class_id,
        label,
        probability,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::{array, Array4};

    /// Returns fixed probabilities regardless of input.
    pub(crate) struct FixedClassifier(pub Vec<f32>);

    impl Classifier for FixedClassifier {
        fn predict(&self, input: &ClipTensor) -> Result<Array2<f32>> {
            let mut out = Array2::zeros((input.batch_size(), self.0.len()));
            for mut row in out.axis_iter_mut(Axis(0)) {
                row.assign(&ndarray::ArrayView1::from(&self.0));
            }
            Ok(out)
        }
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let probs = softmax_rows(array![[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
        for row in probs.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!(probs[[0, 2]] > probs[[0, 1]]);
        assert!((probs[[1, 0]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_top1_picks_first_maximum() {
        assert_eq!(top1(&array![[0.1, 0.7, 0.7, 0.2]]).unwrap(), (1, 0.7));
        assert!(top1(&Array2::<f32>::zeros((0, 3))).is_err());
        assert!(top1(&Array2::<f32>::zeros((1, 0))).is_err());
    }

    #[test]
    fn test_classify_resolves_label() {
        let labels = ClassLabels::parse("ApplyEyeMakeup\nApplyLipstick\nArchery").unwrap();
        let classifier = FixedClassifier(vec![0.05, 0.1079, 0.8421]);
        let input = ClipTensor::Image(Array4::zeros((1, 3, 2, 2)));
        let prediction = classify(&classifier, &labels, &input).unwrap();
        assert_eq!(prediction.class_id, 2);
        assert_eq!(prediction.label, "Archery");
        assert_eq!(prediction.probability, 0.8421);
    }

    #[test]
    fn test_classify_rejects_unknown_class() {
        let labels = ClassLabels::parse("OnlyOne").unwrap();
        let classifier = FixedClassifier(vec![0.1, 0.9]);
        let input = ClipTensor::Image(Array4::zeros((1, 3, 2, 2)));
        assert!(classify(&classifier, &labels, &input).is_err());
    }
}
