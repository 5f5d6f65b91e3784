//! Hosted-endpoint contract: the model is loaded once, then each request
//! names a video in object storage and gets back the top-1 prediction.

use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clip::{ClipTensor, SamplingConfig};
use crate::database::record::{PredictionItem, PredictionRecord};
use crate::database::repo::ResultSink;
use crate::ingest::storage::{download_to_temp, ObjectLocation, ObjectStore};
use crate::ml::engine::{classify, Classifier};
use crate::ml::labels::ClassLabels;
use crate::ml::pipeline::ClipReader;

fn default_max_frames() -> usize {
    crate::clip::config::DEFAULT_CLIP_LENGTH
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRequest {
    #[serde(rename = "S3_VIDEO_PATH")]
    pub s3_video_path: String,
    #[serde(rename = "MODEL_MAX_FRAMES", default = "default_max_frames")]
    pub model_max_frames: usize,
    #[serde(rename = "DETECTION_TABLE_NAME", default, skip_serializing_if = "Option::is_none")]
    pub detection_table_name: Option<String>,
}

pub struct Endpoint<C, R> {
    classifier: C,
    reader: R,
    labels: ClassLabels,
    store: Box<dyn ObjectStore>,
    sink: Option<ResultSink>,
    sampling: SamplingConfig,
}

impl<C: Classifier, R: ClipReader> Endpoint<C, R> {
    pub fn new(classifier: C, reader: R, labels: ClassLabels, store: Box<dyn ObjectStore>) -> Self {
        Self {
            classifier,
            reader,
            labels,
            store,
            sink: None,
            sampling: SamplingConfig::default(),
        }
    }

    pub fn with_sink(mut self, sink: ResultSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Base sampling parameters; the clip length comes from each request.
    pub fn with_sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    fn read_video(&self, location: &ObjectLocation, max_frames: usize) -> Result<ClipTensor> {
        let cfg = self.sampling.clone().with_clip_length(max_frames);
        cfg.validate()?;
        // Dropped at the end of this scope whatever the outcome.
        let download = download_to_temp(self.store.as_ref(), location)?;
        self.reader.read_clip(download.path(), &cfg)
    }

    /// Runs one request end to end and returns the stored item.
    pub fn handle(&self, request: &EndpointRequest) -> Result<PredictionItem> {
        let location = ObjectLocation::parse(&request.s3_video_path)?;
        if request.model_max_frames == 0 {
            return Err(anyhow!("MODEL_MAX_FRAMES must be > 0"));
        }

        let start = Instant::now();
        let tensor = self.read_video(&location, request.model_max_frames)?;
        info!("Loading video time={:.3}s", start.elapsed().as_secs_f64());

        let start = Instant::now();
        let prediction = classify(&self.classifier, &self.labels, &tensor)?;
        info!("Getting predictions time={:.3}s", start.elapsed().as_secs_f64());

        let record = PredictionRecord::new(&request.s3_video_path, &prediction, Utc::now());
        info!(
            "Predicted {} ({}) for {}",
            record.predicted, record.probability, record.s3_path
        );

        if let Some(table) = &request.detection_table_name {
            let sink = self
                .sink
                .as_ref()
                .ok_or_else(|| anyhow!("Request names table '{}' but no result store is configured", table))?;
            let start = Instant::now();
            let status = sink.save(table, &record)?;
            info!(
                "Saving to {} time={:.3}s status={}",
                table,
                start.elapsed().as_secs_f64(),
                status.status_code
            );
            if !status.is_success() {
                return Err(anyhow!("Failed to store prediction: {} {}", status.status_code, status.message));
            }
        }

        Ok(record.to_item())
    }

    /// JSON in, JSON out.
    pub fn handle_json(&self, body: &str) -> Result<String> {
        let request: EndpointRequest = serde_json::from_str(body).context("Malformed endpoint request")?;
        let item = self.handle(&request)?;
        Ok(serde_json::to_string(&item)?)
    }

    pub fn sink(&self) -> Option<&ResultSink> {
        self.sink.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ingest::storage::LocalObjectStore;
    use crate::ml::engine::tests::FixedClassifier;
    use ndarray::Array5;
    use std::cell::RefCell;
    use std::fs;
    use std::path::{Path, PathBuf};

    /// Records the path and clip length it was asked to read.
    #[derive(Default)]
    pub(crate) struct RecordingReader {
        pub seen: RefCell<Vec<(PathBuf, usize, bool)>>,
    }

    impl ClipReader for RecordingReader {
        fn read_clip(&self, path: &Path, cfg: &SamplingConfig) -> Result<ClipTensor> {
            self.seen
                .borrow_mut()
                .push((path.to_path_buf(), cfg.clip_length, path.exists()));
            Ok(ClipTensor::Video(Array5::zeros((1, 3, cfg.clip_length, 2, 2))))
        }
    }

    pub(crate) fn endpoint_with_video(root: &Path) -> Endpoint<FixedClassifier, RecordingReader> {
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("b/k.mp4"), b"not really a video").unwrap();
        let labels = ClassLabels::parse("ApplyEyeMakeup\nApplyLipstick\nArchery").unwrap();
        Endpoint::new(
            FixedClassifier(vec![0.05, 0.1079, 0.8421]),
            RecordingReader::default(),
            labels,
            Box::new(LocalObjectStore::new(root)),
        )
        .with_sink(ResultSink::in_memory().unwrap())
    }

    #[test]
    fn test_request_defaults() {
        let req: EndpointRequest = serde_json::from_str(r#"{"S3_VIDEO_PATH":"s3://b/k.mp4"}"#).unwrap();
        assert_eq!(req.model_max_frames, 32);
        assert_eq!(req.detection_table_name, None);
    }

    #[test]
    fn test_handle_predicts_and_persists() {
        let root = tempfile::tempdir().unwrap();
        let endpoint = endpoint_with_video(root.path());

        let body = r#"{"S3_VIDEO_PATH":"s3://b/k.mp4","MODEL_MAX_FRAMES":16,"DETECTION_TABLE_NAME":"detections"}"#;
        let response: serde_json::Value = serde_json::from_str(&endpoint.handle_json(body).unwrap()).unwrap();
        assert_eq!(response["S3Path"]["S"], "s3://b/k.mp4");
        assert_eq!(response["Predicted"]["S"], "Archery");
        assert_eq!(response["Probability"]["S"], "0.8421");
        assert!(response["DateCreatedUTC"]["S"].as_str().unwrap().ends_with("UTC+0000"));

        let stored = endpoint.sink().unwrap().get("detections", "s3://b/k.mp4").unwrap().unwrap();
        assert_eq!(stored.predicted, "Archery");

        let seen = endpoint.reader.seen.borrow();
        let (path, clip_length, existed) = &seen[0];
        assert_eq!(*clip_length, 16);
        assert!(*existed);
        // the temporary download is gone once the request finishes
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_file_removed_when_prediction_fails() {
        let root = tempfile::tempdir().unwrap();
        let mut endpoint = endpoint_with_video(root.path());
        endpoint.labels = ClassLabels::parse("OnlyOne").unwrap();

        let req = EndpointRequest {
            s3_video_path: "s3://b/k.mp4".to_string(),
            model_max_frames: 8,
            detection_table_name: None,
        };
        assert!(endpoint.handle(&req).is_err());
        let seen = endpoint.reader.seen.borrow();
        assert!(!seen[0].0.exists());
    }

    #[test]
    fn test_table_without_sink_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let mut endpoint = endpoint_with_video(root.path());
        endpoint.sink = None;
        let body = r#"{"S3_VIDEO_PATH":"s3://b/k.mp4","DETECTION_TABLE_NAME":"detections"}"#;
        assert!(endpoint.handle_json(body).is_err());
    }

    #[test]
    fn test_rejects_bad_requests() {
        let root = tempfile::tempdir().unwrap();
        let endpoint = endpoint_with_video(root.path());
        assert!(endpoint.handle_json("{}").is_err());
        assert!(endpoint.handle_json(r#"{"S3_VIDEO_PATH":"b/k.mp4"}"#).is_err());
        assert!(endpoint
            .handle_json(r#"{"S3_VIDEO_PATH":"s3://b/k.mp4","MODEL_MAX_FRAMES":0}"#)
            .is_err());
        assert!(endpoint.handle_json(r#"{"S3_VIDEO_PATH":"s3://b/missing.mp4"}"#).is_err());
    }

    #[test]
    fn test_oversized_max_frames_fail_before_download() {
        let root = tempfile::tempdir().unwrap();
        let endpoint = endpoint_with_video(root.path());
        let body = format!(r#"{{"S3_VIDEO_PATH":"s3://b/k.mp4","MODEL_MAX_FRAMES":{}}}"#, usize::MAX);
        let err = endpoint.handle_json(&body).unwrap_err();
        assert!(format!("{err:#}").contains("clip_length"));
        assert!(endpoint.reader.seen.borrow().is_empty());
    }
}
