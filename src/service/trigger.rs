//! Object-created event handling: every uploaded object becomes one endpoint
//! request.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::ingest::storage::ObjectLocation;
use crate::ml::engine::Classifier;
use crate::ml::pipeline::ClipReader;
use crate::service::endpoint::{Endpoint, EndpointRequest};

#[derive(Debug, Deserialize)]
struct StorageEvent {
    #[serde(rename = "Records", default)]
    records: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    s3: EventEntity,
}

#[derive(Debug, Deserialize)]
struct EventEntity {
    bucket: EventBucket,
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventBucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct EventObject {
    key: String,
}

/// Anything that accepts a serialized endpoint request.
pub trait InvokeEndpoint {
    fn invoke(&self, body: &str) -> Result<String>;
}

impl<C: Classifier, R: ClipReader> InvokeEndpoint for Endpoint<C, R> {
    fn invoke(&self, body: &str) -> Result<String> {
        self.handle_json(body)
    }
}

/// Object locations named by an event, in record order.
pub fn parse_event(body: &str) -> Result<Vec<ObjectLocation>> {
    let event: StorageEvent = serde_json::from_str(body).context("Malformed storage event")?;
    Ok(event
        .records
        .into_iter()
        .map(|r| ObjectLocation::new(&r.s3.bucket.name, &decode_object_key(&r.s3.object.key)))
        .collect())
}

/// Event keys arrive form-encoded: `+` is a space and `%XX` an escaped byte.
pub fn decode_object_key(key: &str) -> String {
    let bytes = key.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                out.push(hex_value(bytes[i + 1]) << 4 | hex_value(bytes[i + 2]));
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

pub struct TriggerHandler<E> {
    endpoint: E,
    max_frames: usize,
    table_name: Option<String>,
}

impl<E: InvokeEndpoint> TriggerHandler<E> {
    pub fn new(endpoint: E, max_frames: usize, table_name: Option<String>) -> Self {
        Self {
            endpoint,
            max_frames,
            table_name,
        }
    }

    /// Invokes the endpoint once per record, in order, stopping at the first
    /// failure. Returns the last response, or `None` for an empty event.
    pub fn handle_event(&self, body: &str) -> Result<Option<serde_json::Value>> {
        let mut last = None;
        for location in parse_event(body)? {
            let uri = location.uri();
            info!("input: {}", uri);

            let request = EndpointRequest {
                s3_video_path: uri.clone(),
                model_max_frames: self.max_frames,
                detection_table_name: self.table_name.clone(),
            };
            let response = self
                .endpoint
                .invoke(&serde_json::to_string(&request)?)
                .with_context(|| format!("Endpoint invocation failed for {}", uri))?;
            last = Some(serde_json::from_str(&response).context("Endpoint returned malformed JSON")?);
        }
        Ok(last)
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }
}
