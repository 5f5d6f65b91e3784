use std::fs::File;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tempfile::NamedTempFile;
use tracing::info;

/// Bucket and key of an object, parsed from `s3://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    /// Accepts the scheme in either case.
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("s3://")
            .or_else(|| uri.strip_prefix("S3://"))
            .ok_or_else(|| anyhow!("'{}' is not an s3:// uri", uri))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| anyhow!("'{}' has no object key", uri))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(anyhow!("'{}' has an empty bucket or key", uri));
        }
        Ok(Self::new(bucket, key))
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    /// File extension of the key, with the leading dot.
    fn extension(&self) -> String {
        Path::new(&self.key)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default()
    }
}

pub trait ObjectStore {
    /// Streams the object into `dest`, returning the byte count.
    fn get_object(&self, location: &ObjectLocation, dest: &mut dyn Write) -> Result<u64>;
}

/// Buckets are directories under `root`, keys are relative paths.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, location: &ObjectLocation) -> Result<PathBuf> {
        let relative = Path::new(&location.bucket).join(&location.key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(anyhow!("Refusing object path outside the store: {}", location.uri()));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn get_object(&self, location: &ObjectLocation, dest: &mut dyn Write) -> Result<u64> {
        let path = self.object_path(location)?;
        let mut file = File::open(&path)
            .with_context(|| format!("Object {} not found at {:?}", location.uri(), path))?;
        let copied = io::copy(&mut file, dest).context("Failed to read object")?;
        Ok(copied)
    }
}

/// Downloads an object into a uniquely named temporary file. The file is
/// removed when the returned handle drops, on success and error paths alike.
pub fn download_to_temp<S: ObjectStore + ?Sized>(store: &S, location: &ObjectLocation) -> Result<NamedTempFile> {
    let mut temp = tempfile::Builder::new()
        .prefix("video-")
        .suffix(&location.extension())
        .tempfile()
        .context("Failed to create temporary file")?;

    let bytes = store.get_object(location, temp.as_file_mut())?;
    temp.as_file_mut().flush()?;
    info!("Downloaded {} ({} bytes) to {:?}", location.uri(), bytes, temp.path());
    Ok(temp)
}
