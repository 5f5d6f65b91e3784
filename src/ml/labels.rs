use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Class names indexed by the model's output position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("Class label list is empty"));
        }
        Ok(Self { labels })
    }

    /// Reads a newline-separated label file. Entries are trimmed and blank
    /// lines skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read class labels from {:?}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let labels = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Self::new(labels)
    }

    pub fn get(&self, class_id: usize) -> Result<&str> {
        self.labels
            .get(class_id)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("Class id {} out of range for {} labels", class_id, self.labels.len()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
