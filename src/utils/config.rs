use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::clip::config::DEFAULT_CLIP_LENGTH;
use crate::ml::device::Device;

pub const ENV_FILE: &str = ".env";
pub const MODEL_FILE: &str = "model.onnx";
pub const CLASSES_FILE: &str = "classes.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub model: PathBuf,
    pub classes: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            model: dir.join(MODEL_FILE),
            classes: dir.join(CLASSES_FILE),
        }
    }

    fn exist(&self) -> bool {
        self.model.is_file() && self.classes.is_file()
    }
}

/// Runtime settings. Process environment wins over the `.env` file.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub endpoint_name: Option<String>,
    pub model_max_frames: usize,
    pub detection_table_name: Option<String>,
    pub model_dir: Option<PathBuf>,
    pub storage_root: PathBuf,
    pub database_path: PathBuf,
    pub device: Device,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let env_path = Path::new(ENV_FILE);
        let file_vars = if env_path.exists() {
            read_env_file(env_path)?
        } else {
            HashMap::new()
        };
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| file_vars.get(key).cloned()))
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let model_max_frames = match non_empty("MODEL_MAX_FRAMES") {
            Some(v) => v
                .parse()
                .with_context(|| format!("MODEL_MAX_FRAMES is not a number: '{}'", v))?,
            None => DEFAULT_CLIP_LENGTH,
        };
        let device = match non_empty("DEVICE") {
            Some(v) => v.parse()?,
            None => Device::default(),
        };

        Ok(Self {
            endpoint_name: non_empty("ENDPOINT_NAME"),
            model_max_frames,
            detection_table_name: non_empty("DETECTION_TABLE_NAME"),
            model_dir: non_empty("MODEL_DIR").map(PathBuf::from),
            storage_root: non_empty("STORAGE_ROOT").map_or_else(|| PathBuf::from("storage"), PathBuf::from),
            database_path: non_empty("DATABASE_PATH").map_or_else(|| PathBuf::from("predictions.db"), PathBuf::from),
            device,
        })
    }

    /// Locates the model artifacts. Without a configured directory the
    /// filesystem is searched and the result remembered in `.env`.
    pub fn model_paths(&self) -> Result<ModelPaths> {
        if let Some(dir) = &self.model_dir {
            let paths = ModelPaths::in_dir(dir);
            if !paths.exist() {
                return Err(anyhow!(
                    "MODEL_DIR {:?} must contain {} and {}",
                    dir,
                    MODEL_FILE,
                    CLASSES_FILE
                ));
            }
            return Ok(paths);
        }

        info!("MODEL_DIR not set. Searching filesystem for {}...", MODEL_FILE);
        let model = find_file(&std::env::current_dir()?, MODEL_FILE, 5)?;
        let dir = model
            .parent()
            .ok_or_else(|| anyhow!("{:?} has no parent directory", model))?;
        let paths = ModelPaths::in_dir(dir);
        if !paths.exist() {
            return Err(anyhow!("Found {:?} but no {} beside it", model, CLASSES_FILE));
        }
        info!("Found model directory: {:?}", dir);

        save_to_env(Path::new(ENV_FILE), "MODEL_DIR", &dir.display().to_string())?;
        info!("Saved MODEL_DIR to {}", ENV_FILE);
        Ok(paths)
    }
}

/// Searches below `root`, then below its parent.
fn find_file(root: &Path, filename: &str, max_depth: usize) -> Result<PathBuf> {
    let search = |dir: &Path| {
        WalkDir::new(dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == filename)
            .map(|e| e.path().to_path_buf())
    };

    if let Some(found) = search(root) {
        return Ok(found);
    }
    if let Some(found) = root.parent().and_then(search) {
        return Ok(found);
    }
    Err(anyhow!("Could not find file '{}' in nearby directories.", filename))
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut vars = HashMap::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            vars.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    debug!("Read {} entries from {:?}", vars.len(), path);
    Ok(vars)
}

/// Sets `key` in the env file, keeping every other line.
fn save_to_env(path: &Path, key: &str, value: &str) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path)?
    } else {
        String::new()
    };

    let mut lines: Vec<String> = existing
        .lines()
        .filter(|l| l.split_once('=').map(|(k, _)| k.trim()) != Some(key))
        .map(str::to_string)
        .collect();
    lines.push(format!("{}={}", key, value));

    let mut file = File::create(path).context("Failed to create .env file")?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_save_and_load_env() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".env");
        fs::write(&path, "# models\nDEVICE=cuda:1\nMODEL_DIR=/old\n")?;

        save_to_env(&path, "MODEL_DIR", "/opt/models/i3d")?;

        let content = fs::read_to_string(&path)?;
        assert!(content.contains("MODEL_DIR=/opt/models/i3d"));
        assert!(!content.contains("/old"));
        assert!(content.contains("# models"));

        let loaded = read_env_file(&path)?;
        assert_eq!(loaded.get("MODEL_DIR").map(String::as_str), Some("/opt/models/i3d"));
        assert_eq!(loaded.get("DEVICE").map(String::as_str), Some("cuda:1"));
        assert_eq!(loaded.len(), 2);
        Ok(())
    }

    #[test]
    fn test_settings_defaults() -> Result<()> {
        let settings = Settings::from_lookup(|_| None)?;
        assert_eq!(settings.model_max_frames, 32);
        assert_eq!(settings.detection_table_name, None);
        assert_eq!(settings.device, Device::Cpu);
        assert_eq!(settings.database_path, PathBuf::from("predictions.db"));
        Ok(())
    }

    #[test]
    fn test_settings_from_values() -> Result<()> {
        let settings = Settings::from_lookup(lookup(&[
            ("ENDPOINT_NAME", "i3d-ucf101"),
            ("MODEL_MAX_FRAMES", "16"),
            ("DETECTION_TABLE_NAME", "detections"),
            ("DEVICE", "cuda:0"),
            ("STORAGE_ROOT", " "),
        ]))?;
        assert_eq!(settings.endpoint_name.as_deref(), Some("i3d-ucf101"));
        assert_eq!(settings.model_max_frames, 16);
        assert_eq!(settings.detection_table_name.as_deref(), Some("detections"));
        assert_eq!(settings.device, Device::Cuda { device_id: 0 });
        assert_eq!(settings.storage_root, PathBuf::from("storage"));

        assert!(Settings::from_lookup(lookup(&[("MODEL_MAX_FRAMES", "many")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("DEVICE", "tpu")])).is_err());
        Ok(())
    }

    #[test]
    fn test_model_paths_from_configured_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut settings = Settings::from_lookup(|_| None)?;
        settings.model_dir = Some(dir.path().to_path_buf());
        assert!(settings.model_paths().is_err());

        fs::write(dir.path().join(MODEL_FILE), b"onnx")?;
        fs::write(dir.path().join(CLASSES_FILE), "Archery\n")?;
        let paths = settings.model_paths()?;
        assert_eq!(paths.model, dir.path().join(MODEL_FILE));
        assert_eq!(paths.classes, dir.path().join(CLASSES_FILE));
        Ok(())
    }

    #[test]
    fn test_find_file_searches_subdirectories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("models/i3d");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join(MODEL_FILE), b"onnx")?;

        assert_eq!(find_file(dir.path(), MODEL_FILE, 5)?, nested.join(MODEL_FILE));
        assert!(find_file(&nested, "absent.onnx", 1).is_err());
        Ok(())
    }
}
