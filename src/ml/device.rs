use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

/// Compute device for model loading, passed explicitly instead of being
/// picked up from process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Cuda { device_id: i32 },
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda { device_id } => write!(f, "cuda:{device_id}"),
        }
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    /// Accepts `cpu`, `cuda`, `gpu` and `cuda:<id>` / `gpu:<id>`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.split_once(':') {
            None if s == "cpu" => Ok(Device::Cpu),
            None if s == "cuda" || s == "gpu" => Ok(Device::Cuda { device_id: 0 }),
            Some((kind, id)) if kind == "cuda" || kind == "gpu" => {
                let device_id = id
                    .parse::<i32>()
                    .map_err(|_| anyhow!("Invalid device id '{}'", id))?;
                Ok(Device::Cuda { device_id })
            }
            _ => Err(anyhow!("Unknown device '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("GPU".parse::<Device>().unwrap(), Device::Cuda { device_id: 0 });
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Cuda { device_id: 2 });
        assert!("tpu".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let device = Device::Cuda { device_id: 1 };
        assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
    }
}
