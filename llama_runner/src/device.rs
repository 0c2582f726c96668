use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

/// Number of layers handed to llama.cpp to offload a whole model.
const ALL_LAYERS: u32 = 999;

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Gpu,
}

/// What the model actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu,
}

impl DevicePreference {
    /// Pick a device given whether this llama.cpp build can offload to an accelerator.
    pub fn resolve(self, gpu_supported: bool) -> Result<Device> {
        match (self, gpu_supported) {
            (DevicePreference::Auto, true) | (DevicePreference::Gpu, true) => Ok(Device::Gpu),
            (DevicePreference::Auto, false) | (DevicePreference::Cpu, _) => Ok(Device::Cpu),
            (DevicePreference::Gpu, false) => {
                bail!("GPU requested but this llama.cpp build has no GPU offload support")
            }
        }
    }
}

impl Device {
    pub fn gpu_layers(self) -> u32 {
        match self {
            Device::Cpu => 0,
            Device::Gpu => ALL_LAYERS,
        }
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "gpu" | "cuda" | "metal" => Ok(DevicePreference::Gpu),
            other => Err(format!("unknown device '{other}' (expected auto, cpu or gpu)")),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => write!(f, "auto"),
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Gpu => write!(f, "gpu"),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Gpu => write!(f, "gpu"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_prefers_accelerator() {
        assert_eq!(DevicePreference::Auto.resolve(true).unwrap(), Device::Gpu);
        assert_eq!(DevicePreference::Auto.resolve(false).unwrap(), Device::Cpu);
    }

    #[test]
    fn forced_gpu_without_support_fails() {
        assert!(DevicePreference::Gpu.resolve(false).is_err());
        assert_eq!(DevicePreference::Cpu.resolve(true).unwrap(), Device::Cpu);
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("CUDA".parse::<DevicePreference>().unwrap(), DevicePreference::Gpu);
        assert_eq!(" cpu ".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn cpu_offloads_nothing() {
        assert_eq!(Device::Cpu.gpu_layers(), 0);
        assert!(Device::Gpu.gpu_layers() > 0);
    }
}
