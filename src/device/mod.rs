//! Host device model.
//!
//! The host device is a reference accelerator: programs are built by a
//! front end over kernel source text and linked against native kernel bodies
//! from a [`KernelLibrary`]; commands execute on a dedicated in-order device
//! thread.

pub mod buffer;
pub mod command_queue;
pub mod event;
pub mod kernel;
mod preprocess;
pub mod program;
pub mod range;
pub mod status;

pub use buffer::{DeviceBuffer, MemAccess};
pub use command_queue::CommandQueue;
pub use event::{Event, EventStatus};
pub use kernel::{Kernel, KernelArgs, KernelFn, KernelLibrary, WorkItem};
pub use program::{AddressSpace, BuildOptions, KernelDecl, Param, ParamKind, Program};
pub use range::{Geometry, NdRange};
pub use status::{status_str, Status};

use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Cpu,
    Gpu,
    Accelerator,
    Custom,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Gpu => "GPU",
            DeviceType::Accelerator => "Accelerator",
            DeviceType::Custom => "Custom",
        };
        f.write_str(name)
    }
}

/// Capabilities and limits reported by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceType,
    pub version: String,
    pub driver_version: String,
    pub compute_units: u32,
    pub max_work_group_size: usize,
    pub max_work_item_dimensions: u32,
    pub max_work_item_sizes: [usize; 3],
    pub local_mem_size: u64,
    pub global_mem_size: u64,
    pub max_mem_alloc_size: u64,
    pub extensions: Vec<String>,
}

impl DeviceInfo {
    /// The host CPU device.
    pub fn host() -> Self {
        Self {
            name: "Host CPU".to_string(),
            vendor: "ndqueue".to_string(),
            device_type: DeviceType::Cpu,
            version: "OpenCL 1.2 ndqueue".to_string(),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            compute_units: num_cpus::get() as u32,
            max_work_group_size: 1024,
            max_work_item_dimensions: 3,
            max_work_item_sizes: [1024, 1024, 64],
            local_mem_size: 64 * 1024,
            global_mem_size: 4 * 1024 * 1024 * 1024,
            max_mem_alloc_size: 1024 * 1024 * 1024,
            extensions: vec![
                "cl_khr_byte_addressable_store".to_string(),
                "cl_khr_global_int32_base_atomics".to_string(),
                "cl_khr_fp64".to_string(),
            ],
        }
    }
}

/// A platform and the devices it exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub profile: String,
    pub extensions: Vec<String>,
    devices: Vec<DeviceInfo>,
}

impl Platform {
    /// All platforms available to this process.
    pub fn all() -> Vec<Platform> {
        vec![Platform::host()]
    }

    pub fn host() -> Self {
        Self {
            name: "ndqueue Host Platform".to_string(),
            vendor: "ndqueue".to_string(),
            version: "OpenCL 1.2 ndqueue".to_string(),
            profile: "FULL_PROFILE".to_string(),
            extensions: vec!["cl_khr_icd".to_string()],
            devices: vec![DeviceInfo::host()],
        }
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }
}

fn matches_name(candidate: &str, wanted: Option<&str>) -> bool {
    match wanted {
        Some(wanted) => candidate.to_lowercase().contains(&wanted.to_lowercase()),
        None => true,
    }
}

/// Pick the first platform and device whose names contain the given
/// substrings, ignoring case. `None` accepts anything.
pub fn select(
    platforms: &[Platform],
    platform_name: Option<&str>,
    device_name: Option<&str>,
) -> Result<(Platform, DeviceInfo)> {
    let platform = platforms
        .iter()
        .find(|p| matches_name(&p.name, platform_name))
        .ok_or_else(|| {
            Error::DeviceNotFound(format!("no platform matching '{}'", platform_name.unwrap_or("")))
        })?;

    let device = platform
        .devices()
        .iter()
        .find(|d| matches_name(&d.name, device_name))
        .ok_or_else(|| {
            Error::DeviceNotFound(format!(
                "no device matching '{}' on platform '{}'",
                device_name.unwrap_or(""),
                platform.name
            ))
        })?;

    Ok((platform.clone(), device.clone()))
}

/// State shared by everything created on one device.
#[derive(Debug, Clone)]
pub(crate) struct DeviceContext {
    pub platform: Platform,
    pub device: DeviceInfo,
    pub metrics: Arc<Metrics>,
}

impl DeviceContext {
    pub fn new(platform: Platform, device: DeviceInfo) -> Self {
        Self {
            platform,
            device,
            metrics: Arc::new(Metrics::new()),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> DeviceContext {
    DeviceContext::new(Platform::host(), DeviceInfo::host())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_defaults_to_first() {
        let (platform, device) = select(&Platform::all(), None, None).unwrap();
        assert_eq!(platform.name, "ndqueue Host Platform");
        assert_eq!(device.name, "Host CPU");
    }

    #[test]
    fn test_select_is_case_insensitive_substring() {
        let (_, device) = select(&Platform::all(), Some("HOST"), Some("cpu")).unwrap();
        assert_eq!(device.device_type, DeviceType::Cpu);
    }

    #[test]
    fn test_select_missing_device() {
        let err = select(&Platform::all(), None, Some("Radeon")).unwrap_err();
        assert_eq!(err.status(), Some(Status::DeviceNotFound));

        let err = select(&Platform::all(), Some("NVIDIA CUDA"), None).unwrap_err();
        assert!(err.to_string().contains("NVIDIA CUDA"));
    }

    #[test]
    fn test_host_limits_are_consistent() {
        let device = DeviceInfo::host();
        assert!(device.compute_units >= 1);
        assert!(device.max_work_item_sizes.iter().all(|&s| s <= device.max_work_group_size));
        assert!(device.max_mem_alloc_size <= device.global_mem_size);
    }
}
