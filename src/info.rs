//! Human-readable platform and device reports.

use crate::device::{DeviceInfo, Platform};
use std::fmt::Write;

pub use crate::device::status_str;

/// Describe every platform and its devices. `complete` adds extensions and
/// memory limits.
pub fn opencl_info(complete: bool) -> String {
    let platforms = Platform::all();
    let mut out = String::new();
    let _ = writeln!(out, "Number of platforms: {}", platforms.len());

    for (id, platform) in platforms.iter().enumerate() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Platform #{}", id);
        out.push_str(&indent(&platform_info(platform), 2));
        if complete {
            let _ = writeln!(out, "  Profile: {}", platform.profile);
            let _ = writeln!(out, "  Extensions: {}", platform.extensions.join(" "));
        }

        let devices = platform.devices();
        let _ = writeln!(out, "  Number of devices: {}", devices.len());
        for (device_id, device) in devices.iter().enumerate() {
            let _ = writeln!(out, "  Device #{}", device_id);
            out.push_str(&indent(&device_info(device, complete), 4));
        }
    }

    out
}

pub fn platform_info(platform: &Platform) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Name: {}", platform.name);
    let _ = writeln!(out, "Vendor: {}", platform.vendor);
    let _ = writeln!(out, "Version: {}", platform.version);
    out
}

pub fn device_info(device: &DeviceInfo, complete: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Name: {}", device.name);
    let _ = writeln!(out, "Type: {}", device.device_type);
    let _ = writeln!(out, "Vendor: {}", device.vendor);
    let _ = writeln!(out, "Version: {}", device.version);
    let _ = writeln!(out, "Compute units: {}", device.compute_units);
    let _ = writeln!(out, "Max work-group size: {}", device.max_work_group_size);

    if complete {
        let sizes = device.max_work_item_sizes.map(|s| s.to_string()).join(" x ");
        let _ = writeln!(out, "Driver version: {}", device.driver_version);
        let _ = writeln!(out, "Max work-item dimensions: {}", device.max_work_item_dimensions);
        let _ = writeln!(out, "Max work-item sizes: {}", sizes);
        let _ = writeln!(out, "Local memory: {} KiB", device.local_mem_size / 1024);
        let _ = writeln!(out, "Global memory: {} MiB", device.global_mem_size / (1024 * 1024));
        let _ = writeln!(out, "Max allocation: {} MiB", device.max_mem_alloc_size / (1024 * 1024));
        let _ = writeln!(out, "Extensions: {}", device.extensions.join(" "));
    }

    out
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines().map(|line| format!("{}{}\n", pad, line)).collect()
}
