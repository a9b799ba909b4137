//! Hardware capability probe.
//!
//! Detects CPU, memory and (coarsely) GPU facts once per process; profile
//! selection and memory-pressure checks read from here. Re-detection is a
//! plain re-call.

use sysinfo::System;

use crate::domain::types::{GpuInfo, HardwareCapabilities};

/// Probe the host hardware.
pub fn detect() -> HardwareCapabilities {
    let mut sys = System::new_all();
    sys.refresh_all();

    let cpu_model = sys
        .cpus()
        .first()
        .map(|c| c.brand().trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let gpu = detect_gpu();
    let onnx_providers = match &gpu {
        Some(g) if g.vendor == "nvidia" => vec![
            "CUDAExecutionProvider".to_string(),
            "CPUExecutionProvider".to_string(),
        ],
        Some(g) if g.vendor == "apple" => vec![
            "CoreMLExecutionProvider".to_string(),
            "CPUExecutionProvider".to_string(),
        ],
        _ => vec!["CPUExecutionProvider".to_string()],
    };

    HardwareCapabilities {
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpu_cores: sys.cpus().len(),
        cpu_model,
        total_ram: sys.total_memory(),
        free_ram: sys.available_memory(),
        gpu,
        onnx_providers,
    }
}

/// Coarse GPU detection: NVIDIA via the kernel driver interface, Apple
/// Silicon via platform/arch. Compute capability is read from the
/// `CODEINDEX_CUDA_COMPUTE` override when set; probing the driver for it
/// is out of scope.
fn detect_gpu() -> Option<GpuInfo> {
    if std::path::Path::new("/proc/driver/nvidia/version").exists()
        || std::env::var_os("CUDA_PATH").is_some()
    {
        return Some(GpuInfo {
            vendor: "nvidia".to_string(),
            name: "NVIDIA GPU".to_string(),
            memory: None,
            compute_capability: std::env::var("CODEINDEX_CUDA_COMPUTE").ok(),
        });
    }

    if std::env::consts::OS == "macos" && std::env::consts::ARCH == "aarch64" {
        return Some(GpuInfo {
            vendor: "apple".to_string(),
            name: "Apple Silicon".to_string(),
            memory: None,
            compute_capability: None,
        });
    }

    None
}

/// Fraction of total memory currently held by this process, in `[0, 1]`.
/// Returns 0.0 when the process cannot be inspected.
pub fn process_memory_fraction() -> f64 {
    let mut sys = System::new();
    sys.refresh_memory();
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0.0;
    };
    sys.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);

    let total = sys.total_memory();
    if total == 0 {
        return 0.0;
    }
    sys.process(pid)
        .map(|p| p.memory() as f64 / total as f64)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_reports_plausible_values() {
        let hw = detect();
        assert!(hw.cpu_cores >= 1);
        assert!(hw.total_ram > 0);
        assert!(!hw.onnx_providers.is_empty());
        assert!(hw
            .onnx_providers
            .contains(&"CPUExecutionProvider".to_string()));
    }

    #[test]
    fn memory_fraction_is_bounded() {
        let f = process_memory_fraction();
        assert!((0.0..=1.0).contains(&f));
    }
}
