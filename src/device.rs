use std::fmt;

use serde::{Deserialize, Serialize};

/// Peak throughput of a device per precision, in FLOPS.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceFlops {
    pub fp32: f64,
    pub fp16: f64,
    pub int8: f64,
}

const TFLOPS: f64 = 1e12;

impl fmt::Display for DeviceFlops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fp32: {:.2} TFLOPS, fp16: {:.2} TFLOPS, int8: {:.2} TFLOPS",
            self.fp32 / TFLOPS,
            self.fp16 / TFLOPS,
            self.int8 / TFLOPS
        )
    }
}

/// Static hardware descriptor of a node.
///
/// Supplied by an external probing collaborator and carried through topology
/// discovery; this layer never inspects it beyond display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Device model name (e.g., "MacBook Pro")
    pub model: String,

    /// Chip name (e.g., "Apple M3 Max")
    pub chip: String,

    /// Total memory in megabytes
    pub memory: u64,

    /// Peak throughput per precision
    pub flops: DeviceFlops,
}

impl DeviceCapabilities {
    /// Placeholder capabilities for nodes that have not been probed.
    pub fn unknown() -> Self {
        Self {
            model: "Unknown Model".to_string(),
            chip: "Unknown Chip".to_string(),
            memory: 0,
            flops: DeviceFlops::default(),
        }
    }
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}), {} MB | {}",
            self.model, self.chip, self.memory, self.flops
        )
    }
}
