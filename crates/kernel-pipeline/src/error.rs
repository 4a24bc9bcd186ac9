//! Pipeline construction errors

use crate::device::{DriverStatus, WorkgroupLimits};
use crate::workgroup::LocalSize;
use thiserror::Error;

/// Reasons a pipeline could not be constructed
///
/// Driver-dependent failures carry the status the driver returned. None of them are retried; the caller
/// decides on a fallback, such as uploading through a staging buffer instead of importing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("descriptor set layout creation failed: {status}")]
    LayoutCreationFailed { status: DriverStatus },

    #[error("pipeline layout creation failed: {status}")]
    PipelineLayoutCreationFailed { status: DriverStatus },

    #[error("compute pipeline creation failed: {status}")]
    PipelineCreationFailed { status: DriverStatus },

    #[error("descriptor update template creation failed: {status}")]
    UpdateTemplateCreationFailed { status: DriverStatus },

    #[error("hardware buffer properties query failed: {status}")]
    BufferPropertiesQueryFailed { status: DriverStatus },

    #[error("external image creation failed: {status}")]
    ImageCreationFailed { status: DriverStatus },

    #[error("memory import allocation failed: {status}")]
    MemoryAllocationFailed { status: DriverStatus },

    #[error("binding image memory failed: {status}")]
    MemoryBindFailed { status: DriverStatus },

    #[error("image view creation failed: {status}")]
    ImageViewCreationFailed { status: DriverStatus },

    #[error("colorspace conversion creation failed: {status}")]
    ConversionObjectCreationFailed { status: DriverStatus },

    #[error("sampler creation failed: {status}")]
    SamplerCreationFailed { status: DriverStatus },

    #[error("shader compilation failed: {status}")]
    ShaderCompilationFailed { status: DriverStatus },

    #[error("no shader module named '{name}'")]
    ShaderModuleNotFound { name: String },

    #[error("{count} specialization constants would collide with the reserved local size IDs")]
    TooManySpecializationConstants { count: usize },

    #[error("local size {requested:?} exceeds device limits {limits:?}")]
    LocalSizeOutOfRange { requested: LocalSize, limits: WorkgroupLimits },

    #[error("no memory type compatible with type bits {type_bits:#x}")]
    NoCompatibleMemoryType { type_bits: u32 },

    #[error("rotation code {code} is outside 1..=8")]
    InvalidRotation { code: i32 },

    #[error("colorspace code {code} is outside 1..=4")]
    InvalidColorspace { code: i32 },
}

impl PipelineError {
    /// Returns the driver status behind this error, if a driver call produced it
    pub fn status(&self) -> Option<DriverStatus> {
        match self {
            Self::LayoutCreationFailed { status }
            | Self::PipelineLayoutCreationFailed { status }
            | Self::PipelineCreationFailed { status }
            | Self::UpdateTemplateCreationFailed { status }
            | Self::BufferPropertiesQueryFailed { status }
            | Self::ImageCreationFailed { status }
            | Self::MemoryAllocationFailed { status }
            | Self::MemoryBindFailed { status }
            | Self::ImageViewCreationFailed { status }
            | Self::ConversionObjectCreationFailed { status }
            | Self::SamplerCreationFailed { status }
            | Self::ShaderCompilationFailed { status } => Some(*status),
            _ => None,
        }
    }
}

/// Logs a construction failure once, at the step that produced it
pub(crate) fn log_failure(step: &'static str) -> impl Fn(&PipelineError) {
    move |err| match err.status() {
        Some(status) => tracing::error!(step, code = status.0, "{err}"),
        None => tracing::error!(step, "{err}"),
    }
}
