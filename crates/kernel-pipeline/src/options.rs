//! Precision preferences and kernel variant selection

use crate::device::DeviceInfo;

/// Per-network options that influence which kernel variant is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Prefer kernels that compute in half precision
    pub use_fp16_arithmetic: bool,
    /// Prefer kernels that store tensors in half precision
    pub use_fp16_storage: bool,
    /// Prefer kernels that store half precision pairs packed in 32-bit words
    pub use_fp16_packed: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            use_fp16_arithmetic: false,
            use_fp16_storage: true,
            use_fp16_packed: true,
        }
    }
}

impl PipelineOptions {
    /// Options that always select full precision kernels
    pub fn full_precision() -> Self {
        Self {
            use_fp16_arithmetic: false,
            use_fp16_storage: false,
            use_fp16_packed: false,
        }
    }

    /// Whether half precision storage is both supported and wanted
    pub fn fp16_storage(&self, info: &DeviceInfo) -> bool {
        info.support_fp16_storage && self.use_fp16_storage
    }

    /// Whether packed half precision is both supported and wanted
    pub fn fp16_packed(&self, info: &DeviceInfo) -> bool {
        info.support_fp16_packed && self.use_fp16_packed
    }

    /// Whether half precision arithmetic is both supported and wanted
    pub fn fp16_arithmetic(&self, info: &DeviceInfo) -> bool {
        info.support_fp16_arithmetic && self.use_fp16_arithmetic
    }
}

/// Numeric precision a kernel variant is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrecisionMode {
    Fp16Arithmetic,
    Fp16Storage,
    Fp16Packed,
    Full,
}

impl PrecisionMode {
    /// Picks the first mode, in priority order, that the device supports and the options enable
    pub fn select(info: &DeviceInfo, opt: &PipelineOptions) -> Self {
        if opt.fp16_arithmetic(info) {
            PrecisionMode::Fp16Arithmetic
        } else if opt.fp16_storage(info) {
            PrecisionMode::Fp16Storage
        } else if opt.fp16_packed(info) {
            PrecisionMode::Fp16Packed
        } else {
            PrecisionMode::Full
        }
    }

    /// Suffix appended to a kernel name to address this variant
    pub fn suffix(&self) -> &'static str {
        match self {
            PrecisionMode::Fp16Arithmetic => "_fp16a",
            PrecisionMode::Fp16Storage => "_fp16s",
            PrecisionMode::Fp16Packed => "_fp16p",
            PrecisionMode::Full => "",
        }
    }

    /// Full name of the variant of `kernel` for this mode
    pub fn kernel_name(&self, kernel: &str) -> String {
        format!("{kernel}{}", self.suffix())
    }
}
