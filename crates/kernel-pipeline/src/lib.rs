//! Compute pipeline construction for tensor kernels
//!
//! This crate builds ready-to-dispatch compute pipelines: it sizes the workgroup from the tensor shape and
//! device limits, builds the binding and pipeline layouts, bakes the workgroup size and caller constants in
//! as specialization constants, and optionally prepares a descriptor update template for fast per-dispatch
//! binding updates. A specialized pipeline imports a platform hardware buffer with a colorspace conversion
//! and rotates it into an output buffer without a copy.
//!
//! The device is abstracted behind [`ComputeDevice`] and friends, so pipelines can be built on any driver;
//! [`backend::wgpu`] provides one over `wgpu`.

pub mod backend;
pub mod device;
pub mod error;
pub mod external;
pub mod import;
pub mod layout;
pub mod options;
pub mod pipeline;
pub mod specialization;
pub mod update_template;
pub mod workgroup;

#[cfg(test)]
mod testing;

pub use device::{ComputeDevice, DeviceInfo, DriverStatus, PipelineContext, ShaderSource, WorkgroupLimits};
pub use error::PipelineError;
pub use import::{HardwareImportPipeline, Rotation, TargetColorspace};
pub use options::{PipelineOptions, PrecisionMode};
pub use pipeline::{KernelLayout, Pipeline};
pub use specialization::SpecializationConstant;
pub use workgroup::{LocalSize, optimal_local_size};
