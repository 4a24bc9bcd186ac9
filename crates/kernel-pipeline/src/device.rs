//! Device collaborator interface
//!
//! This module defines the boundary between pipeline construction and the device driver: the capability
//! and limits descriptor, the driver status code, the object-creation trait every backend implements,
//! the shader source, and the explicit context object handed to every construction call.

use crate::specialization::SpecializationInfo;
use crate::update_template::{TemplateKind, UpdateTemplateEntry};
use std::fmt;

/// Numeric status reported by the device driver
///
/// Values follow the Vulkan `VkResult` numbering so that statuses from any backend can be logged and
/// compared against the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverStatus(pub i32);

impl DriverStatus {
    pub const SUCCESS: Self = Self(0);
    pub const ERROR_OUT_OF_HOST_MEMORY: Self = Self(-1);
    pub const ERROR_OUT_OF_DEVICE_MEMORY: Self = Self(-2);
    pub const ERROR_INITIALIZATION_FAILED: Self = Self(-3);
    pub const ERROR_DEVICE_LOST: Self = Self(-4);
    pub const ERROR_EXTENSION_NOT_PRESENT: Self = Self(-7);
    pub const ERROR_FEATURE_NOT_PRESENT: Self = Self(-8);
    pub const ERROR_UNKNOWN: Self = Self(-13);
    pub const ERROR_INVALID_EXTERNAL_HANDLE: Self = Self(-1000072003);
    pub const ERROR_VALIDATION_FAILED: Self = Self(-1000011001);
    pub const ERROR_INVALID_SHADER: Self = Self(-1000012000);

    /// Returns the symbolic name of this status, if it is one of the known constants
    pub fn name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::SUCCESS => "SUCCESS",
            Self::ERROR_OUT_OF_HOST_MEMORY => "ERROR_OUT_OF_HOST_MEMORY",
            Self::ERROR_OUT_OF_DEVICE_MEMORY => "ERROR_OUT_OF_DEVICE_MEMORY",
            Self::ERROR_INITIALIZATION_FAILED => "ERROR_INITIALIZATION_FAILED",
            Self::ERROR_DEVICE_LOST => "ERROR_DEVICE_LOST",
            Self::ERROR_EXTENSION_NOT_PRESENT => "ERROR_EXTENSION_NOT_PRESENT",
            Self::ERROR_FEATURE_NOT_PRESENT => "ERROR_FEATURE_NOT_PRESENT",
            Self::ERROR_UNKNOWN => "ERROR_UNKNOWN",
            Self::ERROR_INVALID_EXTERNAL_HANDLE => "ERROR_INVALID_EXTERNAL_HANDLE",
            Self::ERROR_VALIDATION_FAILED => "ERROR_VALIDATION_FAILED",
            Self::ERROR_INVALID_SHADER => "ERROR_INVALID_SHADER",
            _ => return None,
        })
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}

impl std::error::Error for DriverStatus {}

/// Per-axis and total workgroup ceilings of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupLimits {
    /// Maximum local size along X
    pub max_size_x: u32,
    /// Maximum local size along Y
    pub max_size_y: u32,
    /// Maximum local size along Z
    pub max_size_z: u32,
    /// Maximum number of invocations in one workgroup
    pub max_invocations: u32,
}

impl Default for WorkgroupLimits {
    /// The minimum guaranteed by every conformant compute device
    fn default() -> Self {
        Self {
            max_size_x: 128,
            max_size_y: 128,
            max_size_z: 64,
            max_invocations: 128,
        }
    }
}

/// Capability flags and limits of the device a pipeline is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// Half precision arithmetic in shaders
    pub support_fp16_arithmetic: bool,
    /// Half precision storage buffers
    pub support_fp16_storage: bool,
    /// Half precision values packed into 32-bit words
    pub support_fp16_packed: bool,
    /// Bindings can be pushed inline with each dispatch
    pub support_push_descriptor: bool,
    /// Descriptor update templates are available
    pub support_update_template: bool,
    /// Workgroup ceilings
    pub limits: WorkgroupLimits,
}

/// Shader stage visibility of a binding or push-constant range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderStages {
    bits: u32,
}

impl ShaderStages {
    pub const NONE: Self = Self { bits: 0 };
    pub const COMPUTE: Self = Self { bits: 1 << 5 };

    /// Returns the raw bits.
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Checks whether every stage in `other` is also in `self`.
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }
}

/// Kind of resource a binding slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// Read-write storage buffer
    StorageBuffer,
    /// Image sampled through a sampler baked into the layout
    CombinedImageSampler,
}

/// One slot of a descriptor set layout
#[derive(Debug)]
pub struct LayoutBinding<'a, S> {
    /// Binding index inside the set
    pub binding: u32,
    /// Resource kind
    pub ty: DescriptorType,
    /// Array length of the slot
    pub count: u32,
    /// Stages that can access the slot
    pub visibility: ShaderStages,
    /// Sampler baked into the layout as immutable
    pub immutable_sampler: Option<&'a S>,
}

/// Input to [`ComputeDevice::create_descriptor_set_layout`]
#[derive(Debug)]
pub struct DescriptorSetLayoutDescriptor<'a, S> {
    pub label: Option<&'a str>,
    pub bindings: &'a [LayoutBinding<'a, S>],
    /// Layout is used with pushed bindings instead of allocated sets
    pub push_descriptor: bool,
}

/// A push-constant byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub offset: u32,
    pub size: u32,
}

/// Input to [`ComputeDevice::create_pipeline_layout`]
#[derive(Debug)]
pub struct PipelineLayoutDescriptor<'a, L> {
    pub label: Option<&'a str>,
    /// Zero or one descriptor set layout
    pub set_layouts: &'a [&'a L],
    pub push_constant_ranges: &'a [PushConstantRange],
}

/// Input to [`ComputeDevice::create_compute_pipeline`]
#[derive(Debug)]
pub struct ComputePipelineDescriptor<'a, M, L> {
    pub label: Option<&'a str>,
    pub module: &'a M,
    pub entry_point: &'a str,
    pub layout: &'a L,
    pub specialization: &'a SpecializationInfo,
}

/// Input to [`ComputeDevice::create_update_template`]
///
/// The set layout is mandatory even for [`TemplateKind::PushDescriptors`], where drivers are supposed to
/// ignore it; some of them dereference it anyway.
#[derive(Debug)]
pub struct UpdateTemplateDescriptor<'a, S, L> {
    pub label: Option<&'a str>,
    pub entries: &'a [UpdateTemplateEntry],
    pub kind: TemplateKind,
    pub set_layout: &'a S,
    pub pipeline_layout: &'a L,
    /// Set number updated by the template
    pub set: u32,
}

/// Object creation entry points of a device driver
///
/// Every `create_*` call either returns the new object or the driver status that made it fail. Objects are
/// released by handing them back to the matching `destroy_*` call, so a destroyed object can not be used
/// again.
pub trait ComputeDevice {
    type ShaderModule;
    type DescriptorSetLayout;
    type PipelineLayout;
    type Pipeline;
    type UpdateTemplate;
    type Sampler;

    fn create_descriptor_set_layout(&self, desc: &DescriptorSetLayoutDescriptor<'_, Self::Sampler>) -> Result<Self::DescriptorSetLayout, DriverStatus>;

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDescriptor<'_, Self::DescriptorSetLayout>) -> Result<Self::PipelineLayout, DriverStatus>;

    fn create_compute_pipeline(&self, desc: &ComputePipelineDescriptor<'_, Self::ShaderModule, Self::PipelineLayout>) -> Result<Self::Pipeline, DriverStatus>;

    fn create_update_template(&self, desc: &UpdateTemplateDescriptor<'_, Self::DescriptorSetLayout, Self::PipelineLayout>) -> Result<Self::UpdateTemplate, DriverStatus>;

    fn destroy_shader_module(&self, module: Self::ShaderModule);

    fn destroy_descriptor_set_layout(&self, layout: Self::DescriptorSetLayout);

    fn destroy_pipeline_layout(&self, layout: Self::PipelineLayout);

    fn destroy_pipeline(&self, pipeline: Self::Pipeline);

    fn destroy_update_template(&self, template: Self::UpdateTemplate);

    fn destroy_sampler(&self, sampler: Self::Sampler);
}

/// Provider of shader modules
///
/// `compile` turns shader code into a module owned by the caller, `get` hands out a module owned by the
/// source itself.
pub trait ShaderSource<D: ComputeDevice + ?Sized> {
    /// Compiles shader code into a new module
    fn compile(&self, device: &D, code: &[u8]) -> Result<D::ShaderModule, DriverStatus>;

    /// Looks up a registered module by kernel name
    fn get(&self, name: &str) -> Option<&D::ShaderModule>;
}

/// Everything a construction call needs from its environment
///
/// Passed explicitly into every pipeline instead of living in process-wide state.
pub struct PipelineContext<'d, D: ComputeDevice> {
    pub device: &'d D,
    pub info: &'d DeviceInfo,
    pub shaders: &'d dyn ShaderSource<D>,
}

impl<'d, D: ComputeDevice> PipelineContext<'d, D> {
    pub fn new(device: &'d D, info: &'d DeviceInfo, shaders: &'d dyn ShaderSource<D>) -> Self {
        Self { device, info, shaders }
    }
}

impl<D: ComputeDevice> Clone for PipelineContext<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: ComputeDevice> Copy for PipelineContext<'_, D> {}
