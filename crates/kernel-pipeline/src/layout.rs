//! Resource binding and pipeline layout construction

use crate::device::{ComputeDevice, DescriptorSetLayoutDescriptor, DescriptorType, LayoutBinding, PipelineContext, PipelineLayoutDescriptor, PushConstantRange, ShaderStages};
use crate::error::{PipelineError, log_failure};

/// Size in bytes of one push-constant value
pub const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<i32>() as u32;

/// `binding_count` storage-buffer slots at indices `0..binding_count`, visible to compute only
pub fn storage_buffer_bindings<'a, S>(binding_count: u32) -> Vec<LayoutBinding<'a, S>> {
    (0..binding_count)
        .map(|binding| LayoutBinding {
            binding,
            ty: DescriptorType::StorageBuffer,
            count: 1,
            visibility: ShaderStages::COMPUTE,
            immutable_sampler: None,
        })
        .collect()
}

/// The single push-constant range for `push_constant_count` 4-byte values, or none
pub fn push_constant_ranges(push_constant_count: u32) -> Vec<PushConstantRange> {
    if push_constant_count == 0 {
        return Vec::new();
    }

    vec![PushConstantRange {
        stages: ShaderStages::COMPUTE,
        offset: 0,
        size: push_constant_count * PUSH_CONSTANT_SIZE,
    }]
}

/// Creates the descriptor set layout for `bindings`
///
/// An empty binding list yields no layout, which is valid for kernels fed only by push constants. When
/// the device can push bindings inline the layout is marked for it, so no descriptor pool is needed.
///
/// # Arguments
/// * `ctx` - Device and capabilities to build with
/// * `label` - Debug label
/// * `bindings` - Slots of the layout
///
/// # Returns
/// The layout, `None` for zero bindings, or the failing driver status
pub fn create_descriptor_set_layout<D: ComputeDevice>(ctx: &PipelineContext<'_, D>, label: &str, bindings: &[LayoutBinding<'_, D::Sampler>]) -> Result<Option<D::DescriptorSetLayout>, PipelineError> {
    if bindings.is_empty() {
        return Ok(None);
    }

    ctx.device
        .create_descriptor_set_layout(&DescriptorSetLayoutDescriptor {
            label: Some(label),
            bindings,
            push_descriptor: ctx.info.support_push_descriptor,
        })
        .map(Some)
        .map_err(|status| PipelineError::LayoutCreationFailed { status })
        .inspect_err(log_failure("create_descriptor_set_layout"))
}

/// Creates a pipeline layout over at most one set layout and one push-constant range
///
/// # Arguments
/// * `ctx` - Device and capabilities to build with
/// * `label` - Debug label
/// * `set_layout` - The descriptor set layout, if the kernel has bindings
/// * `push_constant_count` - Number of 4-byte push constants
///
/// # Returns
/// The pipeline layout or the failing driver status
pub fn create_pipeline_layout<D: ComputeDevice>(
    ctx: &PipelineContext<'_, D>,
    label: &str,
    set_layout: Option<&D::DescriptorSetLayout>,
    push_constant_count: u32,
) -> Result<D::PipelineLayout, PipelineError> {
    let set_layouts: Vec<&D::DescriptorSetLayout> = set_layout.into_iter().collect();
    let push_constant_ranges = push_constant_ranges(push_constant_count);

    ctx.device
        .create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some(label),
            set_layouts: &set_layouts,
            push_constant_ranges: &push_constant_ranges,
        })
        .map_err(|status| PipelineError::PipelineLayoutCreationFailed { status })
        .inspect_err(log_failure("create_pipeline_layout"))
}
