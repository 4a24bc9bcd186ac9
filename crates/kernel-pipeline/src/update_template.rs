//! Descriptor update templates
//!
//! A template maps every binding of a layout onto a record in one opaque blob, so the dispatch layer can
//! update all bindings with a single driver call instead of one write per binding. [`UpdateTemplateData`]
//! builds that blob.

use crate::device::{ComputeDevice, DescriptorType, PipelineContext, UpdateTemplateDescriptor};
use crate::error::{PipelineError, log_failure};
use bytemuck::{Pod, Zeroable};
use bytes::{Bytes, BytesMut};

/// Binding-info record for a buffer slot
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DescriptorBufferInfo {
    /// Raw driver handle of the buffer
    pub buffer: u64,
    pub offset: u64,
    pub range: u64,
}

/// Binding-info record for a sampled image slot
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DescriptorImageInfo {
    /// Raw driver handle of the sampler, ignored for immutable samplers
    pub sampler: u64,
    /// Raw driver handle of the image view
    pub image_view: u64,
    pub image_layout: u32,
    pub _padding: u32,
}

/// Stride of one buffer record in the blob
pub const BUFFER_INFO_SIZE: usize = std::mem::size_of::<DescriptorBufferInfo>();
/// Stride of one image record in the blob
pub const IMAGE_INFO_SIZE: usize = std::mem::size_of::<DescriptorImageInfo>();

/// How a template applies its updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// Writes into an allocated descriptor set
    DescriptorSet,
    /// Pushes bindings inline with the dispatch
    PushDescriptors,
}

impl TemplateKind {
    /// Push mode when the device pushes bindings inline, persistent sets otherwise
    pub fn for_push_descriptor(support_push_descriptor: bool) -> Self {
        if support_push_descriptor { TemplateKind::PushDescriptors } else { TemplateKind::DescriptorSet }
    }
}

/// One binding updated by a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateTemplateEntry {
    pub binding: u32,
    pub array_element: u32,
    pub count: u32,
    pub ty: DescriptorType,
    /// Byte offset of the record in the blob
    pub offset: usize,
    /// Byte stride between array elements
    pub stride: usize,
}

/// Entries for `binding_count` storage-buffer slots laid out back to back
pub fn storage_buffer_entries(binding_count: u32) -> Vec<UpdateTemplateEntry> {
    (0..binding_count)
        .map(|binding| UpdateTemplateEntry {
            binding,
            array_element: 0,
            count: 1,
            ty: DescriptorType::StorageBuffer,
            offset: binding as usize * BUFFER_INFO_SIZE,
            stride: BUFFER_INFO_SIZE,
        })
        .collect()
}

/// Entries for the imported-image layout: one image record then two buffer records
pub fn imported_image_entries() -> [UpdateTemplateEntry; 3] {
    [
        UpdateTemplateEntry {
            binding: 0,
            array_element: 0,
            count: 1,
            ty: DescriptorType::CombinedImageSampler,
            offset: 0,
            stride: IMAGE_INFO_SIZE,
        },
        UpdateTemplateEntry {
            binding: 1,
            array_element: 0,
            count: 1,
            ty: DescriptorType::StorageBuffer,
            offset: IMAGE_INFO_SIZE,
            stride: BUFFER_INFO_SIZE,
        },
        UpdateTemplateEntry {
            binding: 2,
            array_element: 0,
            count: 1,
            ty: DescriptorType::StorageBuffer,
            offset: IMAGE_INFO_SIZE + BUFFER_INFO_SIZE,
            stride: BUFFER_INFO_SIZE,
        },
    ]
}

/// Creates an update template over set 0 of `pipeline_layout`
///
/// # Arguments
/// * `ctx` - Device and capabilities to build with
/// * `label` - Debug label
/// * `entries` - One entry per binding
/// * `set_layout` - Layout the template writes; passed even in push mode
/// * `pipeline_layout` - Layout of the pipeline the bindings are used with
///
/// # Returns
/// The template or the failing driver status
pub fn create_update_template<D: ComputeDevice>(
    ctx: &PipelineContext<'_, D>,
    label: &str,
    entries: &[UpdateTemplateEntry],
    set_layout: &D::DescriptorSetLayout,
    pipeline_layout: &D::PipelineLayout,
) -> Result<D::UpdateTemplate, PipelineError> {
    ctx.device
        .create_update_template(&UpdateTemplateDescriptor {
            label: Some(label),
            entries,
            kind: TemplateKind::for_push_descriptor(ctx.info.support_push_descriptor),
            set_layout,
            pipeline_layout,
            set: 0,
        })
        .map_err(|status| PipelineError::UpdateTemplateCreationFailed { status })
        .inspect_err(log_failure("create_update_template"))
}

/// The opaque blob a template reads its bindings from
#[derive(Debug, Clone)]
pub struct UpdateTemplateData<'a> {
    entries: &'a [UpdateTemplateEntry],
    buffer: BytesMut,
}

impl<'a> UpdateTemplateData<'a> {
    /// Allocates a zeroed blob large enough for every entry
    pub fn new(entries: &'a [UpdateTemplateEntry]) -> Self {
        let size = entries.iter().map(|e| e.offset + e.stride * e.count as usize).max().unwrap_or(0);
        Self {
            entries,
            buffer: BytesMut::zeroed(size),
        }
    }

    /// Writes the record of a buffer slot
    ///
    /// # Returns
    /// `false` if `binding` is not a buffer slot of the template
    pub fn write_buffer(&mut self, binding: u32, info: DescriptorBufferInfo) -> bool {
        self.write(binding, DescriptorType::StorageBuffer, bytemuck::bytes_of(&info))
    }

    /// Writes the record of an image slot
    ///
    /// # Returns
    /// `false` if `binding` is not an image slot of the template
    pub fn write_image(&mut self, binding: u32, info: DescriptorImageInfo) -> bool {
        self.write(binding, DescriptorType::CombinedImageSampler, bytemuck::bytes_of(&info))
    }

    fn write(&mut self, binding: u32, ty: DescriptorType, record: &[u8]) -> bool {
        let Some(entry) = self.entries.iter().find(|e| e.binding == binding && e.ty == ty) else {
            return false;
        };

        self.buffer[entry.offset..entry.offset + record.len()].copy_from_slice(record);
        true
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Finishes the blob
    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }
}
