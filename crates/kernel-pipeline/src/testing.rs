//! Recording mock device for unit tests
//!
//! Every object handed out is a [`MockHandle`] tracked in a live table, so tests can assert that each
//! construction path releases exactly what it created. Any creation step can be made to fail with a
//! chosen status.

use crate::device::{
    ComputeDevice, ComputePipelineDescriptor, DescriptorSetLayoutDescriptor, DescriptorType, DeviceInfo, DriverStatus, PipelineLayoutDescriptor, PushConstantRange, ShaderSource,
    UpdateTemplateDescriptor,
};
use crate::external::{
    AddressMode, ComponentMapping, ConversionDescriptor, ExternalImageDescriptor, ExternalImageDevice, Filter, HardwareBufferDesc, HardwareBufferProperties, ImageViewDescriptor, MemoryImportDescriptor,
    MemoryPropertyFlags, MemoryTypeResolver, MemoryTypeTable, SamplerDescriptor,
};
use crate::specialization::SpecializationInfo;
use crate::update_template::{TemplateKind, UpdateTemplateEntry};
use std::cell::RefCell;
use std::collections::HashMap;

/// Opaque object created by [`MockDevice`]; deliberately not `Clone`
#[derive(Debug, PartialEq, Eq)]
pub struct MockHandle {
    pub kind: &'static str,
    pub id: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct MockHardwareBuffer {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct RecordedSetLayout {
    pub label: Option<String>,
    /// Type of each binding and whether it carries an immutable sampler
    pub bindings: Vec<(DescriptorType, bool)>,
    pub push_descriptor: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedPipelineLayout {
    pub set_layout_count: usize,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

#[derive(Debug, Clone)]
pub struct RecordedPipeline {
    pub label: String,
    pub entry_point: String,
    pub specialization: SpecializationInfo,
}

#[derive(Debug, Clone)]
pub struct RecordedTemplate {
    pub entries: Vec<UpdateTemplateEntry>,
    pub kind: TemplateKind,
    pub has_set_layout: bool,
    pub set: u32,
}

#[derive(Debug, Clone)]
pub struct RecordedSampler {
    /// Mag, min and mip filters
    pub filters: [Filter; 3],
    pub address_modes: [AddressMode; 3],
    pub anisotropy_clamp: Option<f32>,
    pub compare_enable: bool,
    pub unnormalized_coordinates: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedMemoryImport {
    pub allocation_size: u64,
    pub memory_type_index: u32,
    /// Allocation is dedicated to a live image
    pub dedicated: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedImageView {
    pub components: ComponentMapping,
    pub level_count: u32,
    pub layer_count: u32,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    live: HashMap<u64, &'static str>,
    destroyed: Vec<&'static str>,
    failures: HashMap<&'static str, DriverStatus>,
    set_layout: Option<RecordedSetLayout>,
    pipeline_layout: Option<RecordedPipelineLayout>,
    pipeline: Option<RecordedPipeline>,
    template: Option<RecordedTemplate>,
    conversion: Option<ConversionDescriptor>,
    sampler: Option<RecordedSampler>,
    image: Option<ExternalImageDescriptor>,
    memory_import: Option<RecordedMemoryImport>,
    bind_offset: Option<u64>,
    image_view: Option<RecordedImageView>,
}

pub struct MockDevice {
    pub info: DeviceInfo,
    /// Answer to every hardware buffer properties query
    pub buffer_properties: HardwareBufferProperties,
    pub memory_types: MemoryTypeTable,
    state: RefCell<MockState>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            info: DeviceInfo::default(),
            buffer_properties: HardwareBufferProperties {
                allocation_size: 4096,
                memory_type_bits: 0b111,
                ..Default::default()
            },
            memory_types: MemoryTypeTable::new(vec![
                MemoryPropertyFlags::HOST_VISIBLE | MemoryPropertyFlags::HOST_COHERENT,
                MemoryPropertyFlags::DEVICE_LOCAL | MemoryPropertyFlags::HOST_VISIBLE,
                MemoryPropertyFlags::DEVICE_LOCAL,
            ]),
            state: RefCell::new(MockState::default()),
        }
    }

    /// Makes the step named `step` fail with `status` from now on
    pub fn fail_at(&self, step: &'static str, status: DriverStatus) {
        self.state.borrow_mut().failures.insert(step, status);
    }

    pub fn live_objects(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn destroyed_objects(&self) -> usize {
        self.state.borrow().destroyed.len()
    }

    /// Kinds of every destroyed object, oldest first
    pub fn destroy_order(&self) -> Vec<&'static str> {
        self.state.borrow().destroyed.clone()
    }

    pub fn last_set_layout(&self) -> Option<RecordedSetLayout> {
        self.state.borrow().set_layout.clone()
    }

    pub fn last_pipeline_layout(&self) -> Option<RecordedPipelineLayout> {
        self.state.borrow().pipeline_layout.clone()
    }

    pub fn last_compute_pipeline(&self) -> Option<RecordedPipeline> {
        self.state.borrow().pipeline.clone()
    }

    pub fn last_update_template(&self) -> Option<RecordedTemplate> {
        self.state.borrow().template.clone()
    }

    pub fn last_conversion(&self) -> Option<ConversionDescriptor> {
        self.state.borrow().conversion
    }

    pub fn last_sampler(&self) -> Option<RecordedSampler> {
        self.state.borrow().sampler.clone()
    }

    pub fn last_image(&self) -> Option<ExternalImageDescriptor> {
        self.state.borrow().image
    }

    pub fn last_memory_import(&self) -> Option<RecordedMemoryImport> {
        self.state.borrow().memory_import.clone()
    }

    pub fn last_bind_offset(&self) -> Option<u64> {
        self.state.borrow().bind_offset
    }

    pub fn last_image_view(&self) -> Option<RecordedImageView> {
        self.state.borrow().image_view.clone()
    }

    pub fn allocate(&self, step: &'static str, kind: &'static str) -> Result<MockHandle, DriverStatus> {
        let mut state = self.state.borrow_mut();
        if let Some(&status) = state.failures.get(step) {
            return Err(status);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id, kind);
        Ok(MockHandle { kind, id })
    }

    fn release(&self, handle: MockHandle, kind: &'static str) {
        assert_eq!(handle.kind, kind, "destroying a {} as a {kind}", handle.kind);

        let mut state = self.state.borrow_mut();
        let removed = state.live.remove(&handle.id);
        assert_eq!(removed, Some(kind), "{kind} #{} destroyed twice", handle.id);
        state.destroyed.push(kind);
    }

    fn is_live(&self, handle: &MockHandle) -> bool {
        self.state.borrow().live.contains_key(&handle.id)
    }
}

impl ComputeDevice for MockDevice {
    type ShaderModule = MockHandle;
    type DescriptorSetLayout = MockHandle;
    type PipelineLayout = MockHandle;
    type Pipeline = MockHandle;
    type UpdateTemplate = MockHandle;
    type Sampler = MockHandle;

    fn create_descriptor_set_layout(&self, desc: &DescriptorSetLayoutDescriptor<'_, MockHandle>) -> Result<MockHandle, DriverStatus> {
        let handle = self.allocate("create_descriptor_set_layout", "descriptor_set_layout")?;
        for binding in desc.bindings {
            if let Some(sampler) = binding.immutable_sampler {
                assert!(self.is_live(sampler), "immutable sampler is not live");
            }
        }

        self.state.borrow_mut().set_layout = Some(RecordedSetLayout {
            label: desc.label.map(str::to_string),
            bindings: desc.bindings.iter().map(|b| (b.ty, b.immutable_sampler.is_some())).collect(),
            push_descriptor: desc.push_descriptor,
        });
        Ok(handle)
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDescriptor<'_, MockHandle>) -> Result<MockHandle, DriverStatus> {
        let handle = self.allocate("create_pipeline_layout", "pipeline_layout")?;
        self.state.borrow_mut().pipeline_layout = Some(RecordedPipelineLayout {
            set_layout_count: desc.set_layouts.len(),
            push_constant_ranges: desc.push_constant_ranges.to_vec(),
        });
        Ok(handle)
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDescriptor<'_, MockHandle, MockHandle>) -> Result<MockHandle, DriverStatus> {
        assert!(self.is_live(desc.module), "shader module is not live");
        let handle = self.allocate("create_compute_pipeline", "pipeline")?;
        self.state.borrow_mut().pipeline = Some(RecordedPipeline {
            label: desc.label.unwrap_or_default().to_string(),
            entry_point: desc.entry_point.to_string(),
            specialization: desc.specialization.clone(),
        });
        Ok(handle)
    }

    fn create_update_template(&self, desc: &UpdateTemplateDescriptor<'_, MockHandle, MockHandle>) -> Result<MockHandle, DriverStatus> {
        let handle = self.allocate("create_update_template", "update_template")?;
        self.state.borrow_mut().template = Some(RecordedTemplate {
            entries: desc.entries.to_vec(),
            kind: desc.kind,
            has_set_layout: desc.set_layout.kind == "descriptor_set_layout" && self.is_live(desc.set_layout),
            set: desc.set,
        });
        Ok(handle)
    }

    fn destroy_shader_module(&self, module: MockHandle) {
        self.release(module, "shader_module");
    }

    fn destroy_descriptor_set_layout(&self, layout: MockHandle) {
        self.release(layout, "descriptor_set_layout");
    }

    fn destroy_pipeline_layout(&self, layout: MockHandle) {
        self.release(layout, "pipeline_layout");
    }

    fn destroy_pipeline(&self, pipeline: MockHandle) {
        self.release(pipeline, "pipeline");
    }

    fn destroy_update_template(&self, template: MockHandle) {
        self.release(template, "update_template");
    }

    fn destroy_sampler(&self, sampler: MockHandle) {
        self.release(sampler, "sampler");
    }
}

impl MemoryTypeResolver for MockDevice {
    fn find_memory_type_index(&self, type_bits: u32, required: MemoryPropertyFlags, preferred: MemoryPropertyFlags, preferred_not: MemoryPropertyFlags) -> Option<u32> {
        self.memory_types.find_memory_type_index(type_bits, required, preferred, preferred_not)
    }
}

impl ExternalImageDevice for MockDevice {
    type HardwareBuffer = MockHardwareBuffer;
    type Image = MockHandle;
    type Memory = MockHandle;
    type ImageView = MockHandle;
    type Conversion = MockHandle;

    fn describe_hardware_buffer(&self, buffer: &MockHardwareBuffer) -> HardwareBufferDesc {
        HardwareBufferDesc {
            width: buffer.width,
            height: buffer.height,
        }
    }

    fn hardware_buffer_properties(&self, _buffer: &MockHardwareBuffer) -> Result<HardwareBufferProperties, DriverStatus> {
        if let Some(&status) = self.state.borrow().failures.get("hardware_buffer_properties") {
            return Err(status);
        }
        Ok(self.buffer_properties)
    }

    fn create_conversion(&self, desc: &ConversionDescriptor) -> Result<MockHandle, DriverStatus> {
        let handle = self.allocate("create_conversion", "conversion")?;
        self.state.borrow_mut().conversion = Some(*desc);
        Ok(handle)
    }

    fn create_sampler(&self, desc: &SamplerDescriptor<'_, MockHandle>) -> Result<MockHandle, DriverStatus> {
        assert!(self.is_live(desc.conversion), "conversion is not live");
        let handle = self.allocate("create_sampler", "sampler")?;
        self.state.borrow_mut().sampler = Some(RecordedSampler {
            filters: [desc.mag_filter, desc.min_filter, desc.mipmap_filter],
            address_modes: [desc.address_mode_u, desc.address_mode_v, desc.address_mode_w],
            anisotropy_clamp: desc.anisotropy_clamp,
            compare_enable: desc.compare_enable,
            unnormalized_coordinates: desc.unnormalized_coordinates,
        });
        Ok(handle)
    }

    fn create_external_image(&self, desc: &ExternalImageDescriptor) -> Result<MockHandle, DriverStatus> {
        let handle = self.allocate("create_external_image", "image")?;
        self.state.borrow_mut().image = Some(*desc);
        Ok(handle)
    }

    fn import_memory(&self, desc: &MemoryImportDescriptor<'_, MockHardwareBuffer, MockHandle>) -> Result<MockHandle, DriverStatus> {
        let dedicated = desc.dedicated_image.kind == "image" && self.is_live(desc.dedicated_image);
        let handle = self.allocate("import_memory", "memory")?;
        self.state.borrow_mut().memory_import = Some(RecordedMemoryImport {
            allocation_size: desc.allocation_size,
            memory_type_index: desc.memory_type_index,
            dedicated,
        });
        Ok(handle)
    }

    fn bind_image_memory(&self, image: &MockHandle, memory: &MockHandle, offset: u64) -> Result<(), DriverStatus> {
        assert!(self.is_live(image) && self.is_live(memory), "binding released objects");
        let mut state = self.state.borrow_mut();
        if let Some(&status) = state.failures.get("bind_image_memory") {
            return Err(status);
        }
        state.bind_offset = Some(offset);
        Ok(())
    }

    fn create_image_view(&self, desc: &ImageViewDescriptor<'_, MockHandle, MockHandle>) -> Result<MockHandle, DriverStatus> {
        assert!(self.is_live(desc.image) && self.is_live(desc.conversion), "view over released objects");
        let handle = self.allocate("create_image_view", "image_view")?;
        self.state.borrow_mut().image_view = Some(RecordedImageView {
            components: desc.components,
            level_count: desc.level_count,
            layer_count: desc.layer_count,
        });
        Ok(handle)
    }

    fn destroy_conversion(&self, conversion: MockHandle) {
        self.release(conversion, "conversion");
    }

    fn destroy_image(&self, image: MockHandle) {
        self.release(image, "image");
    }

    fn free_memory(&self, memory: MockHandle) {
        self.release(memory, "memory");
    }

    fn destroy_image_view(&self, view: MockHandle) {
        self.release(view, "image_view");
    }
}

/// Shader source over modules allocated from a [`MockDevice`]
#[derive(Debug, Default)]
pub struct MockShaders {
    modules: HashMap<String, MockHandle>,
}

impl MockShaders {
    /// Registers one module per name, each counted as live on `device`
    pub fn with_modules(device: &MockDevice, names: &[&str]) -> Self {
        let modules = names
            .iter()
            .map(|name| (name.to_string(), device.allocate("register_shader_module", "shader_module").unwrap()))
            .collect();
        Self { modules }
    }
}

impl ShaderSource<MockDevice> for MockShaders {
    fn compile(&self, device: &MockDevice, _code: &[u8]) -> Result<MockHandle, DriverStatus> {
        device.allocate("compile_shader_module", "shader_module")
    }

    fn get(&self, name: &str) -> Option<&MockHandle> {
        self.modules.get(name)
    }
}
