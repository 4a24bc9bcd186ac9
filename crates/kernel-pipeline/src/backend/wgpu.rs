//! wgpu device backend
//!
//! Builds compute pipelines on a [`wgpu::Device`]. wgpu reports creation failures asynchronously through
//! error scopes, so every creation call is wrapped in a validation and an out-of-memory scope that are
//! popped before returning.
//!
//! wgpu has no push descriptors, descriptor update templates or combined image samplers, so the derived
//! [`DeviceInfo`] never advertises them and requests for them fail with
//! [`DriverStatus::ERROR_FEATURE_NOT_PRESENT`].
//!
//! Specialization constants become pipeline-overridable constants keyed by their numeric ID, so kernels
//! declare them as `@id(n) override` values, including the three workgroup IDs.

use crate::device::{
    ComputeDevice, ComputePipelineDescriptor, DescriptorSetLayoutDescriptor, DescriptorType, DeviceInfo, DriverStatus, PipelineLayoutDescriptor, ShaderSource, ShaderStages, UpdateTemplateDescriptor,
    WorkgroupLimits,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::num::NonZeroU32;

/// First word of every SPIR-V module
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// A wgpu device with the capabilities derived from it
#[derive(Debug)]
pub struct WgpuDevice {
    device: wgpu::Device,
    info: DeviceInfo,
}

impl WgpuDevice {
    /// Wraps `device`, deriving feature flags and workgroup limits from what it was created with
    pub fn new(device: wgpu::Device) -> Self {
        let features = device.features();
        let limits = device.limits();

        let info = DeviceInfo {
            support_fp16_arithmetic: features.contains(wgpu::Features::SHADER_F16),
            support_fp16_storage: features.contains(wgpu::Features::SHADER_F16),
            // pack2x16float is core WGSL
            support_fp16_packed: true,
            support_push_descriptor: false,
            support_update_template: false,
            limits: WorkgroupLimits {
                max_size_x: limits.max_compute_workgroup_size_x,
                max_size_y: limits.max_compute_workgroup_size_y,
                max_size_z: limits.max_compute_workgroup_size_z,
                max_invocations: limits.max_compute_invocations_per_workgroup,
            },
        };

        Self { device, info }
    }

    /// Requests a high-performance adapter and a device with every compute feature it offers
    ///
    /// # Returns
    /// The device and its queue, or `ERROR_INITIALIZATION_FAILED` when no adapter or device is available
    pub fn request_blocking() -> Result<(Self, wgpu::Queue), DriverStatus> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| {
            tracing::warn!("no compute adapter: {err}");
            DriverStatus::ERROR_INITIALIZATION_FAILED
        })?;

        let wanted = wgpu::Features::SHADER_F16 | wgpu::Features::PUSH_CONSTANTS;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("kernel-pipeline"),
            required_features: adapter.features() & wanted,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: Default::default(),
        }))
        .map_err(|err| {
            tracing::warn!("device request failed: {err}");
            DriverStatus::ERROR_INITIALIZATION_FAILED
        })?;

        tracing::info!(adapter = %adapter.get_info().name, "compute device ready");

        Ok((Self::new(device), queue))
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Runs `create` inside error scopes and turns a captured error into a status
    fn checked<T>(&self, step: &'static str, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, DriverStatus> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let value = create(&self.device);

        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());

        match validation.or(out_of_memory) {
            None => Ok(value),
            Some(err) => {
                tracing::warn!(step, "{err}");
                Err(status_of(&err))
            }
        }
    }
}

fn status_of(err: &wgpu::Error) -> DriverStatus {
    match err {
        wgpu::Error::OutOfMemory { .. } => DriverStatus::ERROR_OUT_OF_DEVICE_MEMORY,
        wgpu::Error::Validation { .. } => DriverStatus::ERROR_VALIDATION_FAILED,
        _ => DriverStatus::ERROR_UNKNOWN,
    }
}

fn stages(stages: ShaderStages) -> wgpu::ShaderStages {
    if stages.contains(ShaderStages::COMPUTE) { wgpu::ShaderStages::COMPUTE } else { wgpu::ShaderStages::NONE }
}

impl ComputeDevice for WgpuDevice {
    type ShaderModule = wgpu::ShaderModule;
    type DescriptorSetLayout = wgpu::BindGroupLayout;
    type PipelineLayout = wgpu::PipelineLayout;
    type Pipeline = wgpu::ComputePipeline;
    type UpdateTemplate = Infallible;
    type Sampler = wgpu::Sampler;

    fn create_descriptor_set_layout(&self, desc: &DescriptorSetLayoutDescriptor<'_, wgpu::Sampler>) -> Result<wgpu::BindGroupLayout, DriverStatus> {
        if desc.push_descriptor {
            return Err(DriverStatus::ERROR_FEATURE_NOT_PRESENT);
        }

        let entries = desc
            .bindings
            .iter()
            .map(|binding| {
                let ty = match binding.ty {
                    DescriptorType::StorageBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    DescriptorType::CombinedImageSampler => return Err(DriverStatus::ERROR_FEATURE_NOT_PRESENT),
                };

                Ok(wgpu::BindGroupLayoutEntry {
                    binding: binding.binding,
                    visibility: stages(binding.visibility),
                    ty,
                    count: if binding.count > 1 { NonZeroU32::new(binding.count) } else { None },
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.checked("create_bind_group_layout", |device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor { label: desc.label, entries: &entries })
        })
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDescriptor<'_, wgpu::BindGroupLayout>) -> Result<wgpu::PipelineLayout, DriverStatus> {
        let push_constant_ranges: Vec<_> = desc
            .push_constant_ranges
            .iter()
            .map(|range| wgpu::PushConstantRange {
                stages: stages(range.stages),
                range: range.offset..range.offset + range.size,
            })
            .collect();

        self.checked("create_pipeline_layout", |device| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: desc.label,
                bind_group_layouts: desc.set_layouts,
                push_constant_ranges: &push_constant_ranges,
            })
        })
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDescriptor<'_, wgpu::ShaderModule, wgpu::PipelineLayout>) -> Result<wgpu::ComputePipeline, DriverStatus> {
        let keys: Vec<(String, f64)> = desc.specialization.iter().map(|(id, value)| (id.to_string(), value.as_f64())).collect();
        let constants: Vec<(&str, f64)> = keys.iter().map(|(key, value)| (key.as_str(), *value)).collect();

        self.checked("create_compute_pipeline", |device| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: desc.label,
                layout: Some(desc.layout),
                module: desc.module,
                entry_point: Some(desc.entry_point),
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    zero_initialize_workgroup_memory: true,
                },
                cache: None,
            })
        })
    }

    fn create_update_template(&self, _desc: &UpdateTemplateDescriptor<'_, wgpu::BindGroupLayout, wgpu::PipelineLayout>) -> Result<Infallible, DriverStatus> {
        Err(DriverStatus::ERROR_FEATURE_NOT_PRESENT)
    }

    // wgpu releases objects when their last handle drops

    fn destroy_shader_module(&self, module: wgpu::ShaderModule) {
        drop(module);
    }

    fn destroy_descriptor_set_layout(&self, layout: wgpu::BindGroupLayout) {
        drop(layout);
    }

    fn destroy_pipeline_layout(&self, layout: wgpu::PipelineLayout) {
        drop(layout);
    }

    fn destroy_pipeline(&self, pipeline: wgpu::ComputePipeline) {
        drop(pipeline);
    }

    fn destroy_update_template(&self, template: Infallible) {
        match template {}
    }

    fn destroy_sampler(&self, sampler: wgpu::Sampler) {
        drop(sampler);
    }
}

/// Checks that `code` looks like a SPIR-V module before handing it to wgpu
pub fn validate_spirv(code: &[u8]) -> Result<(), DriverStatus> {
    if code.is_empty() || code.len() % 4 != 0 {
        return Err(DriverStatus::ERROR_INVALID_SHADER);
    }

    let magic = u32::from_le_bytes([code[0], code[1], code[2], code[3]]);
    if magic != SPIRV_MAGIC {
        return Err(DriverStatus::ERROR_INVALID_SHADER);
    }

    Ok(())
}

/// Named shader modules plus SPIR-V compilation
#[derive(Debug, Default)]
pub struct WgpuShaderLibrary {
    modules: HashMap<String, wgpu::ShaderModule>,
}

impl WgpuShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles WGSL source and registers it under `name`
    pub fn insert_wgsl(&mut self, device: &WgpuDevice, name: &str, source: &str) -> Result<(), DriverStatus> {
        let module = device.checked("create_shader_module", |device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })?;

        self.modules.insert(name.to_string(), module);
        Ok(())
    }

    /// Compiles a SPIR-V module and registers it under `name`
    pub fn insert_spirv(&mut self, device: &WgpuDevice, name: &str, code: &[u8]) -> Result<(), DriverStatus> {
        let module = compile_spirv(device, Some(name), code)?;

        self.modules.insert(name.to_string(), module);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn compile_spirv(device: &WgpuDevice, label: Option<&str>, code: &[u8]) -> Result<wgpu::ShaderModule, DriverStatus> {
    validate_spirv(code)?;

    device.checked("create_shader_module", |device| {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label,
            source: wgpu::util::make_spirv(code),
        })
    })
}

impl ShaderSource<WgpuDevice> for WgpuShaderLibrary {
    fn compile(&self, device: &WgpuDevice, code: &[u8]) -> Result<wgpu::ShaderModule, DriverStatus> {
        compile_spirv(device, None, code)
    }

    fn get(&self, name: &str) -> Option<&wgpu::ShaderModule> {
        self.modules.get(name)
    }
}
