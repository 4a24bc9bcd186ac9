//! Compute pipeline handles
//!
//! A [`Pipeline`] owns everything it creates for one kernel: the descriptor set layout, the pipeline
//! layout, the pipeline object and the optional update template. It owns the shader module only when it
//! compiled that module itself. Because the local size is baked in as specialization constants, a handle
//! is only valid for the tensor shape class it was sized for.

use crate::device::{ComputeDevice, ComputePipelineDescriptor, LayoutBinding, PipelineContext, ShaderSource};
use crate::error::{PipelineError, log_failure};
use crate::layout::{create_descriptor_set_layout, create_pipeline_layout, storage_buffer_bindings};
use crate::options::{PipelineOptions, PrecisionMode};
use crate::specialization::{SpecializationConstant, SpecializationInfo};
use crate::update_template::{UpdateTemplateEntry, create_update_template, storage_buffer_entries};
use crate::workgroup::{LocalSize, optimal_local_size};

/// Entry point every kernel exposes
pub const DEFAULT_ENTRY_POINT: &str = "main";

/// A shader module a pipeline was built from
#[derive(Debug)]
pub enum ShaderModuleSlot<'d, M> {
    /// Owned by someone else and outliving the pipeline
    Borrowed(&'d M),
    /// Compiled by the pipeline and released with it
    Owned(M),
}

impl<M> ShaderModuleSlot<'_, M> {
    pub fn get(&self) -> &M {
        match self {
            ShaderModuleSlot::Borrowed(module) => module,
            ShaderModuleSlot::Owned(module) => module,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, ShaderModuleSlot::Owned(_))
    }
}

/// Resource shape of a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KernelLayout {
    /// Number of storage-buffer bindings
    pub binding_count: u32,
    /// Number of 4-byte push constants
    pub push_constant_count: u32,
}

impl KernelLayout {
    pub const fn new(binding_count: u32, push_constant_count: u32) -> Self {
        Self {
            binding_count,
            push_constant_count,
        }
    }
}

/// A compute pipeline ready to dispatch
pub struct Pipeline<'d, D: ComputeDevice> {
    ctx: PipelineContext<'d, D>,
    pub(crate) shader_module: Option<ShaderModuleSlot<'d, D::ShaderModule>>,
    pub(crate) descriptor_set_layout: Option<D::DescriptorSetLayout>,
    pub(crate) pipeline_layout: Option<D::PipelineLayout>,
    pub(crate) pipeline: Option<D::Pipeline>,
    pub(crate) update_template: Option<D::UpdateTemplate>,
    pub(crate) update_template_entries: Vec<UpdateTemplateEntry>,
    pub(crate) local_size: LocalSize,
}

impl<'d, D: ComputeDevice> Pipeline<'d, D> {
    /// Creates an empty handle bound to `ctx`
    pub fn new(ctx: PipelineContext<'d, D>) -> Self {
        Self {
            ctx,
            shader_module: None,
            descriptor_set_layout: None,
            pipeline_layout: None,
            pipeline: None,
            update_template: None,
            update_template_entries: Vec::new(),
            local_size: LocalSize::default(),
        }
    }

    pub fn context(&self) -> &PipelineContext<'d, D> {
        &self.ctx
    }

    /// Sizes the workgroup for a tensor of `w` x `h` x `c`; non-positive extents are unknown
    pub fn set_optimal_local_size(&mut self, w: i32, h: i32, c: i32) {
        self.local_size = optimal_local_size(w, h, c, &self.ctx.info.limits);
        tracing::trace!(x = self.local_size.x, y = self.local_size.y, z = self.local_size.z, "optimal local size");
    }

    /// Overrides the workgroup size with explicit values
    ///
    /// Sizes with a zero axis, an axis above its device limit, or more invocations than the device allows
    /// are rejected and leave the current local size unchanged.
    pub fn set_local_size(&mut self, x: u32, y: u32, z: u32) -> Result<(), PipelineError> {
        let requested = LocalSize::new(x, y, z);
        let limits = self.ctx.info.limits;
        if !requested.fits(&limits) {
            return Err(PipelineError::LocalSizeOutOfRange { requested, limits });
        }

        self.local_size = requested;
        Ok(())
    }

    /// Compiles `code` and builds the pipeline around the resulting module, which the handle then owns
    ///
    /// # Arguments
    /// * `code` - Shader code understood by the shader source
    /// * `entry_point` - Kernel entry point in the module
    /// * `specializations` - Caller specialization constants
    /// * `layout` - Binding and push-constant counts
    pub fn create_from_code(&mut self, code: &[u8], entry_point: &str, specializations: &[SpecializationConstant], layout: KernelLayout) -> Result<(), PipelineError> {
        self.destroy();

        let module = self
            .ctx
            .shaders
            .compile(self.ctx.device, code)
            .map_err(|status| PipelineError::ShaderCompilationFailed { status })
            .inspect_err(log_failure("compile_shader_module"))?;
        self.shader_module = Some(ShaderModuleSlot::Owned(module));

        self.build(entry_point, entry_point, specializations, layout)
    }

    /// Builds the pipeline around a module owned by the caller
    ///
    /// # Arguments
    /// * `module` - Shader module that outlives this handle
    /// * `entry_point` - Kernel entry point in the module
    /// * `specializations` - Caller specialization constants
    /// * `layout` - Binding and push-constant counts
    pub fn create_with_module(&mut self, module: &'d D::ShaderModule, entry_point: &str, specializations: &[SpecializationConstant], layout: KernelLayout) -> Result<(), PipelineError> {
        self.destroy();
        self.shader_module = Some(ShaderModuleSlot::Borrowed(module));

        self.build(entry_point, entry_point, specializations, layout)
    }

    /// Builds the pipeline for the best precision variant of a named kernel
    ///
    /// The variant name is `kernel` with the suffix of the first precision mode the device supports and
    /// `opt` enables, looked up in the context's shader source.
    ///
    /// # Arguments
    /// * `kernel` - Base kernel name
    /// * `opt` - Precision preferences
    /// * `specializations` - Caller specialization constants
    /// * `layout` - Binding and push-constant counts
    pub fn create_named(&mut self, kernel: &str, opt: &PipelineOptions, specializations: &[SpecializationConstant], layout: KernelLayout) -> Result<(), PipelineError> {
        self.destroy();

        let name = PrecisionMode::select(self.ctx.info, opt).kernel_name(kernel);
        let shaders: &'d dyn ShaderSource<D> = self.ctx.shaders;
        let module = shaders
            .get(&name)
            .ok_or_else(|| PipelineError::ShaderModuleNotFound { name: name.clone() })
            .inspect_err(log_failure("get_shader_module"))?;
        self.shader_module = Some(ShaderModuleSlot::Borrowed(module));

        self.build(&name, DEFAULT_ENTRY_POINT, specializations, layout)
    }

    fn build(&mut self, label: &str, entry_point: &str, specializations: &[SpecializationConstant], layout: KernelLayout) -> Result<(), PipelineError> {
        let bindings = storage_buffer_bindings(layout.binding_count);
        let entries = storage_buffer_entries(layout.binding_count);

        let result = self.build_with_bindings(label, entry_point, specializations, &bindings, layout.push_constant_count, &entries);
        if result.is_err() {
            self.destroy();
        }
        result
    }

    /// Runs the layout, pipeline and template steps shared by every pipeline flavor
    ///
    /// Expects the shader module to be set. Objects created before a failing step stay in the handle, so
    /// callers must destroy on error.
    pub(crate) fn build_with_bindings(
        &mut self,
        label: &str,
        entry_point: &str,
        specializations: &[SpecializationConstant],
        bindings: &[LayoutBinding<'_, D::Sampler>],
        push_constant_count: u32,
        template_entries: &[UpdateTemplateEntry],
    ) -> Result<(), PipelineError> {
        let ctx = self.ctx;

        self.descriptor_set_layout = create_descriptor_set_layout(&ctx, label, bindings)?;

        let pipeline_layout = create_pipeline_layout(&ctx, label, self.descriptor_set_layout.as_ref(), push_constant_count)?;
        let pipeline_layout = self.pipeline_layout.insert(pipeline_layout);

        let specialization = SpecializationInfo::pack(specializations, self.local_size).inspect_err(log_failure("pack_specialization"))?;
        let Some(module) = self.shader_module.as_ref() else {
            return Err(PipelineError::ShaderModuleNotFound { name: label.to_string() });
        };
        let pipeline = ctx
            .device
            .create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(label),
                module: module.get(),
                entry_point,
                layout: pipeline_layout,
                specialization: &specialization,
            })
            .map_err(|status| PipelineError::PipelineCreationFailed { status })
            .inspect_err(log_failure("create_compute_pipeline"))?;
        self.pipeline = Some(pipeline);

        if ctx.info.support_update_template {
            if let Some(set_layout) = self.descriptor_set_layout.as_ref() {
                let template = create_update_template(&ctx, label, template_entries, set_layout, pipeline_layout)?;
                self.update_template = Some(template);
                self.update_template_entries = template_entries.to_vec();
            }
        }

        tracing::debug!(
            kernel = label,
            local_size = ?self.local_size,
            update_template = self.update_template.is_some(),
            "compute pipeline created"
        );

        Ok(())
    }

    /// Releases every object the handle owns
    ///
    /// Borrowed shader modules are left alone. Safe to call any number of times, including after a failed
    /// construction.
    pub fn destroy(&mut self) {
        let device = self.ctx.device;

        if let Some(template) = self.update_template.take() {
            device.destroy_update_template(template);
        }
        self.update_template_entries.clear();

        if let Some(pipeline) = self.pipeline.take() {
            device.destroy_pipeline(pipeline);
        }

        if let Some(layout) = self.pipeline_layout.take() {
            device.destroy_pipeline_layout(layout);
        }

        if let Some(layout) = self.descriptor_set_layout.take() {
            device.destroy_descriptor_set_layout(layout);
        }

        match self.shader_module.take() {
            Some(ShaderModuleSlot::Owned(module)) => device.destroy_shader_module(module),
            Some(ShaderModuleSlot::Borrowed(_)) | None => {}
        }
    }

    pub fn shader_module(&self) -> Option<&ShaderModuleSlot<'d, D::ShaderModule>> {
        self.shader_module.as_ref()
    }

    /// Set layout used to write per-dispatch bindings; absent for kernels without bindings
    pub fn descriptor_set_layout(&self) -> Option<&D::DescriptorSetLayout> {
        self.descriptor_set_layout.as_ref()
    }

    pub fn pipeline_layout(&self) -> Option<&D::PipelineLayout> {
        self.pipeline_layout.as_ref()
    }

    pub fn pipeline(&self) -> Option<&D::Pipeline> {
        self.pipeline.as_ref()
    }

    pub fn update_template(&self) -> Option<&D::UpdateTemplate> {
        self.update_template.as_ref()
    }

    /// Entries of the update template, empty when there is none
    pub fn update_template_entries(&self) -> &[UpdateTemplateEntry] {
        &self.update_template_entries
    }

    /// Whether bindings are pushed inline instead of written to allocated sets
    pub fn uses_push_descriptors(&self) -> bool {
        self.ctx.info.support_push_descriptor && self.descriptor_set_layout.is_some()
    }

    /// Local size baked into the pipeline
    pub fn local_size(&self) -> LocalSize {
        self.local_size
    }

    /// Workgroup grid covering `extent`
    pub fn dispatch_size(&self, extent: (u32, u32, u32)) -> (u32, u32, u32) {
        self.local_size.dispatch_size(extent)
    }
}

impl<D: ComputeDevice> Drop for Pipeline<'_, D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DescriptorType, DriverStatus};
    use crate::specialization::{LOCAL_SIZE_X_ID, LOCAL_SIZE_Y_ID, LOCAL_SIZE_Z_ID};
    use crate::testing::{MockDevice, MockShaders};
    use crate::update_template::TemplateKind;

    #[test]
    fn test_create_named_selects_precision_variant() {
        let mut device = MockDevice::new();
        device.info.support_fp16_storage = true;
        let shaders = MockShaders::with_modules(&device, &["relu", "relu_fp16s"]);
        let ctx = PipelineContext::new(&device, &device.info, &shaders);

        let mut pipeline = Pipeline::new(ctx);
        pipeline.create_named("relu", &PipelineOptions::default(), &[], KernelLayout::new(1, 0)).unwrap();

        assert_eq!(device.last_compute_pipeline().unwrap().label, "relu_fp16s");
        assert_eq!(device.last_compute_pipeline().unwrap().entry_point, DEFAULT_ENTRY_POINT);
        assert_eq!(device.last_set_layout().unwrap().label.as_deref(), Some("relu_fp16s"));
        assert!(!pipeline.shader_module().unwrap().is_owned());
    }

    #[test]
    fn test_create_named_missing_module() {
        let device = MockDevice::new();
        let shaders = MockShaders::default();
        let ctx = PipelineContext::new(&device, &device.info, &shaders);

        let mut pipeline = Pipeline::new(ctx);
        let result = pipeline.create_named("gemm", &PipelineOptions::full_precision(), &[], KernelLayout::new(3, 2));

        assert_eq!(result, Err(PipelineError::ShaderModuleNotFound { name: "gemm".to_string() }));
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_specialization_carries_local_size() {
        let device = MockDevice::new();
        let shaders = MockShaders::default();
        let ctx = PipelineContext::new(&device, &device.info, &shaders);

        let mut pipeline = Pipeline::new(ctx);
        pipeline.set_optimal_local_size(224, 224, 3);
        let local_size = pipeline.local_size();
        pipeline
            .create_from_code(&[3, 2, 35, 7], "main", &[SpecializationConstant::I32(4), SpecializationConstant::F32(1.5)], KernelLayout::new(2, 1))
            .unwrap();

        let recorded = device.last_compute_pipeline().unwrap();
        assert_eq!(recorded.specialization.entries().len(), 5);
        assert_eq!(recorded.specialization.data_size(), 20);
        let tail: Vec<_> = recorded.specialization.iter().skip(2).collect();
        assert_eq!(
            tail,
            [
                (LOCAL_SIZE_X_ID, SpecializationConstant::U32(local_size.x)),
                (LOCAL_SIZE_Y_ID, SpecializationConstant::U32(local_size.y)),
                (LOCAL_SIZE_Z_ID, SpecializationConstant::U32(local_size.z)),
            ]
        );
        assert!(pipeline.shader_module().unwrap().is_owned());
    }

    #[test]
    fn test_zero_bindings_have_no_set_layout_or_template() {
        let mut device = MockDevice::new();
        device.info.support_update_template = true;
        let shaders = MockShaders::default();
        let ctx = PipelineContext::new(&device, &device.info, &shaders);

        let mut pipeline = Pipeline::new(ctx);
        pipeline.create_from_code(&[0; 4], "main", &[], KernelLayout::new(0, 0)).unwrap();

        assert!(pipeline.descriptor_set_layout().is_none());
        assert!(pipeline.pipeline_layout().is_some());
        assert!(pipeline.pipeline().is_some());
        assert!(pipeline.update_template().is_none());
        let recorded = device.last_pipeline_layout().unwrap();
        assert_eq!(recorded.set_layout_count, 0);
        assert!(recorded.push_constant_ranges.is_empty());
    }

    #[test]
    fn test_update_template_entries_and_kind() {
        let mut device = MockDevice::new();
        device.info.support_update_template = true;
        device.info.support_push_descriptor = true;
        let shaders = MockShaders::default();
        let ctx = PipelineContext::new(&device, &device.info, &shaders);

        let mut pipeline = Pipeline::new(ctx);
        pipeline.create_from_code(&[0; 4], "main", &[], KernelLayout::new(3, 0)).unwrap();

        assert!(pipeline.update_template().is_some());
        assert!(pipeline.uses_push_descriptors());
        let recorded = device.last_update_template().unwrap();
        assert_eq!(recorded.kind, TemplateKind::PushDescriptors);
        assert!(recorded.has_set_layout);
        assert_eq!(recorded.set, 0);
        assert_eq!(recorded.entries, storage_buffer_entries(3));
        assert_eq!(pipeline.update_template_entries().len(), 3);
        assert!(pipeline.update_template_entries().iter().all(|e| e.ty == DescriptorType::StorageBuffer));
    }

    #[test]
    fn test_no_template_without_support() {
        let device = MockDevice::new();
        let shaders = MockShaders::default();
        let ctx = PipelineContext::new(&device, &device.info, &shaders);

        let mut pipeline = Pipeline::new(ctx);
        pipeline.create_from_code(&[0; 4], "main", &[], KernelLayout::new(3, 0)).unwrap();

        assert!(pipeline.update_template().is_none());
        assert!(device.last_update_template().is_none());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut device = MockDevice::new();
        device.info.support_update_template = true;
        let shaders = MockShaders::default();
        let ctx = PipelineContext::new(&device, &device.info, &shaders);

        let mut pipeline = Pipeline::new(ctx);
        pipeline.create_from_code(&[0; 4], "main", &[], KernelLayout::new(2, 1)).unwrap();
        assert_eq!(device.live_objects(), 5);

        pipeline.destroy();
        assert_eq!(device.live_objects(), 0);
        let destroyed = device.destroyed_objects();

        pipeline.destroy();
        assert_eq!(device.destroyed_objects(), destroyed);
        assert!(pipeline.pipeline().is_none());
    }

    #[test]
    fn test_borrowed_module_is_not_destroyed() {
        let device = MockDevice::new();
        let shaders = MockShaders::with_modules(&device, &["softmax"]);
        let ctx = PipelineContext::new(&device, &device.info, &shaders);
        let live_before = device.live_objects();

        {
            let mut pipeline = Pipeline::new(ctx);
            pipeline.create_named("softmax", &PipelineOptions::full_precision(), &[], KernelLayout::new(2, 0)).unwrap();
        }

        assert_eq!(device.live_objects(), live_before);
        assert!(shaders.get("softmax").is_some());
    }

    #[test]
    fn test_partial_failure_releases_created_objects() {
        for step in ["create_descriptor_set_layout", "create_pipeline_layout", "create_compute_pipeline", "create_update_template"] {
            let mut device = MockDevice::new();
            device.info.support_update_template = true;
            device.fail_at(step, DriverStatus::ERROR_OUT_OF_DEVICE_MEMORY);
            let shaders = MockShaders::default();
            let ctx = PipelineContext::new(&device, &device.info, &shaders);

            let mut pipeline = Pipeline::new(ctx);
            let err = pipeline.create_from_code(&[0; 4], "main", &[], KernelLayout::new(2, 0)).unwrap_err();
            assert_eq!(err.status(), Some(DriverStatus::ERROR_OUT_OF_DEVICE_MEMORY), "{step}");
            assert_eq!(device.live_objects(), 0, "{step}");

            pipeline.destroy();
            pipeline.destroy();
            assert_eq!(device.live_objects(), 0, "{step}");
        }
    }

    #[test]
    fn test_failure_kinds_match_steps() {
        let cases = [
            ("create_descriptor_set_layout", PipelineError::LayoutCreationFailed { status: DriverStatus::ERROR_UNKNOWN }),
            ("create_pipeline_layout", PipelineError::PipelineLayoutCreationFailed { status: DriverStatus::ERROR_UNKNOWN }),
            ("create_compute_pipeline", PipelineError::PipelineCreationFailed { status: DriverStatus::ERROR_UNKNOWN }),
            ("create_update_template", PipelineError::UpdateTemplateCreationFailed { status: DriverStatus::ERROR_UNKNOWN }),
            ("compile_shader_module", PipelineError::ShaderCompilationFailed { status: DriverStatus::ERROR_UNKNOWN }),
        ];

        for (step, expected) in cases {
            let mut device = MockDevice::new();
            device.info.support_update_template = true;
            device.fail_at(step, DriverStatus::ERROR_UNKNOWN);
            let shaders = MockShaders::default();
            let ctx = PipelineContext::new(&device, &device.info, &shaders);

            let mut pipeline = Pipeline::new(ctx);
            let result = pipeline.create_from_code(&[0; 4], "main", &[], KernelLayout::new(1, 1));
            assert_eq!(result, Err(expected));
        }
    }

    #[test]
    fn test_recreate_releases_previous_objects() {
        let device = MockDevice::new();
        let shaders = MockShaders::default();
        let ctx = PipelineContext::new(&device, &device.info, &shaders);

        let mut pipeline = Pipeline::new(ctx);
        pipeline.create_from_code(&[0; 4], "main", &[], KernelLayout::new(2, 0)).unwrap();
        let live = device.live_objects();
        pipeline.create_from_code(&[0; 4], "main", &[], KernelLayout::new(2, 0)).unwrap();

        assert_eq!(device.live_objects(), live);
    }

    #[test]
    fn test_set_local_size_validates_limits() {
        let device = MockDevice::new();
        let shaders = MockShaders::default();
        let ctx = PipelineContext::new(&device, &device.info, &shaders);
        let mut pipeline = Pipeline::new(ctx);

        pipeline.set_local_size(8, 8, 1).unwrap();
        assert_eq!(pipeline.local_size(), LocalSize::new(8, 8, 1));

        let limits = device.info.limits;
        assert!(pipeline.set_local_size(0, 8, 1).is_err());
        assert!(pipeline.set_local_size(limits.max_size_x + 1, 1, 1).is_err());
        assert_eq!(
            pipeline.set_local_size(limits.max_size_x, limits.max_size_y, 1),
            Err(PipelineError::LocalSizeOutOfRange {
                requested: LocalSize::new(limits.max_size_x, limits.max_size_y, 1),
                limits,
            })
        );
        assert_eq!(pipeline.local_size(), LocalSize::new(8, 8, 1));
    }

    #[test]
    fn test_dispatch_size_uses_local_size() {
        let device = MockDevice::new();
        let shaders = MockShaders::default();
        let ctx = PipelineContext::new(&device, &device.info, &shaders);
        let mut pipeline = Pipeline::new(ctx);

        pipeline.set_local_size(16, 4, 2).unwrap();
        assert_eq!(pipeline.dispatch_size((100, 9, 3)), (7, 3, 2));
    }
}
