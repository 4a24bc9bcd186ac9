//! Zero-copy hardware buffer ingestion
//!
//! [`HardwareImportPipeline`] imports a platform image buffer as a sampled image with a colorspace
//! conversion attached, then builds a compute pipeline that samples it, converts it to the requested
//! channel order and applies an EXIF-style rotation while writing into an output buffer.
//!
//! Construction is split into ordered steps that each talk to one collaborator:
//!
//! 1. [`query_buffer`] reads the buffer size and the driver's format suggestions
//! 2. [`ConversionParams::derive`] computes the output shape and element layout
//! 3. [`create_conversion_unit`] builds the colorspace conversion and its sampler
//! 4. [`import_image`] creates the image, imports its dedicated memory and creates the view
//! 5. [`imported_image_bindings`] describes the fixed 3-slot layout, after which the shared pipeline
//!    path builds the layouts, the pipeline and the update template

use crate::device::{DescriptorType, DeviceInfo, LayoutBinding, PipelineContext, ShaderStages};
use crate::error::{PipelineError, log_failure};
use crate::external::{
    AddressMode, BorderColor, ComponentMapping, ConversionDescriptor, ExternalImageDescriptor, ExternalImageDevice, Filter, HardwareBufferDesc, HardwareBufferFormat, HardwareBufferProperties, ImageLayout,
    ImageTiling, ImageViewDescriptor, MemoryImportDescriptor, MemoryPropertyFlags, SamplerDescriptor,
};
use crate::options::{PipelineOptions, PrecisionMode};
use crate::pipeline::{DEFAULT_ENTRY_POINT, Pipeline, ShaderModuleSlot};
use crate::specialization::SpecializationConstant;
use crate::update_template::imported_image_entries;
use crate::workgroup::LocalSize;

/// Base name of the conversion kernel, before the precision suffix
pub const CONVERT_KERNEL: &str = "convert_ycbcr";

/// Fixed local size of the conversion kernel
pub const CONVERT_LOCAL_SIZE: LocalSize = LocalSize::new(8, 8, 1);

/// Channel order written to the output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TargetColorspace {
    Rgb = 1,
    Bgr = 2,
    Gray = 3,
    /// Four channels packed per element
    Rgba = 4,
}

impl TargetColorspace {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn channels(self) -> u32 {
        match self {
            TargetColorspace::Rgb | TargetColorspace::Bgr => 3,
            TargetColorspace::Gray => 1,
            TargetColorspace::Rgba => 4,
        }
    }
}

impl TryFrom<i32> for TargetColorspace {
    type Error = PipelineError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(TargetColorspace::Rgb),
            2 => Ok(TargetColorspace::Bgr),
            3 => Ok(TargetColorspace::Gray),
            4 => Ok(TargetColorspace::Rgba),
            _ => Err(PipelineError::InvalidColorspace { code }),
        }
    }
}

/// EXIF orientation of the source buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Rotation {
    Identity = 1,
    FlipHorizontal = 2,
    Rotate180 = 3,
    FlipVertical = 4,
    Transpose = 5,
    Rotate90 = 6,
    Transverse = 7,
    Rotate270 = 8,
}

impl Rotation {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Whether the output is the source with width and height exchanged
    pub fn swaps_dimensions(self) -> bool {
        self.code() >= 5
    }
}

impl TryFrom<i32> for Rotation {
    type Error = PipelineError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => Rotation::Identity,
            2 => Rotation::FlipHorizontal,
            3 => Rotation::Rotate180,
            4 => Rotation::FlipVertical,
            5 => Rotation::Transpose,
            6 => Rotation::Rotate90,
            7 => Rotation::Transverse,
            8 => Rotation::Rotate270,
            _ => return Err(PipelineError::InvalidRotation { code }),
        })
    }
}

/// Shape and element layout of the converted output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversionParams {
    /// Source width
    pub width: u32,
    /// Source height
    pub height: u32,
    pub out_width: u32,
    pub out_height: u32,
    pub out_channels: u32,
    /// Bytes per element
    pub out_elem_size: u32,
    /// Channels per element
    pub out_elem_pack: u32,
    pub target: TargetColorspace,
    pub rotation: Rotation,
}

impl ConversionParams {
    /// Derives the output layout for a source of `desc` size
    pub fn derive(desc: HardwareBufferDesc, target: TargetColorspace, rotation: Rotation, info: &DeviceInfo, opt: &PipelineOptions) -> Self {
        let (out_width, out_height) = if rotation.swaps_dimensions() { (desc.height, desc.width) } else { (desc.width, desc.height) };

        let (out_elem_size, out_elem_pack) = match target {
            TargetColorspace::Rgb | TargetColorspace::Bgr | TargetColorspace::Gray => (if opt.fp16_storage(info) { 2 } else { 4 }, 1),
            TargetColorspace::Rgba => (if opt.fp16_packed(info) || opt.fp16_storage(info) { 8 } else { 16 }, 4),
        };

        Self {
            width: desc.width,
            height: desc.height,
            out_width,
            out_height,
            out_channels: target.channels(),
            out_elem_size,
            out_elem_pack,
            target,
            rotation,
        }
    }

    /// Specialization constants of the conversion kernel
    pub fn specializations(&self) -> [SpecializationConstant; 4] {
        [
            SpecializationConstant::I32(self.out_width as i32),
            SpecializationConstant::I32(self.out_height as i32),
            SpecializationConstant::I32(self.target.code()),
            SpecializationConstant::I32(self.rotation.code()),
        ]
    }
}

/// Reads the size and driver properties of `buffer`
pub fn query_buffer<D: ExternalImageDevice>(device: &D, buffer: &D::HardwareBuffer) -> Result<(HardwareBufferDesc, HardwareBufferProperties), PipelineError> {
    let desc = device.describe_hardware_buffer(buffer);
    let properties = device
        .hardware_buffer_properties(buffer)
        .map_err(|status| PipelineError::BufferPropertiesQueryFailed { status })
        .inspect_err(log_failure("hardware_buffer_properties"))?;

    Ok((desc, properties))
}

/// A colorspace conversion and the sampler that applies it
#[derive(Debug)]
pub struct ConversionUnit<C, S> {
    pub conversion: C,
    pub sampler: S,
}

/// Builds the conversion suggested by the driver for `format` and a sampler reading through it
///
/// The sampler reads texels exactly: nearest filtering, clamped, unnormalized coordinates. If the sampler
/// fails, the conversion is released before returning.
pub fn create_conversion_unit<D: ExternalImageDevice>(device: &D, format: &HardwareBufferFormat) -> Result<ConversionUnit<D::Conversion, D::Sampler>, PipelineError> {
    let conversion = device
        .create_conversion(&ConversionDescriptor {
            external_format: format.external_format,
            model: format.suggested_model,
            range: format.suggested_range,
            components: format.components,
            x_chroma_offset: format.suggested_x_chroma_offset,
            y_chroma_offset: format.suggested_y_chroma_offset,
            chroma_filter: Filter::Nearest,
            force_explicit_reconstruction: false,
        })
        .map_err(|status| PipelineError::ConversionObjectCreationFailed { status })
        .inspect_err(log_failure("create_conversion"))?;

    let sampler = device.create_sampler(&SamplerDescriptor {
        mag_filter: Filter::Nearest,
        min_filter: Filter::Nearest,
        mipmap_filter: Filter::Nearest,
        address_mode_u: AddressMode::ClampToEdge,
        address_mode_v: AddressMode::ClampToEdge,
        address_mode_w: AddressMode::ClampToEdge,
        mip_lod_bias: 0.0,
        lod_min_clamp: 0.0,
        lod_max_clamp: 0.0,
        anisotropy_clamp: None,
        compare_enable: false,
        border_color: BorderColor::TransparentBlack,
        unnormalized_coordinates: true,
        conversion: &conversion,
    });

    match sampler {
        Ok(sampler) => Ok(ConversionUnit { conversion, sampler }),
        Err(status) => {
            device.destroy_conversion(conversion);
            Err(PipelineError::SamplerCreationFailed { status }).inspect_err(log_failure("create_sampler"))
        }
    }
}

/// An imported image with its dedicated memory and view
#[derive(Debug)]
pub struct ImportedImage<I, M, V> {
    pub image: I,
    pub memory: M,
    pub view: V,
}

/// Imports `buffer` as an image bound to its own dedicated memory and creates a view through `conversion`
///
/// The memory type prefers device-local and avoids host-visible types. Objects created before a failing
/// step are released before returning.
pub fn import_image<D: ExternalImageDevice>(
    device: &D,
    buffer: &D::HardwareBuffer,
    desc: &HardwareBufferDesc,
    properties: &HardwareBufferProperties,
    conversion: &D::Conversion,
) -> Result<ImportedImage<D::Image, D::Memory, D::ImageView>, PipelineError> {
    let external_format = properties.format.external_format;

    let image = device
        .create_external_image(&ExternalImageDescriptor {
            width: desc.width,
            height: desc.height,
            external_format,
            mip_levels: 1,
            array_layers: 1,
            samples: 1,
            tiling: ImageTiling::Optimal,
            sampled: true,
            exclusive: true,
            initial_layout: ImageLayout::Undefined,
        })
        .map_err(|status| PipelineError::ImageCreationFailed { status })
        .inspect_err(log_failure("create_external_image"))?;

    let memory_type_index = device.find_memory_type_index(
        properties.memory_type_bits,
        MemoryPropertyFlags::NONE,
        MemoryPropertyFlags::DEVICE_LOCAL,
        MemoryPropertyFlags::HOST_VISIBLE,
    );
    let Some(memory_type_index) = memory_type_index else {
        device.destroy_image(image);
        return Err(PipelineError::NoCompatibleMemoryType {
            type_bits: properties.memory_type_bits,
        })
        .inspect_err(log_failure("find_memory_type_index"));
    };

    let memory = device.import_memory(&MemoryImportDescriptor {
        buffer,
        dedicated_image: &image,
        allocation_size: properties.allocation_size,
        memory_type_index,
    });
    let memory = match memory {
        Ok(memory) => memory,
        Err(status) => {
            device.destroy_image(image);
            return Err(PipelineError::MemoryAllocationFailed { status }).inspect_err(log_failure("import_memory"));
        }
    };

    if let Err(status) = device.bind_image_memory(&image, &memory, 0) {
        device.destroy_image(image);
        device.free_memory(memory);
        return Err(PipelineError::MemoryBindFailed { status }).inspect_err(log_failure("bind_image_memory"));
    }

    let view = device.create_image_view(&ImageViewDescriptor {
        image: &image,
        external_format,
        components: ComponentMapping::IDENTITY,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
        conversion,
    });
    match view {
        Ok(view) => Ok(ImportedImage { image, memory, view }),
        Err(status) => {
            device.destroy_image(image);
            device.free_memory(memory);
            Err(PipelineError::ImageViewCreationFailed { status }).inspect_err(log_failure("create_image_view"))
        }
    }
}

/// The conversion kernel's layout: the sampled image with `sampler` baked in, the output buffer and an
/// auxiliary buffer
pub fn imported_image_bindings<S>(sampler: &S) -> [LayoutBinding<'_, S>; 3] {
    [
        LayoutBinding {
            binding: 0,
            ty: DescriptorType::CombinedImageSampler,
            count: 1,
            visibility: ShaderStages::COMPUTE,
            immutable_sampler: Some(sampler),
        },
        LayoutBinding {
            binding: 1,
            ty: DescriptorType::StorageBuffer,
            count: 1,
            visibility: ShaderStages::COMPUTE,
            immutable_sampler: None,
        },
        LayoutBinding {
            binding: 2,
            ty: DescriptorType::StorageBuffer,
            count: 1,
            visibility: ShaderStages::COMPUTE,
            immutable_sampler: None,
        },
    ]
}

/// A conversion pipeline bound to one imported hardware buffer
pub struct HardwareImportPipeline<'d, D: ExternalImageDevice> {
    base: Pipeline<'d, D>,
    conversion: Option<D::Conversion>,
    sampler: Option<D::Sampler>,
    image: Option<D::Image>,
    memory: Option<D::Memory>,
    image_view: Option<D::ImageView>,
    params: Option<ConversionParams>,
}

impl<'d, D: ExternalImageDevice> HardwareImportPipeline<'d, D> {
    pub fn new(ctx: PipelineContext<'d, D>) -> Self {
        Self {
            base: Pipeline::new(ctx),
            conversion: None,
            sampler: None,
            image: None,
            memory: None,
            image_view: None,
            params: None,
        }
    }

    /// Imports `buffer` and builds the conversion pipeline around it
    ///
    /// # Arguments
    /// * `buffer` - Platform buffer to import
    /// * `target` - Channel order of the output
    /// * `rotation` - EXIF orientation of the source
    /// * `opt` - Precision preferences
    ///
    /// # Returns
    /// Nothing on success; on failure every object created so far has been released
    pub fn create(&mut self, buffer: &D::HardwareBuffer, target: TargetColorspace, rotation: Rotation, opt: &PipelineOptions) -> Result<(), PipelineError> {
        self.destroy();

        let result = self.build(buffer, target, rotation, opt);
        if result.is_err() {
            self.destroy();
        }
        result
    }

    fn build(&mut self, buffer: &D::HardwareBuffer, target: TargetColorspace, rotation: Rotation, opt: &PipelineOptions) -> Result<(), PipelineError> {
        let ctx = *self.base.context();
        let device = ctx.device;

        let (desc, properties) = query_buffer(device, buffer)?;
        let params = ConversionParams::derive(desc, target, rotation, ctx.info, opt);
        self.base.local_size = CONVERT_LOCAL_SIZE;

        let unit = create_conversion_unit(device, &properties.format)?;
        let conversion = self.conversion.insert(unit.conversion);
        let sampler = self.sampler.insert(unit.sampler);

        let imported = import_image(device, buffer, &desc, &properties, conversion)?;
        self.image = Some(imported.image);
        self.memory = Some(imported.memory);
        self.image_view = Some(imported.view);

        let name = PrecisionMode::select(ctx.info, opt).kernel_name(CONVERT_KERNEL);
        let module = ctx
            .shaders
            .get(&name)
            .ok_or_else(|| PipelineError::ShaderModuleNotFound { name: name.clone() })
            .inspect_err(log_failure("get_shader_module"))?;
        self.base.shader_module = Some(ShaderModuleSlot::Borrowed(module));

        let bindings = imported_image_bindings(&*sampler);
        self.base
            .build_with_bindings(&name, DEFAULT_ENTRY_POINT, &params.specializations(), &bindings, 0, &imported_image_entries())?;

        tracing::debug!(
            width = params.width,
            height = params.height,
            out_width = params.out_width,
            out_height = params.out_height,
            target = ?target,
            rotation = ?rotation,
            "hardware buffer imported"
        );
        self.params = Some(params);

        Ok(())
    }

    /// Releases the pipeline and every imported object
    ///
    /// Safe to call any number of times, including after a failed construction.
    pub fn destroy(&mut self) {
        self.base.destroy();

        let device = self.base.context().device;

        if let Some(view) = self.image_view.take() {
            device.destroy_image_view(view);
        }

        if let Some(memory) = self.memory.take() {
            device.free_memory(memory);
        }

        if let Some(image) = self.image.take() {
            device.destroy_image(image);
        }

        if let Some(sampler) = self.sampler.take() {
            device.destroy_sampler(sampler);
        }

        if let Some(conversion) = self.conversion.take() {
            device.destroy_conversion(conversion);
        }

        self.params = None;
    }

    /// The compute pipeline, its layouts and its template
    pub fn pipeline(&self) -> &Pipeline<'d, D> {
        &self.base
    }

    /// Output layout of the last successful construction
    pub fn params(&self) -> Option<&ConversionParams> {
        self.params.as_ref()
    }

    pub fn conversion(&self) -> Option<&D::Conversion> {
        self.conversion.as_ref()
    }

    pub fn sampler(&self) -> Option<&D::Sampler> {
        self.sampler.as_ref()
    }

    pub fn image(&self) -> Option<&D::Image> {
        self.image.as_ref()
    }

    pub fn memory(&self) -> Option<&D::Memory> {
        self.memory.as_ref()
    }

    /// View bound to slot 0 of the layout
    pub fn image_view(&self) -> Option<&D::ImageView> {
        self.image_view.as_ref()
    }
}

impl<D: ExternalImageDevice> Drop for HardwareImportPipeline<'_, D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
