//! External image import interface
//!
//! Collaborators needed to import a platform hardware buffer as a sampled image: the buffer properties
//! query, the memory-type resolver, and the creation entry points for the colorspace conversion, sampler,
//! image, dedicated memory and view.

use crate::device::{ComputeDevice, DriverStatus};
use std::ops::BitOr;

/// Property flags of a device memory type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryPropertyFlags {
    bits: u32,
}

impl MemoryPropertyFlags {
    pub const NONE: Self = Self { bits: 0 };
    pub const DEVICE_LOCAL: Self = Self { bits: 1 << 0 };
    pub const HOST_VISIBLE: Self = Self { bits: 1 << 1 };
    pub const HOST_COHERENT: Self = Self { bits: 1 << 2 };
    pub const HOST_CACHED: Self = Self { bits: 1 << 3 };

    pub const fn from_bits(bits: u32) -> Self {
        Self { bits }
    }

    pub const fn bits(&self) -> u32 {
        self.bits
    }

    pub const fn union(self, other: Self) -> Self {
        Self { bits: self.bits | other.bits }
    }

    /// Checks whether every flag in `other` is also set in `self`.
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Checks whether any flag in `other` is set in `self`.
    pub const fn intersects(&self, other: Self) -> bool {
        (self.bits & other.bits) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

impl BitOr for MemoryPropertyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Maps an allowed memory-type bitmask and desired properties to a memory type
pub trait MemoryTypeResolver {
    /// Finds a memory type allowed by `type_bits`
    ///
    /// # Arguments
    /// * `type_bits` - Bit `i` set when memory type `i` may be used
    /// * `required` - Properties the type must have
    /// * `preferred` - Properties the type should have
    /// * `preferred_not` - Properties the type should not have
    ///
    /// # Returns
    /// The memory type index, or `None` if no allowed type has the required properties
    fn find_memory_type_index(&self, type_bits: u32, required: MemoryPropertyFlags, preferred: MemoryPropertyFlags, preferred_not: MemoryPropertyFlags) -> Option<u32>;
}

/// Memory types of a device, indexed like the driver reports them
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryTypeTable {
    types: Vec<MemoryPropertyFlags>,
}

impl MemoryTypeTable {
    pub fn new(types: Vec<MemoryPropertyFlags>) -> Self {
        Self { types }
    }

    pub fn types(&self) -> &[MemoryPropertyFlags] {
        &self.types
    }

    fn first_match(&self, type_bits: u32, accept: impl Fn(MemoryPropertyFlags) -> bool) -> Option<u32> {
        self.types
            .iter()
            .enumerate()
            .take(u32::BITS as usize)
            .find(|&(index, &flags)| type_bits & (1 << index) != 0 && accept(flags))
            .map(|(index, _)| index as u32)
    }
}

impl MemoryTypeResolver for MemoryTypeTable {
    fn find_memory_type_index(&self, type_bits: u32, required: MemoryPropertyFlags, preferred: MemoryPropertyFlags, preferred_not: MemoryPropertyFlags) -> Option<u32> {
        let wanted = required | preferred;

        // Relax the preferences one at a time, never the requirement
        self.first_match(type_bits, |flags| flags.contains(wanted) && !flags.intersects(preferred_not))
            .or_else(|| self.first_match(type_bits, |flags| flags.contains(wanted)))
            .or_else(|| self.first_match(type_bits, |flags| flags.contains(required) && !flags.intersects(preferred_not)))
            .or_else(|| self.first_match(type_bits, |flags| flags.contains(required)))
    }
}

/// YCbCr color model suggested for an external format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum YcbcrModel {
    #[default]
    RgbIdentity,
    YcbcrIdentity,
    Ycbcr709,
    Ycbcr601,
    Ycbcr2020,
}

/// Numeric range of encoded YCbCr values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum YcbcrRange {
    #[default]
    ItuFull,
    ItuNarrow,
}

/// Position of downsampled chroma samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChromaLocation {
    #[default]
    CositedEven,
    Midpoint,
}

/// Source of one output component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComponentSwizzle {
    #[default]
    Identity,
    Zero,
    One,
    R,
    G,
    B,
    A,
}

/// Per-component swizzle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ComponentMapping {
    pub r: ComponentSwizzle,
    pub g: ComponentSwizzle,
    pub b: ComponentSwizzle,
    pub a: ComponentSwizzle,
}

impl ComponentMapping {
    pub const IDENTITY: Self = Self {
        r: ComponentSwizzle::Identity,
        g: ComponentSwizzle::Identity,
        b: ComponentSwizzle::Identity,
        a: ComponentSwizzle::Identity,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTiling {
    Optimal,
    Linear,
}

/// Layout an image is in when accessed, numbered like `VkImageLayout`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ImageLayout {
    Undefined = 0,
    General = 1,
    ShaderReadOnlyOptimal = 5,
}

impl ImageLayout {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Size of a hardware buffer as its allocator describes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardwareBufferDesc {
    pub width: u32,
    pub height: u32,
}

/// Format of a hardware buffer as the driver sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardwareBufferFormat {
    /// Opaque driver format id used instead of a regular format
    pub external_format: u64,
    pub components: ComponentMapping,
    pub suggested_model: YcbcrModel,
    pub suggested_range: YcbcrRange,
    pub suggested_x_chroma_offset: ChromaLocation,
    pub suggested_y_chroma_offset: ChromaLocation,
}

/// Result of the hardware buffer properties query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HardwareBufferProperties {
    pub allocation_size: u64,
    /// Bit `i` set when memory type `i` can back the buffer
    pub memory_type_bits: u32,
    pub format: HardwareBufferFormat,
}

/// Input to [`ExternalImageDevice::create_conversion`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversionDescriptor {
    pub external_format: u64,
    pub model: YcbcrModel,
    pub range: YcbcrRange,
    pub components: ComponentMapping,
    pub x_chroma_offset: ChromaLocation,
    pub y_chroma_offset: ChromaLocation,
    pub chroma_filter: Filter,
    pub force_explicit_reconstruction: bool,
}

/// Input to [`ExternalImageDevice::create_sampler`]
#[derive(Debug)]
pub struct SamplerDescriptor<'a, C> {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_filter: Filter,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub mip_lod_bias: f32,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
    /// Maximum anisotropy, `None` when disabled
    pub anisotropy_clamp: Option<f32>,
    pub compare_enable: bool,
    pub border_color: BorderColor,
    pub unnormalized_coordinates: bool,
    /// Conversion applied when sampling
    pub conversion: &'a C,
}

/// Input to [`ExternalImageDevice::create_external_image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub external_format: u64,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: u32,
    pub tiling: ImageTiling,
    /// Image is only read through a sampler
    pub sampled: bool,
    /// Image is used by a single queue family at a time
    pub exclusive: bool,
    pub initial_layout: ImageLayout,
}

/// Input to [`ExternalImageDevice::import_memory`]
#[derive(Debug)]
pub struct MemoryImportDescriptor<'a, B: ?Sized, I> {
    /// Buffer whose memory is imported
    pub buffer: &'a B,
    /// Image the allocation is dedicated to
    pub dedicated_image: &'a I,
    pub allocation_size: u64,
    pub memory_type_index: u32,
}

/// Input to [`ExternalImageDevice::create_image_view`]
#[derive(Debug)]
pub struct ImageViewDescriptor<'a, I, C> {
    pub image: &'a I,
    pub external_format: u64,
    pub components: ComponentMapping,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
    pub conversion: &'a C,
}

/// A device that can import hardware buffers as sampled images
///
/// Every created object is owned by the caller and released through the matching `destroy_*` call.
pub trait ExternalImageDevice: ComputeDevice + MemoryTypeResolver {
    type HardwareBuffer: ?Sized;
    type Image;
    type Memory;
    type ImageView;
    type Conversion;

    fn describe_hardware_buffer(&self, buffer: &Self::HardwareBuffer) -> HardwareBufferDesc;

    fn hardware_buffer_properties(&self, buffer: &Self::HardwareBuffer) -> Result<HardwareBufferProperties, DriverStatus>;

    fn create_conversion(&self, desc: &ConversionDescriptor) -> Result<Self::Conversion, DriverStatus>;

    fn create_sampler(&self, desc: &SamplerDescriptor<'_, Self::Conversion>) -> Result<Self::Sampler, DriverStatus>;

    fn create_external_image(&self, desc: &ExternalImageDescriptor) -> Result<Self::Image, DriverStatus>;

    fn import_memory(&self, desc: &MemoryImportDescriptor<'_, Self::HardwareBuffer, Self::Image>) -> Result<Self::Memory, DriverStatus>;

    fn bind_image_memory(&self, image: &Self::Image, memory: &Self::Memory, offset: u64) -> Result<(), DriverStatus>;

    fn create_image_view(&self, desc: &ImageViewDescriptor<'_, Self::Image, Self::Conversion>) -> Result<Self::ImageView, DriverStatus>;

    fn destroy_conversion(&self, conversion: Self::Conversion);

    fn destroy_image(&self, image: Self::Image);

    fn free_memory(&self, memory: Self::Memory);

    fn destroy_image_view(&self, view: Self::ImageView);
}
