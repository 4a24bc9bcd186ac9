//! Specialization constant packing
//!
//! Caller constants take IDs `0..K` in declaration order. The local size is appended as three more
//! constants under fixed IDs far above any realistic caller count, so kernels can declare their workgroup
//! size as specialization constants without coordinating IDs with their other constants.

use crate::error::PipelineError;
use crate::workgroup::LocalSize;

/// Constant ID carrying the local size along X
pub const LOCAL_SIZE_X_ID: u32 = 233;
/// Constant ID carrying the local size along Y
pub const LOCAL_SIZE_Y_ID: u32 = 234;
/// Constant ID carrying the local size along Z
pub const LOCAL_SIZE_Z_ID: u32 = 235;

/// Size in bytes of every packed constant
pub const CONSTANT_SIZE: usize = std::mem::size_of::<u32>();

/// A 4-byte scalar baked into a pipeline at creation time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpecializationConstant {
    I32(i32),
    U32(u32),
    F32(f32),
}

impl SpecializationConstant {
    /// Raw 32-bit pattern as it is laid out in the data blob
    pub fn to_bits(self) -> u32 {
        match self {
            SpecializationConstant::I32(v) => v as u32,
            SpecializationConstant::U32(v) => v,
            SpecializationConstant::F32(v) => v.to_bits(),
        }
    }

    /// Numeric value, for backends that take overridable constants as doubles
    pub fn as_f64(self) -> f64 {
        match self {
            SpecializationConstant::I32(v) => v as f64,
            SpecializationConstant::U32(v) => v as f64,
            SpecializationConstant::F32(v) => v as f64,
        }
    }
}

impl From<i32> for SpecializationConstant {
    fn from(value: i32) -> Self {
        SpecializationConstant::I32(value)
    }
}

impl From<u32> for SpecializationConstant {
    fn from(value: u32) -> Self {
        SpecializationConstant::U32(value)
    }
}

impl From<f32> for SpecializationConstant {
    fn from(value: f32) -> Self {
        SpecializationConstant::F32(value)
    }
}

/// Location of one constant inside the data blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpecializationMapEntry {
    pub constant_id: u32,
    pub offset: u32,
    pub size: usize,
}

/// Map entries and the contiguous data they point into
#[derive(Debug, Clone, PartialEq)]
pub struct SpecializationInfo {
    entries: Vec<SpecializationMapEntry>,
    constants: Vec<SpecializationConstant>,
    data: Vec<u32>,
}

impl SpecializationInfo {
    /// Packs caller constants followed by the local size
    ///
    /// # Arguments
    /// * `constants` - Caller constants, assigned IDs in order starting at zero
    /// * `local_size` - Local size appended under the reserved IDs
    ///
    /// # Returns
    /// `K + 3` entries over `(K + 3) * 4` bytes, or an error if the caller IDs would reach the reserved range
    pub fn pack(constants: &[SpecializationConstant], local_size: LocalSize) -> Result<Self, PipelineError> {
        if constants.len() >= LOCAL_SIZE_X_ID as usize {
            return Err(PipelineError::TooManySpecializationConstants { count: constants.len() });
        }

        let constants: Vec<_> = constants
            .iter()
            .copied()
            .chain([local_size.x, local_size.y, local_size.z].map(SpecializationConstant::U32))
            .collect();

        let user_count = constants.len() - 3;
        let entries = (0..constants.len())
            .map(|i| SpecializationMapEntry {
                constant_id: if i < user_count { i as u32 } else { LOCAL_SIZE_X_ID + (i - user_count) as u32 },
                offset: (i * CONSTANT_SIZE) as u32,
                size: CONSTANT_SIZE,
            })
            .collect();

        let data = constants.iter().map(|c| c.to_bits()).collect();

        Ok(Self { entries, constants, data })
    }

    pub fn entries(&self) -> &[SpecializationMapEntry] {
        &self.entries
    }

    /// Constant values in entry order
    pub fn constants(&self) -> &[SpecializationConstant] {
        &self.constants
    }

    /// Pairs of constant ID and value
    pub fn iter(&self) -> impl Iterator<Item = (u32, SpecializationConstant)> + '_ {
        self.entries.iter().zip(&self.constants).map(|(entry, value)| (entry.constant_id, *value))
    }

    /// Contiguous data blob the map entries index into
    pub fn data(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn data_size(&self) -> usize {
        self.data.len() * CONSTANT_SIZE
    }
}
