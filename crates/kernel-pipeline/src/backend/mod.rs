//! Concrete device backends

pub mod wgpu;
