//! Adaptive workgroup sizing
//!
//! Picks the local size a pipeline is specialized with from the extents of the tensor it will run over.
//! The channel axis is sized first so small channel counts do not leave idle lanes, then the remaining
//! invocation budget is split between width and height according to their aspect ratio.

use crate::device::WorkgroupLimits;

/// Upper bound preferred for any single axis, regardless of what the device allows
const PREFERRED_AXIS_SIZE: u32 = 128;

/// Local workgroup dimensions baked into a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Default for LocalSize {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl LocalSize {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total invocations in one workgroup
    pub fn invocations(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    /// Whether every axis is non-zero and within the device ceilings
    pub fn fits(&self, limits: &WorkgroupLimits) -> bool {
        self.x >= 1
            && self.y >= 1
            && self.z >= 1
            && self.x <= limits.max_size_x
            && self.y <= limits.max_size_y
            && self.z <= limits.max_size_z
            && self.invocations() <= limits.max_invocations as u64
    }

    /// Number of workgroups to dispatch so that the grid covers `extent`
    pub fn dispatch_size(&self, extent: (u32, u32, u32)) -> (u32, u32, u32) {
        (extent.0.div_ceil(self.x), extent.1.div_ceil(self.y), extent.2.div_ceil(self.z))
    }
}

/// Halves `size` until it no longer exceeds `bound`
fn halve_until_within(mut size: u32, bound: u32) -> u32 {
    while size > bound && size > 1 {
        size /= 2;
    }
    size
}

/// Computes the local size for a tensor of `w` x `h` x `c`
///
/// Any extent that is zero or negative is treated as unknown (broadcast). The result always satisfies
/// [`LocalSize::fits`] for `limits` whose fields are all positive.
///
/// # Arguments
/// * `w` - Tensor width
/// * `h` - Tensor height
/// * `c` - Tensor channel count
/// * `limits` - Ceilings of the target device
///
/// # Returns
/// The local size to specialize the pipeline with
pub fn optimal_local_size(w: i32, h: i32, c: i32, limits: &WorkgroupLimits) -> LocalSize {
    // Channel axis first, never wider than the real channel count
    let z = if c > 0 {
        halve_until_within(limits.max_size_z, c as u32)
    } else {
        PREFERRED_AXIS_SIZE.min(limits.max_size_z)
    };
    let z = halve_until_within(z, limits.max_invocations);

    let budget = limits.max_invocations / z;

    let (x, y) = match (w > 0, h > 0) {
        _ if w == h => symmetric(budget, limits),
        (false, false) => symmetric(budget, limits),
        (true, true) => by_aspect_ratio(w as u32, h as u32, budget, limits),
        (false, true) => {
            let y = halve_until_within(budget.min(limits.max_size_y), h as u32);
            let x = (budget / y).min(limits.max_size_x);
            (x, y)
        }
        (true, false) => {
            let x = halve_until_within(budget.min(limits.max_size_x), w as u32);
            let y = (budget / x).min(limits.max_size_y);
            (x, y)
        }
    };

    LocalSize { x, y, z }
}

/// Square local size no larger than the square root of the budget
fn symmetric(budget: u32, limits: &WorkgroupLimits) -> (u32, u32) {
    let side = (budget as f64).sqrt() as u32;
    let preferred = PREFERRED_AXIS_SIZE.min(limits.max_size_x).min(limits.max_size_y);
    let xy = halve_until_within(preferred, side);
    (xy, xy)
}

/// Splits the budget so the longer axis gets proportionally more lanes
fn by_aspect_ratio(w: u32, h: u32, budget: u32, limits: &WorkgroupLimits) -> (u32, u32) {
    let (raw_x, raw_y) = if h > w {
        let ratio = h as f64 / w as f64;
        let xy = (budget as f64 / ratio).sqrt();
        ((xy as u32).max(1), (xy * ratio) as u32)
    } else {
        let ratio = w as f64 / h as f64;
        let xy = (budget as f64 / ratio).sqrt();
        ((xy * ratio) as u32, (xy as u32).max(1))
    };

    let mut x = halve_until_within(PREFERRED_AXIS_SIZE.min(limits.max_size_x), raw_x);
    let mut y = halve_until_within(PREFERRED_AXIS_SIZE.min(limits.max_size_y), raw_y);

    // Rounding the short axis up to one lane can overshoot the budget on extreme ratios
    while x as u64 * y as u64 > budget as u64 {
        if x >= y && x > 1 {
            x /= 2;
        } else if y > 1 {
            y /= 2;
        } else {
            break;
        }
    }

    (x, y)
}
