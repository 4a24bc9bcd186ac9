//! Workgroup sizing CLI
//!
//! Prints the local size a kernel would be specialized with for a tensor shape, and the dispatch grid that
//! covers it. Limits come from the command line or from a probed GPU adapter.
//!
//! # Usage
//! ```bash
//! cargo run --example cli -- 224 224 3 --max-invocations 1024 --max-x 1024 --max-y 1024 --max-z 64
//! cargo run --example cli -- 1920 1080 -1 --probe
//! ```

use clap::Parser;
use kernel_pipeline::{DeviceInfo, PipelineOptions, PrecisionMode, WorkgroupLimits, backend::wgpu::WgpuDevice, optimal_local_size};

/// Command-line arguments for the workgroup sizer
#[derive(Parser)]
#[command(version, about = "Show the workgroup size and dispatch grid for a tensor shape")]
struct Args {
    /// Tensor width, negative when unknown
    #[arg(allow_hyphen_values = true)]
    width: i32,

    /// Tensor height, negative when unknown
    #[arg(allow_hyphen_values = true)]
    height: i32,

    /// Tensor channel count, negative when unknown
    #[arg(allow_hyphen_values = true)]
    channels: i32,

    /// Read limits and features from the default GPU adapter
    #[arg(long)]
    probe: bool,

    /// Maximum invocations per workgroup
    #[arg(long, default_value = "256")]
    max_invocations: u32,

    /// Maximum local size along X
    #[arg(long, default_value = "256")]
    max_x: u32,

    /// Maximum local size along Y
    #[arg(long, default_value = "256")]
    max_y: u32,

    /// Maximum local size along Z
    #[arg(long, default_value = "64")]
    max_z: u32,

    /// Kernel whose precision variant name is printed
    #[arg(long, short, default_value = "convolution")]
    kernel: String,

    /// Only consider full precision variants
    #[arg(long)]
    full_precision: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let info = if args.probe {
        let (device, _queue) = WgpuDevice::request_blocking()?;
        *device.info()
    } else {
        DeviceInfo {
            limits: WorkgroupLimits {
                max_size_x: args.max_x,
                max_size_y: args.max_y,
                max_size_z: args.max_z,
                max_invocations: args.max_invocations,
            },
            ..Default::default()
        }
    };

    if [info.limits.max_size_x, info.limits.max_size_y, info.limits.max_size_z, info.limits.max_invocations].contains(&0) {
        return Err("every limit must be positive".into());
    }

    let opt = if args.full_precision { PipelineOptions::full_precision() } else { PipelineOptions::default() };
    let variant = PrecisionMode::select(&info, &opt).kernel_name(&args.kernel);

    let local_size = optimal_local_size(args.width, args.height, args.channels, &info.limits);
    println!("Limits: {:?}", info.limits);
    println!("Kernel variant: {variant}");
    println!("Local size: {}x{}x{} ({} invocations)", local_size.x, local_size.y, local_size.z, local_size.invocations());

    match extent(&args) {
        Some(extent) => {
            let (gx, gy, gz) = local_size.dispatch_size(extent);
            println!("Dispatch grid for {}x{}x{}: {gx}x{gy}x{gz}", extent.0, extent.1, extent.2);
        }
        None => println!("Dispatch grid depends on the unknown extents"),
    }

    Ok(())
}

/// The tensor extent, if every axis is known
fn extent(args: &Args) -> Option<(u32, u32, u32)> {
    let known = |v: i32| u32::try_from(v).ok().filter(|&v| v > 0);
    Some((known(args.width)?, known(args.height)?, known(args.channels)?))
}
