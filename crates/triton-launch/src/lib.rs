//! Host-side launcher for GPU kernels produced by an out-of-tree kernel
//! compiler.
//!
//! The tensor runtime hands every custom-call execution an opaque,
//! zlib-compressed descriptor. The launcher decodes and memoises it as a
//! [`KernelCall`] or [`AutotunedKernelCall`], compiles the kernel assembly
//! into a device module on first sight (deduplicated by [`KernelCache`]),
//! autotunes across candidate configurations on the real buffers when asked
//! to, and enqueues the launch on the caller's stream. A repeated call is a
//! shared-map probe plus a per-kernel context lookup, nothing more.

mod autotune;
mod cache;
mod call;
mod compile;
mod descriptor;
mod driver;
mod error;
mod ffi;
mod kernel;

pub use autotune::{AutotunedKernelCall, Config};
pub use cache::{AnyKernelCall, Launcher};
pub use call::KernelCall;
pub use compile::{AsmCompiler, PtxasCompiler};
pub use descriptor::{
    AutotunedCallDescriptor, CallDescriptor, ConfigDescriptor, InputOutputAlias,
    KernelCallDescriptor, KernelDescriptor, ParameterDescriptor, ScalarValue,
};
pub use driver::{
    driver, CudaDriver, DeviceAttribute, DevicePtr, FunctionAttribute, GpuContext, GpuDevice,
    GpuDriver, GpuEvent, GpuFunction, GpuModule, GpuStream,
};
pub use error::{LaunchError, LaunchResult};
pub use ffi::{compute_capability, custom_call_target, launch_triton_kernel, CustomCallStatus};
pub use kernel::{Kernel, KernelCache};
