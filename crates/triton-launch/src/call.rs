use std::ffi::c_void;
use std::sync::Arc;

use crate::descriptor::{KernelCallDescriptor, ParameterDescriptor, ScalarValue};
use crate::driver::{DevicePtr, GpuDriver, GpuStream};
use crate::error::{LaunchError, LaunchResult};
use crate::kernel::{Kernel, KernelCache};

#[derive(Debug, Clone, Copy)]
struct ArrayParameter {
    bytes_to_zero: u64,
    require_16byte_alignment: bool,
}

/// Inline storage for a scalar parameter. The driver receives the address of
/// this slot and reads the value by the formal parameter's width from its
/// low bytes (little-endian hosts).
#[repr(transparent)]
#[derive(Debug, Clone, Copy)]
struct ScalarStorage(u64);

impl ScalarStorage {
    fn new(value: ScalarValue) -> Self {
        let bits = match value {
            ScalarValue::Bool(v) => v as u64,
            ScalarValue::I32(v) => v as u32 as u64,
            ScalarValue::U32(v) => v as u64,
            ScalarValue::I64(v) => v as u64,
            ScalarValue::U64(v) => v,
        };
        Self(bits)
    }
}

enum Parameter {
    Array(ArrayParameter),
    Scalar(ScalarStorage),
}

/// A fully-bound kernel invocation: one shared [`Kernel`], a 3-D grid and an
/// ordered parameter list. Array parameters consume the runtime-supplied
/// device buffers positionally; scalars are carried inline.
pub struct KernelCall {
    kernel: Arc<Kernel>,
    grid: [u32; 3],
    parameters: Vec<Parameter>,
    array_parameter_count: usize,
}

impl std::fmt::Debug for KernelCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelCall")
            .field("kernel", &self.kernel)
            .field("grid", &self.grid)
            .field("array_parameter_count", &self.array_parameter_count)
            .finish()
    }
}

impl KernelCall {
    pub(crate) fn from_descriptor(
        kernels: &KernelCache,
        descriptor: &KernelCallDescriptor,
    ) -> LaunchResult<Self> {
        let kernel = kernels.get(&descriptor.kernel)?;
        let parameters: Vec<Parameter> = descriptor
            .parameters
            .iter()
            .map(|parameter| match *parameter {
                ParameterDescriptor::Array {
                    bytes_to_zero,
                    require_16byte_alignment,
                } => Parameter::Array(ArrayParameter {
                    bytes_to_zero,
                    require_16byte_alignment,
                }),
                ParameterDescriptor::Scalar(value) => Parameter::Scalar(ScalarStorage::new(value)),
            })
            .collect();
        let array_parameter_count = parameters
            .iter()
            .filter(|parameter| matches!(parameter, Parameter::Array(_)))
            .count();
        Ok(Self {
            kernel,
            grid: descriptor.grid,
            parameters,
            array_parameter_count,
        })
    }

    pub(crate) fn driver(&self) -> &Arc<dyn GpuDriver> {
        self.kernel.driver()
    }

    /// Number of device buffers the runtime must supply per launch.
    pub fn expected_buffers(&self) -> usize {
        self.array_parameter_count
    }

    /// Binds `buffers` to the array parameters in declaration order and
    /// enqueues the launch. The caller keeps `buffers` valid until this
    /// returns; scalar storage lives inside the call object itself.
    pub fn launch(&self, stream: GpuStream, buffers: &[DevicePtr]) -> LaunchResult<()> {
        let mut params: Vec<*mut c_void> = Vec::with_capacity(self.parameters.len());
        let mut next_buffer = 0usize;
        for (index, parameter) in self.parameters.iter().enumerate() {
            match parameter {
                Parameter::Array(array) => {
                    let slot = buffers.get(next_buffer).ok_or_else(|| {
                        LaunchError::invalid_argument(format!(
                            "kernel call expects {} device buffers, runtime supplied {}",
                            self.array_parameter_count,
                            buffers.len()
                        ))
                    })?;
                    next_buffer += 1;

                    let pointer = *slot;
                    if array.require_16byte_alignment && pointer % 16 != 0 {
                        return Err(LaunchError::invalid_argument(format!(
                            "parameter {index} ({pointer:#x}) is not divisible by 16"
                        )));
                    }
                    if array.bytes_to_zero > 0 {
                        self.driver().memset_d8_async(
                            pointer,
                            0,
                            array.bytes_to_zero as usize,
                            stream,
                        )?;
                    }
                    // The driver dereferences one level: pass the address of
                    // the caller's buffer slot.
                    params.push(slot as *const DevicePtr as *mut c_void);
                }
                Parameter::Scalar(scalar) => {
                    params.push(scalar as *const ScalarStorage as *mut c_void);
                }
            }
        }

        self.kernel.launch(stream, self.grid, &mut params)
    }
}
