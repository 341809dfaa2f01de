use std::ffi::c_void;
use std::os::raw::c_char;
use std::slice;

use crate::cache::{AnyKernelCall, Launcher};
use crate::driver::{self, DeviceAttribute, DevicePtr, GpuStream};
use crate::error::{LaunchError, LaunchResult};

/// Status channel of the runtime's custom-call ABI. Left untouched on
/// success; a failure message is written through [`CustomCallStatus::set_failure`].
#[derive(Debug, Default)]
pub struct CustomCallStatus {
    failure: Option<String>,
}

impl CustomCallStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failure(&mut self, message: &str) {
        self.failure = Some(message.to_string());
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

impl Launcher {
    /// Custom-call body shared by the FFI entry point and tests: resolve the
    /// opaque descriptor, bind the buffer array and launch.
    ///
    /// # Safety
    ///
    /// `buffers` must point at as many device-pointer slots as the resolved
    /// call's `expected_buffers()`, valid for the duration of the call.
    pub unsafe fn custom_call(
        &self,
        stream: GpuStream,
        buffers: *mut *mut c_void,
        opaque: &[u8],
        status: &mut CustomCallStatus,
    ) {
        let result = self
            .get_call(opaque)
            .and_then(|call| launch_with_raw_buffers(&call, stream, buffers));
        if let Err(err) = result {
            status.set_failure(&err.to_string());
        }
    }
}

unsafe fn launch_with_raw_buffers(
    call: &AnyKernelCall,
    stream: GpuStream,
    buffers: *mut *mut c_void,
) -> LaunchResult<()> {
    let count = call.expected_buffers();
    let buffers: &[DevicePtr] = if count == 0 {
        &[]
    } else {
        if buffers.is_null() {
            return Err(LaunchError::invalid_argument(
                "null buffer array for a call with array parameters",
            ));
        }
        slice::from_raw_parts(buffers.cast::<DevicePtr>(), count)
    };
    call.launch(stream, buffers)
}

/// Entry point with the signature mandated by the runtime's custom-call ABI.
///
/// # Safety
///
/// All pointers follow the runtime's custom-call contract: `opaque` is valid
/// for `opaque_len` bytes, `buffers` holds one device pointer per array
/// parameter of the described call, and `status` is a live status handle.
pub unsafe extern "C" fn launch_triton_kernel(
    stream: *mut c_void,
    buffers: *mut *mut c_void,
    opaque: *const c_char,
    opaque_len: usize,
    status: *mut CustomCallStatus,
) {
    let Some(status) = status.as_mut() else {
        return;
    };
    let result: LaunchResult<&Launcher> = Launcher::global();
    match result {
        Ok(launcher) => {
            if opaque.is_null() {
                status.set_failure("invalid argument: null opaque descriptor");
                return;
            }
            let opaque = slice::from_raw_parts(opaque.cast::<u8>(), opaque_len);
            launcher.custom_call(stream as GpuStream, buffers, opaque, status);
        }
        Err(err) => status.set_failure(&err.to_string()),
    }
}

/// Address the tensor runtime registers as its custom-call target.
pub fn custom_call_target() -> *const c_void {
    launch_triton_kernel as usize as *const c_void
}

/// Compute capability of a device as `10 * major + minor`, initialising the
/// driver on first use.
pub fn compute_capability(device_ordinal: i32) -> LaunchResult<i32> {
    let driver = driver::driver()?;
    let device = driver.device_handle(device_ordinal)?;
    let major = driver.device_attribute(device, DeviceAttribute::ComputeCapabilityMajor)?;
    let minor = driver.device_attribute(device, DeviceAttribute::ComputeCapabilityMinor)?;
    Ok(major * 10 + minor)
}
