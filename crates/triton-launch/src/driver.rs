use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::sync::{Arc, OnceLock};

use libloading::Library;

use crate::error::{LaunchError, LaunchResult};

// Raw driver handles are carried as integers so that everything holding them
// stays `Send + Sync`; they are cast back to pointers at the FFI boundary.
pub type GpuStream = usize;
pub type GpuContext = usize;
pub type GpuModule = usize;
pub type GpuFunction = usize;
pub type GpuEvent = usize;
pub type GpuDevice = i32;
pub type DevicePtr = u64;

/// Device attributes the launcher queries, with their driver enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAttribute {
    ComputeCapabilityMajor = 75,
    ComputeCapabilityMinor = 76,
    MaxSharedMemoryPerBlockOptin = 97,
}

/// Function attributes the launcher reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionAttribute {
    SharedSizeBytes = 1,
    MaxDynamicSharedSizeBytes = 8,
}

/// Thin error-mapping surface over the GPU driver primitives the launcher
/// uses. The production implementation is [`CudaDriver`]; tests substitute
/// their own implementation running against host memory.
pub trait GpuDriver: Send + Sync {
    /// Returns the context the given stream is bound to.
    fn stream_context(&self, stream: GpuStream) -> LaunchResult<GpuContext>;
    /// Pushes `context` onto the calling thread's context stack.
    fn push_context(&self, context: GpuContext) -> LaunchResult<()>;
    /// Pops the calling thread's current context.
    fn pop_context(&self) -> LaunchResult<()>;

    /// Device of the calling thread's current context.
    fn current_device(&self) -> LaunchResult<GpuDevice>;
    /// Device handle for an ordinal, independent of any context.
    fn device_handle(&self, ordinal: i32) -> LaunchResult<GpuDevice>;
    fn device_attribute(
        &self,
        device: GpuDevice,
        attribute: DeviceAttribute,
    ) -> LaunchResult<i32>;

    /// Loads a compiled module image into the current context.
    fn load_module(&self, image: &[u8]) -> LaunchResult<GpuModule>;
    /// Unloads a module; failures are not recoverable and only logged.
    fn unload_module(&self, module: GpuModule);
    fn get_function(&self, module: GpuModule, name: &str) -> LaunchResult<GpuFunction>;
    fn function_attribute(
        &self,
        function: GpuFunction,
        attribute: FunctionAttribute,
    ) -> LaunchResult<i32>;
    fn set_function_attribute(
        &self,
        function: GpuFunction,
        attribute: FunctionAttribute,
        value: i32,
    ) -> LaunchResult<()>;
    /// Sets the function's cache configuration to prefer shared memory.
    fn prefer_shared_cache(&self, function: GpuFunction) -> LaunchResult<()>;

    #[allow(clippy::too_many_arguments)]
    fn launch_kernel(
        &self,
        function: GpuFunction,
        grid: [u32; 3],
        block: [u32; 3],
        shared_mem_bytes: u32,
        stream: GpuStream,
        params: &mut [*mut c_void],
    ) -> LaunchResult<()>;

    fn memset_d8_async(
        &self,
        dst: DevicePtr,
        value: u8,
        bytes: usize,
        stream: GpuStream,
    ) -> LaunchResult<()>;
    fn memcpy_dtoh_async(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        stream: GpuStream,
    ) -> LaunchResult<()>;
    fn memcpy_htod_async(
        &self,
        dst: DevicePtr,
        src: &[u8],
        stream: GpuStream,
    ) -> LaunchResult<()>;
    fn synchronize_stream(&self, stream: GpuStream) -> LaunchResult<()>;

    fn create_event(&self) -> LaunchResult<GpuEvent>;
    fn record_event(&self, event: GpuEvent, stream: GpuStream) -> LaunchResult<()>;
    fn synchronize_event(&self, event: GpuEvent) -> LaunchResult<()>;
    fn elapsed_time_ms(&self, start: GpuEvent, stop: GpuEvent) -> LaunchResult<f32>;
    /// Destroys an event; failures are not recoverable and only logged.
    fn destroy_event(&self, event: GpuEvent);
}

/// Pops the pushed context when dropped, so every exit path restores the
/// calling thread's context.
pub(crate) struct ContextGuard<'a> {
    driver: &'a dyn GpuDriver,
}

impl<'a> ContextGuard<'a> {
    pub(crate) fn push(driver: &'a dyn GpuDriver, context: GpuContext) -> LaunchResult<Self> {
        driver.push_context(context)?;
        Ok(Self { driver })
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.driver.pop_context() {
            log::debug!("failed to pop context: {err}");
        }
    }
}

type CUresult = i32;
type CUdevice = i32;
type CUcontext = *mut c_void;
type CUdeviceptr = u64;
type CUmodule = *mut c_void;
type CUfunction = *mut c_void;
type CUstream = *mut c_void;
type CUevent = *mut c_void;

const CUDA_SUCCESS: CUresult = 0;
const CU_EVENT_DEFAULT: u32 = 0;
const CU_FUNC_CACHE_PREFER_SHARED: i32 = 3;

type CuInitFn = unsafe extern "C" fn(flags: u32) -> CUresult;
type CuGetErrorNameFn = unsafe extern "C" fn(error: CUresult, name: *mut *const c_char) -> CUresult;
type CuGetErrorStringFn = unsafe extern "C" fn(error: CUresult, text: *mut *const c_char) -> CUresult;
type CuDeviceGetFn = unsafe extern "C" fn(device: *mut CUdevice, ordinal: i32) -> CUresult;
type CuDeviceGetAttributeFn =
    unsafe extern "C" fn(value: *mut i32, attrib: i32, dev: CUdevice) -> CUresult;
type CuCtxGetDeviceFn = unsafe extern "C" fn(device: *mut CUdevice) -> CUresult;
type CuCtxPushCurrentFn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuCtxPopCurrentFn = unsafe extern "C" fn(ctx: *mut CUcontext) -> CUresult;
type CuStreamGetCtxFn = unsafe extern "C" fn(stream: CUstream, ctx: *mut CUcontext) -> CUresult;
type CuModuleLoadDataFn =
    unsafe extern "C" fn(module: *mut CUmodule, image: *const c_void) -> CUresult;
type CuModuleUnloadFn = unsafe extern "C" fn(module: CUmodule) -> CUresult;
type CuModuleGetFunctionFn =
    unsafe extern "C" fn(hfunc: *mut CUfunction, hmod: CUmodule, name: *const c_char) -> CUresult;
type CuFuncGetAttributeFn =
    unsafe extern "C" fn(value: *mut i32, attrib: i32, hfunc: CUfunction) -> CUresult;
type CuFuncSetAttributeFn =
    unsafe extern "C" fn(hfunc: CUfunction, attrib: i32, value: i32) -> CUresult;
type CuFuncSetCacheConfigFn = unsafe extern "C" fn(hfunc: CUfunction, config: i32) -> CUresult;
type CuLaunchKernelFn = unsafe extern "C" fn(
    f: CUfunction,
    grid_dim_x: u32,
    grid_dim_y: u32,
    grid_dim_z: u32,
    block_dim_x: u32,
    block_dim_y: u32,
    block_dim_z: u32,
    shared_mem_bytes: u32,
    h_stream: CUstream,
    kernel_params: *mut *mut c_void,
    extra: *mut *mut c_void,
) -> CUresult;
type CuMemsetD8AsyncFn = unsafe extern "C" fn(
    dst_device: CUdeviceptr,
    value: u8,
    count: usize,
    stream: CUstream,
) -> CUresult;
type CuMemcpyDtoHAsyncFn = unsafe extern "C" fn(
    dst_host: *mut c_void,
    src_device: CUdeviceptr,
    byte_count: usize,
    stream: CUstream,
) -> CUresult;
type CuMemcpyHtoDAsyncFn = unsafe extern "C" fn(
    dst_device: CUdeviceptr,
    src_host: *const c_void,
    byte_count: usize,
    stream: CUstream,
) -> CUresult;
type CuStreamSynchronizeFn = unsafe extern "C" fn(stream: CUstream) -> CUresult;
type CuEventCreateFn = unsafe extern "C" fn(event: *mut CUevent, flags: u32) -> CUresult;
type CuEventRecordFn = unsafe extern "C" fn(event: CUevent, stream: CUstream) -> CUresult;
type CuEventSynchronizeFn = unsafe extern "C" fn(event: CUevent) -> CUresult;
type CuEventElapsedTimeFn =
    unsafe extern "C" fn(millis: *mut f32, start: CUevent, stop: CUevent) -> CUresult;
type CuEventDestroyFn = unsafe extern "C" fn(event: CUevent) -> CUresult;

struct DriverFns {
    cu_get_error_name: CuGetErrorNameFn,
    cu_get_error_string: CuGetErrorStringFn,
    cu_device_get: CuDeviceGetFn,
    cu_device_get_attribute: CuDeviceGetAttributeFn,
    cu_ctx_get_device: CuCtxGetDeviceFn,
    cu_ctx_push_current: CuCtxPushCurrentFn,
    cu_ctx_pop_current: CuCtxPopCurrentFn,
    cu_stream_get_ctx: CuStreamGetCtxFn,
    cu_module_load_data: CuModuleLoadDataFn,
    cu_module_unload: CuModuleUnloadFn,
    cu_module_get_function: CuModuleGetFunctionFn,
    cu_func_get_attribute: CuFuncGetAttributeFn,
    cu_func_set_attribute: CuFuncSetAttributeFn,
    cu_func_set_cache_config: CuFuncSetCacheConfigFn,
    cu_launch_kernel: CuLaunchKernelFn,
    cu_memset_d8_async: CuMemsetD8AsyncFn,
    cu_memcpy_dtoh_async: CuMemcpyDtoHAsyncFn,
    cu_memcpy_htod_async: CuMemcpyHtoDAsyncFn,
    cu_stream_synchronize: CuStreamSynchronizeFn,
    cu_event_create: CuEventCreateFn,
    cu_event_record: CuEventRecordFn,
    cu_event_synchronize: CuEventSynchronizeFn,
    cu_event_elapsed_time: CuEventElapsedTimeFn,
    cu_event_destroy: CuEventDestroyFn,
}

/// CUDA driver loaded at runtime. The launcher never creates contexts or
/// allocates device memory; streams, contexts and buffers are owned by the
/// calling runtime.
pub struct CudaDriver {
    _lib: Library,
    fns: DriverFns,
}

static CUDA_DRIVER: OnceLock<Result<Arc<CudaDriver>, String>> = OnceLock::new();

/// Process-wide driver handle, initialised on first access.
pub fn driver() -> LaunchResult<Arc<dyn GpuDriver>> {
    let init = CUDA_DRIVER.get_or_init(|| match CudaDriver::new() {
        Ok(driver) => Ok(Arc::new(driver)),
        Err(err) => Err(err.to_string()),
    });
    match init {
        Ok(driver) => {
            let driver: Arc<dyn GpuDriver> = Arc::clone(driver) as Arc<dyn GpuDriver>;
            Ok(driver)
        }
        Err(message) => Err(LaunchError::internal(format!(
            "CUDA driver unavailable: {message}"
        ))),
    }
}

impl CudaDriver {
    pub fn new() -> LaunchResult<Self> {
        let lib = load_cuda_library()?;
        let cu_init: CuInitFn = load_symbol(&lib, b"cuInit\0")?;
        let fns = DriverFns {
            cu_get_error_name: load_symbol(&lib, b"cuGetErrorName\0")?,
            cu_get_error_string: load_symbol(&lib, b"cuGetErrorString\0")?,
            cu_device_get: load_symbol(&lib, b"cuDeviceGet\0")?,
            cu_device_get_attribute: load_symbol(&lib, b"cuDeviceGetAttribute\0")?,
            cu_ctx_get_device: load_symbol(&lib, b"cuCtxGetDevice\0")?,
            cu_ctx_push_current: load_symbol(&lib, b"cuCtxPushCurrent_v2\0")?,
            cu_ctx_pop_current: load_symbol(&lib, b"cuCtxPopCurrent_v2\0")?,
            cu_stream_get_ctx: load_symbol(&lib, b"cuStreamGetCtx\0")?,
            cu_module_load_data: load_symbol(&lib, b"cuModuleLoadData\0")?,
            cu_module_unload: load_symbol(&lib, b"cuModuleUnload\0")?,
            cu_module_get_function: load_symbol(&lib, b"cuModuleGetFunction\0")?,
            cu_func_get_attribute: load_symbol(&lib, b"cuFuncGetAttribute\0")?,
            cu_func_set_attribute: load_symbol(&lib, b"cuFuncSetAttribute\0")?,
            cu_func_set_cache_config: load_symbol(&lib, b"cuFuncSetCacheConfig\0")?,
            cu_launch_kernel: load_symbol(&lib, b"cuLaunchKernel\0")?,
            cu_memset_d8_async: load_symbol(&lib, b"cuMemsetD8Async\0")?,
            cu_memcpy_dtoh_async: load_symbol(&lib, b"cuMemcpyDtoHAsync_v2\0")?,
            cu_memcpy_htod_async: load_symbol(&lib, b"cuMemcpyHtoDAsync_v2\0")?,
            cu_stream_synchronize: load_symbol(&lib, b"cuStreamSynchronize\0")?,
            cu_event_create: load_symbol(&lib, b"cuEventCreate\0")?,
            cu_event_record: load_symbol(&lib, b"cuEventRecord\0")?,
            cu_event_synchronize: load_symbol(&lib, b"cuEventSynchronize\0")?,
            cu_event_elapsed_time: load_symbol(&lib, b"cuEventElapsedTime\0")?,
            cu_event_destroy: load_symbol(&lib, b"cuEventDestroy_v2\0")?,
        };

        let driver = Self { _lib: lib, fns };
        // SAFETY: cuInit takes a flags word and must be 0 per the driver API.
        driver.check(unsafe { cu_init(0) }, "cuInit")?;
        Ok(driver)
    }

    #[track_caller]
    fn check(&self, code: CUresult, op: &'static str) -> LaunchResult<()> {
        if code == CUDA_SUCCESS {
            return Ok(());
        }
        Err(LaunchError::driver(op, self.describe_error(code)))
    }

    fn describe_error(&self, code: CUresult) -> String {
        let mut name: *const c_char = std::ptr::null();
        let mut text: *const c_char = std::ptr::null();
        // SAFETY: out pointers are valid; the driver returns static strings.
        unsafe {
            if (self.fns.cu_get_error_name)(code, &mut name) != CUDA_SUCCESS
                || (self.fns.cu_get_error_string)(code, &mut text) != CUDA_SUCCESS
                || name.is_null()
                || text.is_null()
            {
                return format!("driver error code {code}");
            }
            format!(
                "{} ({})",
                CStr::from_ptr(name).to_string_lossy(),
                CStr::from_ptr(text).to_string_lossy()
            )
        }
    }
}

impl GpuDriver for CudaDriver {
    fn stream_context(&self, stream: GpuStream) -> LaunchResult<GpuContext> {
        let mut context: CUcontext = std::ptr::null_mut();
        // SAFETY: the stream handle comes from the runtime and the out
        // pointer is valid.
        let code = unsafe { (self.fns.cu_stream_get_ctx)(stream as CUstream, &mut context) };
        self.check(code, "cuStreamGetCtx")?;
        Ok(context as GpuContext)
    }

    fn push_context(&self, context: GpuContext) -> LaunchResult<()> {
        // SAFETY: the context handle was produced by the driver.
        let code = unsafe { (self.fns.cu_ctx_push_current)(context as CUcontext) };
        self.check(code, "cuCtxPushCurrent")
    }

    fn pop_context(&self) -> LaunchResult<()> {
        let mut popped: CUcontext = std::ptr::null_mut();
        // SAFETY: out pointer is valid; the popped handle is discarded.
        let code = unsafe { (self.fns.cu_ctx_pop_current)(&mut popped) };
        self.check(code, "cuCtxPopCurrent")
    }

    fn current_device(&self) -> LaunchResult<GpuDevice> {
        let mut device: CUdevice = 0;
        // SAFETY: out pointer is valid.
        let code = unsafe { (self.fns.cu_ctx_get_device)(&mut device) };
        self.check(code, "cuCtxGetDevice")?;
        Ok(device)
    }

    fn device_handle(&self, ordinal: i32) -> LaunchResult<GpuDevice> {
        let mut device: CUdevice = 0;
        // SAFETY: out pointer is valid.
        let code = unsafe { (self.fns.cu_device_get)(&mut device, ordinal) };
        self.check(code, "cuDeviceGet")?;
        Ok(device)
    }

    fn device_attribute(
        &self,
        device: GpuDevice,
        attribute: DeviceAttribute,
    ) -> LaunchResult<i32> {
        let mut value = 0i32;
        // SAFETY: out pointer is valid and the attribute enum value is one
        // the driver defines.
        let code =
            unsafe { (self.fns.cu_device_get_attribute)(&mut value, attribute as i32, device) };
        self.check(code, "cuDeviceGetAttribute")?;
        Ok(value)
    }

    fn load_module(&self, image: &[u8]) -> LaunchResult<GpuModule> {
        let mut module: CUmodule = std::ptr::null_mut();
        // SAFETY: the image is a complete module binary held alive for the
        // duration of the call.
        let code = unsafe {
            (self.fns.cu_module_load_data)(&mut module, image.as_ptr() as *const c_void)
        };
        self.check(code, "cuModuleLoadData")?;
        log::debug!("loaded module {:#x} ({} bytes)", module as usize, image.len());
        Ok(module as GpuModule)
    }

    fn unload_module(&self, module: GpuModule) {
        // SAFETY: the handle was returned by load_module and is unloaded once.
        let code = unsafe { (self.fns.cu_module_unload)(module as CUmodule) };
        if code != CUDA_SUCCESS {
            log::debug!("cuModuleUnload failed: {}", self.describe_error(code));
        }
    }

    fn get_function(&self, module: GpuModule, name: &str) -> LaunchResult<GpuFunction> {
        let c_name = CString::new(name).map_err(|_| {
            LaunchError::invalid_argument(format!("kernel entry name {name:?} contains NUL byte"))
        })?;
        let mut function: CUfunction = std::ptr::null_mut();
        // SAFETY: module handle and name pointer are valid.
        let code = unsafe {
            (self.fns.cu_module_get_function)(&mut function, module as CUmodule, c_name.as_ptr())
        };
        self.check(code, "cuModuleGetFunction")?;
        Ok(function as GpuFunction)
    }

    fn function_attribute(
        &self,
        function: GpuFunction,
        attribute: FunctionAttribute,
    ) -> LaunchResult<i32> {
        let mut value = 0i32;
        // SAFETY: out pointer and function handle are valid.
        let code = unsafe {
            (self.fns.cu_func_get_attribute)(&mut value, attribute as i32, function as CUfunction)
        };
        self.check(code, "cuFuncGetAttribute")?;
        Ok(value)
    }

    fn set_function_attribute(
        &self,
        function: GpuFunction,
        attribute: FunctionAttribute,
        value: i32,
    ) -> LaunchResult<()> {
        // SAFETY: function handle is valid.
        let code = unsafe {
            (self.fns.cu_func_set_attribute)(function as CUfunction, attribute as i32, value)
        };
        self.check(code, "cuFuncSetAttribute")
    }

    fn prefer_shared_cache(&self, function: GpuFunction) -> LaunchResult<()> {
        // SAFETY: function handle is valid.
        let code = unsafe {
            (self.fns.cu_func_set_cache_config)(function as CUfunction, CU_FUNC_CACHE_PREFER_SHARED)
        };
        self.check(code, "cuFuncSetCacheConfig")
    }

    fn launch_kernel(
        &self,
        function: GpuFunction,
        grid: [u32; 3],
        block: [u32; 3],
        shared_mem_bytes: u32,
        stream: GpuStream,
        params: &mut [*mut c_void],
    ) -> LaunchResult<()> {
        // SAFETY: function and stream handles are valid; every entry of
        // `params` points at storage that outlives this call, which is all
        // the driver requires (parameters are copied at enqueue time).
        let code = unsafe {
            (self.fns.cu_launch_kernel)(
                function as CUfunction,
                grid[0],
                grid[1],
                grid[2],
                block[0],
                block[1],
                block[2],
                shared_mem_bytes,
                stream as CUstream,
                params.as_mut_ptr(),
                std::ptr::null_mut(),
            )
        };
        self.check(code, "cuLaunchKernel")
    }

    fn memset_d8_async(
        &self,
        dst: DevicePtr,
        value: u8,
        bytes: usize,
        stream: GpuStream,
    ) -> LaunchResult<()> {
        // SAFETY: the destination pointer is a device buffer owned by the
        // runtime and valid for `bytes`.
        let code = unsafe { (self.fns.cu_memset_d8_async)(dst, value, bytes, stream as CUstream) };
        self.check(code, "cuMemsetD8Async")
    }

    fn memcpy_dtoh_async(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        stream: GpuStream,
    ) -> LaunchResult<()> {
        // SAFETY: destination slice is valid for its length; the caller
        // synchronises the stream before releasing it.
        let code = unsafe {
            (self.fns.cu_memcpy_dtoh_async)(
                dst.as_mut_ptr() as *mut c_void,
                src,
                dst.len(),
                stream as CUstream,
            )
        };
        self.check(code, "cuMemcpyDtoHAsync")
    }

    fn memcpy_htod_async(
        &self,
        dst: DevicePtr,
        src: &[u8],
        stream: GpuStream,
    ) -> LaunchResult<()> {
        // SAFETY: source slice is valid for its length; the caller
        // synchronises the stream before releasing it.
        let code = unsafe {
            (self.fns.cu_memcpy_htod_async)(
                dst,
                src.as_ptr() as *const c_void,
                src.len(),
                stream as CUstream,
            )
        };
        self.check(code, "cuMemcpyHtoDAsync")
    }

    fn synchronize_stream(&self, stream: GpuStream) -> LaunchResult<()> {
        // SAFETY: stream handle comes from the runtime.
        let code = unsafe { (self.fns.cu_stream_synchronize)(stream as CUstream) };
        self.check(code, "cuStreamSynchronize")
    }

    fn create_event(&self) -> LaunchResult<GpuEvent> {
        let mut event: CUevent = std::ptr::null_mut();
        // Default flags: a blocking-sync event would perturb timed intervals.
        // SAFETY: out pointer is valid.
        let code = unsafe { (self.fns.cu_event_create)(&mut event, CU_EVENT_DEFAULT) };
        self.check(code, "cuEventCreate")?;
        Ok(event as GpuEvent)
    }

    fn record_event(&self, event: GpuEvent, stream: GpuStream) -> LaunchResult<()> {
        // SAFETY: both handles are valid.
        let code = unsafe { (self.fns.cu_event_record)(event as CUevent, stream as CUstream) };
        self.check(code, "cuEventRecord")
    }

    fn synchronize_event(&self, event: GpuEvent) -> LaunchResult<()> {
        // SAFETY: event handle is valid.
        let code = unsafe { (self.fns.cu_event_synchronize)(event as CUevent) };
        self.check(code, "cuEventSynchronize")
    }

    fn elapsed_time_ms(&self, start: GpuEvent, stop: GpuEvent) -> LaunchResult<f32> {
        let mut millis = 0f32;
        // SAFETY: both events have been recorded and the out pointer is valid.
        let code = unsafe {
            (self.fns.cu_event_elapsed_time)(&mut millis, start as CUevent, stop as CUevent)
        };
        self.check(code, "cuEventElapsedTime")?;
        Ok(millis)
    }

    fn destroy_event(&self, event: GpuEvent) {
        // SAFETY: the handle was returned by create_event and is destroyed once.
        let code = unsafe { (self.fns.cu_event_destroy)(event as CUevent) };
        if code != CUDA_SUCCESS {
            log::debug!("cuEventDestroy failed: {}", self.describe_error(code));
        }
    }
}

fn load_cuda_library() -> LaunchResult<Library> {
    let candidates = ["libcuda.so.1", "libcuda.so", "nvcuda.dll", "libcuda.dylib"];

    for candidate in candidates {
        // SAFETY: dynamic library probe only; no symbols are invoked here.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            return Ok(lib);
        }
    }

    Err(LaunchError::internal(
        "failed to load CUDA driver library (tried libcuda.so.1, libcuda.so, nvcuda.dll, libcuda.dylib)",
    ))
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> LaunchResult<T> {
    // SAFETY: the caller supplies the expected symbol type from the driver API.
    let symbol = unsafe { lib.get::<T>(name) }.map_err(|err| {
        LaunchError::internal(format!(
            "failed to resolve CUDA symbol {}: {err}",
            String::from_utf8_lossy(name)
        ))
    })?;
    Ok(*symbol)
}
