#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use triton_launch::{
    AsmCompiler, CallDescriptor, DeviceAttribute, DevicePtr, FunctionAttribute, GpuContext,
    GpuDevice, GpuDriver, GpuEvent, GpuFunction, GpuModule, GpuStream, KernelCallDescriptor,
    KernelDescriptor, LaunchError, LaunchResult, Launcher, ParameterDescriptor,
};

pub const CONTEXT_BASE: usize = 0xC000;

/// One operation the fake driver observed, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverOp {
    Memset {
        pointer: DevicePtr,
        bytes: usize,
    },
    Launch(LaunchRecord),
    CopyToHost {
        source: DevicePtr,
        bytes: Vec<u8>,
    },
    CopyToDevice {
        destination: DevicePtr,
        bytes: Vec<u8>,
    },
    StreamSync,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub entry_name: String,
    pub grid: [u32; 3],
    pub block: [u32; 3],
    pub shared_mem_bytes: u32,
    pub stream: GpuStream,
    /// First-level dereference of each parameter slot: the device pointer
    /// for array parameters, the inline value for scalars.
    pub params: Vec<u64>,
}

/// Per-function configuration calls, in issue order.
#[derive(Debug, Clone, PartialEq)]
pub enum FuncConfigOp {
    PreferShared(GpuFunction),
    SetAttribute(GpuFunction, FunctionAttribute, i32),
}

#[derive(Default)]
struct FakeState {
    next_handle: usize,
    module_loads: usize,
    unloaded_modules: Vec<GpuModule>,
    functions: HashMap<GpuFunction, String>,
    ops: Vec<DriverOp>,
    func_config_ops: Vec<FuncConfigOp>,
    stream_clock: HashMap<GpuStream, f64>,
    events: HashMap<GpuEvent, Option<f64>>,
    destroyed_events: Vec<GpuEvent>,
    created_events: usize,
    pushes: usize,
    pops: usize,
    launch_cost_ms: HashMap<String, f64>,
    device_attributes: HashMap<i32, i32>,
    static_shared_bytes: i32,
    fail_launches_of: Option<String>,
    scribble_ranges: Vec<(DevicePtr, usize)>,
}

/// In-process stand-in for the GPU driver. Device pointers are host
/// addresses, streams carry a virtual clock advanced by configured
/// per-launch costs, and every operation is recorded for assertions.
pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake driver state poisoned")
    }

    /// Per-launch virtual milliseconds for a kernel entry point.
    pub fn set_launch_cost(&self, entry_name: &str, millis: f64) {
        self.lock()
            .launch_cost_ms
            .insert(entry_name.to_string(), millis);
    }

    /// Makes every launch of `entry_name` fail with a driver error.
    pub fn fail_launches_of(&self, entry_name: &str) {
        self.lock().fail_launches_of = Some(entry_name.to_string());
    }

    /// Registers a host range that launches overwrite with 0xEE, emulating a
    /// kernel that writes its output buffer.
    pub fn add_scribble_range(&self, pointer: DevicePtr, bytes: usize) {
        self.lock().scribble_ranges.push((pointer, bytes));
    }

    pub fn set_device_attribute(&self, attribute: DeviceAttribute, value: i32) {
        self.lock().device_attributes.insert(attribute as i32, value);
    }

    pub fn set_static_shared_bytes(&self, bytes: i32) {
        self.lock().static_shared_bytes = bytes;
    }

    pub fn ops(&self) -> Vec<DriverOp> {
        self.lock().ops.clone()
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                DriverOp::Launch(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn launch_count_of(&self, entry_name: &str) -> usize {
        self.launches()
            .iter()
            .filter(|record| record.entry_name == entry_name)
            .count()
    }

    pub fn func_config_ops(&self) -> Vec<FuncConfigOp> {
        self.lock().func_config_ops.clone()
    }

    pub fn module_loads(&self) -> usize {
        self.lock().module_loads
    }

    pub fn context_pushes(&self) -> usize {
        self.lock().pushes
    }

    pub fn context_pops(&self) -> usize {
        self.lock().pops
    }

    pub fn created_events(&self) -> usize {
        self.lock().created_events
    }

    pub fn destroyed_events(&self) -> usize {
        self.lock().destroyed_events.len()
    }

    fn fresh_handle(state: &mut FakeState) -> usize {
        state.next_handle += 1;
        state.next_handle
    }
}

impl GpuDriver for FakeDriver {
    fn stream_context(&self, stream: GpuStream) -> LaunchResult<GpuContext> {
        Ok(CONTEXT_BASE + stream)
    }

    fn push_context(&self, _context: GpuContext) -> LaunchResult<()> {
        self.lock().pushes += 1;
        Ok(())
    }

    fn pop_context(&self) -> LaunchResult<()> {
        self.lock().pops += 1;
        Ok(())
    }

    fn current_device(&self) -> LaunchResult<GpuDevice> {
        Ok(0)
    }

    fn device_handle(&self, ordinal: i32) -> LaunchResult<GpuDevice> {
        Ok(ordinal)
    }

    fn device_attribute(
        &self,
        _device: GpuDevice,
        attribute: DeviceAttribute,
    ) -> LaunchResult<i32> {
        let state = self.lock();
        if let Some(&value) = state.device_attributes.get(&(attribute as i32)) {
            return Ok(value);
        }
        Ok(match attribute {
            DeviceAttribute::ComputeCapabilityMajor => 8,
            DeviceAttribute::ComputeCapabilityMinor => 0,
            DeviceAttribute::MaxSharedMemoryPerBlockOptin => 96 * 1024,
        })
    }

    fn load_module(&self, _image: &[u8]) -> LaunchResult<GpuModule> {
        let mut state = self.lock();
        state.module_loads += 1;
        Ok(Self::fresh_handle(&mut state))
    }

    fn unload_module(&self, module: GpuModule) {
        self.lock().unloaded_modules.push(module);
    }

    fn get_function(&self, _module: GpuModule, name: &str) -> LaunchResult<GpuFunction> {
        let mut state = self.lock();
        let handle = Self::fresh_handle(&mut state);
        state.functions.insert(handle, name.to_string());
        Ok(handle)
    }

    fn function_attribute(
        &self,
        _function: GpuFunction,
        attribute: FunctionAttribute,
    ) -> LaunchResult<i32> {
        match attribute {
            FunctionAttribute::SharedSizeBytes => Ok(self.lock().static_shared_bytes),
            FunctionAttribute::MaxDynamicSharedSizeBytes => Ok(0),
        }
    }

    fn set_function_attribute(
        &self,
        function: GpuFunction,
        attribute: FunctionAttribute,
        value: i32,
    ) -> LaunchResult<()> {
        self.lock()
            .func_config_ops
            .push(FuncConfigOp::SetAttribute(function, attribute, value));
        Ok(())
    }

    fn prefer_shared_cache(&self, function: GpuFunction) -> LaunchResult<()> {
        self.lock()
            .func_config_ops
            .push(FuncConfigOp::PreferShared(function));
        Ok(())
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
        let mut state = self.lock();
        let entry_name = state
            .functions
            .get(&function)
            .cloned()
            .ok_or_else(|| LaunchError::internal("launch of unknown function handle"))?;
        if state.fail_launches_of.as_deref() == Some(entry_name.as_str()) {
            return Err(LaunchError::driver("cuLaunchKernel", "injected failure"));
        }

        // One level of indirection, as the real driver reads parameters.
        let params: Vec<u64> = params
            .iter()
            .map(|&slot| unsafe { *(slot as *const u64) })
            .collect();

        for &(pointer, bytes) in &state.scribble_ranges {
            if params.contains(&pointer) {
                unsafe { std::ptr::write_bytes(pointer as *mut u8, 0xEE, bytes) };
            }
        }

        let cost = state
            .launch_cost_ms
            .get(&entry_name)
            .copied()
            .unwrap_or(0.0);
        *state.stream_clock.entry(stream).or_insert(0.0) += cost;

        state.ops.push(DriverOp::Launch(LaunchRecord {
            entry_name,
            grid,
            block,
            shared_mem_bytes,
            stream,
            params,
        }));
        Ok(())
    }

    fn memset_d8_async(
        &self,
        dst: DevicePtr,
        value: u8,
        bytes: usize,
        _stream: GpuStream,
    ) -> LaunchResult<()> {
        unsafe { std::ptr::write_bytes(dst as *mut u8, value, bytes) };
        self.lock().ops.push(DriverOp::Memset {
            pointer: dst,
            bytes,
        });
        Ok(())
    }

    fn memcpy_dtoh_async(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        _stream: GpuStream,
    ) -> LaunchResult<()> {
        unsafe {
            std::ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len());
        }
        self.lock().ops.push(DriverOp::CopyToHost {
            source: src,
            bytes: dst.to_vec(),
        });
        Ok(())
    }

    fn memcpy_htod_async(
        &self,
        dst: DevicePtr,
        src: &[u8],
        _stream: GpuStream,
    ) -> LaunchResult<()> {
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len());
        }
        self.lock().ops.push(DriverOp::CopyToDevice {
            destination: dst,
            bytes: src.to_vec(),
        });
        Ok(())
    }

    fn synchronize_stream(&self, _stream: GpuStream) -> LaunchResult<()> {
        self.lock().ops.push(DriverOp::StreamSync);
        Ok(())
    }

    fn create_event(&self) -> LaunchResult<GpuEvent> {
        let mut state = self.lock();
        state.created_events += 1;
        let handle = Self::fresh_handle(&mut state);
        state.events.insert(handle, None);
        Ok(handle)
    }

    fn record_event(&self, event: GpuEvent, stream: GpuStream) -> LaunchResult<()> {
        let mut state = self.lock();
        let now = state.stream_clock.get(&stream).copied().unwrap_or(0.0);
        state.events.insert(event, Some(now));
        Ok(())
    }

    fn synchronize_event(&self, _event: GpuEvent) -> LaunchResult<()> {
        Ok(())
    }

    fn elapsed_time_ms(&self, start: GpuEvent, stop: GpuEvent) -> LaunchResult<f32> {
        let state = self.lock();
        match (state.events.get(&start), state.events.get(&stop)) {
            (Some(Some(start)), Some(Some(stop))) => Ok((stop - start) as f32),
            _ => Err(LaunchError::internal("elapsed time of unrecorded events")),
        }
    }

    fn destroy_event(&self, event: GpuEvent) {
        self.lock().destroyed_events.push(event);
    }
}

/// Assembler stub: the "module image" is the assembly itself, and every
/// invocation is counted.
pub struct CountingCompiler {
    calls: AtomicUsize,
}

impl CountingCompiler {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AsmCompiler for CountingCompiler {
    fn compile_asm(&self, _cc_major: u32, _cc_minor: u32, source: &str) -> LaunchResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(source.as_bytes().to_vec())
    }
}

pub struct Fixture {
    pub driver: Arc<FakeDriver>,
    pub compiler: Arc<CountingCompiler>,
    pub launcher: Launcher,
}

pub fn fixture() -> Fixture {
    let driver = FakeDriver::new();
    let compiler = Arc::new(CountingCompiler::new());
    let launcher = Launcher::new(
        Arc::clone(&driver) as Arc<dyn GpuDriver>,
        Arc::clone(&compiler) as Arc<dyn AsmCompiler>,
    );
    Fixture {
        driver,
        compiler,
        launcher,
    }
}

pub fn kernel_descriptor(entry_name: &str, num_warps: u32, shared_mem_bytes: u32) -> KernelDescriptor {
    KernelDescriptor {
        asm: format!(".visible .entry {entry_name}()"),
        entry_name: entry_name.to_string(),
        num_warps,
        shared_mem_bytes,
        compute_capability: 80,
    }
}

pub fn call_descriptor(
    entry_name: &str,
    grid: [u32; 3],
    num_warps: u32,
    parameters: Vec<ParameterDescriptor>,
) -> KernelCallDescriptor {
    KernelCallDescriptor {
        kernel: kernel_descriptor(entry_name, num_warps, 0),
        grid,
        parameters,
    }
}

pub fn compress(bytes: &[u8], level: Compression) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level);
    encoder.write_all(bytes).expect("zlib encode");
    encoder.finish().expect("zlib finish")
}

/// Serialises and compresses a descriptor the way the front end does.
pub fn encode(descriptor: &CallDescriptor) -> Vec<u8> {
    let serialized = serde_json::to_vec(descriptor).expect("descriptor serialises");
    compress(&serialized, Compression::default())
}
