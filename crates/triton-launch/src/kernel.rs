use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Arc, Mutex};

use crate::compile::AsmCompiler;
use crate::descriptor::KernelDescriptor;
use crate::driver::{ContextGuard, GpuContext, GpuDriver, GpuFunction, GpuModule, GpuStream};
use crate::driver::{DeviceAttribute, FunctionAttribute};
use crate::error::{LaunchError, LaunchResult};

pub(crate) const THREADS_PER_WARP: u32 = 32;

/// Static shared memory is limited to 48 KiB; anything beyond that must be
/// requested through the per-function dynamic opt-in attribute.
const MAX_STATIC_SHARED_BYTES: u32 = 48 * 1024;

/// A loaded module that unloads itself when dropped.
struct OwnedModule {
    driver: Arc<dyn GpuDriver>,
    handle: GpuModule,
}

impl OwnedModule {
    fn load(driver: Arc<dyn GpuDriver>, image: &[u8]) -> LaunchResult<Self> {
        let handle = driver.load_module(image)?;
        Ok(Self { driver, handle })
    }
}

impl Drop for OwnedModule {
    fn drop(&mut self) {
        self.driver.unload_module(self.handle);
    }
}

#[derive(Default)]
struct KernelState {
    /// One loaded module per context that has touched this kernel.
    modules: Vec<OwnedModule>,
    /// Resolved entry point per context. Entries are never removed.
    functions: HashMap<GpuContext, GpuFunction>,
}

/// A compiled GPU program, lazily specialised per device context.
pub struct Kernel {
    driver: Arc<dyn GpuDriver>,
    module_image: Vec<u8>,
    entry_name: String,
    block_dim_x: u32,
    shared_mem_bytes: u32,
    state: Mutex<KernelState>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("entry_name", &self.entry_name)
            .field("block_dim_x", &self.block_dim_x)
            .field("shared_mem_bytes", &self.shared_mem_bytes)
            .finish()
    }
}

impl Kernel {
    pub(crate) fn new(
        driver: Arc<dyn GpuDriver>,
        module_image: Vec<u8>,
        entry_name: String,
        num_warps: u32,
        shared_mem_bytes: u32,
    ) -> Self {
        Self {
            driver,
            module_image,
            entry_name,
            block_dim_x: num_warps * THREADS_PER_WARP,
            shared_mem_bytes,
            state: Mutex::new(KernelState::default()),
        }
    }

    pub(crate) fn driver(&self) -> &Arc<dyn GpuDriver> {
        &self.driver
    }

    /// Resolves the function for the stream's context and enqueues a launch
    /// with block dimensions `(num_warps * 32, 1, 1)`.
    pub fn launch(
        &self,
        stream: GpuStream,
        grid: [u32; 3],
        params: &mut [*mut c_void],
    ) -> LaunchResult<()> {
        let context = self.driver.stream_context(stream)?;
        let function = self.function_for_context(context)?;
        self.driver.launch_kernel(
            function,
            grid,
            [self.block_dim_x, 1, 1],
            self.shared_mem_bytes,
            stream,
            params,
        )
    }

    fn function_for_context(&self, context: GpuContext) -> LaunchResult<GpuFunction> {
        let mut state = self.state.lock().expect("kernel state mutex poisoned");
        if let Some(&function) = state.functions.get(&context) {
            return Ok(function);
        }

        let _current = ContextGuard::push(self.driver.as_ref(), context)?;
        let module = OwnedModule::load(Arc::clone(&self.driver), &self.module_image)?;
        let function = self.driver.get_function(module.handle, &self.entry_name)?;
        self.configure_shared_memory(function)?;

        // Publish only once every step succeeded; a module that failed any
        // later step is unloaded by its drop above.
        state.modules.push(module);
        state.functions.insert(context, function);
        Ok(function)
    }

    fn configure_shared_memory(&self, function: GpuFunction) -> LaunchResult<()> {
        if self.shared_mem_bytes <= MAX_STATIC_SHARED_BYTES {
            return Ok(());
        }

        let device = self.driver.current_device()?;
        let opt_in = self
            .driver
            .device_attribute(device, DeviceAttribute::MaxSharedMemoryPerBlockOptin)?;
        if self.shared_mem_bytes > opt_in as u32 {
            return Err(LaunchError::invalid_argument(format!(
                "kernel {} requests {} bytes of shared memory, device limit is {opt_in}",
                self.entry_name, self.shared_mem_bytes
            )));
        }

        if opt_in as u32 > MAX_STATIC_SHARED_BYTES {
            // The cache preference must be set before widening the dynamic
            // shared size attribute.
            self.driver.prefer_shared_cache(function)?;
            let static_shared = self
                .driver
                .function_attribute(function, FunctionAttribute::SharedSizeBytes)?;
            self.driver.set_function_attribute(
                function,
                FunctionAttribute::MaxDynamicSharedSizeBytes,
                opt_in - static_shared,
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct KernelKey {
    asm: String,
    entry_name: String,
    num_warps: u32,
    shared_mem_bytes: u32,
    compute_capability: u32,
}

impl KernelKey {
    fn from_descriptor(descriptor: &KernelDescriptor) -> Self {
        Self {
            asm: descriptor.asm.clone(),
            entry_name: descriptor.entry_name.clone(),
            num_warps: descriptor.num_warps,
            shared_mem_bytes: descriptor.shared_mem_bytes,
            compute_capability: descriptor.compute_capability,
        }
    }
}

/// Process-wide memoisation of compiled kernels.
///
/// The key includes the compute capability so modules compiled for one
/// device generation are never reused on another. Entries are never evicted.
pub struct KernelCache {
    driver: Arc<dyn GpuDriver>,
    compiler: Arc<dyn AsmCompiler>,
    kernels: Mutex<HashMap<KernelKey, Arc<Kernel>>>,
}

impl KernelCache {
    pub fn new(driver: Arc<dyn GpuDriver>, compiler: Arc<dyn AsmCompiler>) -> Self {
        Self {
            driver,
            compiler,
            kernels: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, descriptor: &KernelDescriptor) -> LaunchResult<Arc<Kernel>> {
        let key = KernelKey::from_descriptor(descriptor);
        if let Some(kernel) = self
            .kernels
            .lock()
            .expect("kernel cache mutex poisoned")
            .get(&key)
        {
            return Ok(Arc::clone(kernel));
        }

        // Compile outside the lock; a racing thread may duplicate this work
        // and the first inserter wins below.
        let cc = descriptor.compute_capability;
        let image = self
            .compiler
            .compile_asm(cc / 10, cc % 10, &descriptor.asm)?;
        let kernel = Arc::new(Kernel::new(
            Arc::clone(&self.driver),
            image,
            descriptor.entry_name.clone(),
            descriptor.num_warps,
            descriptor.shared_mem_bytes,
        ));

        let mut kernels = self.kernels.lock().expect("kernel cache mutex poisoned");
        Ok(Arc::clone(kernels.entry(key).or_insert(kernel)))
    }
}
