use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::autotune::AutotunedKernelCall;
use crate::call::KernelCall;
use crate::compile::{AsmCompiler, PtxasCompiler};
use crate::descriptor::{decompress_opaque, parse_descriptor, CallDescriptor};
use crate::driver::{self, DevicePtr, GpuDriver, GpuStream};
use crate::error::{LaunchError, LaunchResult};
use crate::kernel::KernelCache;

/// A ready-to-launch call object, single or autotuned.
#[derive(Debug)]
pub enum AnyKernelCall {
    Single(KernelCall),
    Autotuned(AutotunedKernelCall),
}

impl AnyKernelCall {
    pub fn launch(&self, stream: GpuStream, buffers: &[DevicePtr]) -> LaunchResult<()> {
        match self {
            AnyKernelCall::Single(call) => call.launch(stream, buffers),
            AnyKernelCall::Autotuned(call) => call.launch(stream, buffers),
        }
    }

    /// Number of device buffers the runtime supplies per launch.
    pub fn expected_buffers(&self) -> usize {
        match self {
            AnyKernelCall::Single(call) => call.expected_buffers(),
            AnyKernelCall::Autotuned(call) => call.expected_buffers(),
        }
    }
}

/// Memoisation of decoded call objects.
///
/// The canonical key is the decompressed descriptor, so distinct
/// compressions of one descriptor collapse to a single call object. The
/// compressed opaque is additionally inserted as an alias key pointing at
/// the same object, keeping the repeat-call fast path to one map probe with
/// no decompression. Entries are never evicted.
struct CallCache {
    calls: Mutex<HashMap<Vec<u8>, Arc<AnyKernelCall>>>,
}

impl CallCache {
    fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Process-resident launcher state: the GPU driver, the external assembler
/// and the two monotonically growing caches.
pub struct Launcher {
    kernels: KernelCache,
    calls: CallCache,
}

static GLOBAL: OnceLock<Result<Launcher, LaunchError>> = OnceLock::new();

impl Launcher {
    pub fn new(driver: Arc<dyn GpuDriver>, compiler: Arc<dyn AsmCompiler>) -> Self {
        Self {
            kernels: KernelCache::new(driver, compiler),
            calls: CallCache::new(),
        }
    }

    /// The launcher used by the custom-call entry point, initialised on
    /// first access and never torn down.
    pub fn global() -> LaunchResult<&'static Launcher> {
        let init = GLOBAL.get_or_init(|| {
            let driver = driver::driver()?;
            Ok(Launcher::new(driver, Arc::new(PtxasCompiler)))
        });
        match init {
            Ok(launcher) => Ok(launcher),
            Err(err) => Err(err.clone()),
        }
    }

    pub fn kernels(&self) -> &KernelCache {
        &self.kernels
    }

    /// Resolves an opaque descriptor to its memoised call object, decoding
    /// and constructing it on first sight.
    pub fn get_call(&self, opaque: &[u8]) -> LaunchResult<Arc<AnyKernelCall>> {
        if let Some(call) = self
            .calls
            .calls
            .lock()
            .expect("call cache mutex poisoned")
            .get(opaque)
        {
            return Ok(Arc::clone(call));
        }

        // Decompression and parsing stay outside the cache lock.
        let serialized = decompress_opaque(opaque)?;
        {
            let mut calls = self.calls.calls.lock().expect("call cache mutex poisoned");
            if let Some(call) = calls.get(&serialized).cloned() {
                // A different compression of a descriptor decoded earlier;
                // remember this compressed form for the fast path.
                calls.insert(opaque.to_vec(), Arc::clone(&call));
                return Ok(call);
            }
        }

        let descriptor = parse_descriptor(&serialized)?;
        let call = Arc::new(self.build_call(&descriptor)?);

        let mut calls = self.calls.calls.lock().expect("call cache mutex poisoned");
        let canonical = Arc::clone(calls.entry(serialized).or_insert(call));
        calls.insert(opaque.to_vec(), Arc::clone(&canonical));
        Ok(canonical)
    }

    fn build_call(&self, descriptor: &CallDescriptor) -> LaunchResult<AnyKernelCall> {
        match descriptor {
            CallDescriptor::KernelCall(descriptor) => Ok(AnyKernelCall::Single(
                KernelCall::from_descriptor(&self.kernels, descriptor)?,
            )),
            CallDescriptor::AutotunedKernelCall(descriptor) => Ok(AnyKernelCall::Autotuned(
                AutotunedKernelCall::from_descriptor(&self.kernels, descriptor)?,
            )),
        }
    }
}
