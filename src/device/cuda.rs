//! CUDA driver backend.
//!
//! Requires the `cuda` feature and an NVIDIA GPU. The built-in module is
//! compiled from [`CHANGEMAT_KERNELS`](crate::device::kernels::CHANGEMAT_KERNELS)
//! with NVRTC; a precompiled PTX file can be supplied instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchConfig, PushKernelArg,
};
use cudarc::nvrtc::Ptx;

use crate::device::kernels::CHANGEMAT_KERNELS;
use crate::device::{
    BufferHandle, Device, DeviceContext, FunctionHandle, KernelParam, LaunchDims, ModuleHandle,
    ModuleSource,
};
use crate::util::{DeviceError, DeviceResult};

/// CUDA device selected by ordinal.
///
/// The built-in kernels are compiled at most once per device and shared by
/// every context it opens.
#[derive(Clone)]
pub struct CudaDevice {
    ordinal: usize,
    builtin_ptx: Arc<OnceLock<Ptx>>,
}

impl CudaDevice {
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            builtin_ptx: Arc::default(),
        }
    }

    /// Check if a CUDA device is available.
    pub fn is_available() -> bool {
        CudaContext::new(0).is_ok()
    }
}

impl Default for CudaDevice {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaDevice")
            .field("ordinal", &self.ordinal)
            .field("builtin_compiled", &self.builtin_ptx.get().is_some())
            .finish()
    }
}

impl Device for CudaDevice {
    fn name(&self) -> &str {
        "cuda"
    }

    fn create_context(&self) -> DeviceResult<Box<dyn DeviceContext>> {
        let ctx = CudaContext::new(self.ordinal)
            .map_err(|e| DeviceError::Context(format!("CUDA init failed: {e:?}")))?;
        let max_threads = ctx
            .attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)
            .map(|v| v.max(1) as u32)
            .unwrap_or(1024);
        let stream = ctx.default_stream();
        Ok(Box::new(CudaDeviceContext {
            ctx,
            stream,
            builtin_ptx: Arc::clone(&self.builtin_ptx),
            max_threads,
            next_id: 1,
            buffers: HashMap::new(),
            modules: HashMap::new(),
            functions: HashMap::new(),
        }))
    }
}

struct CudaDeviceContext {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    builtin_ptx: Arc<OnceLock<Ptx>>,
    max_threads: u32,
    next_id: u64,
    buffers: HashMap<u64, CudaSlice<u8>>,
    modules: HashMap<u64, Arc<CudaModule>>,
    /// Owning module, entry-point name and function per handle.
    functions: HashMap<u64, (u64, String, CudaFunction)>,
}

impl CudaDeviceContext {
    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Built-in kernels, compiled with NVRTC on first use.
    fn builtin_ptx(&self) -> DeviceResult<Ptx> {
        if let Some(ptx) = self.builtin_ptx.get() {
            return Ok(ptx.clone());
        }
        let ptx = cudarc::nvrtc::compile_ptx(CHANGEMAT_KERNELS)
            .map_err(|e| DeviceError::Module(format!("kernel compile failed: {e:?}")))?;
        // Concurrent first uses may both compile; either result is kept.
        Ok(self.builtin_ptx.get_or_init(|| ptx).clone())
    }
}

impl DeviceContext for CudaDeviceContext {
    fn alloc(&mut self, bytes: usize) -> DeviceResult<BufferHandle> {
        let buffer: CudaSlice<u8> =
            self.stream
                .alloc_zeros(bytes)
                .map_err(|e| DeviceError::Alloc {
                    bytes,
                    reason: format!("{e:?}"),
                })?;
        let id = self.next_handle();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn copy_htod(&mut self, dst: BufferHandle, src: &[u8]) -> DeviceResult<()> {
        let buffer = self
            .buffers
            .get_mut(&dst.0)
            .ok_or(DeviceError::UnknownHandle(dst.0))?;
        if src.len() > buffer.len() {
            return Err(DeviceError::Copy(format!(
                "{} bytes into a {} byte buffer",
                src.len(),
                buffer.len()
            )));
        }
        let mut view = buffer.slice_mut(0..src.len());
        self.stream
            .memcpy_htod(src, &mut view)
            .map_err(|e| DeviceError::Copy(format!("upload failed: {e:?}")))
    }

    fn copy_dtoh(&mut self, src: BufferHandle, dst: &mut [u8]) -> DeviceResult<()> {
        let buffer = self
            .buffers
            .get(&src.0)
            .ok_or(DeviceError::UnknownHandle(src.0))?;
        if dst.len() > buffer.len() {
            return Err(DeviceError::Copy(format!(
                "{} bytes out of a {} byte buffer",
                dst.len(),
                buffer.len()
            )));
        }
        let view = buffer.slice(0..dst.len());
        self.stream
            .memcpy_dtoh(&view, dst)
            .map_err(|e| DeviceError::Copy(format!("download failed: {e:?}")))
    }

    fn load_module(&mut self, source: &ModuleSource) -> DeviceResult<ModuleHandle> {
        let ptx = match source {
            ModuleSource::Builtin => self.builtin_ptx()?,
            ModuleSource::PtxFile(path) => Ptx::from_file(path),
        };
        let module = self
            .ctx
            .load_module(ptx)
            .map_err(|e| DeviceError::Module(format!("module load failed: {e:?}")))?;
        let id = self.next_handle();
        self.modules.insert(id, module);
        Ok(ModuleHandle(id))
    }

    fn function(&mut self, module: ModuleHandle, name: &str) -> DeviceResult<FunctionHandle> {
        let loaded = self
            .modules
            .get(&module.0)
            .ok_or(DeviceError::UnknownHandle(module.0))?;
        let function = loaded
            .load_function(name)
            .map_err(|_| DeviceError::MissingFunction(name.to_string()))?;
        let id = self.next_handle();
        self.functions
            .insert(id, (module.0, name.to_string(), function));
        Ok(FunctionHandle(id))
    }

    fn launch(
        &mut self,
        function: FunctionHandle,
        dims: LaunchDims,
        params: &[KernelParam],
    ) -> DeviceResult<()> {
        let (_, name, kernel) = self
            .functions
            .get(&function.0)
            .ok_or(DeviceError::UnknownHandle(function.0))?;
        let cfg = LaunchConfig {
            grid_dim: dims.grid,
            block_dim: dims.block,
            shared_mem_bytes: 0,
        };

        let mut builder = self.stream.launch_builder(kernel);
        for param in params {
            match param {
                KernelParam::Buffer(handle) => {
                    let buffer = self
                        .buffers
                        .get(&handle.0)
                        .ok_or(DeviceError::UnknownHandle(handle.0))?;
                    builder.arg(buffer);
                }
                KernelParam::U32(value) => {
                    builder.arg(value);
                }
            }
        }

        // SAFETY: parameter order and types follow the changemap/changemat ABI
        // and every buffer is sized by the caller for the launched grid.
        #[allow(unsafe_code)]
        unsafe { builder.launch(cfg) }.map_err(|e| DeviceError::Launch {
            kernel: name.clone(),
            reason: format!("{e:?}"),
        })?;
        Ok(())
    }

    fn synchronize(&mut self) -> DeviceResult<()> {
        self.stream
            .synchronize()
            .map_err(|e| DeviceError::Synchronize(format!("{e:?}")))
    }

    fn free(&mut self, buffer: BufferHandle) -> DeviceResult<()> {
        self.buffers
            .remove(&buffer.0)
            .map(drop)
            .ok_or(DeviceError::UnknownHandle(buffer.0))
    }

    fn unload(&mut self, module: ModuleHandle) -> DeviceResult<()> {
        self.functions.retain(|_, (owner, _, _)| *owner != module.0);
        self.modules
            .remove(&module.0)
            .map(drop)
            .ok_or(DeviceError::UnknownHandle(module.0))
    }

    fn max_threads_per_block(&self) -> u32 {
        self.max_threads
    }
}
