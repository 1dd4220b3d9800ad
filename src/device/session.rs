//! Scoped ownership of one device invocation's resources.

use crate::device::{
    BufferHandle, Device, DeviceContext, FunctionHandle, KernelParam, LaunchDims, ModuleHandle,
    ModuleSource,
};
use crate::trace::trace_warn;
use crate::util::DeviceResult;

/// One context plus every buffer and module acquired through it.
///
/// Dropping the session frees buffers (newest first), unloads modules and
/// then tears down the context, whether the invocation succeeded or not.
pub(crate) struct DeviceSession {
    ctx: Box<dyn DeviceContext>,
    buffers: Vec<BufferHandle>,
    modules: Vec<ModuleHandle>,
}

impl DeviceSession {
    pub(crate) fn open(device: &dyn Device) -> DeviceResult<Self> {
        Ok(Self {
            ctx: device.create_context()?,
            buffers: Vec::new(),
            modules: Vec::new(),
        })
    }

    pub(crate) fn max_threads_per_block(&self) -> u32 {
        self.ctx.max_threads_per_block()
    }

    pub(crate) fn load_module(&mut self, source: &ModuleSource) -> DeviceResult<ModuleHandle> {
        let module = self.ctx.load_module(source)?;
        self.modules.push(module);
        Ok(module)
    }

    pub(crate) fn function(
        &mut self,
        module: ModuleHandle,
        name: &str,
    ) -> DeviceResult<FunctionHandle> {
        self.ctx.function(module, name)
    }

    pub(crate) fn alloc(&mut self, bytes: usize) -> DeviceResult<BufferHandle> {
        let buffer = self.ctx.alloc(bytes)?;
        self.buffers.push(buffer);
        Ok(buffer)
    }

    /// Allocates a buffer sized to `data` and copies `data` into it.
    pub(crate) fn upload(&mut self, data: &[u8]) -> DeviceResult<BufferHandle> {
        let buffer = self.alloc(data.len())?;
        self.ctx.copy_htod(buffer, data)?;
        Ok(buffer)
    }

    pub(crate) fn download(&mut self, buffer: BufferHandle, out: &mut [u8]) -> DeviceResult<()> {
        self.ctx.copy_dtoh(buffer, out)
    }

    pub(crate) fn launch(
        &mut self,
        function: FunctionHandle,
        dims: LaunchDims,
        params: &[KernelParam],
    ) -> DeviceResult<()> {
        self.ctx.launch(function, dims, params)
    }

    pub(crate) fn synchronize(&mut self) -> DeviceResult<()> {
        self.ctx.synchronize()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        while let Some(buffer) = self.buffers.pop() {
            if let Err(err) = self.ctx.free(buffer) {
                trace_warn!("device_free_failed", handle = buffer.0, error = err.to_string());
            }
        }
        while let Some(module) = self.modules.pop() {
            if let Err(err) = self.ctx.unload(module) {
                trace_warn!("device_unload_failed", handle = module.0, error = err.to_string());
            }
        }
    }
}
