//! Host-emulated device runtime.
//!
//! `HostDevice` implements the device execution contract in host memory and
//! runs the built-in kernels thread by thread over the launch grid. It backs
//! the device path when no accelerator is present and lets tests observe
//! resource accounting and inject failures at chosen points.

use crate::device::kernels::{changemap_thread, changemat_thread, for_each_thread, ChangemapArgs};
use crate::device::{
    BufferHandle, Device, DeviceContext, FunctionHandle, KernelParam, LaunchDims, ModuleHandle,
    ModuleSource, CHANGEMAP_ENTRY, CHANGEMAT_ENTRY,
};
use crate::util::{DeviceError, DeviceResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Point at which a [`HostDevice`] reports a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FaultPoint {
    /// Fail the n-th allocation (zero-based) of every context.
    Alloc(usize),
    /// Fail launches of the named kernel.
    Launch(String),
    /// Fail every synchronization.
    Synchronize,
}

/// Counters shared by a [`HostDevice`] and all of its contexts.
#[derive(Debug, Default)]
pub struct HostDeviceStats {
    live_buffers: AtomicUsize,
    live_contexts: AtomicUsize,
    contexts_created: AtomicUsize,
    launches: AtomicUsize,
}

impl HostDeviceStats {
    /// Buffers allocated and not yet freed.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }

    /// Contexts opened and not yet torn down.
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

/// Device runtime executing kernels on the calling thread.
#[derive(Clone, Debug, Default)]
pub struct HostDevice {
    fault: Option<FaultPoint>,
    stats: Arc<HostDeviceStats>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that fails at `fault`.
    pub fn with_fault(fault: FaultPoint) -> Self {
        Self {
            fault: Some(fault),
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> Arc<HostDeviceStats> {
        Arc::clone(&self.stats)
    }
}

impl Device for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    fn create_context(&self) -> DeviceResult<Box<dyn DeviceContext>> {
        self.stats.contexts_created.fetch_add(1, Ordering::SeqCst);
        self.stats.live_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(HostContext {
            fault: self.fault.clone(),
            stats: Arc::clone(&self.stats),
            next_id: 1,
            allocs: 0,
            buffers: HashMap::new(),
            modules: HashSet::new(),
            functions: HashMap::new(),
        }))
    }
}

/// Word-backed buffer so kernels can view it as `u32` without realignment.
struct HostBuffer {
    words: Vec<u32>,
    bytes: usize,
}

impl HostBuffer {
    fn new(bytes: usize) -> Self {
        Self {
            words: vec![0; bytes.div_ceil(4)],
            bytes,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.bytes]
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.bytes]
    }

    /// Whole 32-bit words inside the buffer.
    fn as_words_mut(&mut self) -> &mut [u32] {
        let len = self.bytes / 4;
        &mut self.words[..len]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HostKernel {
    Changemap,
    Changemat,
}

struct HostContext {
    fault: Option<FaultPoint>,
    stats: Arc<HostDeviceStats>,
    next_id: u64,
    allocs: usize,
    buffers: HashMap<u64, HostBuffer>,
    modules: HashSet<u64>,
    functions: HashMap<u64, (u64, HostKernel)>,
}

impl HostContext {
    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer(&self, handle: BufferHandle) -> DeviceResult<&HostBuffer> {
        self.buffers
            .get(&handle.0)
            .ok_or(DeviceError::UnknownHandle(handle.0))
    }

    fn take_buffer(&mut self, handle: BufferHandle) -> DeviceResult<HostBuffer> {
        self.buffers
            .remove(&handle.0)
            .ok_or(DeviceError::UnknownHandle(handle.0))
    }

    fn run_changemap(&mut self, dims: LaunchDims, params: &[KernelParam]) -> DeviceResult<()> {
        let bad = || {
            launch_error(
                CHANGEMAP_ENTRY,
                "expected 9 parameters (ptr, ptr, u32 x5, ptr, ptr)",
            )
        };
        let [ref_p, cur_p, tdx, tdy, ntx, nty, classes, chmat_p, omap_p] = params else {
            return Err(bad());
        };
        let scalar = |p: &KernelParam| p.u32().ok_or_else(bad);
        let handle = |p: &KernelParam| p.buffer().ok_or_else(bad);
        let args = ChangemapArgs {
            tiledim_x: scalar(tdx)?,
            tiledim_y: scalar(tdy)?,
            ntiles_x: scalar(ntx)?,
            ntiles_y: scalar(nty)?,
            classes: scalar(classes)?,
        };
        let pixels = args.tiledim_x as usize
            * args.tiledim_y as usize
            * args.ntiles_x as usize
            * args.ntiles_y as usize;
        let cells = args.classes as usize * args.classes as usize;
        let sub_tiles = args.ntiles_x as usize * args.ntiles_y as usize;

        let (ref_h, cur_h) = (handle(ref_p)?, handle(cur_p)?);
        let (chmat_h, omap_h) = (handle(chmat_p)?, handle(omap_p)?);
        let mut chmat = self.take_buffer(chmat_h)?;
        let mut omap = match self.take_buffer(omap_h) {
            Ok(buf) => buf,
            Err(err) => {
                self.buffers.insert(chmat_h.0, chmat);
                return Err(err);
            }
        };

        let result = (|| {
            let reference = self.buffer(ref_h)?.as_bytes();
            let current = self.buffer(cur_h)?.as_bytes();
            if reference.len() < pixels || current.len() < pixels {
                return Err(launch_error(CHANGEMAP_ENTRY, "input buffer smaller than tile"));
            }
            let chmat_words = chmat.as_words_mut();
            let omap_words = omap.as_words_mut();
            if chmat_words.len() < cells * sub_tiles || omap_words.len() < pixels {
                return Err(launch_error(CHANGEMAP_ENTRY, "output buffer too small"));
            }
            for_each_thread(dims, |tid| {
                changemap_thread(tid, args, reference, current, chmat_words, omap_words)
            });
            Ok(())
        })();

        self.buffers.insert(chmat_h.0, chmat);
        self.buffers.insert(omap_h.0, omap);
        result
    }

    fn run_changemat(&mut self, dims: LaunchDims, params: &[KernelParam]) -> DeviceResult<()> {
        let bad = || launch_error(CHANGEMAT_ENTRY, "expected 3 parameters (ptr, u32, u32)");
        let [chmat_p, cells_p, ntiles_p] = params else {
            return Err(bad());
        };
        let chmat_h = chmat_p.buffer().ok_or_else(bad)?;
        let cells = cells_p.u32().ok_or_else(bad)?;
        let ntiles = ntiles_p.u32().ok_or_else(bad)?;
        let buffer = self
            .buffers
            .get_mut(&chmat_h.0)
            .ok_or(DeviceError::UnknownHandle(chmat_h.0))?;
        let chmat = buffer.as_words_mut();
        if chmat.len() < cells as usize * ntiles as usize {
            return Err(launch_error(CHANGEMAT_ENTRY, "matrix buffer too small"));
        }
        for_each_thread(dims, |tid| changemat_thread(tid, chmat, cells, ntiles));
        Ok(())
    }
}

fn launch_error(kernel: &str, reason: &str) -> DeviceError {
    DeviceError::Launch {
        kernel: kernel.to_string(),
        reason: reason.to_string(),
    }
}

impl DeviceContext for HostContext {
    fn alloc(&mut self, bytes: usize) -> DeviceResult<BufferHandle> {
        let nth = self.allocs;
        self.allocs += 1;
        if self.fault == Some(FaultPoint::Alloc(nth)) {
            return Err(DeviceError::Alloc {
                bytes,
                reason: "injected fault".to_string(),
            });
        }
        let id = self.next_handle();
        self.buffers.insert(id, HostBuffer::new(bytes));
        self.stats.live_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(BufferHandle(id))
    }

    fn copy_htod(&mut self, dst: BufferHandle, src: &[u8]) -> DeviceResult<()> {
        let buffer = self
            .buffers
            .get_mut(&dst.0)
            .ok_or(DeviceError::UnknownHandle(dst.0))?;
        let bytes = buffer.as_bytes_mut();
        if src.len() > bytes.len() {
            return Err(DeviceError::Copy(format!(
                "{} bytes into a {} byte buffer",
                src.len(),
                bytes.len()
            )));
        }
        bytes[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_dtoh(&mut self, src: BufferHandle, dst: &mut [u8]) -> DeviceResult<()> {
        let bytes = self.buffer(src)?.as_bytes();
        if dst.len() > bytes.len() {
            return Err(DeviceError::Copy(format!(
                "{} bytes out of a {} byte buffer",
                dst.len(),
                bytes.len()
            )));
        }
        dst.copy_from_slice(&bytes[..dst.len()]);
        Ok(())
    }

    fn load_module(&mut self, source: &ModuleSource) -> DeviceResult<ModuleHandle> {
        match source {
            ModuleSource::Builtin => {
                let id = self.next_handle();
                self.modules.insert(id);
                Ok(ModuleHandle(id))
            }
            ModuleSource::PtxFile(path) => Err(DeviceError::Module(format!(
                "host device only runs built-in kernels, not {}",
                path.display()
            ))),
        }
    }

    fn function(&mut self, module: ModuleHandle, name: &str) -> DeviceResult<FunctionHandle> {
        if !self.modules.contains(&module.0) {
            return Err(DeviceError::UnknownHandle(module.0));
        }
        let kernel = match name {
            CHANGEMAP_ENTRY => HostKernel::Changemap,
            CHANGEMAT_ENTRY => HostKernel::Changemat,
            other => return Err(DeviceError::MissingFunction(other.to_string())),
        };
        let id = self.next_handle();
        self.functions.insert(id, (module.0, kernel));
        Ok(FunctionHandle(id))
    }

    fn launch(
        &mut self,
        function: FunctionHandle,
        dims: LaunchDims,
        params: &[KernelParam],
    ) -> DeviceResult<()> {
        let &(_, kernel) = self
            .functions
            .get(&function.0)
            .ok_or(DeviceError::UnknownHandle(function.0))?;
        let name = match kernel {
            HostKernel::Changemap => CHANGEMAP_ENTRY,
            HostKernel::Changemat => CHANGEMAT_ENTRY,
        };
        if matches!(&self.fault, Some(FaultPoint::Launch(k)) if k == name) {
            return Err(launch_error(name, "injected fault"));
        }
        if dims.threads_per_block() > self.max_threads_per_block() as u64 {
            return Err(launch_error(name, "block exceeds max threads per block"));
        }
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        match kernel {
            HostKernel::Changemap => self.run_changemap(dims, params),
            HostKernel::Changemat => self.run_changemat(dims, params),
        }
    }

    fn synchronize(&mut self) -> DeviceResult<()> {
        if self.fault == Some(FaultPoint::Synchronize) {
            return Err(DeviceError::Synchronize("injected fault".to_string()));
        }
        Ok(())
    }

    fn free(&mut self, buffer: BufferHandle) -> DeviceResult<()> {
        self.take_buffer(buffer)?;
        self.stats.live_buffers.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn unload(&mut self, module: ModuleHandle) -> DeviceResult<()> {
        if !self.modules.remove(&module.0) {
            return Err(DeviceError::UnknownHandle(module.0));
        }
        self.functions.retain(|_, (owner, _)| *owner != module.0);
        Ok(())
    }
}

// Buffers never freed stay counted in `live_buffers` so leaks remain visible.
impl Drop for HostContext {
    fn drop(&mut self) {
        self.stats.live_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}
