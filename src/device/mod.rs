//! Device-offload counting.
//!
//! The device execution contract is split into [`Device`] (a runtime able to
//! open contexts) and [`DeviceContext`] (one context's buffers, modules and
//! launches). Handles are opaque integers owned by the context that issued
//! them. [`DeviceCounter`] drives the two-kernel `changemap` / `changemat`
//! pipeline through a scoped session that releases every buffer, module and
//! the context itself on all exit paths.
//!
//! Kernel ABI (shared with the compiled module, see [`kernels`]):
//!
//! ```text
//! changemap(const u8* ref, const u8* cur, u32 tiledimX, u32 tiledimY,
//!           u32 ntilesX, u32 ntilesY, u32 classes, u32* chmat, u32* omap)
//! changemat(u32* chmat, u32 cells, u32 ntiles)
//! ```

mod counter;
pub mod host;
pub mod kernels;
mod plan;
mod session;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use counter::DeviceCounter;
pub use host::{FaultPoint, HostDevice, HostDeviceStats};
pub use plan::{DeviceConfig, LaunchDims, SubTilePlan, SubTileSize};

use crate::util::DeviceResult;
use std::path::PathBuf;

/// Entry point of the per-sub-tile counting kernel.
pub const CHANGEMAP_ENTRY: &str = "changemap";
/// Entry point of the reduction kernel.
pub const CHANGEMAT_ENTRY: &str = "changemat";

/// Device memory handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Loaded kernel module handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

/// Resolved kernel entry point handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FunctionHandle(pub u64);

/// Where a context gets its kernel module from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ModuleSource {
    /// The kernel source embedded in this crate ([`kernels::CHANGEMAT_KERNELS`]).
    #[default]
    Builtin,
    /// A precompiled PTX file exporting the two entry points.
    PtxFile(PathBuf),
}

/// One ordered kernel parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelParam {
    Buffer(BufferHandle),
    U32(u32),
}

impl KernelParam {
    pub fn buffer(&self) -> Option<BufferHandle> {
        match *self {
            KernelParam::Buffer(handle) => Some(handle),
            KernelParam::U32(_) => None,
        }
    }

    pub fn u32(&self) -> Option<u32> {
        match *self {
            KernelParam::U32(value) => Some(value),
            KernelParam::Buffer(_) => None,
        }
    }
}

/// A device runtime able to open independent contexts.
pub trait Device: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Opens a new context. Dropping the context tears it down.
    fn create_context(&self) -> DeviceResult<Box<dyn DeviceContext>>;
}

impl<D: Device + ?Sized> Device for std::sync::Arc<D> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn create_context(&self) -> DeviceResult<Box<dyn DeviceContext>> {
        (**self).create_context()
    }
}

/// Operations available inside one device context.
pub trait DeviceContext {
    /// Allocates `bytes` of device memory.
    fn alloc(&mut self, bytes: usize) -> DeviceResult<BufferHandle>;

    /// Copies `src` into the start of `dst`.
    fn copy_htod(&mut self, dst: BufferHandle, src: &[u8]) -> DeviceResult<()>;

    /// Copies the first `dst.len()` bytes of `src` back to the host.
    fn copy_dtoh(&mut self, src: BufferHandle, dst: &mut [u8]) -> DeviceResult<()>;

    fn load_module(&mut self, source: &ModuleSource) -> DeviceResult<ModuleHandle>;

    /// Resolves a named entry point in a loaded module.
    fn function(&mut self, module: ModuleHandle, name: &str) -> DeviceResult<FunctionHandle>;

    /// Enqueues a kernel with the given grid/block triples and parameters.
    fn launch(
        &mut self,
        function: FunctionHandle,
        dims: LaunchDims,
        params: &[KernelParam],
    ) -> DeviceResult<()>;

    /// Blocks until all enqueued work is complete.
    fn synchronize(&mut self) -> DeviceResult<()>;

    fn free(&mut self, buffer: BufferHandle) -> DeviceResult<()>;

    fn unload(&mut self, module: ModuleHandle) -> DeviceResult<()>;

    /// Upper bound on threads in one block.
    fn max_threads_per_block(&self) -> u32 {
        1024
    }
}
