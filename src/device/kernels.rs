//! The `changemap` / `changemat` kernel pair.
//!
//! [`CHANGEMAT_KERNELS`] is the CUDA C source compiled by device backends.
//! The functions below execute one logical thread of each kernel on the host
//! and are what [`HostDevice`](crate::device::HostDevice) runs; they must stay
//! in lockstep with the CUDA source.
//!
//! Thread ids are flattened over a 2D grid of 2D blocks:
//! `((blockIdx.y * gridDim.x + blockIdx.x) * blockDim.x * blockDim.y)
//! + threadIdx.y * blockDim.x + threadIdx.x`.

/// CUDA source exporting `changemap` and `changemat` with C linkage.
pub const CHANGEMAT_KERNELS: &str = r#"
extern "C" {

__device__ unsigned int flat_thread_id() {
    unsigned int block = blockIdx.y * gridDim.x + blockIdx.x;
    return block * (blockDim.x * blockDim.y) + threadIdx.y * blockDim.x + threadIdx.x;
}

// One thread per sub-tile. Each thread owns block `tid` of chmat.
__global__ void changemap(
    const unsigned char* __restrict__ ref,
    const unsigned char* __restrict__ cur,
    unsigned int tiledimX, unsigned int tiledimY,
    unsigned int ntilesX, unsigned int ntilesY,
    unsigned int classes,
    unsigned int* __restrict__ chmat,
    unsigned int* __restrict__ omap
) {
    unsigned int tid = flat_thread_id();
    if (tid >= ntilesX * ntilesY) return;

    unsigned int cells = classes * classes;
    unsigned int* block = chmat + (size_t)tid * cells;
    for (unsigned int k = 0; k < cells; k++) block[k] = 0;

    unsigned int sx = tid % ntilesX;
    unsigned int sy = tid / ntilesX;
    size_t width = (size_t)tiledimX * ntilesX;
    for (unsigned int py = 0; py < tiledimY; py++) {
        size_t row = ((size_t)sy * tiledimY + py) * width + (size_t)sx * tiledimX;
        for (unsigned int px = 0; px < tiledimX; px++) {
            size_t idx = row + px;
            unsigned int a = ref[idx];
            unsigned int b = cur[idx];
            if (a < classes && b < classes) {
                block[a * classes + b] += 1;
                omap[idx] = a * classes + b;
            } else {
                omap[idx] = 0xFFFFFFFFu;
            }
        }
    }
}

// One thread per matrix cell. Sums the cell across sub-tiles into block 0.
__global__ void changemat(unsigned int* chmat, unsigned int cells, unsigned int ntiles) {
    unsigned int tid = flat_thread_id();
    if (tid >= cells) return;

    unsigned int sum = 0;
    for (unsigned int t = 0; t < ntiles; t++) {
        sum += chmat[(size_t)t * cells + tid];
    }
    chmat[tid] = sum;
}

} // extern "C"
"#;

use crate::counter::SKIPPED_TRANSITION;
use crate::device::LaunchDims;

/// Scalar arguments of `changemap`.
#[derive(Clone, Copy, Debug)]
pub struct ChangemapArgs {
    pub tiledim_x: u32,
    pub tiledim_y: u32,
    pub ntiles_x: u32,
    pub ntiles_y: u32,
    pub classes: u32,
}

/// Visits every flattened thread id of a launch in order.
pub fn for_each_thread(dims: LaunchDims, mut f: impl FnMut(u64)) {
    let per_block = dims.threads_per_block();
    let (gx, gy, gz) = dims.grid;
    let blocks = gx as u64 * gy as u64 * gz as u64;
    for block in 0..blocks {
        for local in 0..per_block {
            f(block * per_block + local);
        }
    }
}

/// One thread of `changemap`.
pub fn changemap_thread(
    tid: u64,
    args: ChangemapArgs,
    reference: &[u8],
    current: &[u8],
    chmat: &mut [u32],
    omap: &mut [u32],
) {
    let ntiles = args.ntiles_x as u64 * args.ntiles_y as u64;
    if tid >= ntiles {
        return;
    }
    let tid = tid as usize;
    let classes = args.classes as usize;
    let cells = classes * classes;
    let block = &mut chmat[tid * cells..(tid + 1) * cells];
    block.fill(0);

    let (tdx, tdy) = (args.tiledim_x as usize, args.tiledim_y as usize);
    let sx = tid % args.ntiles_x as usize;
    let sy = tid / args.ntiles_x as usize;
    let width = tdx * args.ntiles_x as usize;
    for py in 0..tdy {
        let row = (sy * tdy + py) * width + sx * tdx;
        for idx in row..row + tdx {
            let a = reference[idx] as usize;
            let b = current[idx] as usize;
            if a < classes && b < classes {
                block[a * classes + b] += 1;
                omap[idx] = (a * classes + b) as u32;
            } else {
                omap[idx] = SKIPPED_TRANSITION;
            }
        }
    }
}

/// One thread of `changemat`.
pub fn changemat_thread(tid: u64, chmat: &mut [u32], cells: u32, ntiles: u32) {
    if tid >= cells as u64 {
        return;
    }
    let tid = tid as usize;
    let cells = cells as usize;
    let mut sum = 0u32;
    for t in 0..ntiles as usize {
        sum = sum.wrapping_add(chmat[t * cells + tid]);
    }
    chmat[tid] = sum;
}
