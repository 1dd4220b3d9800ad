//! Two-stage device counter.

use crate::counter::{validate_labels, CountConfig, TileCount, TileCounter};
use crate::device::plan::default_block_side;
use crate::device::session::DeviceSession;
use crate::device::{
    Device, DeviceConfig, KernelParam, LaunchDims, SubTilePlan, CHANGEMAP_ENTRY, CHANGEMAT_ENTRY,
};
use crate::matrix::CountMatrix;
use crate::raster::LabelView;
use crate::trace::{trace_event, trace_span};
use crate::util::{ChangeMatrixError, ChangeMatrixResult, DeviceResult};

/// Raw kernel outputs for one tile.
struct KernelOutput {
    matrix: Vec<u32>,
    transition_map: Option<Vec<u32>>,
}

/// Counter that offloads each tile to a [`Device`].
///
/// The tile is split into equal sub-tiles. `changemap` counts every sub-tile
/// into its own `C x C` block and `changemat` sums the blocks into block 0,
/// which is the only part copied back (plus the transition map on request).
/// Every invocation opens its own context, so concurrent workers never share
/// device state.
pub struct DeviceCounter<D> {
    device: D,
    cfg: CountConfig,
    device_cfg: DeviceConfig,
}

impl<D: Device> DeviceCounter<D> {
    pub fn new(device: D, cfg: CountConfig, device_cfg: DeviceConfig) -> ChangeMatrixResult<Self> {
        cfg.validate()?;
        device_cfg.validate()?;
        Ok(Self {
            device,
            cfg,
            device_cfg,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_config(&self) -> &DeviceConfig {
        &self.device_cfg
    }

    fn run_kernels(
        &self,
        plan: &SubTilePlan,
        reference: &[u8],
        current: &[u8],
    ) -> DeviceResult<KernelOutput> {
        let classes = self.cfg.num_classes as u32;
        let cells = self.cfg.num_classes * self.cfg.num_classes;
        let sub_tiles = plan.num_sub_tiles();
        let pixels = plan.input_len();

        let mut session = DeviceSession::open(&self.device)?;
        let module = session.load_module(&self.device_cfg.module)?;
        let changemap = session.function(module, CHANGEMAP_ENTRY)?;
        let changemat = session.function(module, CHANGEMAT_ENTRY)?;

        let dev_ref = session.upload(reference)?;
        let dev_cur = session.upload(current)?;
        let dev_omap = session.alloc(pixels * 4)?;
        let dev_chmat = session.alloc(cells * sub_tiles * 4)?;

        let block_side = self
            .device_cfg
            .block_side
            .unwrap_or_else(|| default_block_side(session.max_threads_per_block()));

        session.launch(
            changemap,
            LaunchDims::covering(sub_tiles, block_side),
            &[
                KernelParam::Buffer(dev_ref),
                KernelParam::Buffer(dev_cur),
                KernelParam::U32(plan.sub_width as u32),
                KernelParam::U32(plan.sub_height as u32),
                KernelParam::U32(plan.tiles_x as u32),
                KernelParam::U32(plan.tiles_y as u32),
                KernelParam::U32(classes),
                KernelParam::Buffer(dev_chmat),
                KernelParam::Buffer(dev_omap),
            ],
        )?;
        session.synchronize()?;

        session.launch(
            changemat,
            LaunchDims::covering(cells, block_side),
            &[
                KernelParam::Buffer(dev_chmat),
                KernelParam::U32(cells as u32),
                KernelParam::U32(sub_tiles as u32),
            ],
        )?;
        session.synchronize()?;

        let mut matrix = vec![0u32; cells];
        session.download(dev_chmat, bytemuck::cast_slice_mut(&mut matrix))?;
        let transition_map = if self.cfg.keep_transition_map {
            let mut map = vec![0u32; pixels];
            session.download(dev_omap, bytemuck::cast_slice_mut(&mut map))?;
            Some(map)
        } else {
            None
        };

        Ok(KernelOutput {
            matrix,
            transition_map,
        })
    }
}

impl<D: Device> TileCounter for DeviceCounter<D> {
    fn config(&self) -> &CountConfig {
        &self.cfg
    }

    fn count(
        &self,
        reference: LabelView<'_>,
        current: LabelView<'_>,
    ) -> ChangeMatrixResult<TileCount> {
        validate_labels(reference, current, &self.cfg)?;
        let (width, height) = reference.shape();
        let plan = SubTilePlan::for_tile(width, height, self.device_cfg.sub_tile)?;

        let _span = trace_span!(
            "device_count",
            device = self.device.name(),
            sub_tiles = plan.num_sub_tiles()
        )
        .entered();

        let reference = reference.to_contiguous();
        let current = current.to_contiguous();
        if reference.len() != plan.input_len() || current.len() != plan.input_len() {
            return Err(ChangeMatrixError::TileDimensionMismatch {
                tile_width: width,
                tile_height: height,
                sub_width: plan.sub_width,
                sub_height: plan.sub_height,
            });
        }

        let out = self.run_kernels(&plan, &reference, &current)?;
        let matrix = CountMatrix::from_counts(
            self.cfg.num_classes,
            out.matrix.into_iter().map(u64::from).collect(),
        )?;
        trace_event!("device_tile_counted", pixels = matrix.total());

        Ok(TileCount {
            matrix,
            transition_map: out.transition_map,
        })
    }
}
