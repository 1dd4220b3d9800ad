//! Tiled change-matrix computation.
//!
//! [`ChangeMatrixEngine::run`] dispatches one job per tile of the shared
//! layout. Each job reads both tiles, counts them with the configured
//! [`TileCounter`] and merges the partial matrix into a shared
//! [`ChangeMatrix`]. Once every tile has reported back the accumulator is
//! frozen. A timed-out run leaves it open so late tiles still land; freezing
//! is then up to the caller.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::counter::{check_same_shape, TileCounter};
use crate::matrix::ChangeMatrix;
use crate::raster::Rect;
use crate::scheduler::{RunReport, SchedulerConfig, TileScheduler};
use crate::source::{TileCoord, TileSource};
use crate::trace::{trace_event, trace_span};
use crate::util::sync::lock;
use crate::util::{ChangeMatrixError, ChangeMatrixResult};

/// Engine parameters.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    /// Keep every tile's transition map in [`ChangeMatrixRun::transition_maps`].
    ///
    /// The counter must be configured with `keep_transition_map`.
    pub collect_transition_maps: bool,
}

impl EngineConfig {
    pub fn validate(&self) -> ChangeMatrixResult<()> {
        self.scheduler.validate()
    }
}

/// Transition codes of one tile, row-major over `bounds`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionMap {
    pub bounds: Rect,
    pub codes: Vec<u32>,
}

/// Result of one engine run.
#[derive(Debug)]
pub struct ChangeMatrixRun {
    /// Frozen when `report` is complete.
    pub matrix: Arc<ChangeMatrix>,
    pub report: RunReport,
    /// Empty unless `EngineConfig::collect_transition_maps` is set.
    pub transition_maps: BTreeMap<TileCoord, TransitionMap>,
}

pub struct ChangeMatrixEngine {
    scheduler: TileScheduler,
    collect_transition_maps: bool,
}

impl ChangeMatrixEngine {
    pub fn new(cfg: EngineConfig) -> ChangeMatrixResult<Self> {
        cfg.validate()?;
        Ok(Self {
            scheduler: TileScheduler::new(cfg.scheduler)?,
            collect_transition_maps: cfg.collect_transition_maps,
        })
    }

    pub fn scheduler(&self) -> &TileScheduler {
        &self.scheduler
    }

    /// Computes the change matrix between two tiled images.
    ///
    /// Configuration problems fail the whole call. Per-tile errors are
    /// reported in [`RunReport::failures`] and contribute nothing.
    pub fn run<R, K, T>(
        &mut self,
        reference: Arc<R>,
        current: Arc<K>,
        counter: Arc<T>,
    ) -> ChangeMatrixResult<ChangeMatrixRun>
    where
        R: TileSource + ?Sized + 'static,
        K: TileSource + ?Sized + 'static,
        T: TileCounter + ?Sized + 'static,
    {
        let count_cfg = counter.config();
        count_cfg.validate()?;
        if self.collect_transition_maps && !count_cfg.keep_transition_map {
            return Err(ChangeMatrixError::config(
                "collecting transition maps needs a counter that keeps them",
            ));
        }
        let layout = reference.layout();
        layout.validate()?;
        if current.layout() != layout {
            return Err(ChangeMatrixError::config(format!(
                "current layout {:?} differs from reference layout {:?}",
                current.layout(),
                layout
            )));
        }

        let _span = trace_span!(
            "change_matrix",
            width = layout.width,
            height = layout.height,
            tiles = layout.num_tiles(),
            classes = count_cfg.num_classes
        )
        .entered();

        let matrix = Arc::new(ChangeMatrix::new(count_cfg.num_classes)?);
        let maps = Arc::new(Mutex::new(BTreeMap::new()));
        let collect = self.collect_transition_maps;

        let job = {
            let matrix = Arc::clone(&matrix);
            let maps = Arc::clone(&maps);
            move |coord: TileCoord| -> ChangeMatrixResult<()> {
                let _span =
                    trace_span!("tile", tile_x = coord.tile_x, tile_y = coord.tile_y).entered();
                let reference_tile = reference.tile(coord)?;
                let current_tile = current.tile(coord)?;
                check_same_shape(reference_tile.view(), current_tile.view())?;

                let counted = counter
                    .count(reference_tile.view(), current_tile.view())
                    .map_err(|err| in_image(err, reference_tile.bounds))?;
                matrix.merge(&counted.matrix)?;
                if collect {
                    if let Some(codes) = counted.transition_map {
                        lock(&maps).insert(
                            coord,
                            TransitionMap {
                                bounds: reference_tile.bounds,
                                codes,
                            },
                        );
                    }
                }
                Ok(())
            }
        };

        let report = self.scheduler.run(layout.coords().collect(), job);
        if report.is_complete() {
            matrix.freeze();
        }
        let transition_maps = lock(&maps).clone();
        trace_event!(
            "change_matrix_done",
            complete = report.is_complete(),
            failed = report.failures.len()
        );

        Ok(ChangeMatrixRun {
            matrix,
            report,
            transition_maps,
        })
    }
}

/// Shifts a tile-local label position to image coordinates.
fn in_image(err: ChangeMatrixError, bounds: Rect) -> ChangeMatrixError {
    match err {
        ChangeMatrixError::OutOfRangeLabel {
            value,
            x,
            y,
            num_classes,
        } => ChangeMatrixError::OutOfRangeLabel {
            value,
            x: bounds.x + x,
            y: bounds.y + y,
            num_classes,
        },
        other => other,
    }
}

/// One-shot run on a fresh engine.
pub fn compute_change_matrix<R, K, T>(
    reference: Arc<R>,
    current: Arc<K>,
    counter: Arc<T>,
    cfg: &EngineConfig,
) -> ChangeMatrixResult<ChangeMatrixRun>
where
    R: TileSource + ?Sized + 'static,
    K: TileSource + ?Sized + 'static,
    T: TileCounter + ?Sized + 'static,
{
    ChangeMatrixEngine::new(cfg.clone())?.run(reference, current, counter)
}
