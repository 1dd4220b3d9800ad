use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use changematrix::{
    compute_change_matrix, ChangeMatrixEngine, ChangeMatrixError, ChangeMatrixResult, CountConfig,
    CountMatrix, CpuCounter, EngineConfig, InMemoryTiles, LabelPolicy, LabelRaster, LabelTile,
    LabelView, RunStatus, SchedulerConfig, TileCoord, TileCount, TileCounter, TileLayout,
    TileSource,
};

fn make_labels(width: usize, height: usize, classes: usize, seed: usize) -> LabelRaster {
    let mut data = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let value = ((x * 7) ^ (y * 5) ^ (x * y + seed)) % classes;
            data.push(value as u8);
        }
    }
    LabelRaster::new(data, width, height).unwrap()
}

fn direct_counts(reference: &LabelRaster, current: &LabelRaster, classes: usize) -> CountMatrix {
    let mut counts = vec![0u64; classes * classes];
    for (&a, &b) in reference.as_slice().iter().zip(current.as_slice()) {
        counts[a as usize * classes + b as usize] += 1;
    }
    CountMatrix::from_counts(classes, counts).unwrap()
}

fn tiles(raster: LabelRaster, tile: usize) -> Arc<InMemoryTiles> {
    Arc::new(InMemoryTiles::new(raster, tile, tile).unwrap())
}

fn engine_config(workers: usize) -> EngineConfig {
    EngineConfig {
        scheduler: SchedulerConfig {
            workers,
            timeout: None,
        },
        ..EngineConfig::default()
    }
}

#[test]
fn single_tile_two_by_two() {
    let reference = LabelRaster::from_rows(&[[0u8, 0], [1, 1]]).unwrap();
    let current = LabelRaster::from_rows(&[[0u8, 1], [1, 0]]).unwrap();
    let counter = Arc::new(CpuCounter::new(CountConfig::new(2)).unwrap());

    let run = compute_change_matrix(
        tiles(reference, 2),
        tiles(current, 2),
        counter,
        &engine_config(1),
    )
    .unwrap();

    assert!(run.report.is_success());
    assert_eq!(run.report.total_tiles, 1);
    assert!(run.matrix.is_frozen());
    assert_eq!(run.matrix.read().to_rows(), vec![vec![1, 1], vec![1, 1]]);
}

#[test]
fn two_tiles_accumulate() {
    let reference = LabelRaster::from_rows(&[[0u8, 0, 0, 0], [1, 1, 1, 1]]).unwrap();
    let current = LabelRaster::from_rows(&[[0u8, 1, 0, 1], [1, 0, 1, 0]]).unwrap();
    let counter = Arc::new(CpuCounter::new(CountConfig::new(2)).unwrap());

    let run = compute_change_matrix(
        tiles(reference, 2),
        tiles(current, 2),
        counter,
        &engine_config(2),
    )
    .unwrap();

    assert_eq!(run.report.total_tiles, 2);
    assert!(run.report.is_success());
    let totals = run.matrix.read();
    assert_eq!(totals.to_rows(), vec![vec![2, 2], vec![2, 2]]);
    assert_eq!(totals.total(), 8);
}

#[test]
fn totals_cover_every_pixel_with_partial_tiles() {
    let classes = 5;
    let reference = make_labels(37, 23, classes, 1);
    let current = make_labels(37, 23, classes, 4);
    let expected = direct_counts(&reference, &current, classes);
    let counter = Arc::new(CpuCounter::new(CountConfig::new(classes)).unwrap());

    let run = compute_change_matrix(
        tiles(reference, 8),
        tiles(current, 8),
        counter,
        &engine_config(4),
    )
    .unwrap();

    assert!(run.report.is_success());
    assert_eq!(run.report.total_tiles, 5 * 3);
    assert_eq!(run.report.completed_tiles, 15);
    let totals = run.matrix.read();
    assert_eq!(totals.total(), 37 * 23);
    assert_eq!(totals, expected);
}

#[test]
fn more_tiles_than_workers() {
    let classes = 3;
    let reference = make_labels(64, 64, classes, 0);
    let current = make_labels(64, 64, classes, 9);
    let expected = direct_counts(&reference, &current, classes);
    let counter = Arc::new(CpuCounter::new(CountConfig::new(classes)).unwrap());

    let mut engine = ChangeMatrixEngine::new(engine_config(2)).unwrap();
    let run = engine
        .run(tiles(reference, 8), tiles(current, 8), counter)
        .unwrap();

    assert_eq!(run.report.total_tiles, 64);
    assert!(run.report.is_success());
    assert_eq!(run.matrix.read(), expected);
}

#[test]
fn identical_images_only_fill_the_diagonal() {
    let classes = 4;
    let raster = make_labels(20, 12, classes, 3);
    let counter = Arc::new(CpuCounter::new(CountConfig::new(classes)).unwrap());

    let run = compute_change_matrix(
        tiles(raster.clone(), 5),
        tiles(raster, 5),
        counter,
        &engine_config(3),
    )
    .unwrap();

    let totals = run.matrix.read();
    assert_eq!(totals.unchanged(), 240);
    assert_eq!(totals.changed(), 0);
}

/// Source that returns a cropped tile at one coordinate.
struct CroppingSource {
    inner: InMemoryTiles,
    crop_at: TileCoord,
}

impl TileSource for CroppingSource {
    fn layout(&self) -> TileLayout {
        self.inner.layout()
    }

    fn tile(&self, coord: TileCoord) -> ChangeMatrixResult<LabelTile> {
        let tile = self.inner.tile(coord)?;
        if coord != self.crop_at {
            return Ok(tile);
        }
        let (width, height) = tile.shape();
        let cropped = LabelView::from_slice(tile.labels.as_slice(), width, height)?
            .region(changematrix::Rect::new(0, 0, width - 1, height))?;
        Ok(LabelTile {
            labels: LabelRaster::from_view(cropped),
            bounds: tile.bounds,
        })
    }
}

#[test]
fn shape_mismatch_fails_only_that_tile() {
    let classes = 3;
    let reference = make_labels(16, 16, classes, 2);
    let current = make_labels(16, 16, classes, 5);
    let counter = Arc::new(CpuCounter::new(CountConfig::new(classes)).unwrap());
    let bad = TileCoord::new(1, 1);
    let current = Arc::new(CroppingSource {
        inner: InMemoryTiles::new(current, 4, 4).unwrap(),
        crop_at: bad,
    });

    let run =
        compute_change_matrix(tiles(reference, 4), current, counter, &engine_config(4)).unwrap();

    assert_eq!(run.report.status, RunStatus::Complete);
    assert!(!run.report.is_success());
    assert_eq!(run.report.failed_coords(), vec![bad]);
    assert_eq!(run.report.succeeded_tiles(), 15);
    assert_eq!(
        run.report.failures[0].error,
        ChangeMatrixError::TileShapeMismatch {
            reference: (4, 4),
            current: (3, 4),
        }
    );
    assert!(run.matrix.is_frozen());
    assert_eq!(run.matrix.read().total(), 16 * 16 - 16);
}

#[test]
fn out_of_range_label_fails_tile_with_image_position() {
    let reference = LabelRaster::from_rows(&[[0u8, 1, 0, 1], [1, 0, 1, 9]]).unwrap();
    let current = LabelRaster::filled(4, 2, 0).unwrap();
    let counter = Arc::new(CpuCounter::new(CountConfig::new(2)).unwrap());

    let run = compute_change_matrix(
        tiles(reference.clone(), 2),
        tiles(current.clone(), 2),
        counter,
        &engine_config(2),
    )
    .unwrap();
    assert_eq!(run.report.failed_coords(), vec![TileCoord::new(1, 0)]);
    assert_eq!(
        run.report.failures[0].error,
        ChangeMatrixError::OutOfRangeLabel {
            value: 9,
            x: 3,
            y: 1,
            num_classes: 2,
        }
    );
    assert_eq!(run.matrix.read().total(), 4);

    let lenient = Arc::new(
        CpuCounter::new(CountConfig {
            policy: LabelPolicy::Skip,
            ..CountConfig::new(2)
        })
        .unwrap(),
    );
    let run = compute_change_matrix(
        tiles(reference, 2),
        tiles(current, 2),
        lenient,
        &engine_config(2),
    )
    .unwrap();
    assert!(run.report.is_success());
    assert_eq!(run.matrix.read().total(), 7);
}

struct PanickingCounter {
    inner: CpuCounter,
    calls: AtomicUsize,
}

impl TileCounter for PanickingCounter {
    fn config(&self) -> &CountConfig {
        self.inner.config()
    }

    fn count(
        &self,
        reference: LabelView<'_>,
        current: LabelView<'_>,
    ) -> ChangeMatrixResult<TileCount> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("counter exploded");
        }
        self.inner.count(reference, current)
    }
}

#[test]
fn panicking_tile_is_reported_and_run_completes() {
    let classes = 2;
    let raster = make_labels(8, 8, classes, 0);
    let counter = Arc::new(PanickingCounter {
        inner: CpuCounter::new(CountConfig::new(classes)).unwrap(),
        calls: AtomicUsize::new(0),
    });

    let run = compute_change_matrix(
        tiles(raster.clone(), 4),
        tiles(raster, 4),
        counter,
        &engine_config(2),
    )
    .unwrap();

    assert!(run.report.is_complete());
    assert_eq!(run.report.failures.len(), 1);
    assert_eq!(
        run.report.failures[0].error,
        ChangeMatrixError::WorkerPanicked {
            reason: "counter exploded".to_string(),
        }
    );
    assert_eq!(run.matrix.read().total(), 48);
}

/// Source whose tile at one coordinate blocks until released.
struct GatedSource {
    inner: InMemoryTiles,
    gated: TileCoord,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl TileSource for GatedSource {
    fn layout(&self) -> TileLayout {
        self.inner.layout()
    }

    fn tile(&self, coord: TileCoord) -> ChangeMatrixResult<LabelTile> {
        if coord == self.gated {
            let gate = self.gate.lock().unwrap();
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        self.inner.tile(coord)
    }
}

#[test]
fn timeout_leaves_accumulator_open_for_late_tiles() {
    let classes = 3;
    let reference = make_labels(8, 8, classes, 1);
    let current = make_labels(8, 8, classes, 2);
    let expected = direct_counts(&reference, &current, classes);
    let (release, gate) = mpsc::channel();
    let gated = Arc::new(GatedSource {
        inner: InMemoryTiles::new(reference, 4, 4).unwrap(),
        gated: TileCoord::new(1, 1),
        gate: Mutex::new(gate),
    });
    let counter = Arc::new(CpuCounter::new(CountConfig::new(classes)).unwrap());

    let mut engine = ChangeMatrixEngine::new(EngineConfig {
        scheduler: SchedulerConfig {
            workers: 2,
            timeout: Some(Duration::from_millis(200)),
        },
        ..EngineConfig::default()
    })
    .unwrap();
    let run = engine.run(gated, tiles(current, 4), counter).unwrap();

    assert_eq!(run.report.status, RunStatus::Incomplete);
    assert_eq!(run.report.completed_tiles, 3);
    assert!(!run.matrix.is_frozen());
    assert_eq!(run.matrix.read().total(), 48);

    release.send(()).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while run.matrix.read().total() < 64 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    run.matrix.freeze();
    assert_eq!(run.matrix.read(), expected);
}

#[test]
fn transition_maps_are_collected_per_tile() {
    let reference = LabelRaster::from_rows(&[[0u8, 1, 2], [2, 1, 0]]).unwrap();
    let current = LabelRaster::from_rows(&[[1u8, 1, 2], [0, 0, 0]]).unwrap();
    let counter = Arc::new(
        CpuCounter::new(CountConfig {
            keep_transition_map: true,
            ..CountConfig::new(3)
        })
        .unwrap(),
    );
    let cfg = EngineConfig {
        collect_transition_maps: true,
        ..engine_config(2)
    };

    let run = compute_change_matrix(tiles(reference, 2), tiles(current, 2), counter, &cfg)
        .unwrap();

    assert_eq!(run.transition_maps.len(), 2);
    let left = &run.transition_maps[&TileCoord::new(0, 0)];
    assert_eq!(left.bounds, changematrix::Rect::new(0, 0, 2, 2));
    assert_eq!(left.codes, vec![1, 4, 6, 3]);
    let right = &run.transition_maps[&TileCoord::new(1, 0)];
    assert_eq!(right.bounds, changematrix::Rect::new(2, 0, 1, 2));
    assert_eq!(right.codes, vec![8, 0]);
}

#[test]
fn invalid_configuration_fails_before_dispatch() {
    assert!(matches!(
        CpuCounter::new(CountConfig::new(0)),
        Err(ChangeMatrixError::InvalidConfiguration { .. })
    ));
    assert!(matches!(
        ChangeMatrixEngine::new(engine_config(0)),
        Err(ChangeMatrixError::InvalidConfiguration { .. })
    ));

    let counter = Arc::new(CpuCounter::new(CountConfig::new(2)).unwrap());
    let reference = tiles(LabelRaster::filled(4, 4, 0).unwrap(), 2);
    let current = tiles(LabelRaster::filled(4, 6, 0).unwrap(), 2);
    let err = compute_change_matrix(reference, current, counter, &engine_config(1)).unwrap_err();
    assert!(matches!(err, ChangeMatrixError::InvalidConfiguration { .. }));
}

#[test]
fn maximal_timeout_runs_to_completion() {
    let raster = make_labels(4, 4, 2, 0);
    let counter = Arc::new(CpuCounter::new(CountConfig::new(2)).unwrap());
    let cfg = EngineConfig {
        scheduler: SchedulerConfig {
            workers: 2,
            timeout: Some(Duration::MAX),
        },
        ..EngineConfig::default()
    };

    let run = compute_change_matrix(tiles(raster.clone(), 2), tiles(raster, 2), counter, &cfg)
        .unwrap();

    assert!(run.report.is_success());
    assert!(run.matrix.is_frozen());
    assert_eq!(run.matrix.read().total(), 16);
}
