use changematrix::{
    compute_change_matrix, CountConfig, CpuCounter, DeviceConfig, DeviceCounter, EngineConfig,
    HostDevice, InMemoryTiles, LabelRaster, SchedulerConfig, TileCounter,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

fn make_labels(width: usize, height: usize, classes: usize, seed: usize) -> LabelRaster {
    let mut data = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let value = ((x * 13) ^ (y * 7) ^ (x * y + seed)) % classes;
            data.push(value as u8);
        }
    }
    LabelRaster::new(data, width, height).unwrap()
}

fn bench_tile_counters(c: &mut Criterion) {
    let classes = 45;
    let reference = make_labels(512, 512, classes, 0);
    let current = make_labels(512, 512, classes, 17);
    let cfg = CountConfig::new(classes);

    let cpu = CpuCounter::new(cfg.clone()).unwrap();
    let device = DeviceCounter::new(HostDevice::new(), cfg, DeviceConfig::default()).unwrap();

    c.bench_function("cpu_count_512", |b| {
        b.iter(|| {
            let out = cpu
                .count(black_box(reference.view()), black_box(current.view()))
                .unwrap();
            black_box(out.matrix.total());
        })
    });

    c.bench_function("host_device_count_512", |b| {
        b.iter(|| {
            let out = device
                .count(black_box(reference.view()), black_box(current.view()))
                .unwrap();
            black_box(out.matrix.total());
        })
    });
}

fn bench_engine(c: &mut Criterion) {
    let classes = 16;
    let reference = Arc::new(
        InMemoryTiles::new(make_labels(2048, 2048, classes, 3), 256, 256).unwrap(),
    );
    let current = Arc::new(
        InMemoryTiles::new(make_labels(2048, 2048, classes, 5), 256, 256).unwrap(),
    );
    let counter = Arc::new(CpuCounter::new(CountConfig::new(classes)).unwrap());
    let cfg = EngineConfig {
        scheduler: SchedulerConfig {
            workers: 8,
            timeout: None,
        },
        ..EngineConfig::default()
    };

    c.bench_function("engine_cpu_2048_tiles_256", |b| {
        b.iter(|| {
            let run = compute_change_matrix(
                Arc::clone(&reference),
                Arc::clone(&current),
                Arc::clone(&counter),
                &cfg,
            )
            .unwrap();
            black_box(run.matrix.read().total());
        })
    });
}

criterion_group!(benches, bench_tile_counters, bench_engine);
criterion_main!(benches);
