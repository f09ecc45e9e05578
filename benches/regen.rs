use criterion::{black_box, criterion_group, criterion_main, Criterion};

use regenesis::host::MemorySim;
use regenesis::math::{RegionBounds, VoxelPos};
use regenesis::regen::{RegenJob, RegenOptions, StepBudget, StepOutcome};
use regenesis::snapshot::region::{section_name, RegionMetadata, RegionSnapshot, SnapshotContents};
use regenesis::snapshot::store::FORMAT_VERSION;
use regenesis::voxel::codec::{decode_token, encode_token};
use regenesis::voxel::VoxelState;

use std::path::PathBuf;
use std::sync::Arc;

fn solid_snapshot(size: i32) -> Arc<RegionSnapshot> {
    let bounds = RegionBounds::from_origin_extent(VoxelPos::new(0, 0, 0), size, size, size);
    let mut contents = SnapshotContents::default();
    let token = encode_token(&VoxelState::new("stone").with_prop("facing", "north"));
    for pos in bounds.iter() {
        contents
            .sections
            .entry(section_name(pos.chunk()))
            .or_default()
            .insert(pos, token.clone());
    }
    let meta = RegionMetadata {
        creator: "bench".into(),
        created_at: 0,
        world: "w".into(),
        source_version: "1".into(),
        format_version: FORMAT_VERSION,
        origin: VoxelPos::new(0, 0, 0),
        width: size,
        height: size,
        depth: size,
    };
    Arc::new(RegionSnapshot::from_capture(
        "bench",
        PathBuf::from("/tmp/bench.region"),
        meta,
        contents,
    ))
}

fn bench_token_codec(c: &mut Criterion) {
    let state = VoxelState::new("oak_stairs")
        .with_prop("facing", "east")
        .with_prop("half", "top")
        .with_prop("waterlogged", "false");
    let token = encode_token(&state);

    c.bench_function("token_encode", |b| {
        b.iter(|| encode_token(black_box(&state)));
    });
    c.bench_function("token_decode", |b| {
        b.iter(|| decode_token(black_box(&token)).unwrap());
    });
}

fn bench_full_restore_32(c: &mut Criterion) {
    let snapshot = solid_snapshot(32);

    c.bench_function("restore_32_cube", |b| {
        b.iter(|| {
            let sim = MemorySim::with_bulk_writes();
            sim.create_world("w");
            let mut job = RegenJob::new(snapshot.clone(), &RegenOptions::default());
            while job.step(&sim).unwrap() != StepOutcome::Finished {}
            black_box(job.voxels_reset())
        });
    });
}

fn bench_budgeted_step(c: &mut Criterion) {
    let snapshot = solid_snapshot(32);
    let options = RegenOptions {
        budget: StepBudget::Custom(1_000),
        ..Default::default()
    };

    c.bench_function("restore_step_1k_budget", |b| {
        let sim = MemorySim::new();
        sim.create_world("w");
        let mut job = RegenJob::new(snapshot.clone(), &options);
        b.iter(|| {
            if job.step(&sim).unwrap() == StepOutcome::Finished {
                job = RegenJob::new(snapshot.clone(), &options);
            }
        });
    });
}

fn bench_only_modified_clean(c: &mut Criterion) {
    let snapshot = solid_snapshot(16);
    let sim = MemorySim::new();
    sim.create_world("w");
    let mut fill = RegenJob::new(snapshot.clone(), &RegenOptions::default());
    while fill.step(&sim).unwrap() != StepOutcome::Finished {}

    let options = RegenOptions {
        only_modified: true,
        ..Default::default()
    };
    c.bench_function("only_modified_scan_clean_16_cube", |b| {
        b.iter(|| {
            let mut job = RegenJob::new(snapshot.clone(), &options);
            while job.step(black_box(&sim)).unwrap() != StepOutcome::Finished {}
            job.voxels_reset()
        });
    });
}

criterion_group!(
    benches,
    bench_token_codec,
    bench_full_restore_32,
    bench_budgeted_step,
    bench_only_modified_clean
);
criterion_main!(benches);
