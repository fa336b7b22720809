use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::Vec3;
use strata_core::{Ray, VoxelCoord};
use strata_voxel::{SectorHashGrid, VoxelObject};
use strata_voxel::hash_grid::{grid_size_for, GridEntry, DEFAULT_MAX_PROBES};

fn sphere_brush(c: &mut Criterion) {
    c.bench_function("fill_sphere_r8", |b| {
        b.iter(|| {
            let mut obj = VoxelObject::new();
            obj.fill_sphere(VoxelCoord::new(16, 16, 16), black_box(8.0), 3);
            obj
        });
    });
}

fn raycast(c: &mut Criterion) {
    let mut obj = VoxelObject::new();
    obj.fill_box(VoxelCoord::new(-64, -4, -64), VoxelCoord::new(63, 0, 63), 1);
    let ray = Ray::new(Vec3::new(-60.5, 20.0, -60.5), Vec3::new(1.0, -0.2, 1.0));
    c.bench_function("raycast_terrain_slab", |b| {
        b.iter(|| obj.raycast(black_box(&ray), 1000.0));
    });
}

fn grid_build(c: &mut Criterion) {
    let entries: Vec<_> = (0..4096)
        .map(|i| GridEntry {
            coords: glam::IVec3::new(i % 16, (i / 16) % 16, i / 256),
            base_idx: 1,
            sector_idx: i as u32,
        })
        .collect();
    let size = grid_size_for(entries.len(), 8, 1024, 1);
    c.bench_function("sector_grid_build_4096", |b| {
        b.iter(|| SectorHashGrid::build(size, DEFAULT_MAX_PROBES, entries.iter().copied()));
    });
}

criterion_group!(benches, sphere_brush, raycast, grid_build);
criterion_main!(benches);
