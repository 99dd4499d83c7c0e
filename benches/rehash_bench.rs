use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mesh_pic::prelude::*;

type Particles = ParticleContainer<MeshLocator<BallisticPolicy>>;

fn populated(n: usize, per_cell: usize) -> (Arc<StructuredMesh>, Particles) {
    let cfg = MeshConfig {
        ndims: 3,
        global_cells: [n, n, n],
        periodic: [true; 3],
        ..Default::default()
    };
    let mesh = Arc::new(StructuredMesh::serial(cfg).expect("mesh"));
    let mut c = ParticleContainer::new(MeshLocator::new(mesh.clone(), BallisticPolicy));
    let gen_cfg = GeneratorConfig {
        per_cell,
        thermal_velocity: 0.3,
        ..Default::default()
    };
    generate(&mut c, &mesh, &BallisticPolicy, &LocalComm::solo(), HaloCommTags::default(), &gen_cfg)
        .expect("generate");
    (mesh, c)
}

fn bench_rehash(c: &mut Criterion) {
    let mut group = c.benchmark_group("rehash");
    group.sample_size(20);
    for &n in &[8usize, 16, 24] {
        let (mesh, base) = populated(n, 16);
        group.bench_with_input(BenchmarkId::new("push_and_rehash", n), &n, |b, _| {
            b.iter_batched(
                || base.clone(),
                |mut particles| {
                    let field = UniformField::default();
                    push_owned(&mut particles, &mesh, &BallisticPolicy, &field, 0.5);
                    rehash_local(&mut particles, &mesh).expect("rehash")
                },
                criterion::BatchSize::LargeInput,
            )
        });
        group.bench_with_input(BenchmarkId::new("settled_rehash", n), &n, |b, _| {
            b.iter_batched(
                || base.clone(),
                |mut particles| rehash_local(&mut particles, &mesh).expect("rehash"),
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rehash);
criterion_main!(benches);
