mod common;

use common::{Decomposition, owned_dataset_of};
use mesh_pic::algs::generator::generate_cell;
use mesh_pic::prelude::*;

fn generate_all(dec: &mut Decomposition, cfg: &GeneratorConfig) -> Vec<usize> {
    let Decomposition {
        comms, meshes, parts, ..
    } = dec;
    std::thread::scope(|s| {
        let handles: Vec<_> = parts
            .iter_mut()
            .zip(meshes.iter())
            .zip(comms.iter())
            .map(|((part, mesh), comm)| {
                s.spawn(move || {
                    generate(part, mesh, &BallisticPolicy, comm, HaloCommTags::default(), cfg)
                        .unwrap()
                        .ghosts
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn sorted_owned(dec: &Decomposition) -> Vec<ParticleRecord> {
    let mut all: Vec<ParticleRecord> = dec
        .parts
        .iter()
        .zip(&dec.meshes)
        .flat_map(|(c, m)| owned_dataset_of(c, m))
        .collect();
    all.sort_by_key(|p| (p.x.map(f64::to_bits), p.v.map(f64::to_bits)));
    all
}

fn mesh_cfg(blocks: [usize; 3]) -> MeshConfig {
    MeshConfig {
        ndims: 2,
        global_cells: [6, 4, 1],
        dx: [0.25, 0.5, 1.0],
        periodic: [true, false, false],
        blocks,
        ..Default::default()
    }
}

#[test]
fn population_does_not_depend_on_decomposition() {
    let gen_cfg = GeneratorConfig {
        per_cell: 5,
        density: 2.0,
        thermal_velocity: 0.7,
        drift: [0.1, 0.0, 0.0],
        seed: 99,
        payload: 4,
    };
    let mut serial = Decomposition::new(mesh_cfg([1, 1, 1]));
    generate_all(&mut serial, &gen_cfg);
    let mut split = Decomposition::new(mesh_cfg([3, 2, 1]));
    generate_all(&mut split, &gen_cfg);

    let a = sorted_owned(&serial);
    let b = sorted_owned(&split);
    assert_eq!(a.len(), 6 * 4 * 5);
    assert_eq!(a, b);
    assert!(split.parts.iter().all(|p| p.is_well_hashed()));

    let total_weight: f64 = a.iter().map(|p| p.w).sum();
    assert!((total_weight - 2.0 * 6.0 * 0.25 * 4.0 * 0.5).abs() < 1e-9);
}

#[test]
fn generation_fills_ghosts_from_neighbours() {
    let gen_cfg = GeneratorConfig {
        per_cell: 3,
        ..Default::default()
    };
    let mut dec = Decomposition::new(mesh_cfg([2, 2, 1]));
    let ghosts = generate_all(&mut dec, &gen_cfg);

    for (r, mesh) in dec.meshes.iter().enumerate() {
        assert_eq!(ghosts[r], mesh.zone_keys(Zone::Ghost).len() * 3);
        for &k in mesh.zone_keys(Zone::Ghost) {
            let expected =
                generate_cell(mesh, &BallisticPolicy, wrap_x(mesh, k), &gen_cfg).unwrap();
            let got: Vec<[f64; 3]> = dec.parts[r].at(k).unwrap().iter().map(|p| p.v).collect();
            let want: Vec<[f64; 3]> = expected.iter().map(|p| p.v).collect();
            assert_eq!(got, want, "rank {r} ghost {k:?}");
        }
    }
    assert_eq!(dec.universe.pending(), 0);
}

fn wrap_x(mesh: &StructuredMesh, k: EntityKey) -> EntityKey {
    let mut c = k.coord();
    c[0] = c[0].rem_euclid(mesh.config().global_cells[0] as i64);
    EntityKey::cell(c).unwrap()
}

#[test]
fn generate_then_step_conserves_weight() {
    let gen_cfg = GeneratorConfig {
        per_cell: 4,
        thermal_velocity: 0.05,
        ..Default::default()
    };
    let mut dec = Decomposition::new(MeshConfig {
        ndims: 2,
        global_cells: [6, 6, 1],
        periodic: [true, true, false],
        blocks: [2, 3, 1],
        ..Default::default()
    });
    generate_all(&mut dec, &gen_cfg);
    let before = dec.owned_total();
    assert_eq!(before, 36 * 4);
    for _ in 0..3 {
        dec.push(1.0);
        dec.rehash();
    }
    assert_eq!(dec.owned_total(), before);
    let weights: f64 = dec
        .parts
        .iter()
        .zip(&dec.meshes)
        .map(|(c, m)| {
            [Zone::Boundary, Zone::Center]
                .iter()
                .flat_map(|z| m.zone_keys(*z))
                .map(|k| c.weight(*k))
                .sum::<f64>()
        })
        .sum();
    assert!((weights - 36.0).abs() < 1e-9);
}
