mod common;

use std::sync::Arc;

use common::{Particles, cell, record};
use mesh_pic::prelude::*;
use proptest::prelude::*;

fn serial(cells: [usize; 3], ndims: usize) -> Arc<StructuredMesh> {
    let cfg = MeshConfig {
        ndims,
        global_cells: cells,
        ..Default::default()
    };
    Arc::new(StructuredMesh::serial(cfg).unwrap())
}

fn container(mesh: &Arc<StructuredMesh>) -> Particles {
    ParticleContainer::new(MeshLocator::new(mesh.clone(), BallisticPolicy))
}

#[test]
fn five_records_in_one_cell_keep_their_order() {
    let mesh = serial([4, 4, 4], 3);
    let mut c = container(&mesh);
    let k = cell([1, 2, 3]);
    for i in 0..5u64 {
        let x = [1.1 + 0.1 * i as f64, 2.5, 3.9 - 0.1 * i as f64];
        assert_eq!(c.insert(record(x, [0.0; 3], i)).unwrap(), k);
    }
    rehash_local(&mut c, &mesh).unwrap();
    assert_eq!(c.bucket_count(), 1);
    let got: Vec<u64> = c.at(k).unwrap().iter().map(|p| p.payload).collect();
    assert_eq!(got, vec![0, 1, 2, 3, 4]);
}

#[test]
fn misfiled_records_are_moved_without_disturbing_stayers() {
    let mesh = serial([4, 4, 4], 3);
    let mut c = container(&mesh);
    let home = cell([0, 0, 0]);
    let bucket = c.get_or_create(home);
    bucket.push(record([0.5, 0.5, 0.5], [0.0; 3], 1));
    bucket.push(record([3.5, 0.5, 0.5], [0.0; 3], 2));
    bucket.push(record([0.2, 0.2, 0.2], [0.0; 3], 3));
    bucket.push(record([3.2, 0.5, 0.5], [0.0; 3], 4));
    bucket.push(record([0.9, 0.9, 0.9], [0.0; 3], 5));
    assert!(!c.is_well_hashed());

    let report = rehash_local(&mut c, &mesh).unwrap();
    assert_eq!(report.examined, 5);
    assert_eq!(report.migrated, 2);
    let stay: Vec<u64> = c.at(home).unwrap().iter().map(|p| p.payload).collect();
    assert_eq!(stay, vec![1, 3, 5]);
    let mut moved: Vec<u64> = c.at(cell([3, 0, 0])).unwrap().iter().map(|p| p.payload).collect();
    moved.sort_unstable();
    assert_eq!(moved, vec![2, 4]);
    assert!(c.is_well_hashed());
    c.validate_invariants().unwrap();
}

#[test]
fn guarded_and_unguarded_access() {
    let mesh = serial([2, 2, 1], 2);
    let mut c = container(&mesh);
    let k = cell([1, 1, 0]);
    assert!(matches!(c.at(k), Err(MeshPicError::NotFound(key)) if key == k));
    assert!(c.at_mut(k).is_err());
    assert_eq!(c.size(k), 0);
    assert_eq!(c.weight(k), 0.0);
    c.get_or_create(k);
    assert!(c.at(k).unwrap().is_empty());
    assert_eq!(c.erase(k), 0);
    assert_eq!(c.erase(k), 0);
    c.clear();
    c.clear();
    assert!(c.is_empty());
}

#[test]
fn copy_zone_reads_one_zone() {
    let cfg = MeshConfig {
        ndims: 1,
        global_cells: [6, 1, 1],
        periodic: [true, false, false],
        ..Default::default()
    };
    let mesh = Arc::new(StructuredMesh::serial(cfg).unwrap());
    let mut c = container(&mesh);
    for (i, x) in [0.5, 2.5, 3.5, 5.5].into_iter().enumerate() {
        c.insert(record([x, 0.0, 0.0], [0.0; 3], i as u64)).unwrap();
    }
    let mut out = Vec::new();
    assert_eq!(c.copy_zone(&mesh, Zone::Boundary, &mut out), 2);
    assert_eq!(c.copy_zone(&mesh, Zone::Center, &mut out), 2);
    assert_eq!(c.copy_zone(&mesh, Zone::Ghost, &mut out), 0);
    let payloads: Vec<u64> = out.iter().map(|p| p.payload).collect();
    assert_eq!(payloads, vec![0, 3, 1, 2]);
    assert_eq!(c.len(), 4);
}

#[test]
fn merge_all_moves_everything() {
    let mesh = serial([4, 1, 1], 1);
    let mut a = container(&mesh);
    let mut b = container(&mesh);
    for i in 0..4u64 {
        b.insert(record([i as f64 + 0.5, 0.0, 0.0], [0.0; 3], i)).unwrap();
    }
    assert_eq!(a.merge_all(&mut b), 4);
    assert!(b.is_empty());
    assert_eq!(b.bucket_count(), 0);
    assert_eq!(a.merge_all(&mut b), 0);
    assert_eq!(a.len(), 4);
    assert!(a.is_well_hashed());
}

proptest! {
    #[test]
    fn prop_merge_twice_equals_merge_once(
        xs in prop::collection::vec(0.0f64..4.0, 0..12),
        ys in prop::collection::vec(0.0f64..4.0, 0..12),
        target in 0i64..4,
    ) {
        let mesh = serial([4, 1, 1], 1);
        let fill = |xs: &[f64], base: u64| {
            let mut c = container(&mesh);
            for (i, x) in xs.iter().enumerate() {
                c.insert(record([*x, 0.0, 0.0], [0.0; 3], base + i as u64)).unwrap();
            }
            c
        };
        let key = cell([target, 0, 0]);

        let mut once = fill(xs.as_slice(), 0);
        let mut other = fill(ys.as_slice(), 100);
        once.merge(key, &mut other);
        let snapshot = once.dataset();
        let other_len = other.len();

        once.merge(key, &mut other);
        prop_assert_eq!(once.dataset(), snapshot);
        prop_assert_eq!(other.len(), other_len);
        prop_assert!(other.get(key).is_none());
        prop_assert_eq!(once.len() + other.len(), xs.len() + ys.len());
    }
}
