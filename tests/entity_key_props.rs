use mesh_pic::mesh_error::MeshPicError;
use mesh_pic::topology::entity_key::{EntityKey, EntityTag, MAX_INDEX, MIN_INDEX};
use proptest::prelude::*;

fn any_tag() -> impl Strategy<Value = EntityTag> {
    (0u8..8).prop_map(EntityTag::from_bits)
}

fn any_coord() -> impl Strategy<Value = [i64; 3]> {
    prop::array::uniform3(MIN_INDEX..=MAX_INDEX)
}

proptest! {
    #[test]
    fn prop_encode_decode_round_trip(c in any_coord(), t in any_tag()) {
        let k = EntityKey::encode(c, t).unwrap();
        prop_assert_eq!(k.decode(), (c, t));
    }

    #[test]
    fn prop_dual_is_involution(c in any_coord(), t in any_tag()) {
        let k = EntityKey::encode(c, t).unwrap();
        prop_assert_eq!(k.dual().dual(), k);
        prop_assert_eq!(k.dual().coord(), c);
        prop_assert_eq!(k.dual().tag().iform(), 3 - t.iform());
    }

    #[test]
    fn prop_rotate_has_period_three(c in any_coord(), t in any_tag()) {
        let k = EntityKey::encode(c, t).unwrap();
        prop_assert_eq!(k.rotate().rotate().rotate(), k);
        prop_assert_eq!(k.rotate().inverse_rotate(), k);
        prop_assert_eq!(k.rotate().coord(), c);
        prop_assert_eq!(k.rotate().tag().iform(), t.iform());
    }

    #[test]
    fn prop_neighbor_keeps_tag(
        c in prop::array::uniform3(-1000i64..1000),
        t in any_tag(),
        axis in 0usize..3,
        step in -5i64..=5,
    ) {
        let k = EntityKey::encode(c, t).unwrap();
        let n = k.neighbor(axis, step).unwrap();
        let mut expected = c;
        expected[axis] += step;
        prop_assert_eq!(n.decode(), (expected, t));
        prop_assert_eq!(n.neighbor(axis, -step).unwrap(), k);
    }

    #[test]
    fn prop_order_follows_axis2_major(
        a in prop::array::uniform3(-50i64..50),
        b in prop::array::uniform3(-50i64..50),
    ) {
        let ka = EntityKey::cell(a).unwrap();
        let kb = EntityKey::cell(b).unwrap();
        let la = [a[2], a[1], a[0]];
        let lb = [b[2], b[1], b[0]];
        prop_assert_eq!(ka.cmp(&kb), la.cmp(&lb));
    }
}

#[test]
fn face_x_round_trip() {
    let k = EntityKey::encode([3, -2, 7], EntityTag::FaceX).unwrap();
    assert_eq!(k.decode(), ([3, -2, 7], EntityTag::FaceX));
}

#[test]
fn range_limits_are_inclusive() {
    for axis in 0..3 {
        let mut c = [0i64; 3];
        c[axis] = MAX_INDEX;
        assert_eq!(EntityKey::encode(c, EntityTag::Volume).unwrap().coord(), c);
        c[axis] = MIN_INDEX;
        assert_eq!(EntityKey::encode(c, EntityTag::Vertex).unwrap().coord(), c);

        c[axis] = MAX_INDEX + 1;
        assert!(matches!(
            EntityKey::encode(c, EntityTag::Volume),
            Err(MeshPicError::Configuration(_))
        ));
        c[axis] = MIN_INDEX - 1;
        assert!(matches!(
            EntityKey::encode(c, EntityTag::Vertex),
            Err(MeshPicError::Configuration(_))
        ));
    }
}

#[test]
fn stepping_past_the_range_is_an_error() {
    let top = EntityKey::cell([MAX_INDEX, 0, 0]).unwrap();
    assert!(top.neighbor(0, 1).is_err());
    assert!(top.neighbor(3, 1).is_err());
    let bottom = EntityKey::cell([0, MIN_INDEX, 0]).unwrap();
    assert!(bottom.neighbor(1, -1).is_err());
    assert_eq!(bottom.neighbor(1, 1).unwrap().coord(), [0, MIN_INDEX + 1, 0]);
}

#[test]
fn dual_pairs() {
    let pairs = [
        (EntityTag::Vertex, EntityTag::Volume),
        (EntityTag::EdgeX, EntityTag::FaceX),
        (EntityTag::EdgeY, EntityTag::FaceY),
        (EntityTag::EdgeZ, EntityTag::FaceZ),
    ];
    for (a, b) in pairs {
        assert_eq!(a.dual(), b);
        assert_eq!(b.dual(), a);
    }
}

#[test]
fn orthogonal_axes_of_edges_and_faces() {
    let edge_y = EntityKey::encode([0, 0, 0], EntityTag::EdgeY).unwrap();
    assert_eq!(edge_y.orthogonal_axes(), Some([2, 0]));
    assert_eq!(edge_y.rotate().tag(), EntityTag::EdgeZ);
    let face_z = EntityKey::encode([1, 1, 1], EntityTag::FaceZ).unwrap();
    assert_eq!(face_z.orthogonal_axes(), Some([0, 1]));
    assert_eq!(EntityKey::cell([0, 0, 0]).unwrap().orthogonal_axes(), None);
}

#[test]
fn dense_hash_wraps_periodic_axes() {
    let k = EntityKey::cell([-1, 2, 0]).unwrap();
    assert_eq!(k.hash([0, 0, 0], [4, 4, 1], [false; 3]), None);
    assert_eq!(k.hash([0, 0, 0], [4, 4, 1], [true, false, false]), Some(3 * 4 + 2));
    assert_eq!(k.hash([-1, 0, 0], [4, 4, 1], [false; 3]), Some(2));
}
