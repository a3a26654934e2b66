use approx::assert_abs_diff_eq;
use ndarray::Array4;

use alic_pathways::centroid::CentroidPoint;
use alic_pathways::transform::{transform_points, transform_trajectory, FieldConvention, Mapping};
use alic_pathways::{Affine, AlicError, CentroidTrajectory, CoordinateTransform, Direction, NiftiDataType, NiftiImage, Point3};


fn assert_points_eq(expected: &[Point3], found: &[Point3], epsilon: f64) {
    assert_eq!(expected.len(), found.len());
    for (e, f) in expected.iter().zip(found.iter()) {
        for d in 0..3 {
            assert_abs_diff_eq!(e[d], f[d], epsilon = epsilon);
        }
    }
}


#[test]
fn an_affine_and_its_inverse_round_trip_points() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acpc2mni.txt");
    std::fs::write(&path, "# acpc to standard\n0.98 0.05 0 2.5\n-0.04 1.02 0.1 -17\n0 -0.08 0.95 4\n").unwrap();

    let forward = CoordinateTransform::from_affine_file(&path, Direction::NativeToStandard).unwrap();
    let backward = forward.invert().unwrap();
    assert_eq!(Direction::StandardToNative, backward.direction);

    let points = vec![[0.0, 0.0, 0.0], [-31.5, 12.0, 8.25], [40.0, -60.0, 22.0]];
    let mapped = transform_points(&points, &forward).unwrap();
    assert_points_eq(&points, &transform_points(&mapped, &backward).unwrap(), 1e-9);
}


#[test]
fn a_displacement_field_and_its_numerical_inverse_round_trip_a_point() {
    // displacement of 0.1 * x along x on a 1 mm grid, so x maps to 1.1 * x
    let n = 20;
    let vectors = Array4::from_shape_fn((n, n, n, 3), |(i, _, _, c)| if c == 0 { 0.1 * i as f64 } else { 0.0 });
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("standard2acpc_dc.nii.gz");
    NiftiImage::from_data(vectors, &Affine::identity()).to_file(&path, NiftiDataType::Float32).unwrap();

    let warp = CoordinateTransform::from_warp_file(&path, Direction::NativeToStandard, FieldConvention::Displacement).unwrap();
    let p = [5.0, 7.0, 3.0];
    let mapped = warp.apply(p).unwrap();
    assert_abs_diff_eq!(5.5, mapped[0], epsilon = 1e-5);
    assert_abs_diff_eq!(7.0, mapped[1], epsilon = 1e-9);

    let inverse = warp.invert().unwrap();
    assert!(matches!(inverse.mapping, Mapping::InverseWarp(_)));
    assert_points_eq(&[p], &[inverse.apply(mapped).unwrap()], 1e-3);
}


#[test]
fn transforms_are_only_used_in_their_direction() {
    let to_standard = CoordinateTransform::new(Direction::NativeToStandard, Mapping::Affine(Affine::identity()));
    assert!(to_standard.oriented(Direction::NativeToStandard).is_ok());
    assert!(matches!(to_standard.oriented(Direction::StandardToNative), Err(AlicError::TransformDirection(_, _))));
    assert!(to_standard.invert().unwrap().oriented(Direction::StandardToNative).is_ok());
}


#[test]
fn trajectories_keep_their_slices() {
    let transform = CoordinateTransform::new(Direction::NativeToStandard, Mapping::Affine(Affine::scaled([1.0, 1.0, 1.0], [1.0, -2.0, 3.0])));
    let trajectory = CentroidTrajectory::new(vec![
        CentroidPoint { slice: 3, position: [0.0, 0.0, 0.0] },
        CentroidPoint { slice: 9, position: [1.0, 1.0, 1.0] },
    ]);
    let mapped = transform_trajectory(&trajectory, &transform).unwrap();
    assert_eq!(vec![3, 9], mapped.iter().map(|p| p.slice).collect::<Vec<usize>>());
    assert_points_eq(&[[1.0, -2.0, 3.0], [2.0, -1.0, 4.0]], &mapped.positions(), 1e-12);
    assert!(transform_trajectory(&CentroidTrajectory::empty(), &transform).unwrap().is_empty());
}
