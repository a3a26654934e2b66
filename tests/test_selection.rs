mod common;

use ndarray::Array3;

use alic_pathways::{select, Affine, AnatomicalMask, EndpointRule, StreamlineSet, Subsegmenter, Target, Volume, ClusterCuller, Hemisphere};


#[test]
fn only_the_streamline_ending_in_the_mask_is_selected() {
    let set = common::parallel_bundle(&[2.0, 5.0, 8.0], common::grid(common::N));
    let mut data = Array3::from_elem((common::N, common::N, common::N), false);
    data[[11, 5, 6]] = true;
    let mask = AnatomicalMask::new(data, Affine::identity());

    assert_eq!(vec![false, true, false], select(&set, &[mask.clone()], EndpointRule::EitherEndpoint).unwrap());
    assert_eq!(vec![false, true, false], select(&set, &[mask], EndpointRule::AnyPoint).unwrap());
}


#[test]
fn pass_through_streamlines_only_match_any_point() {
    let set = common::parallel_bundle(&[2.0, 5.0], common::grid(common::N));
    let mut data = Array3::from_elem((common::N, common::N, common::N), false);
    data[[6, 2, 6]] = true;
    let mask = AnatomicalMask::new(data, Affine::identity());

    assert_eq!(vec![false, false], select(&set, &[mask.clone()], EndpointRule::EitherEndpoint).unwrap());
    assert_eq!(vec![true, false], select(&set, &[mask], EndpointRule::AnyPoint).unwrap());
}


#[test]
fn several_masks_act_as_their_union() {
    let set = common::parallel_bundle(&[2.0, 5.0, 8.0], common::grid(common::N));
    let masks: Vec<AnatomicalMask> = [2usize, 8]
        .iter()
        .map(|y| {
            let mut data = Array3::from_elem((common::N, common::N, common::N), false);
            data[[0, *y, 6]] = true;
            AnatomicalMask::new(data, Affine::identity())
        })
        .collect();
    assert_eq!(vec![true, false, true], select(&set, &masks, EndpointRule::EitherEndpoint).unwrap());
}


#[test]
fn masks_on_a_coarser_grid_are_resampled() {
    let set = common::parallel_bundle(&[2.0, 5.0], common::grid(common::N));
    // 2 mm voxels: voxel [0, 1, 3] covers the physical block around (0, 2, 6)
    let mut data = Array3::from_elem((6, 6, 6), false);
    data[[0, 1, 3]] = true;
    let mask = AnatomicalMask::new(data, Affine::scaled([2.0, 2.0, 2.0], [0.0, 0.0, 0.0]));

    assert_eq!(vec![true, false], select(&set, &[mask], EndpointRule::EitherEndpoint).unwrap());
}


#[test]
fn empty_masks_and_sets_select_nothing() {
    let grid = common::grid(common::N);
    let set = common::parallel_bundle(&[2.0, 5.0], grid);
    let empty = AnatomicalMask::empty(&grid);
    assert_eq!(vec![false, false], select(&set, &[empty.clone()], EndpointRule::AnyPoint).unwrap());
    assert!(select(&StreamlineSet::empty(grid), &[empty], EndpointRule::AnyPoint).unwrap().is_empty());
}


#[test]
fn targets_without_streamlines_give_empty_bundles() {
    let grid = common::grid(common::N);
    let mut parc = Array3::zeros((common::N, common::N, common::N));
    parc[[0, 5, 6]] = 1012.0;
    let parc = Volume::new(parc, Affine::identity());
    let set = common::parallel_bundle(&[2.0, 5.0], grid);
    let segmenter = Subsegmenter::new(&parc, ClusterCuller::default(), grid);

    let hit = Target { label: 1012, name: String::from("ctx-lh-lateralorbitofrontal"), hemisphere: Hemisphere::Left };
    let bundle = segmenter.segment(&set, &hit).unwrap();
    assert_eq!(1, bundle.streamlines.len());
    assert_eq!(12.0, bundle.density.sum());

    let miss = Target { label: 1002, name: String::from("ctx-lh-caudalanteriorcingulate"), hemisphere: Hemisphere::Left };
    let empty = segmenter.segment(&set, &miss).unwrap();
    assert!(empty.is_empty());
    assert_eq!(0, empty.selected);
    assert!(empty.density.is_all_zero());
}
