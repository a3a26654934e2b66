mod common;

use alic_pathways::clustering::mdf_distance;
use alic_pathways::{ClusterCuller, StreamlineSet};


/// Four tight bundles of `size` streamlines along x, 50 mm apart along y.
fn bundles(sizes: &[usize]) -> StreamlineSet {
    let mut streamlines = Vec::new();
    for (b, size) in sizes.iter().enumerate() {
        for i in 0..*size {
            let y = b as f64 * 50.0 + i as f64 * 0.5;
            streamlines.push(common::line([0.0, y, 0.0], [40.0, y, 0.0]));
        }
    }
    StreamlineSet::new(streamlines, common::grid(common::N))
}


#[test]
fn only_the_small_cluster_is_culled() {
    let set = bundles(&[4, 2, 5]);
    let (keep, report) = ClusterCuller::default().cull(&set).unwrap();

    let expected: Vec<bool> = (0..11).map(|i| !(4..6).contains(&i)).collect();
    assert_eq!(expected, keep);
    assert_eq!(11, report.input);
    assert_eq!(9, report.survivors);
    assert_eq!(3, report.clusters);
    assert_eq!(1, report.culled_clusters);
}


#[test]
fn single_and_empty_sets_survive_unchanged() {
    let culler = ClusterCuller::default();
    let (keep, report) = culler.cull(&bundles(&[])).unwrap();
    assert!(keep.is_empty());
    assert_eq!(0, report.survivors);

    let (keep, report) = culler.cull(&bundles(&[1])).unwrap();
    assert_eq!(vec![true], keep);
    assert_eq!(1, report.survivors);
    assert_eq!(0, report.culled_clusters);
}


#[test]
fn nested_thresholds_split_loose_bundles() {
    // two groups 15 mm apart merge at 30 mm and 20 mm but split at 10 mm
    let mut streamlines = Vec::new();
    for y in [0.0, 0.5, 1.0, 15.0, 15.5, 16.0] {
        streamlines.push(common::line([0.0, y, 0.0], [40.0, y, 0.0]));
    }
    let set = StreamlineSet::new(streamlines, common::grid(common::N));

    let coarse = ClusterCuller { thresholds: vec![30.0], ..ClusterCuller::default() };
    assert_eq!(1, coarse.nested_clusters(&set).unwrap().len());
    let clusters = ClusterCuller::default().nested_clusters(&set).unwrap();
    assert_eq!(2, clusters.len());
    assert!(clusters.iter().all(|c| c.len() == 3));
}


#[test]
fn flipped_streamlines_are_close_to_their_originals() {
    let a = common::line([0.0, 0.0, 0.0], [20.0, 0.0, 0.0]).resample(20);
    let b = common::line([20.0, 1.0, 0.0], [0.0, 1.0, 0.0]).resample(20);
    assert!((mdf_distance(&a, &b) - 1.0).abs() < 1e-9);
}
