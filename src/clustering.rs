//! Shape clustering of streamlines and cluster-based outlier culling.
//!
//! Clustering follows the QuickBundles scheme: streamlines are resampled to a fixed number of
//! points and assigned, in input order, to the nearest existing cluster centroid under the
//! minimum average direct-flip (MDF) distance, or start a new cluster if none is closer than the
//! threshold. The culler applies this at a sequence of decreasing thresholds, each stage splitting
//! the clusters of the previous stage, and drops streamlines in the final clusters that are too small.

use tracing::{debug, info};

use std::fmt;

use crate::affine::Point3;
use crate::error::{AlicError, Result};
use crate::streamline::{distance, StreamlineSet};


/// Mean point-wise distance between two equally resampled streamlines, and the same with `b` reversed.
fn direct_and_flipped(a: &[Point3], b: &[Point3]) -> (f64, f64) {
    let n = a.len().min(b.len());
    if n == 0 {
        return (0.0, 0.0);
    }
    let mut direct = 0.0;
    let mut flipped = 0.0;
    for i in 0..n {
        direct += distance(a[i], b[i]);
        flipped += distance(a[i], b[n - 1 - i]);
    }
    (direct / n as f64, flipped / n as f64)
}


/// Minimum average direct-flip distance between two equally resampled streamlines.
pub fn mdf_distance(a: &[Point3], b: &[Point3]) -> f64 {
    let (direct, flipped) = direct_and_flipped(a, b);
    direct.min(flipped)
}


/// A group of streamlines, identified by their indices, and their mean shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub indices: Vec<usize>,
    pub centroid: Vec<Point3>,
}


impl Cluster {

    fn new(index: usize, shape: &[Point3]) -> Cluster {
        Cluster { indices: vec![index], centroid: shape.to_vec() }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Add a member, aligning it with the centroid first, and update the running mean.
    fn add(&mut self, index: usize, shape: &[Point3], flip: bool) {
        let n = self.indices.len() as f64;
        let last = shape.len() - 1;
        for (i, c) in self.centroid.iter_mut().enumerate() {
            let p = if flip { shape[last - i] } else { shape[i] };
            for d in 0..3 {
                c[d] = (c[d] * n + p[d]) / (n + 1.0);
            }
        }
        self.indices.push(index);
    }
}


/// Single-threshold QuickBundles clustering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuickBundles {
    pub threshold: f64,
}


impl QuickBundles {

    pub fn new(threshold: f64) -> QuickBundles {
        QuickBundles { threshold }
    }

    /// Cluster the streamlines `members`, given as indices into `shapes`.
    ///
    /// All shapes must have the same number of points. The returned clusters hold indices into `shapes`.
    pub fn cluster(&self, shapes: &[Vec<Point3>], members: &[usize]) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = Vec::new();
        for &idx in members {
            let shape = &shapes[idx];
            let mut best: Option<(usize, f64, bool)> = None;
            for (c_idx, cluster) in clusters.iter().enumerate() {
                let (direct, flipped) = direct_and_flipped(&cluster.centroid, shape);
                let (dist, flip) = if flipped < direct { (flipped, true) } else { (direct, false) };
                if best.map_or(true, |(_, d, _)| dist < d) {
                    best = Some((c_idx, dist, flip));
                }
            }
            match best {
                Some((c_idx, dist, flip)) if dist <= self.threshold => clusters[c_idx].add(idx, shape, flip),
                _ => clusters.push(Cluster::new(idx, shape)),
            }
        }
        clusters
    }
}


/// Outcome of one culling run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CullReport {
    pub input: usize,
    pub survivors: usize,
    pub clusters: usize,
    pub culled_clusters: usize,
}


impl fmt::Display for CullReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} of {} streamlines survived ({} of {} clusters culled).", self.survivors, self.input, self.culled_clusters, self.clusters)
    }
}


/// Nested multi-threshold clustering followed by removal of small clusters.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCuller {
    /// Distance thresholds in mm, applied in the given order. Should be decreasing.
    pub thresholds: Vec<f64>,
    pub resample_points: usize,
    pub min_cluster_size: usize,
}


impl Default for ClusterCuller {
    fn default() -> ClusterCuller {
        ClusterCuller {
            thresholds: vec![30.0, 20.0, 10.0],
            resample_points: 100,
            min_cluster_size: 3,
        }
    }
}


impl ClusterCuller {

    fn check_resampling(&self) -> Result<()> {
        if self.resample_points < 2 {
            return Err(AlicError::InvalidConfig(format!("streamlines must be resampled to at least 2 points, not {}", self.resample_points)));
        }
        Ok(())
    }

    /// The final clusters after applying every threshold to the clusters of the previous one.
    pub fn nested_clusters(&self, streamlines: &StreamlineSet) -> Result<Vec<Cluster>> {
        self.check_resampling()?;
        let shapes: Vec<Vec<Point3>> = streamlines.iter().map(|s| s.resample(self.resample_points)).collect();
        let mut groups: Vec<Vec<usize>> = vec![(0..shapes.len()).collect()];
        let mut clusters = Vec::new();
        for &threshold in self.thresholds.iter() {
            let qb = QuickBundles::new(threshold);
            clusters = groups.iter().flat_map(|g| qb.cluster(&shapes, g)).collect();
            debug!(threshold, clusters = clusters.len(), "clustered streamlines");
            groups = clusters.iter().map(|c| c.indices.clone()).collect();
        }
        Ok(clusters)
    }

    /// Return one boolean per streamline, false for members of final clusters smaller than `min_cluster_size`.
    ///
    /// Sets with fewer than 2 streamlines are returned as all surviving without clustering.
    /// Fails with [`AlicError::InvalidConfig`] if fewer than 2 resample points are configured.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use alic_pathways::ClusterCuller;
    /// # fn demo(bundle: &alic_pathways::StreamlineSet) {
    /// let (keep, report) = ClusterCuller::default().cull(bundle).unwrap();
    /// let cleaned = bundle.subset(&keep);
    /// println!("{}", report);
    /// # }
    /// ```
    pub fn cull(&self, streamlines: &StreamlineSet) -> Result<(Vec<bool>, CullReport)> {
        self.check_resampling()?;
        let n = streamlines.len();
        if n < 2 || self.thresholds.is_empty() {
            let report = CullReport { input: n, survivors: n, clusters: n.min(1), culled_clusters: 0 };
            return Ok((vec![true; n], report));
        }

        let clusters = self.nested_clusters(streamlines)?;
        let mut keep = vec![false; n];
        let mut culled_clusters = 0;
        for cluster in clusters.iter() {
            if cluster.len() < self.min_cluster_size {
                culled_clusters += 1;
                continue;
            }
            for &idx in cluster.indices.iter() {
                keep[idx] = true;
            }
        }

        let report = CullReport {
            input: n,
            survivors: keep.iter().filter(|k| **k).count(),
            clusters: clusters.len(),
            culled_clusters,
        };
        info!("{}", report);
        Ok((keep, report))
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::affine::Affine;
    use crate::streamline::Streamline;
    use crate::volume::VoxelGrid;
    use approx::assert_abs_diff_eq;

    fn straight(x: f64, z: f64) -> Streamline {
        Streamline::new(vec![[x, 0., z], [x, 20., z], [x, 40., z]]).unwrap()
    }

    #[test]
    fn mdf_ignores_orientation() {
        let a = straight(0., 0.).resample(10);
        let b = straight(0., 0.).reversed().resample(10);
        assert_abs_diff_eq!(0.0, mdf_distance(&a, &b), epsilon = 1e-12);
    }

    #[test]
    fn flipped_members_do_not_collapse_the_centroid() {
        let shapes = vec![straight(0., 0.).resample(5), straight(2., 0.).reversed().resample(5)];
        let clusters = QuickBundles::new(5.0).cluster(&shapes, &[0, 1]);
        assert_eq!(1, clusters.len());
        assert_abs_diff_eq!(1.0, clusters[0].centroid[0][0], epsilon = 1e-12);
        assert_abs_diff_eq!(0.0, clusters[0].centroid[0][1], epsilon = 1e-12);
        assert_abs_diff_eq!(40.0, clusters[0].centroid[4][1], epsilon = 1e-12);
    }

    #[test]
    fn small_clusters_are_culled() {
        let grid = VoxelGrid::new(Affine::identity(), [1, 1, 1]);
        let mut streamlines: Vec<Streamline> = (0..4).map(|i| straight(i as f64 * 0.5, 0.)).collect();
        streamlines.push(straight(100., 100.));
        let set = StreamlineSet::new(streamlines, grid);

        let (keep, report) = ClusterCuller::default().cull(&set).unwrap();
        assert_eq!(vec![true, true, true, true, false], keep);
        assert_eq!(2, report.clusters);
        assert_eq!(1, report.culled_clusters);
    }

    #[test]
    fn tiny_sets_survive_untouched() {
        let grid = VoxelGrid::new(Affine::identity(), [1, 1, 1]);
        let culler = ClusterCuller::default();
        assert_eq!(Vec::<bool>::new(), culler.cull(&StreamlineSet::empty(grid)).unwrap().0);
        assert_eq!(vec![true], culler.cull(&StreamlineSet::new(vec![straight(0., 0.)], grid)).unwrap().0);
    }

    #[test]
    fn too_few_resample_points_are_rejected() {
        let grid = VoxelGrid::new(Affine::identity(), [1, 1, 1]);
        let set = StreamlineSet::new(vec![straight(0., 0.), straight(1., 0.), straight(2., 0.)], grid);
        for points in [0, 1] {
            let culler = ClusterCuller { resample_points: points, ..ClusterCuller::default() };
            assert!(matches!(culler.cull(&set), Err(AlicError::InvalidConfig(_))));
            assert!(matches!(culler.nested_clusters(&set), Err(AlicError::InvalidConfig(_))));
        }
        let two = ClusterCuller { resample_points: 2, ..ClusterCuller::default() };
        assert_eq!(vec![true; 3], two.cull(&set).unwrap().0);
    }
}
