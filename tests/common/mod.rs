//! Shared helpers for the integration tests: synthetic grids, bundles and subject directories.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array3;

use alic_pathways::config::PipelineConfig;
use alic_pathways::transform::{Direction, FieldConvention};
use alic_pathways::config::{TransformFile, TransformKind};
use alic_pathways::{Affine, AnatomicalMask, NiftiDataType, Point3, Streamline, StreamlineSet, Volume, VoxelGrid};

/// Edge length of the synthetic subject images.
pub const N: usize = 12;

pub const LOOKUP_CSV: &str = "#No.,LabelName:,R,G,B,A\n\
0,Unknown,0,0,0,0\n\
2,Left-Cerebral-White-Matter,245,245,245,0\n\
1002,ctx-lh-caudalanteriorcingulate,125,100,160,0\n\
1012,ctx-lh-lateralorbitofrontal,35,75,50,0\n\
2002,ctx-rh-caudalanteriorcingulate,125,100,160,0\n";


pub fn grid(n: usize) -> VoxelGrid {
    VoxelGrid::new(Affine::identity(), [n, n, n])
}


/// A straight streamline with one point per mm from `from` to `to`.
pub fn line(from: Point3, to: Point3) -> Streamline {
    let length = ((to[0] - from[0]).powi(2) + (to[1] - from[1]).powi(2) + (to[2] - from[2]).powi(2)).sqrt();
    let steps = length.ceil().max(1.0) as usize;
    let points = (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            [from[0] + t * (to[0] - from[0]), from[1] + t * (to[1] - from[1]), from[2] + t * (to[2] - from[2])]
        })
        .collect();
    Streamline::new(points).unwrap()
}


/// Parallel streamlines along x at z = 6, one per given y. The second one runs backwards.
pub fn parallel_bundle(ys: &[f64], grid: VoxelGrid) -> StreamlineSet {
    let streamlines = ys.iter()
        .enumerate()
        .map(|(i, y)| match i {
            1 => line([11.0, *y, 6.0], [0.0, *y, 6.0]),
            _ => line([0.0, *y, 6.0], [11.0, *y, 6.0]),
        })
        .collect();
    StreamlineSet::new(streamlines, grid)
}


pub fn write_mask(path: &Path, data: Array3<bool>) {
    AnatomicalMask::new(data, Affine::identity()).to_volume().to_file(path, NiftiDataType::Int32).unwrap();
}


/// Populate `dir` with the inputs of one synthetic left-hemisphere subject and return a matching configuration.
///
/// The parcellation holds label 1002 in the slab x < 2, the tractogram four parallel streamlines
/// along x at y = 4..7, and the ALIC mask the block x in 3..9, z in 4..9. A translation by +1 mm
/// along x maps native to standard space. The response tract covers the plane y = 5.
pub fn synthetic_subject(study_dir: &Path, subject_dir: &Path) -> PipelineConfig {
    let indata = subject_dir.join("indata");
    let rois = subject_dir.join("app-track_aLIC/output/ROIS");
    fs::create_dir_all(&indata).unwrap();
    fs::create_dir_all(&rois).unwrap();

    let mut parc = Array3::zeros((N, N, N));
    parc.slice_mut(ndarray::s![0..2, .., ..]).fill(1002.0);
    Volume::new(parc, Affine::identity()).to_file(indata.join("aparc+aseg.nii.gz"), NiftiDataType::Int32).unwrap();
    Volume::new(Array3::from_elem((N, N, N), 100.0), Affine::identity())
        .to_file(indata.join("T1w_acpc.nii.gz"), NiftiDataType::Float32).unwrap();

    parallel_bundle(&[4.0, 5.0, 6.0, 7.0], grid(N))
        .to_tck(subject_dir.join("app-track_aLIC/output/combined_aLIC_left.tck")).unwrap();

    let mut alic = Array3::from_elem((N, N, N), false);
    alic.slice_mut(ndarray::s![3..9, .., 4..9]).fill(true);
    write_mask(&rois.join("fullCutIC_ROI11_left.nii.gz"), alic);
    write_mask(&rois.join("fullCutIC_ROI11_right.nii.gz"), Array3::from_elem((N, N, N), false));

    fs::write(indata.join("acpc2mni.txt"), "1 0 0 1\n0 1 0 0\n0 0 1 0\n0 0 0 1\n").unwrap();

    let lookup = study_dir.join("FreesurferLookup.csv");
    fs::write(&lookup, LOOKUP_CSV).unwrap();
    let mut tract = Array3::zeros((N, N, N));
    tract.slice_mut(ndarray::s![.., 5, ..]).fill(1.0);
    let response = study_dir.join("response_tract.nii.gz");
    Volume::new(tract, Affine::identity()).to_file(&response, NiftiDataType::Float32).unwrap();

    let mut config = PipelineConfig::default();
    config.study.lookup_table = lookup;
    config.study.response_tract = Some(response);
    config.targets.left = vec![1002];
    config.targets.right = Vec::new();
    config.layout.tracks.right = Vec::new();
    config.cohort.displayed_slices_mm = vec![5.0];
    config.cohort.average_range_mm = [4, 8];
    config.transforms = vec![TransformFile {
        path: PathBuf::from("indata/acpc2mni.txt"),
        direction: Direction::NativeToStandard,
        kind: TransformKind::Affine,
        convention: FieldConvention::Absolute,
    }];
    config
}
