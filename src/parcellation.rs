//! Parcellation clean-up before streamline selection.
//!
//! Cortical labels in a parcellation usually stop at the grey/white matter boundary, so streamline
//! endpoints just below the cortex would not touch them. Growing the labels into unlabelled voxels
//! (after removing white matter labels and stray islands) makes endpoint-based selection work.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::info;

use std::collections::{HashMap, VecDeque};

use crate::error::Result;
use crate::volume::Volume;


/// Turns a label volume into another label volume on the same grid.
pub trait ParcellationPreprocessor {
    fn name(&self) -> &str;

    fn process(&self, parcellation: &Volume) -> Result<Volume>;
}


const OFFSETS: [[isize; 3]; 6] = [[-1, 0, 0], [1, 0, 0], [0, -1, 0], [0, 1, 0], [0, 0, -1], [0, 0, 1]];


/// The face neighbours of a voxel that lie inside the grid.
fn neighbours(idx: [usize; 3], shape: [usize; 3]) -> impl Iterator<Item = [usize; 3]> {
    OFFSETS.iter().filter_map(move |o| {
        let mut n = [0usize; 3];
        for d in 0..3 {
            let v = idx[d] as isize + o[d];
            if v < 0 || v >= shape[d] as isize {
                return None;
            }
            n[d] = v as usize;
        }
        Some(n)
    })
}


/// Built-in label inflation: erode, de-island, then grow labels into background.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelInflation {
    /// Rounds of growing. Each round fills background voxels touching a label.
    pub iterations: usize,
    /// Keep only the largest 6-connected component of every label.
    pub deisland: bool,
    /// Labels set to background before anything else, e.g. cerebral white matter.
    pub erode_labels: Vec<i32>,
}


impl Default for LabelInflation {
    fn default() -> LabelInflation {
        LabelInflation {
            iterations: 2,
            deisland: true,
            erode_labels: vec![2, 41],
        }
    }
}


impl LabelInflation {

    /// Remove all but the largest 6-connected component of each label. Returns the number of voxels cleared.
    pub fn remove_islands(labels: &mut Array3<i32>) -> usize {
        let dim = labels.dim();
        let shape = [dim.0, dim.1, dim.2];
        let mut component: Array3<usize> = Array3::zeros(dim);
        let mut largest: HashMap<i32, (usize, usize)> = HashMap::new();
        let mut next_id = 1;
        let mut queue = VecDeque::new();

        for i in 0..shape[0] {
            for j in 0..shape[1] {
                for k in 0..shape[2] {
                    let label = labels[[i, j, k]];
                    if label == 0 || component[[i, j, k]] != 0 {
                        continue;
                    }
                    let id = next_id;
                    next_id += 1;
                    let mut size = 0;
                    component[[i, j, k]] = id;
                    queue.push_back([i, j, k]);
                    while let Some(idx) = queue.pop_front() {
                        size += 1;
                        for n in neighbours(idx, shape) {
                            if labels[n] == label && component[n] == 0 {
                                component[n] = id;
                                queue.push_back(n);
                            }
                        }
                    }
                    let best = largest.entry(label).or_insert((id, size));
                    if size > best.1 {
                        *best = (id, size);
                    }
                }
            }
        }

        let mut cleared = 0;
        for (label, comp) in labels.iter_mut().zip(component.iter()) {
            if *label != 0 && largest.get(&*label).map_or(false, |(id, _)| id != comp) {
                *label = 0;
                cleared += 1;
            }
        }
        cleared
    }

    /// One round of growing. Every background voxel with labelled face neighbours takes the most
    /// frequent neighbour label, ties going to the smaller label. Returns the number of voxels filled.
    pub fn grow(labels: &mut Array3<i32>) -> usize {
        let dim = labels.dim();
        let shape = [dim.0, dim.1, dim.2];
        let before = labels.clone();
        let mut filled = 0;

        for ((i, j, k), value) in labels.indexed_iter_mut() {
            if *value != 0 {
                continue;
            }
            let mut counts: Vec<(i32, usize)> = Vec::with_capacity(6);
            for n in neighbours([i, j, k], shape) {
                let l = before[n];
                if l == 0 {
                    continue;
                }
                match counts.iter_mut().find(|(label, _)| *label == l) {
                    Some(entry) => entry.1 += 1,
                    None => counts.push((l, 1)),
                }
            }
            let winner = counts.iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(label, _)| *label);
            if let Some(label) = winner {
                *value = label;
                filled += 1;
            }
        }
        filled
    }
}


impl ParcellationPreprocessor for LabelInflation {

    fn name(&self) -> &str {
        "label inflation"
    }

    fn process(&self, parcellation: &Volume) -> Result<Volume> {
        let mut labels = parcellation.data.mapv(|v| v.round() as i32);
        let erode = &self.erode_labels;
        labels.mapv_inplace(|l| if erode.contains(&l) { 0 } else { l });

        if self.deisland {
            let cleared = LabelInflation::remove_islands(&mut labels);
            info!(voxels = cleared, "removed label islands");
        }
        for iteration in 0..self.iterations {
            let filled = LabelInflation::grow(&mut labels);
            info!(iteration, voxels = filled, "inflated labels");
        }

        Ok(Volume { data: labels.mapv(|l| l as f64), grid: parcellation.grid })
    }
}
