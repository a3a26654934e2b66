use crate::affine::Affine;
use crate::volume::VoxelGrid;

/// Anything that lives on a voxel grid with a voxel-to-physical affine.
pub trait VoxelSpace {
    fn grid(&self) -> &VoxelGrid;

    fn affine(&self) -> &Affine {
        &self.grid().affine
    }

    fn shape(&self) -> [usize; 3] {
        self.grid().shape
    }
}
