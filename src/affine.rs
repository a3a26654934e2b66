//! Homogeneous 4x4 affine transforms between voxel indices and physical (scanner) coordinates.

use approx::abs_diff_eq;

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{AlicError, Result};

/// A point in 3D, in millimeters or in (possibly fractional) voxel indices depending on context.
pub type Point3 = [f64; 3];


/// A 4x4 affine matrix, stored row-major. The last row is always `[0, 0, 0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub m: [[f64; 4]; 4],
}


impl Default for Affine {
    fn default() -> Affine {
        Affine::identity()
    }
}


impl Affine {

    pub fn identity() -> Affine {
        Affine {
            m: [
                [1., 0., 0., 0.],
                [0., 1., 0., 0.],
                [0., 0., 1., 0.],
                [0., 0., 0., 1.],
            ],
        }
    }

    /// Build an affine from its first three rows.
    pub fn from_rows(rows: [[f64; 4]; 3]) -> Affine {
        Affine {
            m: [rows[0], rows[1], rows[2], [0., 0., 0., 1.]],
        }
    }

    /// Diagonal scaling plus translation, the usual shape of a voxel-to-physical mapping.
    pub fn scaled(zooms: [f64; 3], offset: Point3) -> Affine {
        Affine::from_rows([
            [zooms[0], 0., 0., offset[0]],
            [0., zooms[1], 0., offset[1]],
            [0., 0., zooms[2], offset[2]],
        ])
    }

    /// Map a point through the affine.
    pub fn apply(&self, p: Point3) -> Point3 {
        let m = &self.m;
        [
            m[0][0] * p[0] + m[0][1] * p[1] + m[0][2] * p[2] + m[0][3],
            m[1][0] * p[0] + m[1][1] * p[1] + m[1][2] * p[2] + m[1][3],
            m[2][0] * p[0] + m[2][1] * p[1] + m[2][2] * p[2] + m[2][3],
        ]
    }

    /// The affine applying `other` first, then `self`.
    pub fn compose(&self, other: &Affine) -> Affine {
        let mut out = [[0.0; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = (0..4).map(|k| self.m[r][k] * other.m[k][c]).sum();
            }
        }
        Affine { m: out }
    }

    /// Invert the affine. Fails if the linear 3x3 part is singular.
    pub fn inverse(&self) -> Result<Affine> {
        let a = &self.m;
        let cof = |r0: usize, r1: usize, c0: usize, c1: usize| a[r0][c0] * a[r1][c1] - a[r0][c1] * a[r1][c0];

        let det = a[0][0] * cof(1, 2, 1, 2) - a[0][1] * cof(1, 2, 0, 2) + a[0][2] * cof(1, 2, 0, 1);
        if det.abs() < 1e-12 || !det.is_finite() {
            return Err(AlicError::SingularAffine);
        }

        let inv3 = [
            [cof(1, 2, 1, 2) / det, -cof(0, 2, 1, 2) / det, cof(0, 1, 1, 2) / det],
            [-cof(1, 2, 0, 2) / det, cof(0, 2, 0, 2) / det, -cof(0, 1, 0, 2) / det],
            [cof(1, 2, 0, 1) / det, -cof(0, 2, 0, 1) / det, cof(0, 1, 0, 1) / det],
        ];

        let mut rows = [[0.0; 4]; 3];
        for r in 0..3 {
            rows[r][..3].copy_from_slice(&inv3[r]);
            rows[r][3] = -(0..3).map(|k| inv3[r][k] * a[k][3]).sum::<f64>();
        }
        Ok(Affine::from_rows(rows))
    }

    /// Element-wise comparison with an absolute tolerance.
    pub fn approx_eq(&self, other: &Affine, epsilon: f64) -> bool {
        self.m.iter().flatten()
            .zip(other.m.iter().flatten())
            .all(|(a, b)| abs_diff_eq!(*a, *b, epsilon = epsilon))
    }

    /// Read an affine from a text file with 3 or 4 rows of 4 whitespace separated numbers.
    ///
    /// Lines starting with `#` and empty lines are ignored. This covers FSL `.mat` and MRtrix `.txt` linear transforms.
    pub fn from_text_file<P: AsRef<Path>>(path: P) -> Result<Affine> {
        let text = fs::read_to_string(path)?;
        Affine::from_text(&text)
    }

    pub fn from_text(text: &str) -> Result<Affine> {
        let mut rows: Vec<[f64; 4]> = Vec::with_capacity(4);
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')) {
            let values = line.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<f64>().map_err(|_| AlicError::InvalidAffine(format!("cannot parse '{}'", s))))
                .collect::<Result<Vec<f64>>>()?;
            if values.len() != 4 {
                return Err(AlicError::InvalidAffine(format!("expected 4 values per row, got {}", values.len())));
            }
            rows.push([values[0], values[1], values[2], values[3]]);
        }

        match rows.len() {
            3 | 4 => {
                let bottom = [0., 0., 0., 1.];
                if rows.len() == 4 && !rows[3].iter().zip(bottom.iter()).all(|(a, b)| abs_diff_eq!(*a, *b, epsilon = 1e-9)) {
                    return Err(AlicError::InvalidAffine(String::from("last row must be 0 0 0 1")));
                }
                Ok(Affine::from_rows([rows[0], rows[1], rows[2]]))
            }
            n => Err(AlicError::InvalidAffine(format!("expected 3 or 4 rows, got {}", n))),
        }
    }

    /// Voxel sizes along the three voxel axes, the column norms of the linear part.
    pub fn zooms(&self) -> [f64; 3] {
        let mut z = [0.0; 3];
        for (c, zoom) in z.iter_mut().enumerate() {
            *zoom = (0..3).map(|r| self.m[r][c].powi(2)).sum::<f64>().sqrt();
        }
        z
    }
}


impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for row in self.m.iter() {
            writeln!(f, "{} {} {} {}", row[0], row[1], row[2], row[3])?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn the_inverse_undoes_the_affine() {
        let aff = Affine::from_rows([
            [-1.25, 0.1, 0., 90.],
            [0., 1.25, 0.2, -126.],
            [0.05, 0., 1.25, -72.],
        ]);
        let inv = aff.inverse().unwrap();
        let p = [12.5, -3.0, 40.25];
        let back = inv.apply(aff.apply(p));
        for d in 0..3 {
            assert_abs_diff_eq!(p[d], back[d], epsilon = 1e-9);
        }
        assert!(aff.compose(&inv).approx_eq(&Affine::identity(), 1e-9));
    }

    #[test]
    fn a_singular_affine_cannot_be_inverted() {
        let aff = Affine::scaled([1., 0., 1.], [0., 0., 0.]);
        assert!(matches!(aff.inverse(), Err(AlicError::SingularAffine)));
    }

    #[test]
    fn affine_text_is_parsed() {
        let text = "# mrtrix linear\n1 0 0 10\n0 1 0 -5\n0 0 1 2.5\n0 0 0 1\n";
        let aff = Affine::from_text(text).unwrap();
        assert_eq!([11.0, -4.0, 3.5], aff.apply([1., 1., 1.]));

        assert!(Affine::from_text("1 0 0\n").is_err());
    }
}
