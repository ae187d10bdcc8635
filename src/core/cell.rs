use nalgebra::{Matrix3, Point3, Vector3};

use crate::engine::error::AnalysisError;

/// The periodic simulation box: three cell vectors (columns of a 3x3
/// matrix), per-axis periodicity flags, and an optional 2D mode.
///
/// The inverse matrix is precomputed on construction so that reduced
/// (fractional) coordinate conversions are a single matrix product.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationCell {
    matrix: Matrix3<f64>,
    inverse: Matrix3<f64>,
    pbc: [bool; 3],
    is_2d: bool,
}

impl SimulationCell {
    /// Builds a cell from its three basis vectors and periodicity flags.
    ///
    /// Fails with `InvalidCell` if the matrix is singular or contains
    /// non-finite entries.
    pub fn new(matrix: Matrix3<f64>, pbc: [bool; 3]) -> Result<Self, AnalysisError> {
        if matrix.iter().any(|c| !c.is_finite()) {
            return Err(AnalysisError::InvalidCell);
        }
        let inverse = matrix.try_inverse().ok_or(AnalysisError::InvalidCell)?;
        Ok(Self {
            matrix,
            inverse,
            pbc,
            is_2d: false,
        })
    }

    /// Convenience constructor for an orthogonal box with edge lengths `(a, b, c)`.
    pub fn orthorhombic(a: f64, b: f64, c: f64, pbc: [bool; 3]) -> Result<Self, AnalysisError> {
        Self::new(Matrix3::from_diagonal(&Vector3::new(a, b, c)), pbc)
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    pub fn inverse_matrix(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    pub fn pbc_flags(&self) -> [bool; 3] {
        self.pbc
    }

    pub fn has_pbc(&self, dim: usize) -> bool {
        self.pbc[dim]
    }

    pub fn is_2d(&self) -> bool {
        self.is_2d
    }

    /// Switches the cell into 2D mode. A 2D cell is never periodic along z.
    pub fn set_2d(&mut self, is_2d: bool) {
        self.is_2d = is_2d;
        if is_2d {
            self.pbc[2] = false;
        }
    }

    pub fn volume(&self) -> f64 {
        self.matrix.determinant().abs()
    }

    pub fn is_axis_aligned(&self) -> bool {
        let m = &self.matrix;
        m[(1, 0)] == 0.0
            && m[(2, 0)] == 0.0
            && m[(0, 1)] == 0.0
            && m[(2, 1)] == 0.0
            && m[(0, 2)] == 0.0
            && m[(1, 2)] == 0.0
    }

    pub fn reduced_to_absolute_point(&self, r: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.matrix * r.coords)
    }

    pub fn absolute_to_reduced_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.inverse * p.coords)
    }

    pub fn reduced_to_absolute(&self, r: &Vector3<f64>) -> Vector3<f64> {
        self.matrix * r
    }

    pub fn absolute_to_reduced(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.inverse * v
    }

    /// Row `dim` of the inverse matrix applied to `v`: the reduced
    /// coordinate of `v` along axis `dim`.
    #[inline]
    pub fn reduced_coord(&self, v: &Vector3<f64>, dim: usize) -> f64 {
        self.inverse.row(dim).transpose().dot(v)
    }

    /// Wraps a point into the primary cell along all periodic axes.
    pub fn wrap_point(&self, p: &Point3<f64>) -> Point3<f64> {
        let mut out = *p;
        for dim in 0..3 {
            if self.pbc[dim] {
                let s = self.reduced_coord(&p.coords, dim).floor();
                if s != 0.0 {
                    out.coords -= s * self.matrix.column(dim);
                }
            }
        }
        out
    }

    /// Minimum-image convention: wraps a displacement vector so each
    /// periodic reduced component lies in [-0.5, 0.5).
    pub fn wrap_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        let mut out = *v;
        for dim in 0..3 {
            if self.pbc[dim] {
                let s = (self.reduced_coord(v, dim) + 0.5).floor();
                if s != 0.0 {
                    out -= s * self.matrix.column(dim);
                }
            }
        }
        out
    }

    /// Unit normal of the cell face spanned by the two other axes,
    /// oriented along the positive `dim` direction.
    pub fn cell_normal_vector(&self, dim: usize) -> Vector3<f64> {
        let a = self.matrix.column((dim + 1) % 3).into_owned();
        let b = self.matrix.column((dim + 2) % 3).into_owned();
        let normal = a.cross(&b);
        if normal.dot(&self.matrix.column(dim)) < 0.0 {
            -normal.normalize()
        } else {
            normal.normalize()
        }
    }

    /// Whether `v` crosses a periodic boundary, i.e. its reduced magnitude
    /// reaches 1/2 along any periodic axis.
    pub fn is_wrapped_vector(&self, v: &Vector3<f64>) -> bool {
        (0..3).any(|dim| self.pbc[dim] && self.reduced_coord(v, dim).abs() >= 0.5)
    }

    pub const fn modulo_int(k: i64, n: i64) -> i64 {
        let k = k % n;
        if k < 0 {
            k + n
        } else {
            k
        }
    }

    pub fn modulo(k: f64, n: f64) -> f64 {
        let k = k % n;
        if k < 0.0 {
            k + n
        } else {
            k
        }
    }
}
