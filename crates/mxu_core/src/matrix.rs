//! Dense row-major `f32` matrix exchanged with the accelerator.

use crate::{OffloadError, Result};

/// A rectangular row-major matrix with at least one row and one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    values: Vec<f32>,
}

impl Matrix {
    /// Wraps `values` as a `rows x cols` matrix.
    ///
    /// Fails with [`OffloadError::InvalidMatrix`] if either dimension is zero
    /// or the value count is not `rows * cols`.
    pub fn new(rows: usize, cols: usize, values: Vec<f32>) -> Result<Self> {
        if rows == 0 || cols == 0 || rows.checked_mul(cols) != Some(values.len()) {
            return Err(OffloadError::InvalidMatrix {
                rows,
                cols,
                len: values.len(),
            });
        }
        Ok(Self { rows, cols, values })
    }

    /// Builds a matrix from nested rows. All rows must have the same length.
    pub fn from_rows(rows: &[&[f32]]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.len());
        let mut values = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(OffloadError::InvalidMatrix {
                    rows: rows.len(),
                    cols,
                    len: values.len() + row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Self::new(rows.len(), cols, values)
    }

    /// All-zero `rows x cols` matrix.
    ///
    /// Fails with [`OffloadError::InvalidMatrix`] for a zero dimension or a
    /// shape whose element count overflows `usize`.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = rows
            .checked_mul(cols)
            .ok_or(OffloadError::InvalidMatrix { rows, cols, len: 0 })?;
        Self::new(rows, cols, vec![0.0; len])
    }

    /// Number of rows.
    #[inline(always)]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline(always)]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    #[inline(always)]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row-major element slice.
    #[inline(always)]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Consumes the matrix, returning its row-major values.
    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Element at `(row, col)`. Panics when out of bounds, like slice
    /// indexing.
    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.cols + col]
    }

    /// Row `row` as a slice of `cols` values.
    pub fn row(&self, row: usize) -> &[f32] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    /// True when `self * rhs` is defined.
    pub fn is_compatible(&self, rhs: &Matrix) -> bool {
        self.cols == rhs.rows
    }

    /// Software product used to validate accelerator output.
    ///
    /// Accumulates in `f32` in the same i-k-j order the simulated
    /// accelerator uses.
    pub fn matmul_reference(&self, rhs: &Matrix) -> Result<Matrix> {
        if !self.is_compatible(rhs) {
            return Err(OffloadError::ShapeMismatch {
                a: self.shape(),
                b: rhs.shape(),
            });
        }
        let mut out = vec![0.0f32; self.rows * rhs.cols];
        for i in 0..self.rows {
            let out_row = &mut out[i * rhs.cols..(i + 1) * rhs.cols];
            for k in 0..self.cols {
                let a = self.values[i * self.cols + k];
                for (o, &b) in out_row.iter_mut().zip(rhs.row(k)) {
                    *o += a * b;
                }
            }
        }
        Matrix::new(self.rows, rhs.cols, out)
    }

    /// Largest absolute element difference, or `None` if shapes differ.
    pub fn max_abs_diff(&self, other: &Matrix) -> Option<f32> {
        if self.shape() != other.shape() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max),
        )
    }

    /// Shape-equal and every element within `tolerance`.
    pub fn approx_eq(&self, other: &Matrix, tolerance: f32) -> bool {
        self.max_abs_diff(other).is_some_and(|d| d <= tolerance)
    }
}
