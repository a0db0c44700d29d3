//! Shared, row-addressed parameter storage.
//!
//! Every cell is an `f32` stored in an `AtomicU32` and accessed with
//! `Ordering::Relaxed`. Worker threads read and write the same matrix with no
//! locking at all (hogwild SGD). `Real::add` is a load followed by a store, not
//! an atomic read-modify-write, so two workers adding to the same cell at the
//! same moment can lose one of the deltas. Training tolerates that.
//!
//! For deterministic tests a matrix can carry a table of sharded row locks
//! (see [`Matrix::with_row_locks`]); every row operation then holds the lock
//! for its shard.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;
use parking_lot::{Mutex, MutexGuard};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Error, Result};
use crate::vector::Vector;

const ALIGNMENT: usize = 128;

#[derive(Default)]
#[repr(transparent)]
pub(crate) struct Real {
    bits: AtomicU32,
}

impl Real {
    pub(crate) fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn add(&self, x: f32) {
        let a = self.get();
        self.set(a + x);
    }
}

/// A dense `rows x cols` matrix of `f32`, shareable across threads.
pub struct Matrix {
    rows: usize,
    cols: usize,
    /// `data[i * cols..(i+1) * cols]` is row `i`.
    data: AlignedBox<[Real]>,
    locks: Option<Box<[Mutex<()>]>>,
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("row_lock_shards", &self.locks.as_ref().map(|l| l.len()))
            .finish()
    }
}

impl Matrix {
    /// A zero-filled matrix. Panics if either dimension is zero.
    pub fn new(rows: usize, cols: usize) -> Self {
        assert!(rows > 0 && cols > 0, "matrix dimensions must be non-zero");
        let data = AlignedBox::slice_from_default(ALIGNMENT, rows * cols)
            .expect("Memory allocation failed");
        Matrix {
            rows,
            cols,
            data,
            locks: None,
        }
    }

    /// A matrix with every entry drawn uniformly from `[-bound, bound)`.
    ///
    /// This is how input embeddings are initialized, with `bound = 1 / dim`.
    pub fn uniform(rows: usize, cols: usize, bound: f32, seed: u64) -> Self {
        let m = Matrix::new(rows, cols);
        if bound > 0.0 {
            let mut rng = StdRng::seed_from_u64(seed);
            let dist = Uniform::new(-bound, bound);
            for cell in m.data.iter() {
                cell.set(dist.sample(&mut rng));
            }
        }
        m
    }

    /// Build a matrix from row-major data. `data.len()` must be `rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidArgument(format!(
                "matrix dimensions must be non-zero, got {rows}x{cols}"
            )));
        }
        let len = rows.checked_mul(cols).ok_or_else(|| {
            Error::InvalidArgument(format!("matrix dimensions {rows}x{cols} overflow"))
        })?;
        if data.len() != len {
            return Err(Error::ShapeMismatch {
                what: "matrix data",
                got: data.len(),
                expected: len,
            });
        }
        let m = Matrix::new(rows, cols);
        for (cell, x) in m.data.iter().zip(data) {
            cell.set(x);
        }
        Ok(m)
    }

    /// Build a matrix from a list of equally long rows.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(Error::ShapeMismatch {
                    what: "matrix row",
                    got: row.len(),
                    expected: cols,
                });
            }
            data.extend_from_slice(row);
        }
        Matrix::from_vec(rows.len(), cols, data)
    }

    /// Attach `shards` row locks. Row `i` is guarded by lock `i % shards`.
    ///
    /// Off by default: the normal training path is lock-free.
    pub fn with_row_locks(mut self, shards: usize) -> Self {
        let shards = shards.max(1);
        self.locks = Some((0..shards).map(|_| Mutex::new(())).collect());
        self
    }

    pub fn is_locked(&self) -> bool {
        self.locks.is_some()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn check_row(&self, i: usize) {
        assert!(
            i < self.rows,
            "row index {i} out of range for matrix with {} rows",
            self.rows
        );
    }

    fn check_len(&self, len: usize) {
        assert_eq!(
            len, self.cols,
            "vector length {len} does not match matrix width {}",
            self.cols
        );
    }

    fn lock_row(&self, i: usize) -> Option<MutexGuard<'_, ()>> {
        self.locks.as_ref().map(|locks| locks[i % locks.len()].lock())
    }

    /// The cells of row `i`. Panics if `i` is out of range.
    pub(crate) fn row_cells(&self, i: usize) -> &[Real] {
        self.check_row(i);
        &self.data[i * self.cols..][..self.cols]
    }

    /// Entry `(i, j)`. Panics if out of range.
    pub fn get(&self, i: usize, j: usize) -> f32 {
        assert!(j < self.cols, "column index {j} out of range");
        let _guard = self.lock_row(i);
        self.row_cells(i)[j].get()
    }

    /// A copy of row `i`.
    pub fn row(&self, i: usize) -> Vec<f32> {
        let cells = self.row_cells(i);
        let _guard = self.lock_row(i);
        cells.iter().map(Real::get).collect()
    }

    /// A row-major copy of the whole matrix.
    pub fn to_vec(&self) -> Vec<f32> {
        (0..self.rows).flat_map(|i| self.row(i)).collect()
    }

    /// `dot(v, self[i])`.
    pub fn dot_row(&self, v: &Vector, i: usize) -> f32 {
        self.check_len(v.len());
        let cells = self.row_cells(i);
        let _guard = self.lock_row(i);
        v.iter().zip(cells).map(|(&x, c)| x * c.get()).sum()
    }

    /// `self[i] += a * v`.
    pub fn add_vector_to_row(&self, v: &Vector, i: usize, a: f32) {
        self.check_len(v.len());
        let cells = self.row_cells(i);
        let _guard = self.lock_row(i);
        for (c, &x) in cells.iter().zip(v.iter()) {
            c.add(a * x);
        }
    }

    /// `out += a * self[i]`. Used by [`Vector::add_row`].
    pub(crate) fn add_row_into<'v>(&self, out: impl Iterator<Item = &'v mut f32>, i: usize, a: f32) {
        let cells = self.row_cells(i);
        let _guard = self.lock_row(i);
        for (x, c) in out.zip(cells) {
            *x += a * c.get();
        }
    }

    /// Euclidean norm of row `i`.
    pub fn l2_norm_row(&self, i: usize) -> f32 {
        let cells = self.row_cells(i);
        let _guard = self.lock_row(i);
        cells.iter().map(|c| c.get().powi(2)).sum::<f32>().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_row_major() {
        let m = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).unwrap();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 2);
        assert_eq!(m.row(1), vec![3.0, 4.0]);
        assert_eq!(m.get(2, 0), 5.0);
        assert_eq!(m.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn dot_and_add() {
        let m = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let v = Vector::from_vec(vec![0.5, -1.0]);
        assert_eq!(m.dot_row(&v, 1), 1.5 - 4.0);
        m.add_vector_to_row(&v, 0, 2.0);
        assert_eq!(m.row(0), vec![2.0, 0.0]);
        assert_eq!(m.row(1), vec![3.0, 4.0]);
        assert_eq!(m.l2_norm_row(1), 5.0);
    }

    #[test]
    fn locked_matrix_behaves_the_same() {
        let m = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]])
            .unwrap()
            .with_row_locks(2);
        assert!(m.is_locked());
        let v = Vector::from_vec(vec![1.0, 1.0]);
        m.add_vector_to_row(&v, 2, -1.0);
        assert_eq!(m.row(2), vec![4.0, 5.0]);
        assert_eq!(m.dot_row(&v, 2), 9.0);
    }

    #[test]
    fn uniform_respects_bound() {
        let m = Matrix::uniform(20, 8, 0.125, 7);
        assert!(m.to_vec().iter().all(|x| x.abs() <= 0.125));
        assert!(m.to_vec().iter().any(|&x| x != 0.0));
        // Same seed, same matrix.
        assert_eq!(m.to_vec(), Matrix::uniform(20, 8, 0.125, 7).to_vec());
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(matches!(
            Matrix::from_vec(2, 2, vec![0.0; 3]),
            Err(Error::ShapeMismatch { got: 3, expected: 4, .. })
        ));
        assert!(Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
        assert!(matches!(
            Matrix::from_vec(1 << (usize::BITS - 1), 2, vec![]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    #[should_panic]
    fn row_out_of_range() {
        let m = Matrix::new(2, 3);
        m.row(2);
    }

    #[test]
    #[should_panic]
    fn length_mismatch() {
        let m = Matrix::new(2, 3);
        m.dot_row(&Vector::new(2), 0);
    }
}
