use std::ops::Index;

use ndarray::prelude::*;

use crate::matrix::Matrix;

/// A fixed-length dense vector owned by one worker.
///
/// Used for the hidden, gradient and output buffers of a [`State`](crate::State).
/// The length never changes after construction; every operation works in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    data: Array1<f32>,
}

impl Vector {
    pub fn new(len: usize) -> Self {
        Vector {
            data: Array1::zeros(len),
        }
    }

    pub fn from_vec(data: Vec<f32>) -> Self {
        Vector {
            data: Array1::from_vec(data),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn view(&self) -> ArrayView1<'_, f32> {
        self.data.view()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f32> + '_ {
        self.data.iter()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.to_vec()
    }

    pub fn zero(&mut self) {
        self.data.fill(0.0);
    }

    /// `self *= a`
    pub fn scale(&mut self, a: f32) {
        self.data *= a;
    }

    /// `self += a * other`. Panics if the lengths differ.
    pub fn add_vector(&mut self, other: &Vector, a: f32) {
        assert_eq!(self.len(), other.len(), "vector length mismatch");
        self.data.scaled_add(a, &other.data);
    }

    /// `self += a * matrix[row]`. Panics if `row` is out of range or the
    /// matrix width differs from this vector's length.
    pub fn add_row(&mut self, matrix: &Matrix, row: usize, a: f32) {
        assert_eq!(self.len(), matrix.cols(), "vector length mismatch");
        matrix.add_row_into(self.data.iter_mut(), row, a);
    }

    pub fn norm(&self) -> f32 {
        self.data.dot(&self.data).sqrt()
    }

    pub(crate) fn set(&mut self, i: usize, value: f32) {
        self.data[i] = value;
    }
}

impl Index<usize> for Vector {
    type Output = f32;

    fn index(&self, i: usize) -> &f32 {
        &self.data[i]
    }
}
