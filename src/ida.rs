//! Information dispersal codec.
//!
//! A block of L numeric values is encoded into N fragments of L/M values
//! each, of which any M suffice to reconstruct the block. Encoding
//! multiplies the partitioned message by a Vandermonde matrix
//! `A[i][j] = (1 + i)^j`, whose rows are pairwise independent, so any M of
//! them form an invertible submatrix; decoding rebuilds that submatrix from
//! the fragment indices and inverts it with partial-pivot Gaussian
//! elimination.
//!
//! The arithmetic runs in `f64`. The inversion drifts fractionally, so
//! decoded values are rounded to the nearest integer; for blocks of up to
//! [`BLOCK_LENGTH`] values below 1000 the drift stays well inside the
//! rounding margin. Callers that cannot tolerate a silent degeneracy can
//! encode with the sanity check, which immediately decodes the first M
//! fragments and compares them against the input.

use std::fmt;

/// Fragments produced per block (N).
pub const FRAGMENT_COUNT: usize = 14;

/// Fragments required to reconstruct a block (M).
pub const DECODE_THRESHOLD: usize = 10;

/// Values per block (L). Shorter inputs are zero-padded up to this length.
pub const BLOCK_LENGTH: usize = 40;

/// Largest value the codec accepts; the inversion loses integer precision
/// beyond this.
pub const MAX_VALUE: f64 = 1000.0;

/// Failures raised by encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input longer than [`BLOCK_LENGTH`] bytes.
    EncodeOverflow { length: usize },
    /// Input contains a value at or above [`MAX_VALUE`].
    EncodeBadByte { value: u32 },
    /// Fewer than [`DECODE_THRESHOLD`] fragments were supplied.
    DecodeInsufficient { supplied: usize },
    /// The sanity check found that the encoded fragments do not decode back
    /// to the input.
    RoundTripMismatch,
    /// A serialized fragment or block could not be parsed.
    Malformed(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::EncodeOverflow { length } => {
                write!(f, "cannot encode, input too large ({length} > {BLOCK_LENGTH} bytes)")
            }
            CodecError::EncodeBadByte { value } => {
                write!(f, "cannot encode value {value}, must be below {MAX_VALUE}")
            }
            CodecError::DecodeInsufficient { supplied } => {
                write!(f, "{DECODE_THRESHOLD} or more fragments are required, got {supplied}")
            }
            CodecError::RoundTripMismatch => {
                write!(f, "encoded fragments failed to decode back to the input")
            }
            CodecError::Malformed(reason) => write!(f, "malformed fragment data: {reason}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// The (N, M, L) dispersal codec.
#[derive(Debug, Clone, Copy)]
pub struct Ida {
    fragments: usize,
    threshold: usize,
}

impl Default for Ida {
    fn default() -> Self {
        Ida {
            fragments: FRAGMENT_COUNT,
            threshold: DECODE_THRESHOLD,
        }
    }
}

impl Ida {
    /// Encode a message of L values into N rows of L/M values.
    ///
    /// Row `i` (0-based here, 1-indexed on the wire) is the dot product of
    /// Vandermonde row `(1 + i)^j` with each M-value partition of the
    /// message.
    pub fn encode(&self, message: &[f64]) -> Vec<Vec<f64>> {
        let n = self.fragments;
        let m = self.threshold;
        let width = message.len() / m;

        let mut vandermonde = vec![vec![0.0; m]; n];
        for (i, row) in vandermonde.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = ((1 + i) as f64).powi(j as i32);
            }
        }

        let mut encoded = vec![vec![0.0; width]; n];
        for i in 0..n {
            for j in 0..width {
                for k in 0..m {
                    encoded[i][j] += vandermonde[i][k] * message[j * m + k];
                }
            }
        }

        encoded
    }

    /// Recover the original message from at least M rows and their 1-based
    /// row indices. Rows beyond the first M are ignored; decoded values are
    /// rounded to the nearest integer.
    pub fn decode(&self, rows: &[Vec<f64>], indices: &[usize]) -> Result<Vec<f64>, CodecError> {
        let m = self.threshold;
        if rows.len() < m || indices.len() < m {
            return Err(CodecError::DecodeInsufficient {
                supplied: rows.len().min(indices.len()),
            });
        }

        let width = rows[0].len();
        let mut submatrix = vec![vec![0.0; m]; m];
        for i in 0..m {
            for (j, cell) in submatrix[i].iter_mut().enumerate() {
                *cell = (indices[i] as f64).powi(j as i32);
            }
        }

        let inverse = invert(submatrix);

        let mut message = vec![0.0; m * width];
        for (i, value) in message.iter_mut().enumerate() {
            for k in 0..m {
                *value += inverse[i % m][k] * rows[k][i / m];
            }
        }

        for value in message.iter_mut() {
            *value = value.round();
        }
        Ok(message)
    }
}

/// Invert a square matrix via partial-pivot Gaussian elimination followed by
/// forward and back substitution against the identity.
fn invert(mut matrix: Vec<Vec<f64>>) -> Vec<Vec<f64>> {
    let n = matrix.len();
    let mut inverse = vec![vec![0.0; n]; n];
    let mut identity = vec![vec![0.0; n]; n];
    for (i, row) in identity.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    let index = partial_pivot_gauss_elim(&mut matrix);

    for i in 0..n - 1 {
        for j in i + 1..n {
            for k in 0..n {
                identity[index[j]][k] -= matrix[index[j]][i] * identity[index[i]][k];
            }
        }
    }

    // Back-substitute column by column.
    for i in 0..n {
        inverse[n - 1][i] = identity[index[n - 1]][i] / matrix[index[n - 1]][n - 1];
        for j in (0..n - 1).rev() {
            inverse[j][i] = identity[index[j]][i];
            for k in j + 1..n {
                inverse[j][i] -= matrix[index[j]][k] * inverse[k][i];
            }
            inverse[j][i] /= matrix[index[j]][j];
        }
    }

    inverse
}

/// Eliminate in place, scaling pivot candidates by each row's largest
/// magnitude. Returns the row permutation chosen by pivoting.
fn partial_pivot_gauss_elim(matrix: &mut [Vec<f64>]) -> Vec<usize> {
    let n = matrix.len();
    let mut index: Vec<usize> = (0..n).collect();

    let mut scale = vec![0.0f64; n];
    for (i, row) in matrix.iter().enumerate() {
        scale[i] = row.iter().fold(0.0, |acc, v| acc.max(v.abs()));
    }

    for j in 0..n - 1 {
        let mut best = 0.0;
        let mut pivot = j;
        for i in j..n {
            let candidate = matrix[index[i]][j].abs() / scale[index[i]];
            if candidate > best {
                best = candidate;
                pivot = i;
            }
        }
        index.swap(j, pivot);

        for i in j + 1..n {
            let factor = matrix[index[i]][j] / matrix[index[j]][j];
            matrix[index[i]][j] = factor;
            for l in j + 1..n {
                let subtrahend = factor * matrix[index[j]][l];
                matrix[index[i]][l] -= subtrahend;
            }
        }
    }

    index
}
