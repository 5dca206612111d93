//! Compressed-row sparsity pattern of the symmetric system matrix.
//!
//! The pattern is the upper-triangular view, zero-based. Position `p` of the
//! column-index array is also position `p` of every value array the caller
//! writes afterwards, so the pattern is immutable once built.

use crate::error::{EngineError, EngineResult};
use crate::scalar::DeviceIndex;

/// Validated CSR pattern (row pointers + column indices).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    rows: usize,
    row_ptr: Vec<usize>,
    col_ind: Vec<usize>,
}

impl SparsityPattern {
    /// Build a pattern from zero-based CSR arrays.
    ///
    /// Checks that `row_ptr` has `rows + 1` non-decreasing entries starting at
    /// zero and ending at `nnz`, and that every column index is in range.
    /// Column order within a row is not required to be sorted.
    pub fn new(
        rows: usize,
        nnz: usize,
        row_ptr: &[usize],
        col_ind: &[usize],
    ) -> EngineResult<Self> {
        if rows == 0 {
            return Err(EngineError::InvalidPattern(
                "matrix must have at least one row".to_string(),
            ));
        }
        if row_ptr.len() != rows + 1 {
            return Err(EngineError::InvalidPattern(format!(
                "row pointer length {} != rows + 1 = {}",
                row_ptr.len(),
                rows + 1
            )));
        }
        if col_ind.len() != nnz {
            return Err(EngineError::InvalidPattern(format!(
                "column index length {} != nonzero count {}",
                col_ind.len(),
                nnz
            )));
        }
        if row_ptr[0] != 0 {
            return Err(EngineError::InvalidPattern(format!(
                "first row pointer must be 0, got {}",
                row_ptr[0]
            )));
        }
        if let Some(row) = row_ptr.windows(2).position(|w| w[1] < w[0]) {
            return Err(EngineError::InvalidPattern(format!(
                "row pointers decrease at row {}",
                row
            )));
        }
        if row_ptr[rows] != nnz {
            return Err(EngineError::InvalidPattern(format!(
                "last row pointer {} != nonzero count {}",
                row_ptr[rows], nnz
            )));
        }
        if let Some(p) = col_ind.iter().position(|&c| c >= rows) {
            return Err(EngineError::InvalidPattern(format!(
                "column index {} at position {} out of range for {} rows",
                col_ind[p], p, rows
            )));
        }
        // Device arrays are 32-bit.
        if nnz > DeviceIndex::MAX as usize {
            return Err(EngineError::InvalidPattern(format!(
                "nonzero count {} exceeds 32-bit index range",
                nnz
            )));
        }

        Ok(Self {
            rows,
            row_ptr: row_ptr.to_vec(),
            col_ind: col_ind.to_vec(),
        })
    }

    /// Build a pattern from the framework's 32-bit index arrays.
    pub fn from_i32(dim: i32, nonzeros: i32, ia: &[i32], ja: &[i32]) -> EngineResult<Self> {
        let rows = to_index(dim, "dimension")?;
        let nnz = to_index(nonzeros, "nonzero count")?;
        let row_ptr = ia
            .iter()
            .map(|&v| to_index(v, "row pointer"))
            .collect::<EngineResult<Vec<_>>>()?;
        let col_ind = ja
            .iter()
            .map(|&v| to_index(v, "column index"))
            .collect::<EngineResult<Vec<_>>>()?;
        Self::new(rows, nnz, &row_ptr, &col_ind)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn nnz(&self) -> usize {
        self.col_ind.len()
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_ind(&self) -> &[usize] {
        &self.col_ind
    }

    /// Iterate `(row, col, position)` over every declared entry.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (0..self.rows).flat_map(move |row| {
            (self.row_ptr[row]..self.row_ptr[row + 1]).map(move |p| (row, self.col_ind[p], p))
        })
    }

    /// Number of declared entries below the diagonal. An upper-view solver
    /// ignores these.
    pub fn lower_entries(&self) -> usize {
        self.entries().filter(|&(row, col, _)| col < row).count()
    }

    /// Row pointers converted for upload.
    pub fn device_row_ptr(&self) -> Vec<DeviceIndex> {
        // Bounded by nnz, checked at construction.
        self.row_ptr.iter().map(|&v| v as DeviceIndex).collect()
    }

    /// Column indices converted for upload.
    pub fn device_col_ind(&self) -> Vec<DeviceIndex> {
        self.col_ind.iter().map(|&v| v as DeviceIndex).collect()
    }
}

fn to_index(value: i32, what: &str) -> EngineResult<usize> {
    usize::try_from(value)
        .map_err(|_| EngineError::InvalidPattern(format!("negative {}: {}", what, value)))
}
