use crate::dataset::{Dataset, LabeledPoint};

/// Row-major matrix of base-model predictions, one column per base model.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionMatrix {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
    filled: Vec<bool>,
}

impl PredictionMatrix {
    /// Zeroed `rows x cols` matrix.
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            values: vec![0.0; rows * cols],
            filled: vec![false; rows * cols],
        }
    }

    /// `(rows, cols)`.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Writes a cell. Out-of-range writes are ignored and reported as `false`.
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> bool {
        if row >= self.rows || col >= self.cols {
            return false;
        }
        let offset = row * self.cols + col;
        self.values[offset] = value;
        self.filled[offset] = true;
        true
    }

    /// Writes `values` down column `col` starting at `start_row`; returns the next free row.
    pub fn fill_column(&mut self, col: usize, start_row: usize, values: &[f64]) -> usize {
        for (offset, value) in values.iter().enumerate() {
            self.set(start_row + offset, col, *value);
        }
        start_row + values.len()
    }

    /// Number of cells written so far.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.filled.iter().filter(|cell| **cell).count()
    }

    /// Whether every cell has been written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.filled.iter().all(|cell| *cell)
    }

    /// One row of predictions.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.cols..(row + 1) * self.cols]
    }

    /// Pairs each row with its label to form the level-one dataset.
    #[must_use]
    pub fn into_dataset(self, labels: &[f64]) -> Dataset {
        Dataset::new(
            (0..self.rows)
                .zip(labels.iter())
                .map(|(row, label)| LabeledPoint::new(self.row(row).to_vec(), *label))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_columns_in_order() {
        let mut matrix = PredictionMatrix::new(3, 2);
        let next = matrix.fill_column(0, 0, &[1.0, 2.0]);
        assert_eq!(next, 2);
        matrix.fill_column(0, next, &[3.0]);
        assert!(!matrix.is_complete());
        matrix.fill_column(1, 0, &[4.0, 5.0, 6.0]);
        assert!(matrix.is_complete());
        assert_eq!(matrix.filled(), 6);
        assert_eq!(matrix.row(2), &[3.0, 6.0]);
        let level_one = matrix.into_dataset(&[0.0, 1.0, 0.0]);
        assert_eq!(level_one.points[1], LabeledPoint::new(vec![2.0, 5.0], 1.0));
    }

    #[test]
    fn rejects_out_of_range_writes() {
        let mut matrix = PredictionMatrix::new(1, 1);
        assert!(!matrix.set(1, 0, 1.0));
        assert!(!matrix.set(0, 1, 1.0));
        assert_eq!(matrix.filled(), 0);
    }
}
