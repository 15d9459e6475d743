use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::Dataset,
    errors::{DatasetError, FrameError},
};

/// How a column's cells are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Raw numbers.
    Numeric,
    /// Cells hold indices into `levels`, the sorted distinct original values.
    Categorical {
        /// Original values, ascending.
        levels: Vec<f64>,
    },
}

/// Named column of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    name: String,
    kind: ColumnKind,
    values: Vec<f64>,
}

impl Column {
    /// Column name (`C1`, `C2`, ...).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interpretation of the cells.
    #[must_use]
    pub const fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    /// Raw cells (level indices for categorical columns).
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Levels of a categorical column.
    #[must_use]
    pub fn levels(&self) -> Option<&[f64]> {
        match &self.kind {
            ColumnKind::Categorical { levels } => Some(levels),
            ColumnKind::Numeric => None,
        }
    }
}

/// Columnar table used by the deep learning classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    columns: Vec<Column>,
    rows: usize,
}

impl Frame {
    /// Lays out features as `C1..Cn` and the label as the last column `C{n+1}`.
    pub fn from_dataset(data: &Dataset) -> Result<Self, DatasetError> {
        let width = data.validate()?;
        let mut columns: Vec<Column> = (0..=width)
            .map(|idx| Column {
                name: format!("C{}", idx + 1),
                kind: ColumnKind::Numeric,
                values: Vec::with_capacity(data.len()),
            })
            .collect();
        for point in &data.points {
            for (column, value) in columns.iter_mut().zip(point.features.iter()) {
                column.values.push(*value);
            }
            columns[width].values.push(point.label);
        }
        Ok(Self {
            columns,
            rows: data.len(),
        })
    }

    /// Row count.
    #[must_use]
    pub const fn num_rows(&self) -> usize {
        self.rows
    }

    /// Column count.
    #[must_use]
    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }

    /// Column names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    /// Index of the column named `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Column at `index`.
    pub fn column(&self, index: usize) -> Result<&Column, FrameError> {
        self.columns.get(index).ok_or(FrameError::ColumnOutOfRange {
            index,
            columns: self.columns.len(),
        })
    }

    /// Cells of row `row` across every column.
    #[must_use]
    pub fn row(&self, row: usize) -> Vec<f64> {
        self.columns.iter().map(|column| column.values[row]).collect()
    }

    /// Cells of row `row` restricted to `columns`.
    #[must_use]
    pub fn row_of(&self, row: usize, columns: &[usize]) -> Vec<f64> {
        columns
            .iter()
            .map(|&column| self.columns[column].values[row])
            .collect()
    }

    /// Copies every column except `index`.
    pub fn without_column(&self, index: usize) -> Result<Self, FrameError> {
        self.column(index)?;
        let columns = self
            .columns
            .iter()
            .enumerate()
            .filter(|(position, _)| *position != index)
            .map(|(_, column)| column.clone())
            .collect();
        Ok(Self {
            columns,
            rows: self.rows,
        })
    }

    /// Permutes rows within consecutive chunks of `chunk_rows`, so rows never
    /// leave their chunk.
    #[must_use]
    pub fn shuffle_per_chunk(&self, seed: u64, chunk_rows: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..self.rows).collect();
        for chunk in order.chunks_mut(chunk_rows.max(1)) {
            chunk.shuffle(&mut rng);
        }
        self.take_rows(&order)
    }

    fn take_rows(&self, order: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|column| Column {
                    name: column.name.clone(),
                    kind: column.kind.clone(),
                    values: order.iter().map(|&row| column.values[row]).collect(),
                })
                .collect(),
            rows: order.len(),
        }
    }

    /// Splits rows: the first `round(ratio * rows)` go left, the rest right.
    pub fn split(&self, ratio: f64) -> Result<(Self, Self), FrameError> {
        if ratio.is_nan() || ratio <= 0.0 || ratio > 1.0 {
            return Err(FrameError::InvalidRatio(ratio));
        }
        let cut = ((ratio * self.rows as f64).round() as usize).min(self.rows);
        let left: Vec<usize> = (0..cut).collect();
        let right: Vec<usize> = (cut..self.rows).collect();
        Ok((self.take_rows(&left), self.take_rows(&right)))
    }

    /// Re-encodes column `index` as categorical. Already-categorical columns are left alone.
    pub fn to_categorical(&mut self, index: usize) -> Result<&[f64], FrameError> {
        let columns = self.columns.len();
        let column = self
            .columns
            .get_mut(index)
            .ok_or(FrameError::ColumnOutOfRange { index, columns })?;
        if let ColumnKind::Numeric = column.kind {
            let mut levels = column.values.clone();
            levels.sort_by(f64::total_cmp);
            levels.dedup();
            for value in &mut column.values {
                let level = levels
                    .binary_search_by(|probe| probe.total_cmp(value))
                    .map_err(|_| FrameError::UnknownLevel {
                        column: column.name.clone(),
                        value: *value,
                    })?;
                *value = level as f64;
            }
            column.kind = ColumnKind::Categorical { levels };
        }
        Ok(column.levels().unwrap_or(&[]))
    }
}
