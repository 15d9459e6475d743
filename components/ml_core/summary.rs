use serde::Serialize;

use crate::{config::SummaryStatisticsSettings, dataset::Dataset, errors::DatasetError};

/// Equal-width bucket counts between a column's min and max.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    /// Bucket edges, one more than `counts`.
    pub boundaries: Vec<f64>,
    /// Values falling in each bucket.
    pub counts: Vec<usize>,
}

/// Statistics for one column of a dataset sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    /// `C1..Cn` for features, `label` for the label.
    pub name: String,
    /// Sampled values.
    pub count: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Distinct values seen in the sample.
    pub distinct_count: usize,
    /// Whether `distinct_count` is within the categorical threshold.
    pub categorical: bool,
    /// Value distribution.
    pub histogram: Histogram,
}

/// Per-column statistics over at most `sample_size` rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    /// Rows in the dataset.
    pub rows: usize,
    /// Rows the statistics were computed from.
    pub sampled_rows: usize,
    /// One entry per feature, in column order.
    pub features: Vec<ColumnSummary>,
    /// Label column.
    pub label: ColumnSummary,
}

impl DatasetSummary {
    /// Summarises `data`, taking evenly strided rows when it exceeds the sample size.
    pub fn compute(data: &Dataset, settings: &SummaryStatisticsSettings) -> Result<Self, DatasetError> {
        let width = data.validate()?;
        let step = data.len().div_ceil(settings.sample_size.max(1));
        let sample: Vec<_> = data.points.iter().step_by(step).collect();

        let features = (0..width)
            .map(|column| {
                let values: Vec<f64> = sample.iter().map(|point| point.features[column]).collect();
                summarize_column(format!("C{}", column + 1), &values, settings)
            })
            .collect();
        let labels: Vec<f64> = sample.iter().map(|point| point.label).collect();

        Ok(Self {
            rows: data.len(),
            sampled_rows: sample.len(),
            features,
            label: summarize_column("label".into(), &labels, settings),
        })
    }
}

fn summarize_column(name: String, values: &[f64], settings: &SummaryStatisticsSettings) -> ColumnSummary {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();

    ColumnSummary {
        name,
        count: values.len(),
        mean,
        min,
        max,
        distinct_count: sorted.len(),
        categorical: sorted.len() <= settings.categorical_threshold,
        histogram: histogram(values, min, max, settings.histogram_bins.max(1)),
    }
}

fn histogram(values: &[f64], min: f64, max: f64, bins: usize) -> Histogram {
    let width = (max - min) / bins as f64;
    let boundaries = (0..=bins).map(|edge| min + width * edge as f64).collect();
    let mut counts = vec![0; bins];
    for &value in values {
        let bucket = if width > 0.0 {
            (((value - min) / width) as usize).min(bins - 1)
        } else {
            0
        };
        counts[bucket] += 1;
    }
    Histogram { boundaries, counts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LabeledPoint;

    fn settings(bins: usize, threshold: usize, sample_size: usize) -> SummaryStatisticsSettings {
        SummaryStatisticsSettings {
            histogram_bins: bins,
            categorical_threshold: threshold,
            sample_size,
        }
    }

    fn data(rows: i32) -> Dataset {
        Dataset::new(
            (0..rows)
                .map(|idx| LabeledPoint::new(vec![f64::from(idx), 3.0], f64::from(idx % 2)))
                .collect(),
        )
    }

    #[test]
    fn columns_carry_range_and_histogram() {
        let summary = DatasetSummary::compute(&data(10), &settings(5, 2, 100)).unwrap();
        assert_eq!((summary.rows, summary.sampled_rows), (10, 10));
        let first = &summary.features[0];
        assert_eq!(first.name, "C1");
        assert_eq!((first.min, first.max), (0.0, 9.0));
        assert!((first.mean - 4.5).abs() < 1e-12);
        assert_eq!(first.histogram.counts, vec![2, 2, 2, 2, 2]);
        assert_eq!(first.histogram.boundaries.len(), 6);
        assert!(!first.categorical);

        let constant = &summary.features[1];
        assert_eq!(constant.distinct_count, 1);
        assert_eq!(constant.histogram.counts[0], 10);
        assert!(constant.categorical);
        assert!(summary.label.categorical);
    }

    #[test]
    fn sample_size_caps_rows() {
        let summary = DatasetSummary::compute(&data(100), &settings(4, 20, 30)).unwrap();
        assert_eq!(summary.rows, 100);
        assert_eq!(summary.sampled_rows, 25);
        assert_eq!(summary.features[0].histogram.counts.iter().sum::<usize>(), 25);
    }

    #[test]
    fn empty_and_zero_width_data() {
        assert_eq!(
            DatasetSummary::compute(&Dataset::default(), &settings(4, 20, 10)),
            Err(DatasetError::Empty)
        );
        let narrow = Dataset::new(vec![LabeledPoint::new(vec![], 1.0)]);
        let summary = DatasetSummary::compute(&narrow, &settings(4, 20, 10)).unwrap();
        assert!(summary.features.is_empty());
        assert_eq!(summary.label.count, 1);
    }
}
