use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::{
    params::{HyperParameters, LAMBDA},
    Algorithm,
};
use crate::{dataset::Dataset, errors::ModelBuilderError};

/// Per-class Gaussian statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ClassStats {
    label: f64,
    log_prior: f64,
    means: Vec<f64>,
    variances: Vec<f64>,
}

impl ClassStats {
    fn log_likelihood(&self, features: &[f64]) -> f64 {
        self.means
            .iter()
            .zip(self.variances.iter())
            .zip(features.iter())
            .map(|((mean, variance), value)| {
                -0.5 * (2.0 * PI * variance).ln() - (value - mean).powi(2) / (2.0 * variance)
            })
            .sum::<f64>()
            + self.log_prior
    }
}

/// Gaussian naive Bayes classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    classes: Vec<ClassStats>,
}

impl NaiveBayesModel {
    /// Distinct labels seen during training, ascending.
    #[must_use]
    pub fn labels(&self) -> Vec<f64> {
        self.classes.iter().map(|class| class.label).collect()
    }

    /// Predicts the label with the highest posterior.
    #[must_use]
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.classes
            .iter()
            .map(|class| (class.label, class.log_likelihood(features)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(0.0, |(label, _)| label)
    }
}

/// Fits per-class means and variances, smoothing variances by `Lambda`.
pub fn fit(data: &Dataset, params: &HyperParameters) -> Result<NaiveBayesModel, ModelBuilderError> {
    let feature_dim = data.validate().map_err(|source| ModelBuilderError::Data {
        algorithm: Algorithm::NaiveBayes.to_string(),
        source,
    })?;
    let smoothing = params.non_negative_f64(LAMBDA, 1e-9)?;

    let mut labels = data.labels();
    labels.sort_by(f64::total_cmp);
    labels.dedup();

    let total = data.len() as f64;
    let classes = labels
        .into_iter()
        .map(|label| {
            let members: Vec<&[f64]> = data
                .points
                .iter()
                .filter(|point| point.label == label)
                .map(|point| point.features.as_slice())
                .collect();
            let count = members.len() as f64;
            let mut means = vec![0.0; feature_dim];
            for row in &members {
                for (mean, value) in means.iter_mut().zip(row.iter()) {
                    *mean += value / count;
                }
            }
            let mut variances = vec![0.0; feature_dim];
            for row in &members {
                for ((variance, mean), value) in variances.iter_mut().zip(means.iter()).zip(row.iter()) {
                    *variance += (value - mean).powi(2) / count;
                }
            }
            for variance in &mut variances {
                *variance = (*variance + smoothing).max(1e-12);
            }
            ClassStats {
                label,
                log_prior: (count / total).ln(),
                means,
                variances,
            }
        })
        .collect();
    Ok(NaiveBayesModel { classes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LabeledPoint;

    #[test]
    fn separates_gaussian_clusters() {
        let mut points = Vec::new();
        for idx in 0..20_i32 {
            let jitter = f64::from(idx % 5) * 0.1;
            points.push(LabeledPoint::new(vec![-2.0 + jitter, 1.0], 0.0));
            points.push(LabeledPoint::new(vec![2.0 - jitter, 1.0 + jitter], 2.0));
        }
        let model = fit(&Dataset::new(points), &HyperParameters::new()).unwrap();
        assert_eq!(model.labels(), vec![0.0, 2.0]);
        assert_eq!(model.predict(&[-1.8, 1.0]), 0.0);
        assert_eq!(model.predict(&[1.9, 1.2]), 2.0);
    }

    #[test]
    fn constant_features_stay_finite() {
        let points = vec![
            LabeledPoint::new(vec![1.0], 0.0),
            LabeledPoint::new(vec![1.0], 1.0),
        ];
        let model = fit(&Dataset::new(points), &HyperParameters::new()).unwrap();
        assert!(model.predict(&[1.0]).is_finite());
    }
}
