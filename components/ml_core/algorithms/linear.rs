use serde::{Deserialize, Serialize};

use super::{
    params::{HyperParameters, ITERATIONS, LEARNING_RATE, REG_PARAMETER},
    Algorithm,
};
use crate::{dataset::Dataset, errors::ModelBuilderError};

/// How the linear score is turned into a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    /// Raw score (regression).
    Identity,
    /// Sigmoid thresholded at 0.5.
    Logistic,
    /// Sign of the margin.
    Hinge,
}

/// Penalty added to the loss gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Penalty {
    None,
    L2(f64),
    L1(f64),
}

/// Weights plus intercept shared by every linear learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    weights: Vec<f64>,
    intercept: f64,
    link: Link,
}

impl LinearModel {
    /// Feature weights.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Bias term.
    #[must_use]
    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    fn margin(&self, features: &[f64]) -> f64 {
        features
            .iter()
            .zip(self.weights.iter())
            .map(|(feature, weight)| feature * weight)
            .sum::<f64>()
            + self.intercept
    }

    /// Predicts a single row.
    #[must_use]
    pub fn predict(&self, features: &[f64]) -> f64 {
        let margin = self.margin(features);
        match self.link {
            Link::Identity => margin,
            Link::Logistic => f64::from(u8::from(sigmoid(margin) >= 0.5)),
            Link::Hinge => f64::from(u8::from(margin >= 0.0)),
        }
    }
}

fn sigmoid(value: f64) -> f64 {
    1.0 / (1.0 + (-value).exp())
}

/// Fits one of the linear-family algorithms with full-batch gradient descent.
pub fn fit(
    algorithm: Algorithm,
    data: &Dataset,
    params: &HyperParameters,
) -> Result<LinearModel, ModelBuilderError> {
    let feature_dim = data.validate().map_err(|source| ModelBuilderError::Data {
        algorithm: algorithm.to_string(),
        source,
    })?;
    let iterations = params.positive_usize(ITERATIONS, 100)?;
    let learning_rate = params.positive_f64(LEARNING_RATE, 0.1)?;
    let default_reg = if algorithm == Algorithm::LinearRegression {
        0.0
    } else {
        0.01
    };
    let reg = params.non_negative_f64(REG_PARAMETER, default_reg)?;

    let (link, penalty) = match algorithm {
        Algorithm::RidgeRegression => (Link::Identity, Penalty::L2(reg)),
        Algorithm::LassoRegression => (Link::Identity, Penalty::L1(reg)),
        Algorithm::LogisticRegression => (Link::Logistic, Penalty::L2(reg)),
        Algorithm::Svm => (Link::Hinge, Penalty::L2(reg)),
        _ if reg > 0.0 => (Link::Identity, Penalty::L2(reg)),
        _ => (Link::Identity, Penalty::None),
    };
    if link != Link::Identity {
        if let Some(label) = data
            .labels()
            .into_iter()
            .find(|label| *label != 0.0 && *label != 1.0)
        {
            return Err(ModelBuilderError::NonBinaryLabel {
                algorithm: algorithm.to_string(),
                label,
            });
        }
    }

    let mut model = LinearModel {
        weights: vec![0.0; feature_dim],
        intercept: 0.0,
        link,
    };
    let rows = data.len() as f64;
    for _ in 0..iterations {
        let mut grad = vec![0.0; feature_dim];
        let mut intercept_grad = 0.0;
        for point in &data.points {
            let margin = model.margin(&point.features);
            let residual = match link {
                Link::Identity => margin - point.label,
                Link::Logistic => sigmoid(margin) - point.label,
                Link::Hinge => {
                    let signed = 2.0 * point.label - 1.0;
                    if signed * margin < 1.0 {
                        -signed
                    } else {
                        0.0
                    }
                }
            };
            for (slot, feature) in grad.iter_mut().zip(point.features.iter()) {
                *slot += residual * feature;
            }
            intercept_grad += residual;
        }
        for (weight, slot) in model.weights.iter_mut().zip(grad.iter()) {
            let penalty_grad = match penalty {
                Penalty::L2(strength) => strength * *weight,
                Penalty::L1(strength) if *weight != 0.0 => strength * weight.signum(),
                Penalty::None | Penalty::L1(_) => 0.0,
            };
            *weight -= learning_rate * (slot / rows + penalty_grad);
        }
        model.intercept -= learning_rate * intercept_grad / rows;
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LabeledPoint;

    fn line(rows: usize) -> Dataset {
        Dataset::new(
            (0..rows)
                .map(|idx| {
                    let x = idx as f64 / rows as f64;
                    LabeledPoint::new(vec![x], 2.0 * x + 1.0)
                })
                .collect(),
        )
    }

    #[test]
    fn linear_regression_fits_a_line() {
        let params = HyperParameters::new()
            .with(ITERATIONS, 2_000)
            .with(LEARNING_RATE, 0.5);
        let model = fit(Algorithm::LinearRegression, &line(50), &params).unwrap();
        assert!((model.weights()[0] - 2.0).abs() < 0.1);
        assert!((model.intercept() - 1.0).abs() < 0.1);
    }

    #[test]
    fn lasso_shrinks_weights_more_than_plain() {
        let params = HyperParameters::new().with(REG_PARAMETER, 0.5);
        let plain = fit(Algorithm::LinearRegression, &line(30), &HyperParameters::new()).unwrap();
        let lasso = fit(Algorithm::LassoRegression, &line(30), &params).unwrap();
        assert!(lasso.weights()[0].abs() < plain.weights()[0].abs());
    }

    #[test]
    fn logistic_separates_classes() {
        let data = Dataset::new(
            (0..40_i32)
                .map(|idx| {
                    let x = f64::from(idx) - 20.0;
                    LabeledPoint::new(vec![x / 10.0], f64::from(u8::from(x >= 0.0)))
                })
                .collect(),
        );
        let params = HyperParameters::new().with(ITERATIONS, 500);
        let model = fit(Algorithm::LogisticRegression, &data, &params).unwrap();
        assert_eq!(model.predict(&[1.5]), 1.0);
        assert_eq!(model.predict(&[-1.5]), 0.0);
        let svm = fit(Algorithm::Svm, &data, &params).unwrap();
        assert_eq!(svm.predict(&[1.5]), 1.0);
        assert_eq!(svm.predict(&[-1.5]), 0.0);
    }

    #[test]
    fn classifiers_reject_non_binary_labels() {
        let err = fit(Algorithm::LogisticRegression, &line(5), &HyperParameters::new()).unwrap_err();
        assert!(matches!(err, ModelBuilderError::NonBinaryLabel { .. }));
    }

    #[test]
    fn empty_data_is_rejected() {
        let err = fit(Algorithm::LinearRegression, &Dataset::default(), &HyperParameters::new())
            .unwrap_err();
        assert!(matches!(err, ModelBuilderError::Data { .. }));
    }
}
