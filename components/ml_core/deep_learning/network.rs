use ndarray::{Array1, Array2, Axis, Zip};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};

use super::params::{Activation, DeepLearningParameters};

/// Per-sample update settings derived from the run parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateRule {
    /// Input dropout.
    pub input_dropout: f64,
    /// Hidden dropout; zero when the activation has none.
    pub hidden_dropout: f64,
    /// L1 penalty.
    pub l1: f64,
    /// Max squared incoming weight sum per neuron.
    pub max_w2: f64,
    /// ADADELTA on/off.
    pub adaptive: bool,
    /// ADADELTA decay.
    pub rho: f64,
    /// ADADELTA smoothing.
    pub epsilon: f64,
    /// Fixed learning rate.
    pub rate: f64,
}

impl UpdateRule {
    /// Reads the update rule off a parameter set.
    #[must_use]
    pub fn from_parameters(params: &DeepLearningParameters) -> Self {
        Self {
            input_dropout: params.input_dropout_ratio,
            hidden_dropout: if params.activation.uses_dropout() {
                params.hidden_dropout_ratio
            } else {
                0.0
            },
            l1: params.l1,
            max_w2: params.max_w2,
            adaptive: params.adaptive_rate,
            rho: params.rho,
            epsilon: params.epsilon,
            rate: params.rate,
        }
    }

    fn step(&self, grad: f64, grad_sq: &mut f64, delta_sq: &mut f64) -> f64 {
        if !self.adaptive {
            return -self.rate * grad;
        }
        *grad_sq = self.rho.mul_add(*grad_sq, (1.0 - self.rho) * grad * grad);
        let delta = -((*delta_sq + self.epsilon).sqrt() / (*grad_sq + self.epsilon).sqrt()) * grad;
        *delta_sq = self.rho.mul_add(*delta_sq, (1.0 - self.rho) * delta * delta);
        delta
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DenseLayer {
    /// `outputs x inputs`.
    weights: Array2<f64>,
    bias: Array1<f64>,
    grad_sq_w: Array2<f64>,
    delta_sq_w: Array2<f64>,
    grad_sq_b: Array1<f64>,
    delta_sq_b: Array1<f64>,
}

impl DenseLayer {
    fn new(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        let bound = (6.0 / (inputs + outputs) as f64).sqrt();
        Self {
            weights: Array2::from_shape_fn((outputs, inputs), |_| rng.gen_range(-bound..bound)),
            bias: Array1::zeros(outputs),
            grad_sq_w: Array2::zeros((outputs, inputs)),
            delta_sq_w: Array2::zeros((outputs, inputs)),
            grad_sq_b: Array1::zeros(outputs),
            delta_sq_b: Array1::zeros(outputs),
        }
    }

    fn forward(&self, input: &Array1<f64>) -> Array1<f64> {
        self.weights.dot(input) + &self.bias
    }

    fn update(&mut self, grad_w: &Array2<f64>, grad_b: &Array1<f64>, rule: &UpdateRule) {
        Zip::from(&mut self.weights)
            .and(&mut self.grad_sq_w)
            .and(&mut self.delta_sq_w)
            .and(grad_w)
            .for_each(|weight, grad_sq, delta_sq, &grad| {
                let grad = rule.l1.mul_add(sign(*weight), grad);
                *weight += rule.step(grad, grad_sq, delta_sq);
            });
        Zip::from(&mut self.bias)
            .and(&mut self.grad_sq_b)
            .and(&mut self.delta_sq_b)
            .and(grad_b)
            .for_each(|bias, grad_sq, delta_sq, &grad| {
                *bias += rule.step(grad, grad_sq, delta_sq);
            });
        for mut row in self.weights.rows_mut() {
            let squared = row.dot(&row);
            if squared > rule.max_w2 {
                row *= (rule.max_w2 / squared).sqrt();
            }
        }
    }
}

fn sign(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value.signum()
    }
}

fn softmax(z: &Array1<f64>) -> Array1<f64> {
    let max = z.fold(f64::NEG_INFINITY, |acc, value| acc.max(*value));
    let exp = z.mapv(|value| (value - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Scale mask for inverted dropout: dropped units get 0, kept ones `1 / (1 - ratio)`.
fn dropout_mask(len: usize, ratio: f64, rng: &mut StdRng) -> Array1<f64> {
    if ratio <= 0.0 {
        return Array1::ones(len);
    }
    let keep = 1.0 / (1.0 - ratio);
    Array1::from_shape_fn(len, |_| if rng.gen::<f64>() < ratio { 0.0 } else { keep })
}

/// Fully connected network with a softmax output layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    layers: Vec<DenseLayer>,
    activation: Activation,
}

impl Network {
    /// Randomly initialised network `inputs -> hidden.. -> outputs`.
    #[must_use]
    pub fn new(
        inputs: usize,
        hidden: &[usize],
        outputs: usize,
        activation: Activation,
        rng: &mut StdRng,
    ) -> Self {
        let mut widths = Vec::with_capacity(hidden.len() + 2);
        widths.push(inputs);
        widths.extend_from_slice(hidden);
        widths.push(outputs);
        let layers = widths
            .windows(2)
            .map(|pair| DenseLayer::new(pair[0], pair[1], rng))
            .collect();
        Self { layers, activation }
    }

    /// Input width.
    #[must_use]
    pub fn input_width(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.weights.ncols())
    }

    /// Output width (number of classes).
    #[must_use]
    pub fn output_width(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.weights.nrows())
    }

    /// Class probabilities without dropout.
    #[must_use]
    pub fn probabilities(&self, input: &[f64]) -> Vec<f64> {
        let last = self.layers.len().saturating_sub(1);
        let mut signal = Array1::from(input.to_vec());
        for (idx, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&signal);
            signal = if idx == last {
                softmax(&z)
            } else {
                z.mapv(|value| self.activation.apply(value))
            };
        }
        signal.to_vec()
    }

    /// One forward/backward pass on a single row; returns the sample's log loss
    /// before the update.
    pub fn train_sample(
        &mut self,
        input: &[f64],
        target: usize,
        rule: &UpdateRule,
        rng: &mut StdRng,
    ) -> f64 {
        let last = self.layers.len() - 1;
        let input_mask = dropout_mask(input.len(), rule.input_dropout, rng);
        let mut outputs = vec![Array1::from(input.to_vec()) * &input_mask];
        // activations before dropout, and the dropout scale, per hidden layer
        let mut activated = Vec::with_capacity(last);
        let mut masks = Vec::with_capacity(last);
        for (idx, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&outputs[idx]);
            if idx == last {
                outputs.push(softmax(&z));
            } else {
                let a = z.mapv(|value| self.activation.apply(value));
                let mask = dropout_mask(a.len(), rule.hidden_dropout, rng);
                outputs.push(&a * &mask);
                activated.push(a);
                masks.push(mask);
            }
        }

        let probabilities = &outputs[last + 1];
        let loss = -probabilities[target].max(1e-15).ln();
        let mut delta = probabilities.clone();
        delta[target] -= 1.0;

        for idx in (0..=last).rev() {
            let previous = if idx > 0 {
                let back = self.layers[idx].weights.t().dot(&delta);
                let derivative = activated[idx - 1].mapv(|a| self.activation.derivative(a));
                Some(back * derivative * &masks[idx - 1])
            } else {
                None
            };
            let grad_w = delta
                .view()
                .insert_axis(Axis(1))
                .dot(&outputs[idx].view().insert_axis(Axis(0)));
            self.layers[idx].update(&grad_w, &delta, rule);
            if let Some(next) = previous {
                delta = next;
            }
        }
        loss
    }

    /// Whether every weight and bias is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.layers.iter().all(|layer| {
            layer.weights.iter().all(|w| w.is_finite()) && layer.bias.iter().all(|b| b.is_finite())
        })
    }

    /// Mean absolute weight per layer.
    #[must_use]
    pub fn weight_magnitudes(&self) -> Vec<f64> {
        self.layers
            .iter()
            .map(|layer| layer.weights.mapv(f64::abs).mean().unwrap_or(0.0))
            .collect()
    }

    /// Largest squared incoming weight sum over all neurons.
    #[must_use]
    pub fn max_incoming_w2(&self) -> f64 {
        self.layers
            .iter()
            .flat_map(|layer| layer.weights.rows().into_iter().map(|row| row.dot(&row)))
            .fold(0.0, f64::max)
    }
}
