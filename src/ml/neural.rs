//! Feed-forward neural regressor
//!
//! Fully connected ReLU network with a single linear output, trained with
//! minibatch Adam on the Huber loss. Training holds out a validation slice of
//! its input rows and monitors it for:
//! - early stopping (best weights are restored)
//! - learning-rate reduction on plateau
//!
//! Batch normalisation and dropout are not used; inputs are expected to be
//! standard-scaled.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::features::{FeatureRow, FEATURE_COUNT};
use crate::error::{EngineError, Result};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeuralParams {
    /// Width of each hidden layer
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Stale epochs before stopping
    pub early_stopping_patience: usize,
    /// Stale epochs before the learning rate is reduced
    pub lr_patience: usize,
    pub lr_factor: f64,
    pub min_learning_rate: f64,
    /// Share of the training rows held out for monitoring
    pub validation_fraction: f64,
    pub huber_delta: f64,
}

impl Default for NeuralParams {
    fn default() -> Self {
        Self {
            hidden_layers: vec![128, 64, 32, 16],
            learning_rate: 1e-3,
            batch_size: 64,
            max_epochs: 300,
            early_stopping_patience: 30,
            lr_patience: 15,
            lr_factor: 0.8,
            min_learning_rate: 1e-6,
            validation_fraction: 0.1,
            huber_delta: 1.0,
        }
    }
}

impl NeuralParams {
    fn validate(&self) -> Result<()> {
        if self.hidden_layers.is_empty() || self.hidden_layers.contains(&0) {
            return Err(EngineError::InvalidParameter(
                "hidden_layers must be non-empty with positive widths".into(),
            ));
        }
        if !(self.learning_rate > 0.0) || self.batch_size == 0 || self.max_epochs == 0 {
            return Err(EngineError::InvalidParameter(
                "learning_rate, batch_size and max_epochs must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(EngineError::InvalidParameter(format!(
                "validation_fraction must be in [0, 1), got {}",
                self.validation_fraction
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Dense {
    inputs: usize,
    outputs: usize,
    /// Row-major `outputs x inputs`
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl Dense {
    /// He-normal initialisation
    fn new(inputs: usize, outputs: usize, rng: &mut ChaCha20Rng) -> Self {
        let std_dev = (2.0 / inputs as f64).sqrt();
        let weights = (0..inputs * outputs)
            .map(|_| {
                let z: f64 = StandardNormal.sample(rng);
                z * std_dev
            })
            .collect();
        Self {
            inputs,
            outputs,
            weights,
            biases: vec![0.0; outputs],
        }
    }

    fn forward(&self, input: &[f64], relu: bool) -> Vec<f64> {
        (0..self.outputs)
            .map(|o| {
                let w = &self.weights[o * self.inputs..(o + 1) * self.inputs];
                let z = self.biases[o] + w.iter().zip(input).map(|(a, b)| a * b).sum::<f64>();
                if relu {
                    z.max(0.0)
                } else {
                    z
                }
            })
            .collect()
    }

    fn is_well_formed(&self) -> bool {
        self.weights.len() == self.inputs * self.outputs && self.biases.len() == self.outputs
    }
}

/// Gradient or moment buffers shaped like the network
#[derive(Debug, Clone)]
struct LayerBuffers {
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl LayerBuffers {
    fn zeros_like(layer: &Dense) -> Self {
        Self {
            weights: vec![0.0; layer.weights.len()],
            biases: vec![0.0; layer.biases.len()],
        }
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|v| *v = 0.0);
        self.biases.iter_mut().for_each(|v| *v = 0.0);
    }
}

struct Adam {
    m: Vec<LayerBuffers>,
    v: Vec<LayerBuffers>,
    step: i32,
}

impl Adam {
    fn new(layers: &[Dense]) -> Self {
        Self {
            m: layers.iter().map(LayerBuffers::zeros_like).collect(),
            v: layers.iter().map(LayerBuffers::zeros_like).collect(),
            step: 0,
        }
    }

    fn apply(&mut self, layers: &mut [Dense], grads: &[LayerBuffers], lr: f64) {
        self.step += 1;
        let bias1 = 1.0 - ADAM_BETA1.powi(self.step);
        let bias2 = 1.0 - ADAM_BETA2.powi(self.step);

        for (l, layer) in layers.iter_mut().enumerate() {
            let update = |param: &mut f64, g: f64, m: &mut f64, v: &mut f64| {
                *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
                *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *param -= lr * m_hat / (v_hat.sqrt() + ADAM_EPSILON);
            };
            for i in 0..layer.weights.len() {
                update(&mut layer.weights[i], grads[l].weights[i], &mut self.m[l].weights[i], &mut self.v[l].weights[i]);
            }
            for i in 0..layer.biases.len() {
                update(&mut layer.biases[i], grads[l].biases[i], &mut self.m[l].biases[i], &mut self.v[l].biases[i]);
            }
        }
    }
}

fn huber(diff: f64, delta: f64) -> f64 {
    let a = diff.abs();
    if a <= delta {
        0.5 * diff * diff
    } else {
        delta * (a - 0.5 * delta)
    }
}

fn huber_grad(diff: f64, delta: f64) -> f64 {
    diff.clamp(-delta, delta)
}

/// Trained network plus the number of epochs it took
#[derive(Debug, Clone)]
pub struct NeuralFit {
    pub model: NeuralNetwork,
    pub epochs_trained: usize,
    pub best_validation_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralNetwork {
    layers: Vec<Dense>,
}

impl NeuralNetwork {
    fn init(hidden: &[usize], rng: &mut ChaCha20Rng) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut inputs = FEATURE_COUNT;
        for &width in hidden {
            layers.push(Dense::new(inputs, width, rng));
            inputs = width;
        }
        layers.push(Dense::new(inputs, 1, rng));
        Self { layers }
    }

    pub fn fit(x: &[FeatureRow], y: &[f64], params: &NeuralParams, seed: u64) -> Result<NeuralFit> {
        params.validate()?;
        if x.len() < 2 || x.len() != y.len() {
            return Err(EngineError::InsufficientData { required: 2, actual: x.len().min(y.len()) });
        }

        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut net = Self::init(&params.hidden_layers, &mut rng);

        let mut order: Vec<usize> = (0..x.len()).collect();
        order.shuffle(&mut rng);
        let n_val = ((x.len() as f64 * params.validation_fraction).round() as usize).min(x.len() - 1);
        let (val_idx, train_idx) = order.split_at(n_val);
        // Without a validation slice the training rows are monitored instead
        let monitor_idx: Vec<usize> = if val_idx.is_empty() { train_idx.to_vec() } else { val_idx.to_vec() };
        let mut train_idx = train_idx.to_vec();

        let mut adam = Adam::new(&net.layers);
        let mut grads: Vec<LayerBuffers> = net.layers.iter().map(LayerBuffers::zeros_like).collect();
        let mut lr = params.learning_rate;

        let mut best: Option<(f64, Vec<Dense>)> = None;
        let mut stale = 0usize;
        let mut lr_stale = 0usize;
        let mut epochs = 0usize;

        for epoch in 0..params.max_epochs {
            epochs = epoch + 1;
            train_idx.shuffle(&mut rng);

            for batch in train_idx.chunks(params.batch_size) {
                grads.iter_mut().for_each(LayerBuffers::reset);
                for &i in batch {
                    net.accumulate_gradient(&x[i], y[i], params.huber_delta, &mut grads);
                }
                let scale = 1.0 / batch.len() as f64;
                for g in grads.iter_mut() {
                    g.weights.iter_mut().for_each(|v| *v *= scale);
                    g.biases.iter_mut().for_each(|v| *v *= scale);
                }
                adam.apply(&mut net.layers, &grads, lr);
            }

            let loss = net.mean_loss(x, y, &monitor_idx, params.huber_delta);
            if !loss.is_finite() {
                debug!("Neural training diverged at epoch {}", epochs);
                break;
            }

            let improved = best.as_ref().map_or(true, |(b, _)| loss < *b);
            if improved {
                best = Some((loss, net.layers.clone()));
                stale = 0;
                lr_stale = 0;
            } else {
                stale += 1;
                lr_stale += 1;
                if lr_stale >= params.lr_patience {
                    lr = (lr * params.lr_factor).max(params.min_learning_rate);
                    lr_stale = 0;
                    debug!("Reducing learning rate to {:.2e} at epoch {}", lr, epochs);
                }
                if stale >= params.early_stopping_patience {
                    debug!("Early stopping at epoch {}", epochs);
                    break;
                }
            }
        }

        let (best_loss, layers) = best.ok_or_else(|| {
            EngineError::Internal("loss diverged before the first epoch completed".into())
        })?;

        Ok(NeuralFit {
            model: Self { layers },
            epochs_trained: epochs,
            best_validation_loss: best_loss,
        })
    }

    fn activations(&self, row: &[f64]) -> Vec<Vec<f64>> {
        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        acts.push(row.to_vec());
        let last = self.layers.len() - 1;
        for (l, layer) in self.layers.iter().enumerate() {
            let next = layer.forward(&acts[l], l < last);
            acts.push(next);
        }
        acts
    }

    fn accumulate_gradient(&self, row: &FeatureRow, target: f64, delta: f64, grads: &mut [LayerBuffers]) {
        let acts = self.activations(row);
        let output = acts[self.layers.len()][0];
        let mut err = vec![huber_grad(output - target, delta)];

        for l in (0..self.layers.len()).rev() {
            let layer = &self.layers[l];
            let input = &acts[l];
            let g = &mut grads[l];
            for o in 0..layer.outputs {
                g.biases[o] += err[o];
                let base = o * layer.inputs;
                for i in 0..layer.inputs {
                    g.weights[base + i] += err[o] * input[i];
                }
            }
            if l > 0 {
                let mut prev = vec![0.0; layer.inputs];
                for o in 0..layer.outputs {
                    let base = o * layer.inputs;
                    for i in 0..layer.inputs {
                        prev[i] += layer.weights[base + i] * err[o];
                    }
                }
                // ReLU derivative of the previous layer
                for (p, a) in prev.iter_mut().zip(input) {
                    if *a <= 0.0 {
                        *p = 0.0;
                    }
                }
                err = prev;
            }
        }
    }

    fn mean_loss(&self, x: &[FeatureRow], y: &[f64], idx: &[usize], delta: f64) -> f64 {
        let total: f64 = idx
            .iter()
            .map(|&i| {
                let out = self.activations(&x[i])[self.layers.len()][0];
                huber(out - y[i], delta)
            })
            .sum();
        total / idx.len() as f64
    }

    pub fn predict(&self, row: &FeatureRow) -> Result<f64> {
        let first = self
            .layers
            .first()
            .ok_or_else(|| EngineError::CorruptModel("network has no layers".into()))?;
        if first.inputs != FEATURE_COUNT {
            return Err(EngineError::DimensionMismatch { expected: first.inputs, actual: FEATURE_COUNT });
        }
        let mut width = FEATURE_COUNT;
        for layer in &self.layers {
            if !layer.is_well_formed() || layer.inputs != width {
                return Err(EngineError::CorruptModel("inconsistent layer shapes".into()));
            }
            width = layer.outputs;
        }
        if width != 1 {
            return Err(EngineError::CorruptModel(format!("output layer has width {width}")));
        }

        Ok(self.activations(row)[self.layers.len()][0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::metrics::r2;

    fn hidden_widths(net: &NeuralNetwork) -> Vec<usize> {
        net.layers.iter().take(net.layers.len() - 1).map(|l| l.outputs).collect()
    }

    fn data() -> (Vec<FeatureRow>, Vec<f64>) {
        (0..400)
            .map(|i| {
                let mut row = [0.0; FEATURE_COUNT];
                row[0] = ((i % 20) as f64 - 10.0) / 6.0;
                row[1] = ((i / 20) as f64 - 10.0) / 6.0;
                let target = 0.5 * row[0] - 0.3 * row[1] + 0.2;
                (row, target)
            })
            .unzip()
    }

    fn params() -> NeuralParams {
        NeuralParams {
            hidden_layers: vec![16, 8],
            learning_rate: 0.01,
            batch_size: 32,
            max_epochs: 150,
            ..NeuralParams::default()
        }
    }

    #[test]
    fn test_divergence_before_first_epoch_is_plain_error() {
        let (x, y) = data();
        let y = vec![f64::NAN; y.len()];
        let err = NeuralNetwork::fit(&x, &y, &params(), 1).unwrap_err();
        // The ensemble trainer adds the member context itself
        assert!(matches!(err, EngineError::Internal(_)), "{err}");
        assert!(!err.to_string().contains("neural_network"));
    }

    #[test]
    fn test_fits_linear_target() {
        let (x, y) = data();
        let fit = NeuralNetwork::fit(&x, &y, &params(), 42).unwrap();
        let preds: Vec<f64> = x.iter().map(|r| fit.model.predict(r).unwrap()).collect();
        assert!(r2(&y, &preds) > 0.9, "r2 = {}", r2(&y, &preds));
        assert!(fit.epochs_trained >= 1 && fit.epochs_trained <= 150);
        assert_eq!(hidden_widths(&fit.model), vec![16, 8]);
    }

    #[test]
    fn test_seeded_training_is_reproducible() {
        let (x, y) = data();
        let p = NeuralParams { max_epochs: 5, ..params() };
        let a = NeuralNetwork::fit(&x, &y, &p, 3).unwrap();
        let b = NeuralNetwork::fit(&x, &y, &p, 3).unwrap();
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn test_early_stopping_halts_before_budget() {
        let (x, y) = data();
        // Targets unrelated to the inputs: validation loss stalls quickly
        let noise: Vec<f64> = (0..y.len()).map(|i| ((i * 7919) % 101) as f64 / 101.0).collect();
        let p = NeuralParams {
            early_stopping_patience: 3,
            lr_patience: 2,
            max_epochs: 500,
            learning_rate: 0.05,
            ..params()
        };
        let fit = NeuralNetwork::fit(&x, &noise, &p, 1).unwrap();
        assert!(fit.epochs_trained < 500);
    }

    #[test]
    fn test_huber() {
        assert_eq!(huber(0.5, 1.0), 0.125);
        assert_eq!(huber(-3.0, 1.0), 2.5);
        assert_eq!(huber_grad(3.0, 1.0), 1.0);
        assert_eq!(huber_grad(-0.25, 1.0), -0.25);
    }

    #[test]
    fn test_invalid_params() {
        let (x, y) = data();
        let p = NeuralParams { hidden_layers: vec![], ..params() };
        assert!(NeuralNetwork::fit(&x, &y, &p, 1).is_err());
        let p = NeuralParams { validation_fraction: 1.0, ..params() };
        assert!(NeuralNetwork::fit(&x, &y, &p, 1).is_err());
    }

    #[test]
    fn test_corrupt_network_rejected() {
        let net = NeuralNetwork { layers: Vec::new() };
        assert!(net.predict(&[0.0; FEATURE_COUNT]).is_err());
    }
}
