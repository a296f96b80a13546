//! Inference models.
//!
//! Models are exported from training as a small JSON document describing a
//! stack of dense layers:
//!
//! ```json
//! { "layers": [ { "weights": [[0.1, 0.2], [0.3, 0.4]], "bias": [0.0, 0.0], "activation": "relu" } ] }
//! ```
//!
//! `weights` is `inputs × outputs`. A batch is a matrix of one flattened sample
//! per row.

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::output::AnalysisError;

/// A loaded model. Implementations are immutable and shared across invocations.
pub trait Model: Send + Sync + core::fmt::Debug {
    /// Values per sample the model accepts.
    fn input_width(&self) -> usize;

    /// Values per sample the model produces.
    fn output_width(&self) -> usize;

    /// Run one forward pass over `batch` (`samples × input_width`).
    fn predict(&self, batch: ArrayView2<'_, f64>) -> Result<Array2<f64>, AnalysisError>;
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Linear => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }
}

/// Serialized form of one dense layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayerSpec {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

/// Serialized form of a [`DenseNetwork`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseNetworkSpec {
    pub layers: Vec<DenseLayerSpec>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

/// Feed-forward stack of dense layers.
#[derive(Debug, Clone)]
pub struct DenseNetwork {
    layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    /// Build and shape-check a network.
    pub fn from_spec(spec: DenseNetworkSpec) -> Result<Self, String> {
        if spec.layers.is_empty() {
            return Err("network has no layers".to_string());
        }

        let mut layers = Vec::with_capacity(spec.layers.len());
        let mut previous_outputs: Option<usize> = None;

        for (idx, layer) in spec.layers.into_iter().enumerate() {
            let inputs = layer.weights.len();
            let outputs = layer.weights.first().map(Vec::len).unwrap_or(0);
            if inputs == 0 || outputs == 0 {
                return Err(format!("layer {idx} has an empty weight matrix"));
            }
            if layer.weights.iter().any(|row| row.len() != outputs) {
                return Err(format!("layer {idx} has ragged weight rows"));
            }
            if layer.bias.len() != outputs {
                return Err(format!(
                    "layer {idx} bias has {} values, expected {outputs}",
                    layer.bias.len()
                ));
            }
            if let Some(prev) = previous_outputs {
                if prev != inputs {
                    return Err(format!(
                        "layer {idx} expects {inputs} inputs but previous layer produces {prev}"
                    ));
                }
            }
            previous_outputs = Some(outputs);

            let flat: Vec<f64> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((inputs, outputs), flat)
                .map_err(|e| format!("layer {idx}: {e}"))?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from_vec(layer.bias),
                activation: layer.activation,
            });
        }

        Ok(Self { layers })
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        let spec: DenseNetworkSpec = serde_json::from_str(json).map_err(|e| e.to_string())?;
        Self::from_spec(spec)
    }
}

impl Model for DenseNetwork {
    fn input_width(&self) -> usize {
        self.layers.first().map(|l| l.weights.nrows()).unwrap_or(0)
    }

    fn output_width(&self) -> usize {
        self.layers.last().map(|l| l.weights.ncols()).unwrap_or(0)
    }

    fn predict(&self, batch: ArrayView2<'_, f64>) -> Result<Array2<f64>, AnalysisError> {
        if batch.ncols() != self.input_width() {
            return Err(AnalysisError::ShapeMismatch {
                what: "model",
                expected: self.input_width(),
                found: batch.ncols(),
            });
        }

        let mut activations = batch.to_owned();
        for layer in &self.layers {
            let mut next = activations.dot(&layer.weights) + &layer.bias;
            let activation = layer.activation;
            next.mapv_inplace(|x| activation.apply(x));
            activations = next;
        }

        if activations.iter().any(|v| !v.is_finite()) {
            return Err(AnalysisError::Inference(
                "model produced non-finite values".to_string(),
            ));
        }
        Ok(activations)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    fn layer(weights: Vec<Vec<f64>>, bias: Vec<f64>, activation: Activation) -> DenseLayerSpec {
        DenseLayerSpec {
            weights,
            bias,
            activation,
        }
    }

    #[test]
    fn forward_pass_applies_weights_bias_and_activation() {
        let net = DenseNetwork::from_spec(DenseNetworkSpec {
            layers: vec![
                layer(vec![vec![1.0, -1.0], vec![2.0, 0.0]], vec![0.0, 0.5], Activation::Relu),
                layer(vec![vec![1.0], vec![1.0]], vec![1.0], Activation::Linear),
            ],
        })
        .unwrap();

        // [1, 2] -> relu([5, -0.5]) = [5, 0] -> 5 + 0 + 1 = 6
        let out = net.predict(array![[1.0, 2.0]].view()).unwrap();
        assert_eq!(out, array![[6.0]]);
        assert_eq!(net.input_width(), 2);
        assert_eq!(net.output_width(), 1);
    }

    #[test]
    fn sigmoid_output_is_a_probability() {
        let net = DenseNetwork::from_json(
            r#"{"layers": [{"weights": [[0.0]], "bias": [0.0], "activation": "sigmoid"}]}"#,
        )
        .unwrap();
        let out = net.predict(array![[123.0]].view()).unwrap();
        assert!((out[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn rejects_inconsistent_layers() {
        let err = DenseNetwork::from_spec(DenseNetworkSpec {
            layers: vec![
                layer(vec![vec![1.0, 1.0]], vec![0.0, 0.0], Activation::Linear),
                layer(vec![vec![1.0]], vec![0.0], Activation::Linear),
            ],
        })
        .unwrap_err();
        assert!(err.contains("layer 1 expects 1 inputs"));

        assert!(DenseNetwork::from_json(r#"{"layers": []}"#).is_err());
        assert!(
            DenseNetwork::from_json(r#"{"layers": [{"weights": [[1.0], [1.0, 2.0]], "bias": [0.0]}]}"#)
                .unwrap_err()
                .contains("ragged")
        );
    }

    #[test]
    fn wrong_input_width_is_reported() {
        let net = DenseNetwork::from_json(r#"{"layers": [{"weights": [[1.0], [1.0]], "bias": [0.0]}]}"#)
            .unwrap();
        let err = net.predict(array![[1.0, 2.0, 3.0]].view()).unwrap_err();
        assert_eq!(err.to_string(), "model expects 2 values per sample, got 3");
    }
}
