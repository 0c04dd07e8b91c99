use std::f32::consts::PI;

use burn::module::{Module, Param};
use burn::tensor::activation::tanh;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::Rng;

pub const DEFAULT_HIDDEN: [usize; 2] = [64, 64];

const HIDDEN_GAIN: f32 = std::f32::consts::SQRT_2;
const POLICY_GAIN: f32 = 0.01;
const VALUE_GAIN: f32 = 1.0;

/// `0.5 * ln(2π)`, the constant term of a unit Gaussian log density.
pub(crate) fn half_log_two_pi() -> f32 {
    0.5 * (2.0 * PI).ln()
}

/// Fully connected layer whose weights come from a caller-supplied RNG, so
/// that a seed fixes the initial policy independently of the backend.
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    weight: Param<Tensor<B, 2>>,
    bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> DenseLayer<B> {
    /// Uniform init with variance `gain² / inputs`; biases start at zero.
    pub fn new(inputs: usize, outputs: usize, gain: f32, rng: &mut impl Rng) -> Self {
        assert!(inputs > 0 && outputs > 0, "layer sizes must be positive");
        let device = B::Device::default();
        let bound = gain * (3.0 / inputs as f32).sqrt();
        let weights: Vec<f32> = (0..inputs * outputs)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        let weight =
            Tensor::<B, 2>::from_data(TensorData::new(weights, [inputs, outputs]), &device);
        let bias = Tensor::<B, 1>::zeros([outputs], &device);
        Self {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
        }
    }

    pub fn inputs(&self) -> usize {
        self.weight.val().dims()[0]
    }

    pub fn outputs(&self) -> usize {
        self.weight.val().dims()[1]
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        input.matmul(self.weight.val()) + self.bias.val().unsqueeze::<2>()
    }
}

/// Diagonal Gaussian actor and state-value critic with separate tanh MLPs.
#[derive(Module, Debug)]
pub struct ActorCritic<B: Backend> {
    actor: Vec<DenseLayer<B>>,
    action_mean: DenseLayer<B>,
    critic: Vec<DenseLayer<B>>,
    value_head: DenseLayer<B>,
    log_std: Param<Tensor<B, 1>>,
}

impl<B: Backend> ActorCritic<B> {
    pub fn new(
        observation_dim: usize,
        action_dim: usize,
        hidden: &[usize],
        rng: &mut impl Rng,
    ) -> Self {
        assert!(!hidden.is_empty(), "at least one hidden layer is required");
        let actor = Self::trunk(observation_dim, hidden, rng);
        let action_mean = DenseLayer::new(hidden[hidden.len() - 1], action_dim, POLICY_GAIN, rng);
        let critic = Self::trunk(observation_dim, hidden, rng);
        let value_head = DenseLayer::new(hidden[hidden.len() - 1], 1, VALUE_GAIN, rng);
        let log_std = Tensor::<B, 1>::zeros([action_dim], &B::Device::default());
        Self {
            actor,
            action_mean,
            critic,
            value_head,
            log_std: Param::from_tensor(log_std),
        }
    }

    fn trunk(inputs: usize, hidden: &[usize], rng: &mut impl Rng) -> Vec<DenseLayer<B>> {
        let mut layers = Vec::with_capacity(hidden.len());
        let mut width = inputs;
        for &size in hidden {
            layers.push(DenseLayer::new(width, size, HIDDEN_GAIN, rng));
            width = size;
        }
        layers
    }

    pub fn observation_dim(&self) -> usize {
        self.actor[0].inputs()
    }

    pub fn action_dim(&self) -> usize {
        self.action_mean.outputs()
    }

    pub fn hidden(&self) -> Vec<usize> {
        self.actor.iter().map(DenseLayer::outputs).collect()
    }

    /// Action means, `[batch, action_dim]`.
    pub fn forward_actor(&self, observations: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut activations = observations;
        for layer in &self.actor {
            activations = tanh(layer.forward(activations));
        }
        self.action_mean.forward(activations)
    }

    /// State values, `[batch]`.
    pub fn forward_critic(&self, observations: Tensor<B, 2>) -> Tensor<B, 1> {
        let batch = observations.dims()[0];
        let mut activations = observations;
        for layer in &self.critic {
            activations = tanh(layer.forward(activations));
        }
        self.value_head.forward(activations).reshape([batch])
    }

    pub fn forward(&self, observations: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let means = self.forward_actor(observations.clone());
        let values = self.forward_critic(observations);
        (means, values)
    }

    pub fn log_std(&self) -> Tensor<B, 1> {
        self.log_std.val()
    }

    /// Log density of `actions` under `N(means, exp(log_std)²)`, summed over
    /// action components. Shape `[batch]`.
    pub fn log_prob(&self, means: Tensor<B, 2>, actions: Tensor<B, 2>) -> Tensor<B, 1> {
        let batch = actions.dims()[0];
        let log_std = self.log_std.val().unsqueeze::<2>();
        let std = log_std.clone().exp();
        let z = (actions - means) / std;
        let per_component = z.powf_scalar(2.0).mul_scalar(-0.5) - log_std;
        per_component
            .sub_scalar(half_log_two_pi())
            .sum_dim(1)
            .reshape([batch])
    }

    /// Entropy of the (state-independent) action distribution, shape `[1]`.
    pub fn entropy(&self) -> Tensor<B, 1> {
        self.log_std
            .val()
            .add_scalar(0.5 + half_log_two_pi())
            .sum()
    }

    fn observation_tensor(&self, observation: &[f32]) -> Tensor<B, 2> {
        Tensor::<B, 2>::from_data(
            TensorData::new(observation.to_vec(), [1, observation.len()]),
            &B::Device::default(),
        )
    }

    /// Mean action for a single observation.
    pub fn mean_action(&self, observation: &[f32]) -> Vec<f32> {
        tensor_values(self.forward_actor(self.observation_tensor(observation)))
    }

    /// State value for a single observation.
    pub fn value(&self, observation: &[f32]) -> f32 {
        tensor_values(self.forward_critic(self.observation_tensor(observation)))
            .first()
            .copied()
            .unwrap_or_default()
    }

    /// Mean action and state value for a single observation.
    pub fn evaluate(&self, observation: &[f32]) -> (Vec<f32>, f32) {
        let (means, values) = self.forward(self.observation_tensor(observation));
        let value = tensor_values(values).first().copied().unwrap_or_default();
        (tensor_values(means), value)
    }

    pub fn std_values(&self) -> Vec<f32> {
        tensor_values(self.log_std.val())
            .into_iter()
            .map(f32::exp)
            .collect()
    }
}

pub(crate) fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().to_vec::<f32>().unwrap_or_default()
}
