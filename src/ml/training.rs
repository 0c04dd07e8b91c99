use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;

use burn::grad_clipping::GradientClippingConfig;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, LearningRate, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use super::checkpoint::{PolicyMetadata, save_checkpoint};
use super::policy::{ActorCritic, DEFAULT_HIDDEN, half_log_two_pi, tensor_values};
use super::rollout::{RolloutBuffer, Transition};
use crate::callbacks::{Callback, TrainingState};
use crate::env::{ActionSpace, Environment};
use crate::error::{EnvError, ExperimentError};

const EPISODE_WINDOW: usize = 100;

/// PPO hyper-parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PpoConfig {
    pub n_steps: usize,
    pub batch_size: usize,
    pub n_epochs: usize,
    pub learning_rate: LearningRate,
    pub gamma: f32,
    pub gae_lambda: f32,
    pub clip_range: f32,
    pub ent_coef: f32,
    pub vf_coef: f32,
    pub max_grad_norm: f32,
    pub hidden: Vec<usize>,
    pub seed: u64,
    /// Print the metrics table after every logged rollout.
    pub verbose: bool,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            n_steps: 2048,
            batch_size: 64,
            n_epochs: 10,
            learning_rate: 3.0e-4,
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_range: 0.2,
            ent_coef: 0.0,
            vf_coef: 0.5,
            max_grad_norm: 0.5,
            hidden: DEFAULT_HIDDEN.to_vec(),
            seed: 0,
            verbose: true,
        }
    }
}

impl PpoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_steps(mut self, n_steps: usize) -> Self {
        self.n_steps = n_steps;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: LearningRate) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_gae_lambda(mut self, gae_lambda: f32) -> Self {
        self.gae_lambda = gae_lambda;
        self
    }

    pub fn with_clip_range(mut self, clip_range: f32) -> Self {
        self.clip_range = clip_range;
        self
    }

    pub fn with_ent_coef(mut self, ent_coef: f32) -> Self {
        self.ent_coef = ent_coef;
        self
    }

    pub fn with_hidden(mut self, hidden: Vec<usize>) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn validate(&self) -> Result<(), ExperimentError> {
        if self.n_steps < 2 {
            return Err(ExperimentError::InvalidConfiguration(
                "n_steps must be greater than 1",
            ));
        }
        if self.batch_size < 2 {
            return Err(ExperimentError::InvalidConfiguration(
                "batch_size must be greater than 1",
            ));
        }
        if self.n_epochs == 0 {
            return Err(ExperimentError::InvalidConfiguration(
                "n_epochs must be positive",
            ));
        }
        if self.hidden.is_empty() || self.hidden.contains(&0) {
            return Err(ExperimentError::InvalidConfiguration(
                "hidden layers must be non-empty and positive",
            ));
        }
        if !(self.learning_rate > 0.0) || !(self.clip_range > 0.0) {
            return Err(ExperimentError::InvalidConfiguration(
                "learning rate and clip range must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.gamma) || !(0.0..=1.0).contains(&self.gae_lambda) {
            return Err(ExperimentError::InvalidConfiguration(
                "gamma and gae_lambda must lie in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Averages over the gradient steps of one update.
#[derive(Clone, Debug, Default)]
pub struct UpdateMetrics {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy_loss: f32,
    pub approx_kl: f32,
    pub clip_fraction: f32,
    pub loss: f32,
    pub explained_variance: f32,
    pub std: f32,
    pub gradient_steps: usize,
}

/// Proximal policy optimisation over a single environment.
pub struct PpoTrainer<B: AutodiffBackend> {
    model: ActorCritic<B>,
    optimizer: OptimizerAdaptor<Adam, ActorCritic<B>, B>,
    config: PpoConfig,
    env: Box<dyn Environment>,
    action_space: ActionSpace,
    rng: StdRng,
    buffer: RolloutBuffer,
    num_timesteps: usize,
    iterations: usize,
    last_observation: Option<Vec<f32>>,
    last_episode_start: bool,
    episode_returns: VecDeque<f32>,
    episode_lengths: VecDeque<usize>,
    current_return: f32,
    current_length: usize,
}

impl<B: AutodiffBackend> PpoTrainer<B> {
    pub fn new(env: Box<dyn Environment>, config: PpoConfig) -> Result<Self, ExperimentError> {
        config.validate()?;
        let observation_dim = env.observation_dim();
        let action_space = env.action_space();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let model =
            ActorCritic::<B>::new(observation_dim, action_space.dim(), &config.hidden, &mut rng);
        let optimizer = AdamConfig::new()
            .with_epsilon(1.0e-5)
            .with_grad_clipping(Some(GradientClippingConfig::Norm(config.max_grad_norm)))
            .init();
        let buffer = RolloutBuffer::new(config.n_steps, observation_dim, action_space.dim());
        Ok(Self {
            model,
            optimizer,
            config,
            env,
            action_space,
            rng,
            buffer,
            num_timesteps: 0,
            iterations: 0,
            last_observation: None,
            last_episode_start: true,
            episode_returns: VecDeque::with_capacity(EPISODE_WINDOW),
            episode_lengths: VecDeque::with_capacity(EPISODE_WINDOW),
            current_return: 0.0,
            current_length: 0,
        })
    }

    pub fn model(&self) -> &ActorCritic<B> {
        &self.model
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    pub fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    pub fn env_mut(&mut self) -> &mut dyn Environment {
        self.env.as_mut()
    }

    pub fn into_env(self) -> Box<dyn Environment> {
        self.env
    }

    pub fn num_timesteps(&self) -> usize {
        self.num_timesteps
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn mean_episode_return(&self) -> Option<f32> {
        mean(self.episode_returns.iter().copied())
    }

    fn state(&self, total_timesteps: usize) -> TrainingState<'_, B> {
        TrainingState {
            model: &self.model,
            train_env: self.env.as_ref(),
            config: &self.config,
            action_space: &self.action_space,
            num_timesteps: self.num_timesteps,
            total_timesteps,
        }
    }

    pub fn metadata(&self) -> PolicyMetadata {
        self.state(self.num_timesteps).metadata()
    }

    /// Collects rollouts and updates the policy until `total_timesteps`
    /// environment steps have been taken or a callback asks to stop.
    pub fn learn(
        &mut self,
        total_timesteps: usize,
        callback: &mut dyn Callback<B>,
        log_interval: usize,
    ) -> Result<(), ExperimentError> {
        let started = Instant::now();
        let start_timesteps = self.num_timesteps;
        if self.last_observation.is_none() {
            let (observation, _) = self.env.reset(None)?;
            self.last_observation = Some(observation);
            self.last_episode_start = true;
        }
        callback.on_training_start(&self.state(total_timesteps))?;
        while self.num_timesteps < total_timesteps {
            if !self.collect_rollout(callback, total_timesteps)? {
                break;
            }
            self.iterations += 1;
            let metrics = self.update();
            if self.config.verbose && log_interval > 0 && self.iterations % log_interval == 0 {
                self.print_progress(&metrics, started, start_timesteps, total_timesteps);
            }
        }
        callback.on_training_end(&self.state(total_timesteps))
    }

    fn sample_action(&mut self, means: &[f32]) -> (Vec<f32>, f32) {
        let stds = self.model.std_values();
        let mut log_prob = 0.0;
        let action = means
            .iter()
            .zip(&stds)
            .map(|(mean, std)| {
                let noise: f32 = self.rng.sample(StandardNormal);
                log_prob += -0.5 * noise * noise - std.ln() - half_log_two_pi();
                mean + std * noise
            })
            .collect();
        (action, log_prob)
    }

    fn collect_rollout(
        &mut self,
        callback: &mut dyn Callback<B>,
        total_timesteps: usize,
    ) -> Result<bool, ExperimentError> {
        self.buffer.clear();
        while !self.buffer.is_full() {
            let observation = self.last_observation.take().ok_or(EnvError::NotReset)?;
            let (means, value) = self.model.evaluate(&observation);
            let (action, log_prob) = self.sample_action(&means);
            let mut step = self.env.step(&self.action_space.clip(&action))?;
            self.num_timesteps += 1;
            self.current_return += step.reward;
            self.current_length += 1;

            let mut reward = step.reward;
            if step.truncated && !step.terminated {
                reward += self.config.gamma * self.model.value(&step.observation);
            }
            self.buffer.push(Transition {
                observation,
                action,
                reward,
                value,
                log_prob,
                episode_start: self.last_episode_start,
            });

            let done = step.done();
            if done {
                self.finish_episode();
                let (observation, _) = self.env.reset(None)?;
                self.last_observation = Some(observation);
            } else {
                self.last_observation = Some(std::mem::take(&mut step.observation));
            }
            self.last_episode_start = done;

            if !callback.on_step(&self.state(total_timesteps))? {
                return Ok(false);
            }
        }
        let last_value = self
            .last_observation
            .as_deref()
            .map(|observation| self.model.value(observation))
            .unwrap_or_default();
        self.buffer.compute_returns_and_advantage(
            last_value,
            self.last_episode_start,
            self.config.gamma,
            self.config.gae_lambda,
        );
        callback.on_rollout_end(&self.state(total_timesteps))?;
        Ok(true)
    }

    fn finish_episode(&mut self) {
        if self.episode_returns.len() == EPISODE_WINDOW {
            self.episode_returns.pop_front();
            self.episode_lengths.pop_front();
        }
        self.episode_returns.push_back(self.current_return);
        self.episode_lengths.push_back(self.current_length);
        self.current_return = 0.0;
        self.current_length = 0;
    }

    fn update(&mut self) -> UpdateMetrics {
        let device = B::Device::default();
        let observation_dim = self.model.observation_dim();
        let action_dim = self.model.action_dim();
        let clip = self.config.clip_range;
        let mut metrics = UpdateMetrics::default();
        for _ in 0..self.config.n_epochs {
            for indices in self
                .buffer
                .minibatch_indices(self.config.batch_size, &mut self.rng)
            {
                let mut batch = self.buffer.gather(&indices);
                batch.normalize_advantages();
                let n = batch.len;
                let observations = Tensor::<B, 2>::from_data(
                    TensorData::new(batch.observations, [n, observation_dim]),
                    &device,
                );
                let actions = Tensor::<B, 2>::from_data(
                    TensorData::new(batch.actions, [n, action_dim]),
                    &device,
                );
                let old_log_probs =
                    Tensor::<B, 1>::from_data(TensorData::new(batch.old_log_probs, [n]), &device);
                let advantages =
                    Tensor::<B, 1>::from_data(TensorData::new(batch.advantages, [n]), &device);
                let returns =
                    Tensor::<B, 1>::from_data(TensorData::new(batch.returns, [n]), &device);

                let (means, values) = self.model.forward(observations);
                let log_ratio = self.model.log_prob(means, actions) - old_log_probs;
                let ratio = log_ratio.clone().exp();
                let surrogate = advantages.clone() * ratio.clone();
                let clipped = advantages * ratio.clone().clamp(1.0 - clip, 1.0 + clip);
                let policy_loss = -surrogate.min_pair(clipped).mean();
                let value_loss = (returns - values).powf_scalar(2.0).mean();
                let entropy_loss = -self.model.entropy();
                let loss = policy_loss.clone()
                    + entropy_loss.clone().mul_scalar(self.config.ent_coef)
                    + value_loss.clone().mul_scalar(self.config.vf_coef);

                let ratios = tensor_values(ratio.detach());
                let log_ratios = tensor_values(log_ratio.detach());
                metrics.approx_kl += mean(
                    ratios
                        .iter()
                        .zip(&log_ratios)
                        .map(|(ratio, log_ratio)| (ratio - 1.0) - log_ratio),
                )
                .unwrap_or_default();
                metrics.clip_fraction += mean(
                    ratios
                        .iter()
                        .map(|ratio| if (ratio - 1.0).abs() > clip { 1.0 } else { 0.0 }),
                )
                .unwrap_or_default();
                metrics.policy_loss += scalar(policy_loss);
                metrics.value_loss += scalar(value_loss);
                metrics.entropy_loss += scalar(entropy_loss);
                metrics.loss += scalar(loss.clone());
                metrics.gradient_steps += 1;

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &self.model);
                let model = self.model.clone();
                self.model = self
                    .optimizer
                    .step(self.config.learning_rate, model, grads);
            }
        }
        if metrics.gradient_steps > 0 {
            let steps = metrics.gradient_steps as f32;
            metrics.policy_loss /= steps;
            metrics.value_loss /= steps;
            metrics.entropy_loss /= steps;
            metrics.approx_kl /= steps;
            metrics.clip_fraction /= steps;
            metrics.loss /= steps;
        }
        metrics.explained_variance = self.buffer.explained_variance();
        metrics.std = mean(self.model.std_values()).unwrap_or_default();
        metrics
    }

    fn print_progress(
        &self,
        metrics: &UpdateMetrics,
        started: Instant,
        start_timesteps: usize,
        total_timesteps: usize,
    ) {
        let elapsed = started.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            ((self.num_timesteps - start_timesteps) as f64 / elapsed) as usize
        } else {
            0
        };
        let mut rows: Vec<(&str, String)> = Vec::new();
        if let Some(length) = mean(self.episode_lengths.iter().map(|len| *len as f32)) {
            rows.push(("rollout/ep_len_mean", format!("{length:.1}")));
        }
        if let Some(reward) = self.mean_episode_return() {
            rows.push(("rollout/ep_rew_mean", format!("{reward:.4}")));
        }
        rows.extend([
            ("time/fps", fps.to_string()),
            ("time/iterations", self.iterations.to_string()),
            ("time/time_elapsed", format!("{elapsed:.0}")),
            (
                "time/total_timesteps",
                format!("{}/{}", self.num_timesteps, total_timesteps),
            ),
            ("train/approx_kl", format!("{:.6}", metrics.approx_kl)),
            ("train/clip_fraction", format!("{:.4}", metrics.clip_fraction)),
            ("train/entropy_loss", format!("{:.4}", metrics.entropy_loss)),
            (
                "train/explained_variance",
                format!("{:.4}", metrics.explained_variance),
            ),
            ("train/loss", format!("{:.4}", metrics.loss)),
            ("train/policy_loss", format!("{:.5}", metrics.policy_loss)),
            ("train/std", format!("{:.4}", metrics.std)),
            ("train/value_loss", format!("{:.4}", metrics.value_loss)),
            ("train/n_updates", metrics.gradient_steps.to_string()),
        ]);
        let rule = "-".repeat(46);
        println!("{rule}");
        for (key, value) in rows {
            println!("| {key:<26} | {value:<13} |");
        }
        println!("{rule}");
    }

    /// Action for `observation`, clipped to the action space. Deterministic
    /// prediction returns the distribution mean.
    pub fn predict(&mut self, observation: &[f32], deterministic: bool) -> Vec<f32> {
        let means = self.model.mean_action(observation);
        let action = if deterministic {
            means
        } else {
            self.sample_action(&means).0
        };
        self.action_space.clip(&action)
    }

    pub fn save(&self, path: &Path) -> Result<(), ExperimentError> {
        save_checkpoint(path, &self.model, self.metadata())
    }
}

fn mean(values: impl IntoIterator<Item = f32>) -> Option<f32> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f32)
}

fn scalar<B: AutodiffBackend>(tensor: Tensor<B, 1>) -> f32 {
    tensor_values(tensor.detach())
        .first()
        .copied()
        .unwrap_or_default()
}
