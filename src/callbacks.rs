//! Hooks invoked by the trainer while it learns.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::env::{ActionSpace, Attribute, Environment, get_wrapper_attr, is_wrapped};
use crate::error::{EnvError, ExperimentError};
use crate::ml::{ActorCritic, PolicyMetadata, PpoConfig, save_checkpoint};
use crate::visualize::{describe_evaluation, render_evaluation_curve};
use crate::wrappers::NormalizeObservation;

const EVALUATIONS_HEADER: &str =
    "timesteps,mean_reward,std_reward,mean_ep_length,mean_power,comfort_violation_pct";
const NORMALIZATION_ATTRIBUTES: [&str; 3] = ["mean", "var", "count"];

/// Read-only view of the trainer handed to callbacks.
pub struct TrainingState<'a, B: AutodiffBackend> {
    pub model: &'a ActorCritic<B>,
    pub train_env: &'a dyn Environment,
    pub config: &'a PpoConfig,
    pub action_space: &'a ActionSpace,
    pub num_timesteps: usize,
    pub total_timesteps: usize,
}

impl<B: AutodiffBackend> TrainingState<'_, B> {
    pub fn metadata(&self) -> PolicyMetadata {
        PolicyMetadata {
            observation_dim: self.model.observation_dim(),
            action_dim: self.model.action_dim(),
            hidden: self.model.hidden(),
            action_low: self.action_space.low.clone(),
            action_high: self.action_space.high.clone(),
            num_timesteps: self.num_timesteps,
            learning_rate: self.config.learning_rate,
            n_steps: self.config.n_steps,
            batch_size: self.config.batch_size,
            n_epochs: self.config.n_epochs,
            gamma: self.config.gamma,
            gae_lambda: self.config.gae_lambda,
            clip_range: self.config.clip_range,
            seed: self.config.seed,
        }
    }
}

pub trait Callback<B: AutodiffBackend> {
    fn on_training_start(&mut self, _state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        Ok(())
    }

    /// Called after every environment step; `Ok(false)` stops training.
    fn on_step(&mut self, state: &TrainingState<'_, B>) -> Result<bool, ExperimentError>;

    fn on_rollout_end(&mut self, _state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        Ok(())
    }

    fn on_training_end(&mut self, _state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        Ok(())
    }
}

impl<B: AutodiffBackend, C: Callback<B> + ?Sized> Callback<B> for &mut C {
    fn on_training_start(&mut self, state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        (**self).on_training_start(state)
    }

    fn on_step(&mut self, state: &TrainingState<'_, B>) -> Result<bool, ExperimentError> {
        (**self).on_step(state)
    }

    fn on_rollout_end(&mut self, state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        (**self).on_rollout_end(state)
    }

    fn on_training_end(&mut self, state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        (**self).on_training_end(state)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCallback;

impl<B: AutodiffBackend> Callback<B> for NoopCallback {
    fn on_step(&mut self, _state: &TrainingState<'_, B>) -> Result<bool, ExperimentError> {
        Ok(true)
    }
}

/// Runs several callbacks in order; training continues only while all agree.
pub struct CallbackList<'a, B: AutodiffBackend> {
    callbacks: Vec<Box<dyn Callback<B> + 'a>>,
}

impl<'a, B: AutodiffBackend> CallbackList<'a, B> {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }

    pub fn with(mut self, callback: impl Callback<B> + 'a) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl<B: AutodiffBackend> Default for CallbackList<'_, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> Callback<B> for CallbackList<'_, B> {
    fn on_training_start(&mut self, state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        for callback in &mut self.callbacks {
            callback.on_training_start(state)?;
        }
        Ok(())
    }

    fn on_step(&mut self, state: &TrainingState<'_, B>) -> Result<bool, ExperimentError> {
        let mut keep_going = true;
        for callback in &mut self.callbacks {
            keep_going &= callback.on_step(state)?;
        }
        Ok(keep_going)
    }

    fn on_rollout_end(&mut self, state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        for callback in &mut self.callbacks {
            callback.on_rollout_end(state)?;
        }
        Ok(())
    }

    fn on_training_end(&mut self, state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        for callback in &mut self.callbacks {
            callback.on_training_end(state)?;
        }
        Ok(())
    }
}

/// Result of one evaluation round.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationRecord {
    pub timesteps: usize,
    pub mean_reward: f64,
    pub std_reward: f64,
    pub mean_ep_length: f64,
    pub mean_power: f64,
    pub comfort_violation_pct: f64,
}

impl EvaluationRecord {
    fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.timesteps,
            self.mean_reward,
            self.std_reward,
            self.mean_ep_length,
            self.mean_power,
            self.comfort_violation_pct
        )
    }
}

struct EpisodeOutcome {
    reward: f64,
    length: usize,
    power: f64,
    violation_steps: usize,
}

/// Periodically evaluates the policy on a separate environment.
///
/// Every `eval_freq` steps the training normalization statistics are copied
/// into the evaluation stack (frozen there), `n_eval_episodes` episodes are
/// played, the result is appended to `evaluations.csv`, and the policy is
/// saved as `best_model.zip` whenever the mean reward improves.
pub struct EvalCallback<'e> {
    eval_env: &'e mut dyn Environment,
    best_model_save_path: PathBuf,
    log_path: PathBuf,
    eval_freq: usize,
    n_eval_episodes: usize,
    deterministic: bool,
    verbose: bool,
    rng: StdRng,
    n_calls: usize,
    best_mean_reward: f64,
    history: Vec<EvaluationRecord>,
}

impl<'e> EvalCallback<'e> {
    pub fn new(
        eval_env: &'e mut dyn Environment,
        best_model_save_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        eval_freq: usize,
    ) -> Self {
        Self {
            eval_env,
            best_model_save_path: best_model_save_path.into(),
            log_path: log_path.into(),
            eval_freq,
            n_eval_episodes: 1,
            deterministic: true,
            verbose: true,
            rng: StdRng::seed_from_u64(0),
            n_calls: 0,
            best_mean_reward: f64::NEG_INFINITY,
            history: Vec::new(),
        }
    }

    pub fn with_n_eval_episodes(mut self, episodes: usize) -> Self {
        self.n_eval_episodes = episodes.max(1);
        self
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Seeds action sampling for stochastic evaluation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn eval_freq(&self) -> usize {
        self.eval_freq
    }

    pub fn n_calls(&self) -> usize {
        self.n_calls
    }

    pub fn history(&self) -> &[EvaluationRecord] {
        &self.history
    }

    pub fn best_mean_reward(&self) -> Option<f64> {
        self.best_mean_reward
            .is_finite()
            .then_some(self.best_mean_reward)
    }

    pub fn evaluations_path(&self) -> PathBuf {
        self.log_path.join("evaluations.csv")
    }

    pub fn best_model_path(&self) -> PathBuf {
        self.best_model_save_path.join("best_model.zip")
    }

    /// Copies the running observation statistics from the training stack and
    /// freezes them in the evaluation stack.
    fn sync_normalization(&mut self, train_env: &dyn Environment) -> Result<(), EnvError> {
        if !is_wrapped(train_env, NormalizeObservation::NAME)
            || !is_wrapped(self.eval_env, NormalizeObservation::NAME)
        {
            return Ok(());
        }
        for name in NORMALIZATION_ATTRIBUTES {
            let value = get_wrapper_attr(train_env, name)?;
            self.eval_env.set_attribute(name, value)?;
        }
        self.eval_env.set_attribute("update", Attribute::Flag(false))
    }

    fn play_episode<B: AutodiffBackend>(
        &mut self,
        model: &ActorCritic<B>,
    ) -> Result<EpisodeOutcome, EnvError> {
        let space = self.eval_env.action_space();
        let stds = if self.deterministic {
            Vec::new()
        } else {
            model.std_values()
        };
        let (mut observation, _) = self.eval_env.reset(None)?;
        let mut outcome = EpisodeOutcome {
            reward: 0.0,
            length: 0,
            power: 0.0,
            violation_steps: 0,
        };
        loop {
            let mut action = model.mean_action(&observation);
            for (value, std) in action.iter_mut().zip(&stds) {
                let noise: f32 = self.rng.sample(StandardNormal);
                *value += std * noise;
            }
            let step = self.eval_env.step(&space.clip(&action))?;
            outcome.reward += step.reward as f64;
            outcome.length += 1;
            outcome.power += step.info.get("total_power_demand").copied().unwrap_or(0.0);
            if step.info.get("comfort_violation").copied().unwrap_or(0.0) > 0.0 {
                outcome.violation_steps += 1;
            }
            if step.done() {
                return Ok(outcome);
            }
            observation = step.observation;
        }
    }

    fn evaluate<B: AutodiffBackend>(
        &mut self,
        state: &TrainingState<'_, B>,
    ) -> Result<(), ExperimentError> {
        self.sync_normalization(state.train_env)?;
        let mut outcomes = Vec::with_capacity(self.n_eval_episodes);
        for _ in 0..self.n_eval_episodes {
            outcomes.push(self.play_episode(state.model)?);
        }
        let episodes = outcomes.len() as f64;
        let mean_reward = outcomes.iter().map(|o| o.reward).sum::<f64>() / episodes;
        let std_reward = (outcomes
            .iter()
            .map(|o| (o.reward - mean_reward).powi(2))
            .sum::<f64>()
            / episodes)
            .sqrt();
        let per_step = |total: f64, length: usize| {
            if length == 0 {
                0.0
            } else {
                total / length as f64
            }
        };
        let record = EvaluationRecord {
            timesteps: state.num_timesteps,
            mean_reward,
            std_reward,
            mean_ep_length: outcomes.iter().map(|o| o.length as f64).sum::<f64>() / episodes,
            mean_power: outcomes
                .iter()
                .map(|o| per_step(o.power, o.length))
                .sum::<f64>()
                / episodes,
            comfort_violation_pct: outcomes
                .iter()
                .map(|o| per_step(o.violation_steps as f64, o.length) * 100.0)
                .sum::<f64>()
                / episodes,
        };
        self.append_record(&record)?;
        if self.verbose {
            println!("{}", describe_evaluation(&record));
        }
        if mean_reward > self.best_mean_reward {
            save_checkpoint(&self.best_model_path(), state.model, state.metadata())?;
            self.best_mean_reward = mean_reward;
            if self.verbose {
                println!("New best mean reward!");
            }
        }
        self.history.push(record);
        Ok(())
    }

    fn append_record(&self, record: &EvaluationRecord) -> Result<(), ExperimentError> {
        let path = self.evaluations_path();
        let new_file = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if new_file {
            writeln!(file, "{EVALUATIONS_HEADER}")?;
        }
        writeln!(file, "{}", record.csv_row())?;
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<(), ExperimentError> {
    fs::create_dir_all(path).map_err(|err| EnvError::io(path, err).into())
}

impl<B: AutodiffBackend> Callback<B> for EvalCallback<'_> {
    fn on_training_start(&mut self, _state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        create_dir(&self.log_path)?;
        create_dir(&self.best_model_save_path)
    }

    fn on_step(&mut self, state: &TrainingState<'_, B>) -> Result<bool, ExperimentError> {
        self.n_calls += 1;
        if self.eval_freq > 0 && self.n_calls % self.eval_freq == 0 {
            self.evaluate(state)?;
        }
        Ok(true)
    }

    fn on_training_end(&mut self, _state: &TrainingState<'_, B>) -> Result<(), ExperimentError> {
        if self.history.is_empty() {
            return Ok(());
        }
        let chart = self.log_path.join("evaluations.png");
        // A missing font or image codec should not discard a finished run.
        if let Err(err) = render_evaluation_curve(&chart, &self.history) {
            eprintln!("warning: could not render {}: {err}", chart.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use crate::ml::{PpoTrainer, load_checkpoint};
    use crate::wrappers::WrapperStack;
    use crate::wrappers::testing::CounterEnv;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;

    type Backend = Autodiff<NdArray<f32>>;

    fn stacked(dir: &Path) -> Box<dyn Environment> {
        WrapperStack::radiant(1)
            .apply(Box::new(CounterEnv::new(dir.to_path_buf(), 4)))
            .expect("stack")
    }

    fn config() -> PpoConfig {
        PpoConfig::new()
            .with_n_steps(8)
            .with_batch_size(4)
            .with_n_epochs(1)
            .with_hidden(vec![8])
            .with_verbose(false)
    }

    #[test]
    fn evaluates_on_schedule_and_keeps_best_model() {
        let train_dir = tempfile::tempdir().expect("tempdir");
        let eval_dir = tempfile::tempdir().expect("tempdir");
        let log_dir = eval_dir.path().join("best_model");
        let mut eval_env = stacked(eval_dir.path());
        let mut trainer =
            PpoTrainer::<Backend>::new(stacked(train_dir.path()), config()).expect("trainer");
        let mut callback =
            EvalCallback::new(eval_env.as_mut(), &log_dir, &log_dir, 7).with_verbose(false);
        let mut callbacks = CallbackList::<Backend>::new().with(&mut callback);
        trainer.learn(16, &mut callbacks, 1).expect("learn");
        drop(callbacks);

        assert_eq!(callback.n_calls(), 16);
        assert_eq!(callback.history().len(), 2);
        assert_eq!(callback.history()[0].timesteps, 7);
        assert_eq!(callback.history()[0].mean_ep_length, 4.0);
        assert!(callback.best_mean_reward().is_some());
        let csv = fs::read_to_string(callback.evaluations_path()).expect("csv");
        assert_eq!(csv.lines().next(), Some(EVALUATIONS_HEADER));
        assert_eq!(csv.lines().count(), 3);
        let best = load_checkpoint(&callback.best_model_path()).expect("best model");
        assert_eq!(best.metadata.action_low, vec![-1.0, -1.0]);
        drop(callback);

        assert_eq!(eval_env.attribute("update"), Some(Attribute::Flag(false)));
        assert!(matches!(
            eval_env.attribute("count"),
            Some(Attribute::Number(count)) if count > 1.0
        ));
    }

    #[test]
    fn statistics_are_copied_from_the_training_stack() {
        let train_dir = tempfile::tempdir().expect("tempdir");
        let eval_dir = tempfile::tempdir().expect("tempdir");
        let mut train_env = stacked(train_dir.path());
        train_env.reset(None).expect("reset");
        train_env.step(&[0.0, 0.0]).expect("step");
        let mut eval_env = stacked(eval_dir.path());
        let mut callback =
            EvalCallback::new(eval_env.as_mut(), eval_dir.path(), eval_dir.path(), 1);
        callback.sync_normalization(train_env.as_ref()).expect("sync");
        drop(callback);
        for name in NORMALIZATION_ATTRIBUTES {
            assert_eq!(eval_env.attribute(name), train_env.attribute(name));
        }
        assert_eq!(eval_env.attribute("update"), Some(Attribute::Flag(false)));
    }

    #[test]
    fn callback_list_stops_when_any_member_stops() {
        struct Stop;
        impl Callback<Backend> for Stop {
            fn on_step(
                &mut self,
                _state: &TrainingState<'_, Backend>,
            ) -> Result<bool, ExperimentError> {
                Ok(false)
            }
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let mut trainer =
            PpoTrainer::<Backend>::new(stacked(dir.path()), config()).expect("trainer");
        let mut noop = NoopCallback;
        let mut list = CallbackList::<Backend>::new().with(&mut noop).with(Stop);
        assert_eq!(list.len(), 2);
        trainer.learn(100, &mut list, 1).expect("learn");
        assert_eq!(trainer.num_timesteps(), 1);
    }
}
