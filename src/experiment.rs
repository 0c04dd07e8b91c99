//! The training experiment: seed, build and wrap environments, train with
//! periodic evaluation, persist artifacts, close.

use std::fs;
use std::path::{Path, PathBuf};

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use chrono::{Local, NaiveDateTime};

use crate::callbacks::{CallbackList, EvalCallback};
use crate::env::{
    DEFAULT_SCENARIO, Environment, Scenario, get_wrapper_attr, is_wrapped, make,
    timestep_per_episode, workspace_path,
};
use crate::error::ExperimentError;
use crate::ml::{PpoConfig, PpoTrainer};
use crate::wrappers::{NormalizeObservation, WrapperStack, write_vector};

pub type TrainBackend = Autodiff<NdArray<f32>>;

pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_EPISODES: usize = 20;

const TRAIN_ENV_STREAM: u64 = 1;
const EVAL_ENV_STREAM: u64 = 2;
const EVAL_ACTION_STREAM: u64 = 3;

/// Independent seed for a named random stream (splitmix64 finaliser).
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Training budget: one full episode of control steps per requested episode.
pub fn total_timesteps(
    episodes: usize,
    timestep_per_episode: usize,
) -> Result<usize, ExperimentError> {
    if episodes == 0 {
        return Err(ExperimentError::InvalidSchedule("episodes must be positive"));
    }
    control_steps(timestep_per_episode)?
        .checked_mul(episodes)
        .ok_or(ExperimentError::InvalidSchedule("total timesteps overflow"))
}

/// Evaluate every two episodes' worth of callback calls, minus one.
pub fn evaluation_frequency(timestep_per_episode: usize) -> Result<usize, ExperimentError> {
    Ok(control_steps(timestep_per_episode)? * 2 - 1)
}

fn control_steps(timestep_per_episode: usize) -> Result<usize, ExperimentError> {
    if timestep_per_episode < 2 {
        return Err(ExperimentError::InvalidSchedule(
            "an episode needs at least one control step",
        ));
    }
    Ok(timestep_per_episode - 1)
}

/// Names and directories of one repetition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExperimentPaths {
    pub experiment_name: String,
    pub workspace_root: PathBuf,
    pub train_env_name: PathBuf,
    pub eval_env_name: PathBuf,
    pub artifact_dir: PathBuf,
}

impl ExperimentPaths {
    pub fn new(
        output_root: &Path,
        n: u32,
        scenario_id: &str,
        episodes: usize,
        started_at: NaiveDateTime,
    ) -> Self {
        let experiment_name = format!(
            "PPO-{scenario_id}-episodes-{episodes}_{}",
            started_at.format("%Y-%m-%d_%H:%M")
        );
        let workspace_root = output_root.join(format!("n_{n}"));
        Self {
            train_env_name: workspace_root.join(&experiment_name),
            eval_env_name: workspace_root.join(format!("{experiment_name}_EVALUATION")),
            artifact_dir: output_root.join(format!("Eplus-env-n_{n}")),
            workspace_root,
            experiment_name,
        }
    }

    pub fn mean_path(&self) -> PathBuf {
        self.artifact_dir.join("mean.txt")
    }

    pub fn var_path(&self) -> PathBuf {
        self.artifact_dir.join("var.txt")
    }

    pub fn final_model_path(&self) -> PathBuf {
        self.artifact_dir.join("final_model.zip")
    }
}

#[derive(Clone, Debug)]
pub struct ExperimentConfig {
    /// Repetition index; namespaces outputs and sizes the observation history.
    pub n: u32,
    pub seed: u64,
    pub scenario: Scenario,
    pub episodes: usize,
    pub output_root: PathBuf,
    pub wrappers: WrapperStack,
    pub ppo: PpoConfig,
    pub n_eval_episodes: usize,
    /// Fixed start time for reproducible names; `None` uses the local clock.
    pub started_at: Option<NaiveDateTime>,
    pub verbose: bool,
}

impl ExperimentConfig {
    pub fn new(n: u32, seed: u64) -> Result<Self, ExperimentError> {
        Ok(Self {
            n,
            seed,
            scenario: Scenario::lookup(DEFAULT_SCENARIO)?,
            episodes: DEFAULT_EPISODES,
            output_root: PathBuf::from("."),
            wrappers: WrapperStack::radiant(n as usize),
            ppo: PpoConfig::default(),
            n_eval_episodes: 1,
            started_at: None,
            verbose: true,
        })
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_episodes(mut self, episodes: usize) -> Self {
        self.episodes = episodes;
        self
    }

    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    pub fn with_wrappers(mut self, wrappers: WrapperStack) -> Self {
        self.wrappers = wrappers;
        self
    }

    pub fn with_ppo(mut self, ppo: PpoConfig) -> Self {
        self.ppo = ppo;
        self
    }

    pub fn with_started_at(mut self, started_at: NaiveDateTime) -> Self {
        self.started_at = Some(started_at);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// What a finished run produced.
#[derive(Clone, Debug)]
pub struct ExperimentSummary {
    pub paths: ExperimentPaths,
    pub train_workspace: PathBuf,
    pub eval_workspace: PathBuf,
    pub train_layers: Vec<&'static str>,
    pub eval_layers: Vec<&'static str>,
    pub timestep_per_episode: usize,
    pub total_timesteps: usize,
    pub eval_freq: usize,
    pub num_timesteps: usize,
    pub evaluations: usize,
    pub best_mean_reward: Option<f64>,
    pub normalization_saved: bool,
}

fn save_normalization(
    env: &dyn Environment,
    paths: &ExperimentPaths,
) -> Result<bool, ExperimentError> {
    if !is_wrapped(env, NormalizeObservation::NAME) {
        return Ok(false);
    }
    let mean = get_wrapper_attr(env, "mean")?.into_vector("mean")?;
    let var = get_wrapper_attr(env, "var")?.into_vector("var")?;
    write_vector(&paths.mean_path(), &mean)?;
    write_vector(&paths.var_path(), &var)?;
    Ok(true)
}

/// Runs one training repetition end to end.
///
/// Environments are closed only when every step succeeded; on error the
/// failure is returned as-is.
pub fn train_agent(config: ExperimentConfig) -> Result<ExperimentSummary, ExperimentError> {
    let started_at = config
        .started_at
        .unwrap_or_else(|| Local::now().naive_local());
    let paths = ExperimentPaths::new(
        &config.output_root,
        config.n,
        &config.scenario.id,
        config.episodes,
        started_at,
    );
    if config.verbose {
        println!("Experiment {} (seed {})", paths.experiment_name, config.seed);
    }

    let train_env = config.wrappers.apply(make(
        &config.scenario,
        &paths.train_env_name,
        derive_seed(config.seed, TRAIN_ENV_STREAM),
    )?)?;
    let mut eval_env = config.wrappers.apply(make(
        &config.scenario,
        &paths.eval_env_name,
        derive_seed(config.seed, EVAL_ENV_STREAM),
    )?)?;

    let steps_per_episode = timestep_per_episode(train_env.as_ref())?;
    let total = total_timesteps(config.episodes, steps_per_episode)?;
    let eval_freq = evaluation_frequency(steps_per_episode)?;
    let train_workspace = workspace_path(train_env.as_ref())?;
    let eval_workspace = workspace_path(eval_env.as_ref())?;
    let eval_log_path = eval_workspace.join("best_model");
    let train_layers = train_env.layers();
    let eval_layers = eval_env.layers();

    let ppo = config
        .ppo
        .clone()
        .with_seed(config.seed)
        .with_verbose(config.verbose);
    let mut trainer = PpoTrainer::<TrainBackend>::new(train_env, ppo)?;
    let mut eval_callback =
        EvalCallback::new(eval_env.as_mut(), &eval_log_path, &eval_log_path, eval_freq)
            .with_n_eval_episodes(config.n_eval_episodes)
            .with_deterministic(true)
            .with_verbose(config.verbose)
            .with_seed(derive_seed(config.seed, EVAL_ACTION_STREAM));
    let mut callbacks = CallbackList::<TrainBackend>::new().with(&mut eval_callback);
    trainer.learn(total, &mut callbacks, 1)?;
    drop(callbacks);
    let evaluations = eval_callback.history().len();
    let best_mean_reward = eval_callback.best_mean_reward();

    fs::create_dir_all(&paths.artifact_dir)?;
    let normalization_saved = save_normalization(trainer.env(), &paths)?;
    trainer.save(&paths.final_model_path())?;
    let num_timesteps = trainer.num_timesteps();

    let mut train_env = trainer.into_env();
    train_env.close()?;
    eval_env.close()?;

    if config.verbose {
        println!("\n\n###### TRAINING FINISHED ######\n");
    }
    Ok(ExperimentSummary {
        paths,
        train_workspace,
        eval_workspace,
        train_layers,
        eval_layers,
        timestep_per_episode: steps_per_episode,
        total_timesteps: total,
        eval_freq,
        num_timesteps,
        evaluations,
        best_mean_reward,
        normalization_saved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .and_then(|date| date.and_hms_opt(9, 7, 0))
            .expect("timestamp")
    }

    #[test]
    fn schedule_follows_episode_length() {
        assert_eq!(total_timesteps(20, 35041).expect("total"), 20 * 35040);
        assert_eq!(evaluation_frequency(35041).expect("freq"), 70079);
        assert_eq!(evaluation_frequency(2).expect("freq"), 1);
        assert!(total_timesteps(0, 97).is_err());
        assert!(evaluation_frequency(1).is_err());
        assert!(total_timesteps(usize::MAX, 3).is_err());
    }

    #[test]
    fn paths_are_a_pure_function_of_inputs() {
        let root = Path::new("/tmp/runs");
        let first = ExperimentPaths::new(root, 3, DEFAULT_SCENARIO, 20, timestamp());
        assert_eq!(
            first,
            ExperimentPaths::new(root, 3, DEFAULT_SCENARIO, 20, timestamp())
        );
        assert_eq!(
            first.experiment_name,
            format!("PPO-{DEFAULT_SCENARIO}-episodes-20_2024-03-05_09:07")
        );
        assert_eq!(first.artifact_dir, root.join("Eplus-env-n_3"));
        assert_eq!(first.final_model_path(), root.join("Eplus-env-n_3/final_model.zip"));
        assert!(
            first
                .eval_env_name
                .to_string_lossy()
                .ends_with("09:07_EVALUATION")
        );
        let other = ExperimentPaths::new(root, 4, DEFAULT_SCENARIO, 20, timestamp());
        assert_ne!(first.train_env_name, other.train_env_name);
        assert_ne!(first.artifact_dir, other.artifact_dir);
    }

    #[test]
    fn derived_seeds_differ_per_stream() {
        assert_eq!(derive_seed(42, 1), derive_seed(42, 1));
        assert_ne!(derive_seed(42, 1), derive_seed(42, 2));
        assert_ne!(derive_seed(42, 1), derive_seed(43, 1));
    }

    #[test]
    fn default_config_uses_the_radiant_stack() {
        let config = ExperimentConfig::new(2, DEFAULT_SEED).expect("config");
        assert_eq!(config.wrappers, WrapperStack::radiant(2));
        assert_eq!(config.episodes, DEFAULT_EPISODES);
        assert_eq!(config.scenario.id, DEFAULT_SCENARIO);
    }
}
