//! Reinforcement-learning experiments for radiant-floor heating control: a
//! building simulator, composable environment wrappers, a PPO trainer and the
//! experiment driver that ties them together.

pub mod callbacks;
pub mod cli;
pub mod env;
pub mod error;
pub mod experiment;
pub mod ml;
pub mod visualize;
pub mod wrappers;

pub use crate::callbacks::{Callback, CallbackList, EvalCallback, EvaluationRecord, TrainingState};
pub use crate::env::{
    ActionSpace, Attribute, DEFAULT_SCENARIO, Environment, Info, Scenario, Step, get_wrapper_attr,
    is_wrapped, make,
};
pub use crate::error::{EnvError, ExperimentError};
pub use crate::experiment::{
    ExperimentConfig, ExperimentPaths, ExperimentSummary, TrainBackend, evaluation_frequency,
    total_timesteps, train_agent,
};
pub use crate::ml::{ActorCritic, PolicyCheckpoint, PpoConfig, PpoTrainer, load_checkpoint};
pub use crate::wrappers::{WrapperSpec, WrapperStack};
