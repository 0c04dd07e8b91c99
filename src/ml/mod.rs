pub mod checkpoint;
pub mod policy;
pub mod rollout;
pub mod training;

pub use checkpoint::{PolicyCheckpoint, PolicyMetadata, load_checkpoint, save_checkpoint};
pub use policy::{ActorCritic, DEFAULT_HIDDEN, DenseLayer};
pub use rollout::{MiniBatch, RolloutBuffer, Transition};
pub use training::{PpoConfig, PpoTrainer, UpdateMetrics};
