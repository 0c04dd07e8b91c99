use std::fs;
use std::path::Path;

use burn::module::{AutodiffModule, Module};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use super::policy::ActorCritic;
use crate::error::ExperimentError;

/// Everything needed to rebuild the network and interpret its actions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetadata {
    pub observation_dim: usize,
    pub action_dim: usize,
    pub hidden: Vec<usize>,
    pub action_low: Vec<f32>,
    pub action_high: Vec<f32>,
    pub num_timesteps: usize,
    pub learning_rate: f64,
    pub n_steps: usize,
    pub batch_size: usize,
    pub n_epochs: usize,
    pub gamma: f32,
    pub gae_lambda: f32,
    pub clip_range: f32,
    pub seed: u64,
}

#[derive(Serialize, Deserialize)]
pub struct PolicyCheckpoint {
    pub metadata: PolicyMetadata,
    pub weights: Vec<u8>,
}

impl PolicyCheckpoint {
    pub fn from_model<B: AutodiffBackend>(
        model: &ActorCritic<B>,
        metadata: PolicyMetadata,
    ) -> Result<Self, ExperimentError> {
        let record = model.clone().valid().into_record();
        let weights = BinBytesRecorder::<FullPrecisionSettings>::new().record(record, ())?;
        Ok(Self { metadata, weights })
    }

    /// Rebuilds the network on any backend.
    pub fn into_model<B: Backend>(
        self,
    ) -> Result<(ActorCritic<B>, PolicyMetadata), ExperimentError> {
        let device = B::Device::default();
        let mut rng = StdRng::seed_from_u64(self.metadata.seed);
        let model = ActorCritic::<B>::new(
            self.metadata.observation_dim,
            self.metadata.action_dim,
            &self.metadata.hidden,
            &mut rng,
        );
        let record = BinBytesRecorder::<FullPrecisionSettings>::new()
            .load::<<ActorCritic<B> as Module<B>>::Record>(self.weights, &device)?;
        Ok((model.load_record(record), self.metadata))
    }
}

pub fn save_checkpoint<B: AutodiffBackend>(
    path: &Path,
    model: &ActorCritic<B>,
    metadata: PolicyMetadata,
) -> Result<(), ExperimentError> {
    let checkpoint = PolicyCheckpoint::from_model(model, metadata)?;
    let bytes = bincode::serde::encode_to_vec(&checkpoint, bincode::config::standard())?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

pub fn load_checkpoint(path: &Path) -> Result<PolicyCheckpoint, ExperimentError> {
    let bytes = fs::read(path)?;
    let (checkpoint, _): (PolicyCheckpoint, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
    Ok(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;

    fn metadata() -> PolicyMetadata {
        PolicyMetadata {
            observation_dim: 3,
            action_dim: 2,
            hidden: vec![8, 8],
            action_low: vec![-1.0, -1.0],
            action_high: vec![1.0, 1.0],
            num_timesteps: 128,
            learning_rate: 3.0e-4,
            n_steps: 64,
            batch_size: 16,
            n_epochs: 2,
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_range: 0.2,
            seed: 5,
        }
    }

    #[test]
    fn checkpoint_restores_the_same_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("model.zip");
        // A different seed than the metadata, so loading must overwrite weights.
        let model = ActorCritic::<Autodiff<NdArray<f32>>>::new(
            3,
            2,
            &[8, 8],
            &mut StdRng::seed_from_u64(77),
        );
        save_checkpoint(&path, &model, metadata()).expect("save");

        let (restored, restored_meta) = load_checkpoint(&path)
            .expect("load")
            .into_model::<NdArray<f32>>()
            .expect("model");
        assert_eq!(restored_meta, metadata());
        let observation = [0.1, -0.4, 2.0];
        let (expected_mean, expected_value) = model.evaluate(&observation);
        let (mean, value) = restored.evaluate(&observation);
        for (a, b) in mean.iter().zip(&expected_mean) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!((value - expected_value).abs() < 1e-6);
    }

    #[test]
    fn loading_garbage_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.zip");
        fs::write(&path, [0xFFu8; 3]).expect("write");
        assert!(load_checkpoint(&path).is_err());
    }
}
