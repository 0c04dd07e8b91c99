use rand::Rng;
use rand::seq::SliceRandom;

/// One environment transition as stored for the next policy update.
#[derive(Clone, Debug)]
pub struct Transition {
    pub observation: Vec<f32>,
    pub action: Vec<f32>,
    pub reward: f32,
    pub value: f32,
    pub log_prob: f32,
    /// Whether `observation` is the first of an episode.
    pub episode_start: bool,
}

/// Flattened slice of the buffer used for one gradient step.
#[derive(Clone, Debug, Default)]
pub struct MiniBatch {
    pub observations: Vec<f32>,
    pub actions: Vec<f32>,
    pub old_log_probs: Vec<f32>,
    pub advantages: Vec<f32>,
    pub returns: Vec<f32>,
    pub len: usize,
}

impl MiniBatch {
    /// Rescales advantages to zero mean and unit variance. Single-sample
    /// batches are left alone.
    pub fn normalize_advantages(&mut self) {
        if self.advantages.len() < 2 {
            return;
        }
        let n = self.advantages.len() as f32;
        let mean = self.advantages.iter().sum::<f32>() / n;
        let variance = self
            .advantages
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f32>()
            / (n - 1.0);
        let std = variance.sqrt() + 1.0e-8;
        for value in &mut self.advantages {
            *value = (*value - mean) / std;
        }
    }
}

/// Fixed-capacity on-policy storage with generalised advantage estimation.
#[derive(Clone, Debug)]
pub struct RolloutBuffer {
    capacity: usize,
    observation_dim: usize,
    action_dim: usize,
    observations: Vec<f32>,
    actions: Vec<f32>,
    rewards: Vec<f32>,
    values: Vec<f32>,
    log_probs: Vec<f32>,
    episode_starts: Vec<bool>,
    advantages: Vec<f32>,
    returns: Vec<f32>,
}

impl RolloutBuffer {
    pub fn new(capacity: usize, observation_dim: usize, action_dim: usize) -> Self {
        Self {
            capacity,
            observation_dim,
            action_dim,
            observations: Vec::with_capacity(capacity * observation_dim),
            actions: Vec::with_capacity(capacity * action_dim),
            rewards: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            log_probs: Vec::with_capacity(capacity),
            episode_starts: Vec::with_capacity(capacity),
            advantages: Vec::new(),
            returns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.observations.clear();
        self.actions.clear();
        self.rewards.clear();
        self.values.clear();
        self.log_probs.clear();
        self.episode_starts.clear();
        self.advantages.clear();
        self.returns.clear();
    }

    pub fn push(&mut self, transition: Transition) {
        assert_eq!(transition.observation.len(), self.observation_dim);
        assert_eq!(transition.action.len(), self.action_dim);
        self.observations.extend_from_slice(&transition.observation);
        self.actions.extend_from_slice(&transition.action);
        self.rewards.push(transition.reward);
        self.values.push(transition.value);
        self.log_probs.push(transition.log_prob);
        self.episode_starts.push(transition.episode_start);
    }

    pub fn rewards(&self) -> &[f32] {
        &self.rewards
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn advantages(&self) -> &[f32] {
        &self.advantages
    }

    pub fn returns(&self) -> &[f32] {
        &self.returns
    }

    /// GAE(λ) over the stored steps. `last_value` estimates the observation
    /// following the final step and `last_done` says whether that observation
    /// starts a new episode.
    pub fn compute_returns_and_advantage(
        &mut self,
        last_value: f32,
        last_done: bool,
        gamma: f32,
        gae_lambda: f32,
    ) {
        let len = self.len();
        self.advantages = vec![0.0; len];
        let mut last_gae = 0.0;
        for step in (0..len).rev() {
            let (next_non_terminal, next_value) = if step + 1 == len {
                (if last_done { 0.0 } else { 1.0 }, last_value)
            } else {
                let start = self.episode_starts[step + 1];
                (if start { 0.0 } else { 1.0 }, self.values[step + 1])
            };
            let delta =
                self.rewards[step] + gamma * next_value * next_non_terminal - self.values[step];
            last_gae = delta + gamma * gae_lambda * next_non_terminal * last_gae;
            self.advantages[step] = last_gae;
        }
        self.returns = self
            .advantages
            .iter()
            .zip(&self.values)
            .map(|(advantage, value)| advantage + value)
            .collect();
    }

    /// Shuffled index chunks covering the whole buffer once.
    pub fn minibatch_indices<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);
        indices
            .chunks(batch_size.max(1))
            .map(<[usize]>::to_vec)
            .collect()
    }

    pub fn gather(&self, indices: &[usize]) -> MiniBatch {
        let mut batch = MiniBatch {
            observations: Vec::with_capacity(indices.len() * self.observation_dim),
            actions: Vec::with_capacity(indices.len() * self.action_dim),
            len: indices.len(),
            ..MiniBatch::default()
        };
        for &index in indices {
            let obs = index * self.observation_dim;
            batch
                .observations
                .extend_from_slice(&self.observations[obs..obs + self.observation_dim]);
            let act = index * self.action_dim;
            batch
                .actions
                .extend_from_slice(&self.actions[act..act + self.action_dim]);
            batch.old_log_probs.push(self.log_probs[index]);
            batch.advantages.push(self.advantages[index]);
            batch.returns.push(self.returns[index]);
        }
        batch
    }

    /// Fraction of return variance explained by the value estimates.
    pub fn explained_variance(&self) -> f32 {
        let var_returns = variance(&self.returns);
        if var_returns == 0.0 {
            return f32::NAN;
        }
        let residuals: Vec<f32> = self
            .returns
            .iter()
            .zip(&self.values)
            .map(|(ret, value)| ret - value)
            .collect();
        1.0 - variance(&residuals) / var_returns
    }
}

fn variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    values.iter().map(|value| (value - mean).powi(2)).sum::<f32>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn transition(reward: f32, value: f32, episode_start: bool) -> Transition {
        Transition {
            observation: vec![0.0],
            action: vec![0.0],
            reward,
            value,
            log_prob: 0.0,
            episode_start,
        }
    }

    #[test]
    fn gae_with_lambda_one_is_discounted_return() {
        let mut buffer = RolloutBuffer::new(3, 1, 1);
        for (index, reward) in [1.0, 1.0, 1.0].into_iter().enumerate() {
            buffer.push(transition(reward, 0.0, index == 0));
        }
        buffer.compute_returns_and_advantage(0.0, true, 0.5, 1.0);
        assert_eq!(buffer.returns(), &[1.75, 1.5, 1.0]);
        assert_eq!(buffer.advantages(), &[1.75, 1.5, 1.0]);
    }

    #[test]
    fn episode_boundaries_stop_bootstrapping() {
        let mut buffer = RolloutBuffer::new(3, 1, 1);
        buffer.push(transition(1.0, 0.5, true));
        buffer.push(transition(2.0, 0.5, true));
        buffer.push(transition(3.0, 0.5, false));
        buffer.compute_returns_and_advantage(10.0, false, 1.0, 0.0);
        // step 0 ends its episode; step 2 bootstraps from last_value.
        assert_eq!(buffer.advantages(), &[0.5, 2.0, 12.5]);
    }

    #[test]
    fn minibatches_cover_every_index_once() {
        let mut buffer = RolloutBuffer::new(10, 1, 1);
        for _ in 0..10 {
            buffer.push(transition(0.0, 0.0, false));
        }
        buffer.compute_returns_and_advantage(0.0, false, 0.99, 0.95);
        let mut rng = StdRng::seed_from_u64(3);
        let chunks = buffer.minibatch_indices(4, &mut rng);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        let mut seen: Vec<usize> = chunks.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn advantage_normalisation_centres_batch() {
        let mut batch = MiniBatch {
            advantages: vec![1.0, 2.0, 3.0],
            ..MiniBatch::default()
        };
        batch.normalize_advantages();
        let mean: f32 = batch.advantages.iter().sum::<f32>() / 3.0;
        assert!(mean.abs() < 1e-6);
        assert!((batch.advantages[2] - 1.0).abs() < 1e-6);
    }
}
