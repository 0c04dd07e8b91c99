use std::collections::VecDeque;

use crate::env::{ActionSpace, Attribute, Environment, Info, Step};
use crate::error::EnvError;

/// Presents the last `n` observations, oldest first, as one flat vector.
pub struct MultiObsWrapper {
    env: Box<dyn Environment>,
    n: usize,
    history: VecDeque<Vec<f32>>,
}

impl MultiObsWrapper {
    pub const NAME: &'static str = "MultiObsWrapper";

    pub fn new(env: Box<dyn Environment>, n: usize) -> Result<Self, EnvError> {
        if n == 0 {
            return Err(EnvError::InvalidConfiguration(
                "observation history must keep at least one step".into(),
            ));
        }
        Ok(Self {
            env,
            n,
            history: VecDeque::with_capacity(n),
        })
    }

    fn stacked(&self) -> Vec<f32> {
        self.history.iter().flatten().copied().collect()
    }
}

impl Environment for MultiObsWrapper {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn observation_variables(&self) -> Vec<String> {
        let inner = self.env.observation_variables();
        (0..self.n)
            .rev()
            .flat_map(|lag| inner.iter().map(move |name| format!("{name}_t-{lag}")))
            .collect()
    }

    fn action_space(&self) -> ActionSpace {
        self.env.action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f32>, Info), EnvError> {
        let (observation, info) = self.env.reset(seed)?;
        self.history.clear();
        for _ in 0..self.n {
            self.history.push_back(observation.clone());
        }
        Ok((self.stacked(), info))
    }

    fn step(&mut self, action: &[f32]) -> Result<Step, EnvError> {
        let mut step = self.env.step(action)?;
        if self.history.len() == self.n {
            self.history.pop_front();
        }
        self.history.push_back(std::mem::take(&mut step.observation));
        step.observation = self.stacked();
        Ok(step)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        self.env.close()
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        match name {
            "history_length" => Some(Attribute::Count(self.n)),
            _ => self.env.attribute(name),
        }
    }

    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<(), EnvError> {
        match name {
            "history_length" => Err(EnvError::ReadOnlyAttribute(name.to_string())),
            _ => self.env.set_attribute(name, value),
        }
    }

    fn layers(&self) -> Vec<&'static str> {
        let mut layers = vec![Self::NAME];
        layers.extend(self.env.layers());
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrappers::testing::CounterEnv;

    #[test]
    fn zero_history_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = Box::new(CounterEnv::new(dir.path().to_path_buf(), 3));
        assert!(MultiObsWrapper::new(env, 0).is_err());
    }

    #[test]
    fn window_slides_oldest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env =
            MultiObsWrapper::new(Box::new(CounterEnv::new(dir.path().to_path_buf(), 5)), 3)
                .expect("wrapper");
        let (obs, _) = env.reset(None).expect("reset");
        assert_eq!(obs.len(), 12);
        assert_eq!([obs[0], obs[4], obs[8]], [0.0, 0.0, 0.0]);
        env.step(&[0.0, 30.0]).expect("step");
        let step = env.step(&[0.0, 30.0]).expect("step");
        assert_eq!(
            [step.observation[0], step.observation[4], step.observation[8]],
            [0.0, 1.0, 2.0]
        );
        let names = env.observation_variables();
        assert_eq!(names[0], "step_t-2");
        assert_eq!(names[8], "step_t-0");
    }
}
