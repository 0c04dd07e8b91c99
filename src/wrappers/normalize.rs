use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::env::{ActionSpace, Attribute, Environment, Info, Step, get_wrapper_attr};
use crate::error::EnvError;

const INITIAL_COUNT: f64 = 1.0e-4;
const VARIANCE_EPSILON: f64 = 1.0e-8;

/// Running mean and variance merged one sample at a time with the parallel
/// (Chan et al.) update, starting from a tiny pseudo-count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunningMeanStd {
    mean: Vec<f64>,
    var: Vec<f64>,
    count: f64,
}

impl RunningMeanStd {
    pub fn new(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            var: vec![1.0; dim],
            count: INITIAL_COUNT,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn var(&self) -> &[f64] {
        &self.var
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn update(&mut self, sample: &[f32]) -> Result<(), EnvError> {
        if sample.len() != self.dim() {
            return Err(EnvError::InvalidConfiguration(format!(
                "observation has {} values, statistics track {}",
                sample.len(),
                self.dim()
            )));
        }
        let total = self.count + 1.0;
        for (index, value) in sample.iter().enumerate() {
            let delta = *value as f64 - self.mean[index];
            self.mean[index] += delta / total;
            let m2 = self.var[index] * self.count + delta * delta * self.count / total;
            self.var[index] = m2 / total;
        }
        self.count = total;
        Ok(())
    }

    pub fn normalize(&self, sample: &[f32]) -> Vec<f32> {
        sample
            .iter()
            .zip(self.mean.iter().zip(&self.var))
            .map(|(value, (mean, var))| {
                ((*value as f64 - mean) / (var + VARIANCE_EPSILON).sqrt()) as f32
            })
            .collect()
    }

    fn check_dim(&self, name: &str, values: &[f64]) -> Result<(), EnvError> {
        if values.len() != self.dim() {
            return Err(EnvError::InvalidConfiguration(format!(
                "`{name}` needs {} values, got {}",
                self.dim(),
                values.len()
            )));
        }
        Ok(())
    }
}

/// Write one value per line in `%.18e` notation.
pub fn write_vector(path: &Path, values: &[f64]) -> Result<(), EnvError> {
    let file = fs::File::create(path).map_err(|err| EnvError::io(path, err))?;
    let mut writer = BufWriter::new(file);
    for value in values {
        writeln!(writer, "{}", scientific(*value)).map_err(|err| EnvError::io(path, err))?;
    }
    writer.flush().map_err(|err| EnvError::io(path, err))
}

fn scientific(value: f64) -> String {
    let formatted = format!("{value:.18e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => formatted,
    }
}

/// Standardises observations with running statistics.
///
/// Statistics update on every reset and step while `update` is set; the
/// evaluation pipeline turns it off and receives the training statistics
/// through `set_attribute`.
pub struct NormalizeObservation {
    env: Box<dyn Environment>,
    stats: RunningMeanStd,
    update: bool,
}

impl NormalizeObservation {
    pub const NAME: &'static str = "NormalizeObservation";

    pub fn new(env: Box<dyn Environment>) -> Self {
        let stats = RunningMeanStd::new(env.observation_dim());
        Self {
            env,
            stats,
            update: true,
        }
    }

    pub fn stats(&self) -> &RunningMeanStd {
        &self.stats
    }

    fn process(&mut self, observation: &[f32]) -> Result<Vec<f32>, EnvError> {
        if self.update {
            self.stats.update(observation)?;
        }
        Ok(self.stats.normalize(observation))
    }

    fn save_calibration(&self) -> Result<(), EnvError> {
        let workspace =
            get_wrapper_attr(self.env.as_ref(), "workspace_path")?.into_path("workspace_path")?;
        write_vector(&workspace.join("mean.txt"), self.stats.mean())?;
        write_vector(&workspace.join("var.txt"), self.stats.var())
    }
}

impl Environment for NormalizeObservation {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn observation_variables(&self) -> Vec<String> {
        self.env.observation_variables()
    }

    fn action_space(&self) -> ActionSpace {
        self.env.action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f32>, Info), EnvError> {
        let (observation, info) = self.env.reset(seed)?;
        Ok((self.process(&observation)?, info))
    }

    fn step(&mut self, action: &[f32]) -> Result<Step, EnvError> {
        let mut step = self.env.step(action)?;
        step.observation = self.process(&step.observation)?;
        Ok(step)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        let saved = self.save_calibration();
        self.env.close()?;
        saved
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        match name {
            "mean" => Some(Attribute::Vector(self.stats.mean.clone())),
            "var" => Some(Attribute::Vector(self.stats.var.clone())),
            "count" => Some(Attribute::Number(self.stats.count)),
            "update" => Some(Attribute::Flag(self.update)),
            _ => self.env.attribute(name),
        }
    }

    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<(), EnvError> {
        match name {
            "mean" => {
                let mean = value.into_vector(name)?;
                self.stats.check_dim(name, &mean)?;
                self.stats.mean = mean;
                Ok(())
            }
            "var" => {
                let var = value.into_vector(name)?;
                self.stats.check_dim(name, &var)?;
                self.stats.var = var;
                Ok(())
            }
            "count" => {
                self.stats.count = value.as_number(name)?;
                Ok(())
            }
            "update" => {
                self.update = value.as_flag(name)?;
                Ok(())
            }
            _ => self.env.set_attribute(name, value),
        }
    }

    fn layers(&self) -> Vec<&'static str> {
        let mut layers = vec![Self::NAME];
        layers.extend(self.env.layers());
        layers
    }
}

/// Exposes a `[-1, 1]` action box and rescales actions to the inner bounds.
pub struct NormalizeAction {
    env: Box<dyn Environment>,
    inner_space: ActionSpace,
}

impl NormalizeAction {
    pub const NAME: &'static str = "NormalizeAction";

    pub fn new(env: Box<dyn Environment>) -> Self {
        let inner_space = env.action_space();
        Self { env, inner_space }
    }

    pub fn denormalize(&self, action: &[f32]) -> Vec<f32> {
        action
            .iter()
            .zip(self.inner_space.low.iter().zip(&self.inner_space.high))
            .map(|(value, (low, high))| {
                let unit = (value.clamp(-1.0, 1.0) + 1.0) / 2.0;
                low + unit * (high - low)
            })
            .collect()
    }
}

impl Environment for NormalizeAction {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn observation_variables(&self) -> Vec<String> {
        self.env.observation_variables()
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::symmetric(self.inner_space.dim())
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f32>, Info), EnvError> {
        self.env.reset(seed)
    }

    fn step(&mut self, action: &[f32]) -> Result<Step, EnvError> {
        self.action_space().check(action)?;
        let rescaled = self.denormalize(action);
        self.env.step(&rescaled)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        self.env.close()
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        self.env.attribute(name)
    }

    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<(), EnvError> {
        self.env.set_attribute(name, value)
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
    fn running_stats_converge_to_sample_moments() {
        let mut stats = RunningMeanStd::new(1);
        for value in [1.0f32, 2.0, 3.0, 4.0] {
            stats.update(&[value]).expect("update");
        }
        assert!((stats.mean()[0] - 2.5).abs() < 1e-3);
        assert!((stats.var()[0] - 1.25).abs() < 1e-3);
        assert!((stats.count() - 4.0001).abs() < 1e-9);
    }

    #[test]
    fn mismatched_sample_leaves_statistics_untouched() {
        let mut stats = RunningMeanStd::new(2);
        assert!(matches!(
            stats.update(&[1.0]),
            Err(EnvError::InvalidConfiguration(_))
        ));
        assert_eq!(stats, RunningMeanStd::new(2));
    }

    #[test]
    fn scientific_matches_savetxt_layout() {
        assert_eq!(scientific(1.0), "1.000000000000000000e+00");
        assert_eq!(scientific(-0.25), "-2.500000000000000000e-01");
        assert_eq!(scientific(12345.0), "1.234500000000000000e+04");
    }

    #[test]
    fn frozen_statistics_do_not_move() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env =
            NormalizeObservation::new(Box::new(CounterEnv::new(dir.path().to_path_buf(), 10)));
        env.set_attribute("update", Attribute::Flag(false)).expect("flag");
        env.set_attribute("mean", Attribute::Vector(vec![1.0, 5.0, 35.0, 1000.0]))
            .expect("mean");
        env.reset(None).expect("reset");
        let step = env.step(&[0.0, 30.0]).expect("step");
        assert_eq!(env.stats().mean(), &[1.0, 5.0, 35.0, 1000.0]);
        assert!(step.observation[0].abs() < 1e-3);
        assert!(env.set_attribute("var", Attribute::Vector(vec![1.0])).is_err());
    }

    #[test]
    fn close_writes_calibration_to_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env =
            NormalizeObservation::new(Box::new(CounterEnv::new(dir.path().to_path_buf(), 10)));
        env.reset(None).expect("reset");
        env.step(&[0.0, 30.0]).expect("step");
        env.close().expect("close");
        let mean = fs::read_to_string(dir.path().join("mean.txt")).expect("mean.txt");
        assert_eq!(mean.lines().count(), 4);
        assert!(dir.path().join("var.txt").exists());
    }

    #[test]
    fn failed_calibration_write_still_closes_inner_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing");
        let mut env = NormalizeObservation::new(Box::new(CounterEnv::new(missing.clone(), 10)));
        assert!(matches!(env.close(), Err(EnvError::Io { .. })));
        assert_eq!(env.attribute("is_closed"), Some(Attribute::Flag(true)));
        assert!(!missing.join("mean.txt").exists());
    }

    #[test]
    fn actions_are_rescaled_to_inner_bounds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env =
            NormalizeAction::new(Box::new(CounterEnv::new(dir.path().to_path_buf(), 10)));
        assert_eq!(env.action_space(), ActionSpace::symmetric(2));
        assert_eq!(env.denormalize(&[-1.0, 1.0]), vec![0.0, 45.0]);
        assert_eq!(env.denormalize(&[0.0, 0.0]), vec![0.5, 35.0]);
        assert_eq!(env.denormalize(&[3.0, -3.0]), vec![1.0, 25.0]);
        env.reset(None).expect("reset");
        env.step(&[0.0, 0.0]).expect("step");
        let last = env.attribute("last_action").expect("last action");
        assert_eq!(last, Attribute::Vector(vec![0.5, 35.0]));
    }
}
