//! Decorators layered on top of a building environment.
//!
//! A [`WrapperStack`] is an ordered list of [`WrapperSpec`]s, innermost first.
//! Applying the same stack value to the training and evaluation environments
//! is how the experiment keeps both pipelines identical.

pub mod flow_control;
pub mod heat_pump;
pub mod logger;
pub mod multi_obs;
pub mod normalize;

use crate::env::Environment;
use crate::error::EnvError;

pub use flow_control::ExtremeFlowControlWrapper;
pub use heat_pump::HeatPumpEnergyWrapper;
pub use logger::LoggerWrapper;
pub use multi_obs::MultiObsWrapper;
pub use normalize::{NormalizeAction, NormalizeObservation, RunningMeanStd, write_vector};

/// One layer of a wrapper stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WrapperSpec {
    HeatPumpEnergy,
    MultiObs { n: usize },
    NormalizeObservation,
    ExtremeFlowControl,
    NormalizeAction,
    Logger,
}

impl WrapperSpec {
    pub fn layer_name(&self) -> &'static str {
        match self {
            Self::HeatPumpEnergy => HeatPumpEnergyWrapper::NAME,
            Self::MultiObs { .. } => MultiObsWrapper::NAME,
            Self::NormalizeObservation => NormalizeObservation::NAME,
            Self::ExtremeFlowControl => ExtremeFlowControlWrapper::NAME,
            Self::NormalizeAction => NormalizeAction::NAME,
            Self::Logger => LoggerWrapper::NAME,
        }
    }

    pub fn wrap(&self, env: Box<dyn Environment>) -> Result<Box<dyn Environment>, EnvError> {
        Ok(match self {
            Self::HeatPumpEnergy => Box::new(HeatPumpEnergyWrapper::new(env)?),
            Self::MultiObs { n } => Box::new(MultiObsWrapper::new(env, *n)?),
            Self::NormalizeObservation => Box::new(NormalizeObservation::new(env)),
            Self::ExtremeFlowControl => Box::new(ExtremeFlowControlWrapper::new(env)?),
            Self::NormalizeAction => Box::new(NormalizeAction::new(env)),
            Self::Logger => Box::new(LoggerWrapper::new(env)?),
        })
    }
}

/// Ordered wrapper specification, innermost layer first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WrapperStack {
    specs: Vec<WrapperSpec>,
}

impl WrapperStack {
    pub fn new() -> Self {
        Self { specs: Vec::new() }
    }

    /// The radiant-heating pipeline with an `n`-step observation history.
    pub fn radiant(n: usize) -> Self {
        Self::new()
            .with(WrapperSpec::HeatPumpEnergy)
            .with(WrapperSpec::MultiObs { n })
            .with(WrapperSpec::NormalizeObservation)
            .with(WrapperSpec::ExtremeFlowControl)
            .with(WrapperSpec::NormalizeAction)
            .with(WrapperSpec::Logger)
    }

    pub fn with(mut self, spec: WrapperSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn without(mut self, layer_name: &str) -> Self {
        self.specs.retain(|spec| spec.layer_name() != layer_name);
        self
    }

    pub fn specs(&self) -> &[WrapperSpec] {
        &self.specs
    }

    pub fn contains(&self, layer_name: &str) -> bool {
        self.specs.iter().any(|spec| spec.layer_name() == layer_name)
    }

    /// Layer names the stack produces, outermost first.
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.specs.iter().rev().map(WrapperSpec::layer_name).collect()
    }

    pub fn apply(&self, env: Box<dyn Environment>) -> Result<Box<dyn Environment>, EnvError> {
        self.specs.iter().try_fold(env, |env, spec| spec.wrap(env))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::CounterEnv;
    use super::*;
    use crate::env::{get_wrapper_attr, is_wrapped};

    #[test]
    fn radiant_stack_layers_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stack = WrapperStack::radiant(3);
        let env = stack
            .apply(Box::new(CounterEnv::new(dir.path().to_path_buf(), 4)))
            .expect("stack");
        let mut expected = stack.layer_names();
        expected.push("CounterEnv");
        assert_eq!(env.layers(), expected);
        assert_eq!(env.layers()[0], LoggerWrapper::NAME);
        assert!(is_wrapped(env.as_ref(), NormalizeObservation::NAME));
        assert_eq!(env.observation_dim(), 3 * 5);
    }

    #[test]
    fn attribute_lookup_reaches_the_base_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = WrapperStack::radiant(1)
            .apply(Box::new(CounterEnv::new(dir.path().to_path_buf(), 4)))
            .expect("stack");
        let tpe = get_wrapper_attr(env.as_ref(), "timestep_per_episode")
            .and_then(|attr| attr.as_count("timestep_per_episode"))
            .expect("count");
        assert_eq!(tpe, 5);
        assert!(get_wrapper_attr(env.as_ref(), "no_such_attribute").is_err());
    }

    #[test]
    fn without_drops_a_layer() {
        let stack = WrapperStack::radiant(2).without(NormalizeObservation::NAME);
        assert!(!stack.contains(NormalizeObservation::NAME));
        assert_eq!(stack.specs().len(), 5);
    }
}
