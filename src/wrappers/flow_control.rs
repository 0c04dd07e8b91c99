use crate::env::{ActionSpace, Attribute, Environment, Info, Step, get_wrapper_attr};
use crate::error::EnvError;

const FLOW_VARIABLE: &str = "water_flow_fraction";

/// Drives the water loop fully on or fully off: the flow action snaps to
/// whichever bound is nearer.
pub struct ExtremeFlowControlWrapper {
    env: Box<dyn Environment>,
    flow_index: usize,
    low: f32,
    high: f32,
}

impl ExtremeFlowControlWrapper {
    pub const NAME: &'static str = "ExtremeFlowControlWrapper";

    pub fn new(env: Box<dyn Environment>) -> Result<Self, EnvError> {
        let variables =
            get_wrapper_attr(env.as_ref(), "action_variables")?.into_names("action_variables")?;
        let flow_index = variables
            .iter()
            .position(|name| name == FLOW_VARIABLE)
            .ok_or_else(|| {
                EnvError::InvalidConfiguration(format!(
                    "flow control requires action variable `{FLOW_VARIABLE}`"
                ))
            })?;
        let space = env.action_space();
        Ok(Self {
            low: space.low[flow_index],
            high: space.high[flow_index],
            env,
            flow_index,
        })
    }

    pub fn snap(&self, action: &[f32]) -> Vec<f32> {
        let mut snapped = action.to_vec();
        let midpoint = (self.low + self.high) / 2.0;
        snapped[self.flow_index] = if action[self.flow_index] >= midpoint {
            self.high
        } else {
            self.low
        };
        snapped
    }
}

impl Environment for ExtremeFlowControlWrapper {
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
        self.env.reset(seed)
    }

    fn step(&mut self, action: &[f32]) -> Result<Step, EnvError> {
        self.action_space().check(action)?;
        let snapped = self.snap(action);
        self.env.step(&snapped)
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
    fn flow_snaps_to_nearest_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env =
            ExtremeFlowControlWrapper::new(Box::new(CounterEnv::new(dir.path().to_path_buf(), 5)))
                .expect("wrapper");
        assert_eq!(env.snap(&[0.49, 30.0]), vec![0.0, 30.0]);
        assert_eq!(env.snap(&[0.5, 41.0]), vec![1.0, 41.0]);
        env.reset(None).expect("reset");
        env.step(&[0.7, 33.0]).expect("step");
        assert_eq!(
            env.attribute("last_action"),
            Some(Attribute::Vector(vec![1.0, 33.0]))
        );
    }
}
