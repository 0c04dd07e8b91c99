//! Environment contract shared by the building simulator and every wrapper.

pub mod building;
pub mod scenario;
pub mod weather;

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::EnvError;

pub use building::RadiantBuilding;
pub use scenario::{DEFAULT_SCENARIO, Scenario, make};
pub use weather::{Weather, WeatherSample, WeatherVariability};

/// Named scalar diagnostics attached to resets and steps.
pub type Info = BTreeMap<String, f64>;

/// Box-shaped continuous action space.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionSpace {
    pub low: Vec<f32>,
    pub high: Vec<f32>,
}

impl ActionSpace {
    pub fn new(low: Vec<f32>, high: Vec<f32>) -> Result<Self, EnvError> {
        if low.len() != high.len() {
            return Err(EnvError::InvalidConfiguration(format!(
                "action bounds differ in length: {} low, {} high",
                low.len(),
                high.len()
            )));
        }
        if low.iter().zip(&high).any(|(low, high)| low > high) {
            return Err(EnvError::InvalidConfiguration(
                "action lower bound exceeds upper bound".to_string(),
            ));
        }
        Ok(Self { low, high })
    }

    pub fn symmetric(dim: usize) -> Self {
        Self {
            low: vec![-1.0; dim],
            high: vec![1.0; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.low.len()
    }

    pub fn clip(&self, action: &[f32]) -> Vec<f32> {
        action
            .iter()
            .zip(self.low.iter().zip(&self.high))
            .map(|(value, (low, high))| value.clamp(*low, *high))
            .collect()
    }

    pub fn check(&self, action: &[f32]) -> Result<(), EnvError> {
        if action.len() != self.dim() {
            return Err(EnvError::ActionDimension {
                expected: self.dim(),
                actual: action.len(),
            });
        }
        Ok(())
    }
}

/// Outcome of a single environment step.
#[derive(Clone, Debug)]
pub struct Step {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub terminated: bool,
    pub truncated: bool,
    pub info: Info,
}

impl Step {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Value returned by a named attribute lookup.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Number(f64),
    Count(usize),
    Flag(bool),
    Vector(Vec<f64>),
    Path(PathBuf),
    Names(Vec<String>),
}

impl Attribute {
    pub fn as_number(&self, name: &str) -> Result<f64, EnvError> {
        match self {
            Self::Number(value) => Ok(*value),
            Self::Count(value) => Ok(*value as f64),
            _ => Err(type_error(name, "number")),
        }
    }

    pub fn as_count(&self, name: &str) -> Result<usize, EnvError> {
        match self {
            Self::Count(value) => Ok(*value),
            _ => Err(type_error(name, "count")),
        }
    }

    pub fn as_flag(&self, name: &str) -> Result<bool, EnvError> {
        match self {
            Self::Flag(value) => Ok(*value),
            _ => Err(type_error(name, "flag")),
        }
    }

    pub fn into_vector(self, name: &str) -> Result<Vec<f64>, EnvError> {
        match self {
            Self::Vector(values) => Ok(values),
            _ => Err(type_error(name, "vector")),
        }
    }

    pub fn into_path(self, name: &str) -> Result<PathBuf, EnvError> {
        match self {
            Self::Path(path) => Ok(path),
            _ => Err(type_error(name, "path")),
        }
    }

    pub fn into_names(self, name: &str) -> Result<Vec<String>, EnvError> {
        match self {
            Self::Names(names) => Ok(names),
            _ => Err(type_error(name, "name list")),
        }
    }
}

fn type_error(name: &str, expected: &'static str) -> EnvError {
    EnvError::AttributeType {
        name: name.to_string(),
        expected,
    }
}

/// A stepped building-energy simulation, or a wrapper around one.
///
/// Wrappers own exactly one inner environment and forward anything they do not
/// handle themselves, so attribute lookups resolve against the whole stack.
pub trait Environment {
    /// Name of this layer, used by [`is_wrapped`] and [`Environment::layers`].
    fn name(&self) -> &'static str;

    fn observation_variables(&self) -> Vec<String>;

    fn observation_dim(&self) -> usize {
        self.observation_variables().len()
    }

    fn action_space(&self) -> ActionSpace;

    fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f32>, Info), EnvError>;

    fn step(&mut self, action: &[f32]) -> Result<Step, EnvError>;

    fn close(&mut self) -> Result<(), EnvError>;

    fn attribute(&self, name: &str) -> Option<Attribute>;

    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<(), EnvError>;

    /// Layer names from the outermost wrapper down to the base environment.
    fn layers(&self) -> Vec<&'static str>;
}

/// Looks an attribute up anywhere in the stack, failing when nobody exposes it.
pub fn get_wrapper_attr(env: &dyn Environment, name: &str) -> Result<Attribute, EnvError> {
    env.attribute(name)
        .ok_or_else(|| EnvError::MissingAttribute(name.to_string()))
}

pub fn is_wrapped(env: &dyn Environment, layer: &str) -> bool {
    env.layers().iter().any(|name| *name == layer)
}

pub fn timestep_per_episode(env: &dyn Environment) -> Result<usize, EnvError> {
    get_wrapper_attr(env, "timestep_per_episode")?.as_count("timestep_per_episode")
}

pub fn workspace_path(env: &dyn Environment) -> Result<PathBuf, EnvError> {
    get_wrapper_attr(env, "workspace_path")?.into_path("workspace_path")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_respects_bounds() {
        let space = ActionSpace::new(vec![0.0, 25.0], vec![1.0, 45.0]).expect("space");
        assert_eq!(space.clip(&[1.5, 10.0]), vec![1.0, 25.0]);
        assert!(space.check(&[0.0]).is_err());
    }

    #[test]
    fn malformed_bounds_are_rejected() {
        assert!(matches!(
            ActionSpace::new(vec![0.0, 25.0], vec![1.0]),
            Err(EnvError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ActionSpace::new(vec![2.0], vec![1.0]),
            Err(EnvError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn attribute_accessors_reject_wrong_kind() {
        let attr = Attribute::Flag(true);
        assert!(attr.as_count("update").is_err());
        assert!(attr.as_flag("update").expect("flag"));
        assert_eq!(Attribute::Count(3).as_number("n").expect("number"), 3.0);
    }
}
