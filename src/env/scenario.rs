use std::path::Path;

use serde::{Deserialize, Serialize};

use super::building::{BuildingParameters, LinearReward, RadiantBuilding};
use super::weather::WeatherVariability;
use super::Environment;
use crate::error::EnvError;

pub const DEFAULT_SCENARIO: &str = "Eplus-radiant_free_heating-mixed-continuous-stochastic-v1";
pub const DETERMINISTIC_SCENARIO: &str = "Eplus-radiant_free_heating-mixed-continuous-v1";

/// Everything needed to instantiate a building environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub runperiod_days: u32,
    pub start_day_of_year: u32,
    pub timesteps_per_hour: u32,
    pub variability: Option<WeatherVariability>,
    pub reward: LinearReward,
    pub building: BuildingParameters,
}

impl Scenario {
    /// Registered scenario ids.
    pub const REGISTERED: [&'static str; 2] = [DEFAULT_SCENARIO, DETERMINISTIC_SCENARIO];

    pub fn lookup(id: &str) -> Result<Self, EnvError> {
        let variability = match id {
            DEFAULT_SCENARIO => Some(WeatherVariability::default()),
            DETERMINISTIC_SCENARIO => None,
            other => return Err(EnvError::UnknownScenario(other.to_string())),
        };
        Ok(Self {
            id: id.to_string(),
            runperiod_days: 365,
            start_day_of_year: 1,
            timesteps_per_hour: 4,
            variability,
            reward: LinearReward::default(),
            building: BuildingParameters::default(),
        })
    }

    /// Shorten or lengthen the simulated run period.
    pub fn with_runperiod_days(mut self, days: u32) -> Self {
        self.runperiod_days = days;
        self
    }

    pub fn with_start_day(mut self, day_of_year: u32) -> Self {
        self.start_day_of_year = day_of_year;
        self
    }

    pub fn with_timesteps_per_hour(mut self, timesteps: u32) -> Self {
        self.timesteps_per_hour = timesteps;
        self
    }

    pub fn validate(&self) -> Result<(), EnvError> {
        if self.runperiod_days == 0 {
            return Err(EnvError::InvalidConfiguration(
                "run period must cover at least one day".into(),
            ));
        }
        if !(1..=60).contains(&self.timesteps_per_hour) || 60 % self.timesteps_per_hour != 0 {
            return Err(EnvError::InvalidConfiguration(
                "timesteps per hour must divide 60".into(),
            ));
        }
        if !(1..=365).contains(&self.start_day_of_year) {
            return Err(EnvError::InvalidConfiguration(
                "start day must be within 1..=365".into(),
            ));
        }
        if let Some(variability) = self.variability {
            if variability.tau <= 0.0 || variability.sigma < 0.0 {
                return Err(EnvError::InvalidConfiguration(
                    "weather variability needs tau > 0 and sigma >= 0".into(),
                ));
            }
        }
        Ok(())
    }

    /// Control steps per episode including the initial observation.
    pub fn timestep_per_episode(&self) -> usize {
        self.runperiod_days as usize * 24 * self.timesteps_per_hour as usize + 1
    }

    pub fn step_seconds(&self) -> f64 {
        3600.0 / self.timesteps_per_hour as f64
    }
}

/// Build the base environment for `scenario`, with its workspace rooted at `env_name`.
pub fn make(
    scenario: &Scenario,
    env_name: impl AsRef<Path>,
    seed: u64,
) -> Result<Box<dyn Environment>, EnvError> {
    Ok(Box::new(RadiantBuilding::new(scenario.clone(), env_name, seed)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_scenarios_resolve() {
        for id in Scenario::REGISTERED {
            let scenario = Scenario::lookup(id).expect("registered");
            scenario.validate().expect("valid");
            assert_eq!(scenario.timestep_per_episode(), 365 * 96 + 1);
        }
        assert!(Scenario::lookup(DEFAULT_SCENARIO).unwrap().variability.is_some());
        assert!(Scenario::lookup(DETERMINISTIC_SCENARIO).unwrap().variability.is_none());
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        assert!(matches!(
            Scenario::lookup("Eplus-5zone-hot-continuous-v1"),
            Err(EnvError::UnknownScenario(_))
        ));
    }

    #[test]
    fn invalid_timing_is_rejected() {
        let scenario = Scenario::lookup(DEFAULT_SCENARIO)
            .unwrap()
            .with_timesteps_per_hour(7);
        assert!(scenario.validate().is_err());
        let scenario = Scenario::lookup(DEFAULT_SCENARIO)
            .unwrap()
            .with_runperiod_days(0);
        assert!(scenario.validate().is_err());
    }
}
