use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::scenario::Scenario;
use super::weather::{Weather, WeatherSample};
use super::{ActionSpace, Attribute, Environment, Info, Step};
use crate::error::EnvError;

const WATER_HEAT_CAPACITY: f64 = 4186.0;
const SUBSTEP_SECONDS: f64 = 60.0;
const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

pub const OBSERVATION_VARIABLES: [&str; 13] = [
    "month",
    "day_of_month",
    "hour",
    "outdoor_temperature",
    "outdoor_humidity",
    "wind_speed",
    "diffuse_solar_radiation",
    "direct_solar_radiation",
    "air_temperature",
    "slab_temperature",
    "water_supply_temperature",
    "water_flow_rate",
    "heat_source_load",
];

pub const ACTION_VARIABLES: [&str; 2] = ["water_flow_fraction", "water_supply_temperature"];
pub const FLOW_ACTION: usize = 0;
pub const SUPPLY_ACTION: usize = 1;

/// Linear trade-off between thermal discomfort and energy use.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearReward {
    pub energy_weight: f64,
    pub lambda_energy: f64,
    pub lambda_temperature: f64,
    pub winter_range: (f64, f64),
    pub summer_range: (f64, f64),
    /// Inclusive month range using the summer comfort band.
    pub summer_months: (u32, u32),
}

impl Default for LinearReward {
    fn default() -> Self {
        Self {
            energy_weight: 0.5,
            lambda_energy: 1.0e-4,
            lambda_temperature: 1.0,
            winter_range: (20.0, 23.5),
            summer_range: (23.0, 26.0),
            summer_months: (6, 9),
        }
    }
}

/// Individual reward contributions for one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RewardTerms {
    pub reward: f64,
    pub comfort_term: f64,
    pub energy_term: f64,
    pub comfort_violation: f64,
}

impl LinearReward {
    pub fn comfort_range(&self, month: u32) -> (f64, f64) {
        if (self.summer_months.0..=self.summer_months.1).contains(&month) {
            self.summer_range
        } else {
            self.winter_range
        }
    }

    pub fn comfort_violation(&self, month: u32, temperature: f64) -> f64 {
        let (low, high) = self.comfort_range(month);
        if temperature < low {
            low - temperature
        } else if temperature > high {
            temperature - high
        } else {
            0.0
        }
    }

    pub fn energy_term(&self, power: f64) -> f64 {
        -self.energy_weight * self.lambda_energy * power
    }

    pub fn evaluate(&self, month: u32, temperature: f64, power: f64) -> RewardTerms {
        let comfort_violation = self.comfort_violation(month, temperature);
        let comfort_term =
            -(1.0 - self.energy_weight) * self.lambda_temperature * comfort_violation;
        let energy_term = self.energy_term(power);
        RewardTerms {
            reward: comfort_term + energy_term,
            comfort_term,
            energy_term,
            comfort_violation,
        }
    }
}

/// Lumped thermal parameters for the radiant-floor zone.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildingParameters {
    /// Zone air and furnishing capacitance (J/K).
    pub air_capacitance: f64,
    /// Radiant slab capacitance (J/K).
    pub slab_capacitance: f64,
    /// Slab to air conductance (W/K).
    pub slab_air_conductance: f64,
    /// Envelope conductance, air to outdoors (W/K).
    pub envelope_conductance: f64,
    pub max_flow_rate: f64,
    pub loop_effectiveness: f64,
    pub min_supply_temperature: f64,
    pub max_supply_temperature: f64,
    /// Effective glazing area for solar gains (m2).
    pub solar_aperture: f64,
    pub occupied_gains: f64,
    pub unoccupied_gains: f64,
    pub initial_air_temperature: f64,
    pub initial_slab_temperature: f64,
}

impl Default for BuildingParameters {
    fn default() -> Self {
        Self {
            air_capacitance: 2.0e6,
            slab_capacitance: 2.0e7,
            slab_air_conductance: 1000.0,
            envelope_conductance: 150.0,
            max_flow_rate: 0.3,
            loop_effectiveness: 0.5,
            min_supply_temperature: 25.0,
            max_supply_temperature: 45.0,
            solar_aperture: 4.8,
            occupied_gains: 400.0,
            unoccupied_gains: 150.0,
            initial_air_temperature: 20.0,
            initial_slab_temperature: 21.0,
        }
    }
}

/// Month (1-based) and day of month for a non-leap day of year.
pub fn calendar(day_of_year: u32) -> (u32, u32) {
    let mut remaining = (day_of_year.max(1) - 1) % 365;
    for (index, days) in DAYS_IN_MONTH.iter().enumerate() {
        if remaining < *days {
            return (index as u32 + 1, remaining + 1);
        }
        remaining -= days;
    }
    (12, 31)
}

/// First `{env_name}-res{k}` directory that does not exist yet.
pub fn resolve_workspace(env_name: &Path) -> PathBuf {
    let base = env_name.as_os_str().to_string_lossy().into_owned();
    let mut index = 1usize;
    loop {
        let candidate = PathBuf::from(format!("{base}-res{index}"));
        if !candidate.exists() {
            return candidate;
        }
        index += 1;
    }
}

#[derive(Clone, Copy, Debug)]
struct ThermalState {
    air_temperature: f64,
    slab_temperature: f64,
    supply_temperature: f64,
    flow_rate: f64,
    heat_load: f64,
}

#[derive(Clone, Copy, Debug)]
struct Clock {
    day_of_year: u32,
    minute_of_day: u32,
}

impl Clock {
    fn hour(&self) -> f64 {
        self.minute_of_day as f64 / 60.0
    }

    fn advance(&mut self, minutes: u32) {
        self.minute_of_day += minutes;
        while self.minute_of_day >= 24 * 60 {
            self.minute_of_day -= 24 * 60;
            self.day_of_year = self.day_of_year % 365 + 1;
        }
    }
}

/// Radiant-floor heating zone served by a heat-pump water loop.
pub struct RadiantBuilding {
    scenario: Scenario,
    weather: Weather,
    seed: u64,
    workspace: PathBuf,
    episode_path: Option<PathBuf>,
    episode_num: usize,
    timestep: usize,
    clock: Clock,
    thermal: ThermalState,
    current_weather: Option<WeatherSample>,
    needs_reset: bool,
    closed: bool,
}

impl RadiantBuilding {
    pub fn new(
        scenario: Scenario,
        env_name: impl AsRef<Path>,
        seed: u64,
    ) -> Result<Self, EnvError> {
        scenario.validate()?;
        let workspace = resolve_workspace(env_name.as_ref());
        fs::create_dir_all(&workspace).map_err(|err| EnvError::io(&workspace, err))?;
        let weather = Weather::new(scenario.variability, seed);
        let thermal = Self::initial_thermal(&scenario.building);
        let clock = Clock {
            day_of_year: scenario.start_day_of_year,
            minute_of_day: 0,
        };
        Ok(Self {
            scenario,
            weather,
            seed,
            workspace,
            episode_path: None,
            episode_num: 0,
            timestep: 0,
            clock,
            thermal,
            current_weather: None,
            needs_reset: true,
            closed: false,
        })
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn initial_thermal(params: &BuildingParameters) -> ThermalState {
        ThermalState {
            air_temperature: params.initial_air_temperature,
            slab_temperature: params.initial_slab_temperature,
            supply_temperature: params.min_supply_temperature,
            flow_rate: 0.0,
            heat_load: 0.0,
        }
    }

    fn internal_gains(&self, hour: f64) -> f64 {
        let params = &self.scenario.building;
        if (7.0..23.0).contains(&hour) {
            params.occupied_gains
        } else {
            params.unoccupied_gains
        }
    }

    fn observation(&self) -> Vec<f32> {
        let (month, day) = calendar(self.clock.day_of_year);
        let weather = self.current_weather.unwrap_or(WeatherSample {
            outdoor_temperature: 0.0,
            outdoor_humidity: 0.0,
            wind_speed: 0.0,
            diffuse_solar_radiation: 0.0,
            direct_solar_radiation: 0.0,
        });
        vec![
            month as f32,
            day as f32,
            self.clock.hour().floor() as f32,
            weather.outdoor_temperature as f32,
            weather.outdoor_humidity as f32,
            weather.wind_speed as f32,
            weather.diffuse_solar_radiation as f32,
            weather.direct_solar_radiation as f32,
            self.thermal.air_temperature as f32,
            self.thermal.slab_temperature as f32,
            self.thermal.supply_temperature as f32,
            self.thermal.flow_rate as f32,
            self.thermal.heat_load as f32,
        ]
    }

    fn time_info(&self) -> Info {
        let (month, day) = calendar(self.clock.day_of_year);
        let mut info = Info::new();
        info.insert("timestep".into(), self.timestep as f64);
        info.insert("month".into(), month as f64);
        info.insert("day".into(), day as f64);
        info.insert("hour".into(), self.clock.hour());
        info.insert(
            "time_elapsed".into(),
            self.timestep as f64 * self.scenario.step_seconds(),
        );
        info
    }

    /// Integrate the two-node model over one control step.
    fn integrate(&mut self, flow_fraction: f64, supply_temperature: f64, weather: &WeatherSample) {
        let params = self.scenario.building;
        let flow_rate = flow_fraction * params.max_flow_rate;
        let step_seconds = self.scenario.step_seconds();
        let substeps = (step_seconds / SUBSTEP_SECONDS).round().max(1.0) as usize;
        let dt = step_seconds / substeps as f64;
        let solar = params.solar_aperture
            * (weather.direct_solar_radiation * 0.5 + weather.diffuse_solar_radiation);
        let internal = self.internal_gains(self.clock.hour());
        let mut delivered = 0.0;
        let mut state = self.thermal;
        for _ in 0..substeps {
            let water = (params.loop_effectiveness
                * flow_rate
                * WATER_HEAT_CAPACITY
                * (supply_temperature - state.slab_temperature))
                .max(0.0);
            let slab_to_air =
                params.slab_air_conductance * (state.slab_temperature - state.air_temperature);
            let envelope = params.envelope_conductance
                * (state.air_temperature - weather.outdoor_temperature);
            state.slab_temperature += dt * (water - slab_to_air) / params.slab_capacitance;
            state.air_temperature +=
                dt * (slab_to_air - envelope + solar + internal) / params.air_capacitance;
            delivered += water;
        }
        state.supply_temperature = supply_temperature;
        state.flow_rate = flow_rate;
        state.heat_load = delivered / substeps as f64;
        self.thermal = state;
    }
}

impl Environment for RadiantBuilding {
    fn name(&self) -> &'static str {
        "RadiantBuilding"
    }

    fn observation_variables(&self) -> Vec<String> {
        OBSERVATION_VARIABLES.iter().map(|name| name.to_string()).collect()
    }

    fn action_space(&self) -> ActionSpace {
        let params = &self.scenario.building;
        ActionSpace {
            low: vec![0.0, params.min_supply_temperature as f32],
            high: vec![1.0, params.max_supply_temperature as f32],
        }
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f32>, Info), EnvError> {
        if self.closed {
            return Err(EnvError::Closed);
        }
        if let Some(seed) = seed {
            self.seed = seed;
            self.weather.reseed(seed);
        }
        self.weather.restart();
        self.episode_num += 1;
        let episode_path = self.workspace.join(format!("episode-{}", self.episode_num));
        fs::create_dir_all(&episode_path).map_err(|err| EnvError::io(&episode_path, err))?;
        self.episode_path = Some(episode_path);
        self.timestep = 0;
        self.clock = Clock {
            day_of_year: self.scenario.start_day_of_year,
            minute_of_day: 0,
        };
        self.thermal = Self::initial_thermal(&self.scenario.building);
        self.current_weather = Some(self.weather.sample(
            self.clock.day_of_year as f64,
            self.clock.hour(),
            0.0,
        ));
        self.needs_reset = false;
        let mut info = self.time_info();
        info.insert("episode_num".into(), self.episode_num as f64);
        Ok((self.observation(), info))
    }

    fn step(&mut self, action: &[f32]) -> Result<Step, EnvError> {
        if self.closed {
            return Err(EnvError::Closed);
        }
        if self.needs_reset {
            return Err(if self.episode_num == 0 {
                EnvError::NotReset
            } else {
                EnvError::EpisodeOver
            });
        }
        let space = self.action_space();
        space.check(action)?;
        let action = space.clip(action);
        let weather = self.current_weather.unwrap_or_else(|| {
            self.weather
                .sample(self.clock.day_of_year as f64, self.clock.hour(), 0.0)
        });
        self.integrate(
            action[FLOW_ACTION] as f64,
            action[SUPPLY_ACTION] as f64,
            &weather,
        );
        let step_minutes = 60 / self.scenario.timesteps_per_hour;
        self.clock.advance(step_minutes);
        self.timestep += 1;
        let dt_hours = step_minutes as f64 / 60.0;
        self.current_weather = Some(self.weather.sample(
            self.clock.day_of_year as f64,
            self.clock.hour(),
            dt_hours,
        ));

        let (month, _) = calendar(self.clock.day_of_year);
        let terms = self.scenario.reward.evaluate(
            month,
            self.thermal.air_temperature,
            self.thermal.heat_load,
        );
        let truncated = self.timestep >= self.scenario.timestep_per_episode() - 1;
        if truncated {
            self.needs_reset = true;
        }
        let mut info = self.time_info();
        info.insert("reward".into(), terms.reward);
        info.insert("comfort_term".into(), terms.comfort_term);
        info.insert("energy_term".into(), terms.energy_term);
        info.insert("comfort_violation".into(), terms.comfort_violation);
        info.insert("total_power_demand".into(), self.thermal.heat_load);
        info.insert(
            "water_return_temperature".into(),
            if self.thermal.flow_rate > 0.0 {
                self.thermal.supply_temperature
                    - self.thermal.heat_load / (self.thermal.flow_rate * WATER_HEAT_CAPACITY)
            } else {
                self.thermal.slab_temperature
            },
        );
        Ok(Step {
            observation: self.observation(),
            reward: terms.reward as f32,
            terminated: false,
            truncated,
            info,
        })
    }

    fn close(&mut self) -> Result<(), EnvError> {
        self.closed = true;
        Ok(())
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        let reward = &self.scenario.reward;
        match name {
            "timestep_per_episode" => Some(Attribute::Count(self.scenario.timestep_per_episode())),
            "workspace_path" => Some(Attribute::Path(self.workspace.clone())),
            "episode_path" => self.episode_path.clone().map(Attribute::Path),
            "episode_num" => Some(Attribute::Count(self.episode_num)),
            "timestep" => Some(Attribute::Count(self.timestep)),
            "energy_weight" => Some(Attribute::Number(reward.energy_weight)),
            "lambda_energy" => Some(Attribute::Number(reward.lambda_energy)),
            "lambda_temperature" => Some(Attribute::Number(reward.lambda_temperature)),
            "observation_variables" => Some(Attribute::Names(self.observation_variables())),
            "action_variables" => Some(Attribute::Names(
                ACTION_VARIABLES.iter().map(|name| name.to_string()).collect(),
            )),
            "is_closed" => Some(Attribute::Flag(self.closed)),
            _ => None,
        }
    }

    fn set_attribute(&mut self, name: &str, _value: Attribute) -> Result<(), EnvError> {
        if self.attribute(name).is_some() {
            Err(EnvError::ReadOnlyAttribute(name.to_string()))
        } else {
            Err(EnvError::MissingAttribute(name.to_string()))
        }
    }

    fn layers(&self) -> Vec<&'static str> {
        vec![self.name()]
    }
}
