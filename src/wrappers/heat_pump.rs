use crate::env::{ActionSpace, Attribute, Environment, Info, Step, get_wrapper_attr};
use crate::error::EnvError;

const CARNOT_EFFICIENCY: f64 = 0.45;
const MIN_COP: f64 = 1.0;
const MAX_COP: f64 = 7.0;
const KELVIN: f64 = 273.15;

/// Coefficient of performance for a water-to-water heat pump lifting heat
/// from outdoors to the supply temperature.
pub fn heat_pump_cop(supply_temperature: f64, outdoor_temperature: f64) -> f64 {
    let lift = supply_temperature - outdoor_temperature;
    if lift <= 0.0 {
        return MAX_COP;
    }
    (CARNOT_EFFICIENCY * (supply_temperature + KELVIN) / lift).clamp(MIN_COP, MAX_COP)
}

/// Appends the heat pump's electric power to the observation and charges the
/// reward's energy term with it instead of the delivered heat.
pub struct HeatPumpEnergyWrapper {
    env: Box<dyn Environment>,
    outdoor_index: usize,
    supply_index: usize,
    load_index: usize,
    energy_weight: f64,
    lambda_energy: f64,
}

impl HeatPumpEnergyWrapper {
    pub const NAME: &'static str = "HeatPumpEnergyWrapper";

    pub fn new(env: Box<dyn Environment>) -> Result<Self, EnvError> {
        let variables = env.observation_variables();
        let index_of = |name: &str| {
            variables.iter().position(|v| v == name).ok_or_else(|| {
                EnvError::InvalidConfiguration(format!(
                    "heat pump wrapper requires observation variable `{name}`"
                ))
            })
        };
        let outdoor_index = index_of("outdoor_temperature")?;
        let supply_index = index_of("water_supply_temperature")?;
        let load_index = index_of("heat_source_load")?;
        let energy_weight =
            get_wrapper_attr(env.as_ref(), "energy_weight")?.as_number("energy_weight")?;
        let lambda_energy =
            get_wrapper_attr(env.as_ref(), "lambda_energy")?.as_number("lambda_energy")?;
        Ok(Self {
            env,
            outdoor_index,
            supply_index,
            load_index,
            energy_weight,
            lambda_energy,
        })
    }

    fn electric_power(&self, observation: &[f32]) -> (f64, f64) {
        let cop = heat_pump_cop(
            observation[self.supply_index] as f64,
            observation[self.outdoor_index] as f64,
        );
        (observation[self.load_index] as f64 / cop, cop)
    }
}

impl Environment for HeatPumpEnergyWrapper {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn observation_variables(&self) -> Vec<String> {
        let mut variables = self.env.observation_variables();
        variables.push("heat_pump_power".to_string());
        variables
    }

    fn action_space(&self) -> ActionSpace {
        self.env.action_space()
    }

    fn reset(&mut self, seed: Option<u64>) -> Result<(Vec<f32>, Info), EnvError> {
        let (mut observation, mut info) = self.env.reset(seed)?;
        let (power, cop) = self.electric_power(&observation);
        observation.push(power as f32);
        info.insert("heat_pump_power".into(), power);
        info.insert("heat_pump_cop".into(), cop);
        Ok((observation, info))
    }

    fn step(&mut self, action: &[f32]) -> Result<Step, EnvError> {
        let mut step = self.env.step(action)?;
        let (power, cop) = self.electric_power(&step.observation);
        step.observation.push(power as f32);
        let energy_term = -self.energy_weight * self.lambda_energy * power;
        let comfort_term = step.info.get("comfort_term").copied().unwrap_or(0.0);
        let reward = comfort_term + energy_term;
        step.reward = reward as f32;
        step.info.insert("heat_pump_power".into(), power);
        step.info.insert("heat_pump_cop".into(), cop);
        step.info.insert("energy_term".into(), energy_term);
        step.info.insert("total_power_demand".into(), power);
        step.info.insert("reward".into(), reward);
        Ok(step)
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
    fn cop_is_bounded() {
        assert_eq!(heat_pump_cop(35.0, 40.0), MAX_COP);
        assert_eq!(heat_pump_cop(45.0, -100.0), MIN_COP);
        let cop = heat_pump_cop(35.0, 5.0);
        assert!((cop - 0.45 * 308.15 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn electric_power_replaces_thermal_load_in_reward() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env =
            HeatPumpEnergyWrapper::new(Box::new(CounterEnv::new(dir.path().to_path_buf(), 3)))
                .expect("wrapper");
        let (obs, _) = env.reset(None).expect("reset");
        assert_eq!(obs.len(), 5);
        let step = env.step(&[1.0, 35.0]).expect("step");
        let cop = heat_pump_cop(35.0, 5.0);
        let power = 2000.0 / cop;
        assert!((step.observation[4] as f64 - power).abs() < 1e-2);
        let expected = -0.5 - 0.5 * 1.0e-4 * power;
        assert!((step.reward as f64 - expected).abs() < 1e-5);
        assert_eq!(env.observation_variables().last().unwrap(), "heat_pump_power");
    }
}
