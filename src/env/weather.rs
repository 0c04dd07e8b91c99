use std::f64::consts::PI;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

const HOURS_PER_YEAR: f64 = 8760.0;
const DAYS_PER_YEAR: f64 = 365.0;

/// Mixed (temperate) climate used by the radiant scenarios.
const MEAN_TEMPERATURE: f64 = 12.0;
const SEASONAL_AMPLITUDE: f64 = 9.0;
const DAILY_AMPLITUDE: f64 = 5.0;
const COLDEST_DAY: f64 = 15.0;
const WARMEST_HOUR: f64 = 15.0;

/// Ornstein-Uhlenbeck parameters applied to the outdoor dry-bulb temperature.
///
/// `tau` is expressed as a fraction of a year, the same unit as the time step
/// the process integrates over.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeatherVariability {
    pub sigma: f64,
    pub mu: f64,
    pub tau: f64,
}

impl Default for WeatherVariability {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            mu: 0.0,
            tau: 0.001,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeatherSample {
    pub outdoor_temperature: f64,
    pub outdoor_humidity: f64,
    pub wind_speed: f64,
    pub diffuse_solar_radiation: f64,
    pub direct_solar_radiation: f64,
}

/// Synthetic weather source with optional stochastic temperature variability.
pub struct Weather {
    variability: Option<WeatherVariability>,
    noise: f64,
    rng: StdRng,
}

impl Weather {
    pub fn new(variability: Option<WeatherVariability>, seed: u64) -> Self {
        let noise = variability.map(|v| v.mu).unwrap_or(0.0);
        Self {
            variability,
            noise,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn is_stochastic(&self) -> bool {
        self.variability.is_some()
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Restart the noise process at its mean, keeping the RNG stream.
    pub fn restart(&mut self) {
        self.noise = self.variability.map(|v| v.mu).unwrap_or(0.0);
    }

    /// Sample conditions at `day_of_year` (1-based) and `hour` (0..24), advancing
    /// the noise process by `dt_hours`.
    pub fn sample(&mut self, day_of_year: f64, hour: f64, dt_hours: f64) -> WeatherSample {
        if let Some(params) = self.variability {
            let dt = dt_hours / HOURS_PER_YEAR;
            let diffusion = params.sigma * (2.0 / params.tau).sqrt();
            let shock: f64 = StandardNormal.sample(&mut self.rng);
            self.noise += dt * (-(self.noise - params.mu) / params.tau)
                + diffusion * dt.sqrt() * shock;
        }
        let deterministic = Self::base_temperature(day_of_year, hour);
        let daily_phase = 2.0 * PI * (hour - WARMEST_HOUR) / 24.0;
        let outdoor_humidity = (70.0 - 15.0 * daily_phase.cos()).clamp(5.0, 100.0);
        let wind_speed = 3.5 + 1.5 * (2.0 * PI * day_of_year * 3.0 / DAYS_PER_YEAR).sin();
        let (direct, diffuse) = Self::solar(day_of_year, hour);
        WeatherSample {
            outdoor_temperature: deterministic + self.noise,
            outdoor_humidity,
            wind_speed: wind_speed.max(0.0),
            diffuse_solar_radiation: diffuse,
            direct_solar_radiation: direct,
        }
    }

    pub fn base_temperature(day_of_year: f64, hour: f64) -> f64 {
        let seasonal = 2.0 * PI * (day_of_year - COLDEST_DAY) / DAYS_PER_YEAR;
        let daily = 2.0 * PI * (hour - WARMEST_HOUR) / 24.0;
        MEAN_TEMPERATURE - SEASONAL_AMPLITUDE * seasonal.cos() + DAILY_AMPLITUDE * daily.cos()
    }

    fn solar(day_of_year: f64, hour: f64) -> (f64, f64) {
        let season = (2.0 * PI * (day_of_year - 80.0) / DAYS_PER_YEAR).sin();
        let day_length = 12.0 + 3.5 * season;
        let sunrise = 12.0 - day_length / 2.0;
        let elapsed = hour - sunrise;
        if elapsed <= 0.0 || elapsed >= day_length {
            return (0.0, 0.0);
        }
        let elevation = (PI * elapsed / day_length).sin();
        let peak_direct = 500.0 + 250.0 * season;
        let peak_diffuse = 120.0 + 40.0 * season;
        (peak_direct * elevation, peak_diffuse * elevation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn january_is_colder_than_july() {
        assert!(Weather::base_temperature(15.0, 12.0) < Weather::base_temperature(196.0, 12.0));
    }

    #[test]
    fn no_sun_at_midnight() {
        let mut weather = Weather::new(None, 1);
        let sample = weather.sample(172.0, 0.0, 0.25);
        assert_eq!(sample.direct_solar_radiation, 0.0);
        assert_eq!(sample.diffuse_solar_radiation, 0.0);
    }

    #[test]
    fn stochastic_weather_is_reproducible_per_seed() {
        let variability = Some(WeatherVariability::default());
        let mut a = Weather::new(variability, 9);
        let mut b = Weather::new(variability, 9);
        for step in 0..96 {
            let hour = step as f64 * 0.25;
            assert_eq!(a.sample(10.0, hour, 0.25), b.sample(10.0, hour, 0.25));
        }
        let mut c = Weather::new(variability, 10);
        let sample_a = a.sample(11.0, 0.0, 0.25);
        let sample_c = c.sample(11.0, 0.0, 0.25);
        assert_ne!(sample_a.outdoor_temperature, sample_c.outdoor_temperature);
    }
}
