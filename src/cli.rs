use std::path::PathBuf;

use clap::Parser;

use crate::env::{DEFAULT_SCENARIO, Scenario};
use crate::error::ExperimentError;
use crate::experiment::{DEFAULT_EPISODES, DEFAULT_SEED, ExperimentConfig};

#[derive(Parser, Debug)]
#[command(
    name = "radiant-train",
    about = "Train a PPO controller for a radiant-floor heating building",
    version
)]
pub struct Cli {
    /// Repetition index; also the length of the observation history.
    pub n: Option<u32>,
    /// Seed for every random source.
    pub seed: Option<u64>,
    /// Registered scenario id.
    #[arg(long, default_value = DEFAULT_SCENARIO)]
    pub scenario: String,
    /// Number of training episodes.
    #[arg(long, default_value_t = DEFAULT_EPISODES)]
    pub episodes: usize,
    /// Directory under which workspaces and artifacts are created.
    #[arg(long, default_value = ".")]
    pub output: PathBuf,
    /// Suppress progress output.
    #[arg(long)]
    pub quiet: bool,
}

impl Cli {
    /// `None` when no repetition index was given.
    pub fn into_config(self) -> Result<Option<ExperimentConfig>, ExperimentError> {
        let Some(n) = self.n else {
            return Ok(None);
        };
        let scenario = Scenario::lookup(&self.scenario)?;
        let config = ExperimentConfig::new(n, self.seed.unwrap_or(DEFAULT_SEED))?
            .with_scenario(scenario)
            .with_episodes(self.episodes)
            .with_output_root(self.output)
            .with_verbose(!self.quiet);
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("radiant-train").chain(args.iter().copied()))
            .expect("arguments")
    }

    #[test]
    fn no_arguments_produce_no_config() {
        assert!(parse(&[]).into_config().expect("config").is_none());
    }

    #[test]
    fn seed_defaults_to_42() {
        let config = parse(&["3"]).into_config().expect("config").expect("some");
        assert_eq!(config.n, 3);
        assert_eq!(config.seed, 42);
        assert_eq!(config.episodes, 20);
        assert!(config.verbose);
    }

    #[test]
    fn explicit_seed_and_flags() {
        let config = parse(&["1", "7", "--episodes", "2", "--quiet", "--output", "/tmp/out"])
            .into_config()
            .expect("config")
            .expect("some");
        assert_eq!(config.seed, 7);
        assert_eq!(config.episodes, 2);
        assert_eq!(config.output_root, PathBuf::from("/tmp/out"));
        assert!(!config.verbose);
    }

    #[test]
    fn unknown_scenario_and_bad_numbers_fail() {
        assert!(
            parse(&["1", "--scenario", "Eplus-unknown-v1"])
                .into_config()
                .is_err()
        );
        assert!(Cli::try_parse_from(["radiant-train", "one"]).is_err());
    }
}
