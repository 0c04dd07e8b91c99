use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::env::{ActionSpace, Attribute, Environment, Info, Step, get_wrapper_attr};
use crate::error::EnvError;

const PROGRESS_HEADER: &str =
    "episode_num,cumulative_reward,mean_reward,mean_power_demand,comfort_violation_time(%),mean_comfort_violation,length";

/// Running totals for the episode in progress.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpisodeSummary {
    pub episode_num: usize,
    pub cumulative_reward: f64,
    pub power_demand: f64,
    pub comfort_violation: f64,
    pub violation_steps: usize,
    pub length: usize,
}

impl EpisodeSummary {
    pub fn mean_reward(&self) -> f64 {
        self.per_step(self.cumulative_reward)
    }

    pub fn mean_power_demand(&self) -> f64 {
        self.per_step(self.power_demand)
    }

    pub fn mean_comfort_violation(&self) -> f64 {
        self.per_step(self.comfort_violation)
    }

    pub fn comfort_violation_pct(&self) -> f64 {
        self.per_step(self.violation_steps as f64) * 100.0
    }

    fn per_step(&self, total: f64) -> f64 {
        if self.length == 0 {
            0.0
        } else {
            total / self.length as f64
        }
    }

    fn record(&mut self, step: &Step) {
        self.cumulative_reward += step.reward as f64;
        self.power_demand += step.info.get("total_power_demand").copied().unwrap_or(0.0);
        let violation = step.info.get("comfort_violation").copied().unwrap_or(0.0);
        self.comfort_violation += violation;
        if violation > 0.0 {
            self.violation_steps += 1;
        }
        self.length += 1;
    }

    fn csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.episode_num,
            self.cumulative_reward,
            self.mean_reward(),
            self.mean_power_demand(),
            self.comfort_violation_pct(),
            self.mean_comfort_violation(),
            self.length
        )
    }
}

struct EpisodeLog {
    path: PathBuf,
    writer: BufWriter<File>,
    summary: EpisodeSummary,
    finished: bool,
}

/// Records every interaction as CSV.
///
/// Each episode writes `monitor.csv` into the environment's episode directory;
/// per-episode summaries accumulate in `progress.csv` under the workspace.
pub struct LoggerWrapper {
    env: Box<dyn Environment>,
    progress_path: PathBuf,
    progress: BufWriter<File>,
    episode: Option<EpisodeLog>,
    episode_count: usize,
    last_summary: Option<EpisodeSummary>,
}

impl LoggerWrapper {
    pub const NAME: &'static str = "LoggerWrapper";

    pub fn new(env: Box<dyn Environment>) -> Result<Self, EnvError> {
        let workspace =
            get_wrapper_attr(env.as_ref(), "workspace_path")?.into_path("workspace_path")?;
        fs::create_dir_all(&workspace).map_err(|err| EnvError::io(&workspace, err))?;
        let progress_path = workspace.join("progress.csv");
        let mut progress = create_writer(&progress_path)?;
        writeln!(progress, "{PROGRESS_HEADER}").map_err(|err| EnvError::io(&progress_path, err))?;
        Ok(Self {
            env,
            progress_path,
            progress,
            episode: None,
            episode_count: 0,
            last_summary: None,
        })
    }

    pub fn last_summary(&self) -> Option<&EpisodeSummary> {
        self.last_summary.as_ref()
    }

    fn monitor_header(&self) -> String {
        let mut columns = vec!["timestep".to_string()];
        columns.extend(self.env.observation_variables());
        let action_count = self.env.action_space().dim();
        match get_wrapper_attr(self.env.as_ref(), "action_variables")
            .and_then(|attr| attr.into_names("action_variables"))
        {
            Ok(names) if names.len() == action_count => columns.extend(names),
            _ => columns.extend((0..action_count).map(|index| format!("action_{index}"))),
        }
        columns.extend(
            ["reward", "power_demand", "comfort_violation", "terminated", "truncated"]
                .iter()
                .map(|name| name.to_string()),
        );
        columns.join(",")
    }

    fn finish_episode(&mut self) -> Result<(), EnvError> {
        if let Some(mut episode) = self.episode.take() {
            episode
                .writer
                .flush()
                .map_err(|err| EnvError::io(&episode.path, err))?;
            if !episode.finished && episode.summary.length > 0 {
                self.write_summary(&episode.summary)?;
                episode.finished = true;
            }
        }
        Ok(())
    }

    fn write_summary(&mut self, summary: &EpisodeSummary) -> Result<(), EnvError> {
        writeln!(self.progress, "{}", summary.csv_row())
            .and_then(|_| self.progress.flush())
            .map_err(|err| EnvError::io(&self.progress_path, err))?;
        self.last_summary = Some(summary.clone());
        Ok(())
    }
}

fn create_writer(path: &Path) -> Result<BufWriter<File>, EnvError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|err| EnvError::io(path, err))
}

fn join_values(values: impl IntoIterator<Item = f32>) -> String {
    values
        .into_iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl Environment for LoggerWrapper {
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
        self.finish_episode()?;
        let (observation, info) = self.env.reset(seed)?;
        self.episode_count += 1;
        let episode_dir = match get_wrapper_attr(self.env.as_ref(), "episode_path") {
            Ok(attr) => attr.into_path("episode_path")?,
            Err(_) => get_wrapper_attr(self.env.as_ref(), "workspace_path")?
                .into_path("workspace_path")?
                .join(format!("episode-{}", self.episode_count)),
        };
        fs::create_dir_all(&episode_dir).map_err(|err| EnvError::io(&episode_dir, err))?;
        let path = episode_dir.join("monitor.csv");
        let mut writer = create_writer(&path)?;
        let header = self.monitor_header();
        // Reset row carries the observation only.
        let blanks = vec![""; self.env.action_space().dim() + 5].join(",");
        writeln!(writer, "{header}")
            .and_then(|_| {
                writeln!(
                    writer,
                    "0,{},{blanks}",
                    join_values(observation.iter().copied())
                )
            })
            .map_err(|err| EnvError::io(&path, err))?;
        self.episode = Some(EpisodeLog {
            path,
            writer,
            summary: EpisodeSummary {
                episode_num: self.episode_count,
                ..EpisodeSummary::default()
            },
            finished: false,
        });
        Ok((observation, info))
    }

    fn step(&mut self, action: &[f32]) -> Result<Step, EnvError> {
        let step = self.env.step(action)?;
        let done = step.done();
        let completed = match self.episode.as_mut() {
            Some(episode) => {
                episode.summary.record(&step);
                writeln!(
                    episode.writer,
                    "{},{},{},{},{},{},{},{}",
                    episode.summary.length,
                    join_values(step.observation.iter().copied()),
                    join_values(action.iter().copied()),
                    step.reward,
                    step.info.get("total_power_demand").copied().unwrap_or(0.0),
                    step.info.get("comfort_violation").copied().unwrap_or(0.0),
                    step.terminated,
                    step.truncated
                )
                .map_err(|err| EnvError::io(&episode.path, err))?;
                if done && !episode.finished {
                    episode.finished = true;
                    Some(episode.summary.clone())
                } else {
                    None
                }
            }
            None => None,
        };
        if let Some(summary) = completed {
            self.write_summary(&summary)?;
        }
        Ok(step)
    }

    fn close(&mut self) -> Result<(), EnvError> {
        self.finish_episode()?;
        self.progress
            .flush()
            .map_err(|err| EnvError::io(&self.progress_path, err))?;
        self.env.close()
    }

    fn attribute(&self, name: &str) -> Option<Attribute> {
        match name {
            "logged_episodes" => Some(Attribute::Count(self.episode_count)),
            "progress_path" => Some(Attribute::Path(self.progress_path.clone())),
            _ => self.env.attribute(name),
        }
    }

    fn set_attribute(&mut self, name: &str, value: Attribute) -> Result<(), EnvError> {
        match name {
            "logged_episodes" | "progress_path" => {
                Err(EnvError::ReadOnlyAttribute(name.to_string()))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrappers::testing::CounterEnv;

    #[test]
    fn episodes_produce_monitor_and_progress_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env = LoggerWrapper::new(Box::new(CounterEnv::new(dir.path().to_path_buf(), 3)))
            .expect("wrapper");
        for _ in 0..2 {
            env.reset(None).expect("reset");
            loop {
                if env.step(&[1.0, 30.0]).expect("step").done() {
                    break;
                }
            }
        }
        env.close().expect("close");

        let monitor = fs::read_to_string(dir.path().join("episode-1").join("monitor.csv"))
            .expect("monitor");
        let lines: Vec<_> = monitor.lines().collect();
        assert_eq!(lines.len(), 1 + 1 + 3);
        assert!(lines[0].starts_with("timestep,step,outdoor_temperature"));
        assert!(lines[0].contains("water_flow_fraction"));
        let header_columns = lines[0].split(',').count();
        assert!(lines.iter().all(|line| line.split(',').count() == header_columns));

        let progress = fs::read_to_string(dir.path().join("progress.csv")).expect("progress");
        let rows: Vec<_> = progress.lines().collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].starts_with("1,"));
        let summary = env.last_summary().expect("summary");
        assert_eq!(summary.episode_num, 2);
        assert_eq!(summary.length, 3);
        assert!((summary.comfort_violation_pct() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn interrupted_episode_is_summarised_on_close() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut env = LoggerWrapper::new(Box::new(CounterEnv::new(dir.path().to_path_buf(), 10)))
            .expect("wrapper");
        env.reset(None).expect("reset");
        env.step(&[0.0, 30.0]).expect("step");
        env.close().expect("close");
        let progress = fs::read_to_string(dir.path().join("progress.csv")).expect("progress");
        assert_eq!(progress.lines().count(), 2);
        assert_eq!(env.last_summary().map(|s| s.length), Some(1));
    }
}
