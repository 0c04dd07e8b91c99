use std::path::Path;

use plotters::prelude::*;

use crate::callbacks::EvaluationRecord;
use crate::error::ExperimentError;

/// One-line textual summary of an evaluation.
pub fn describe_evaluation(record: &EvaluationRecord) -> String {
    format!(
        "Eval num_timesteps={}, episode_reward={:.2} +/- {:.2}, episode_length={:.1}, mean_power={:.1} W, comfort_violation={:.1}%",
        record.timesteps,
        record.mean_reward,
        record.std_reward,
        record.mean_ep_length,
        record.mean_power,
        record.comfort_violation_pct
    )
}

/// Draws mean evaluation reward against training timesteps, with a band of
/// one standard deviation.
pub fn render_evaluation_curve(
    out: &Path,
    records: &[EvaluationRecord],
) -> Result<(), ExperimentError> {
    if records.is_empty() {
        return Err(ExperimentError::Chart("no evaluations to plot".into()));
    }
    let chart_err = |err: &dyn std::fmt::Display| ExperimentError::Chart(format!("{err}"));

    let max_timesteps = records
        .iter()
        .map(|record| record.timesteps)
        .max()
        .unwrap_or(1)
        .max(1);
    let (low, high) = records.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(low, high), record| {
            (
                low.min(record.mean_reward - record.std_reward),
                high.max(record.mean_reward + record.std_reward),
            )
        },
    );
    let padding = ((high - low) * 0.1).max(1.0e-3);

    let root = BitMapBackend::new(out, (1000, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| chart_err(&e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Evaluation reward", ("sans-serif", 28).into_font())
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(0..max_timesteps, (low - padding)..(high + padding))
        .map_err(|e| chart_err(&e))?;

    chart
        .configure_mesh()
        .x_desc("Timesteps")
        .y_desc("Mean episode reward")
        .y_label_formatter(&|v| format!("{v:.1}"))
        .draw()
        .map_err(|e| chart_err(&e))?;

    let band: Vec<(usize, f64)> = records
        .iter()
        .map(|record| (record.timesteps, record.mean_reward + record.std_reward))
        .chain(
            records
                .iter()
                .rev()
                .map(|record| (record.timesteps, record.mean_reward - record.std_reward)),
        )
        .collect();
    chart
        .draw_series(std::iter::once(Polygon::new(band, BLUE.mix(0.15).filled())))
        .map_err(|e| chart_err(&e))?;

    chart
        .draw_series(LineSeries::new(
            records
                .iter()
                .map(|record| (record.timesteps, record.mean_reward)),
            BLUE.stroke_width(2),
        ))
        .map_err(|e| chart_err(&e))?;
    chart
        .draw_series(
            records
                .iter()
                .map(|record| {
                    Circle::new((record.timesteps, record.mean_reward), 4, BLUE.filled())
                }),
        )
        .map_err(|e| chart_err(&e))?;

    root.present().map_err(|e| chart_err(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_lists_every_metric() {
        let record = EvaluationRecord {
            timesteps: 190,
            mean_reward: -12.5,
            std_reward: 0.0,
            mean_ep_length: 96.0,
            mean_power: 850.0,
            comfort_violation_pct: 12.5,
        };
        let line = describe_evaluation(&record);
        assert!(line.starts_with("Eval num_timesteps=190, episode_reward=-12.50 +/- 0.00"));
        assert!(line.ends_with("comfort_violation=12.5%"));
    }

    #[test]
    fn empty_history_is_not_plotted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("evaluations.png");
        assert!(render_evaluation_curve(&path, &[]).is_err());
        assert!(!path.exists());
    }
}
