use std::error::Error;
use std::process;

use clap::Parser;

use radiant::cli::Cli;
use radiant::train_agent;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let Some(config) = Cli::parse().into_config()? else {
        println!("No arguments were passed.");
        return Ok(());
    };
    let summary = train_agent(config)?;
    if summary.normalization_saved {
        println!(
            "  normalization -> {} | {}",
            summary.paths.mean_path().display(),
            summary.paths.var_path().display()
        );
    }
    println!(
        "  final model -> {} ({} timesteps, {} evaluations)",
        summary.paths.final_model_path().display(),
        summary.num_timesteps,
        summary.evaluations
    );
    Ok(())
}
