//! Liquid handling CLI
//!
//! Runs a configured protocol against simulated hardware, or prints the
//! reagent provisioning table an operator needs to load the deck.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use liquid_handling::config::RunConfig;
use liquid_handling::hardware::ConsoleOperator;
use liquid_handling::protocol::{provision, Hardware, ProtocolRun};
use liquid_handling::{logging, report};

#[derive(Parser, Debug)]
#[command(name = "liquid_handling", author, version, about = "Liquid-handling protocol runner")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute the configured protocol against simulated hardware
    Run {
        /// Run configuration file
        #[arg(short, long, default_value = "config/extraction.toml")]
        config: PathBuf,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        /// Resume operator pauses without waiting for Enter
        #[arg(long)]
        auto_resume: bool,
    },

    /// Print the reagent provisioning table
    Volumes {
        /// Run configuration file
        #[arg(short, long, default_value = "config/extraction.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            config,
            json,
            auto_resume,
        } => run(config, json, auto_resume).await,
        Command::Volumes { config } => volumes(config),
    }
}

async fn run(path: PathBuf, json: bool, auto_resume: bool) -> Result<()> {
    let config = RunConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    logging::init(&config.application)?;

    let operator = Arc::new(ConsoleOperator::new(config.run.simulate, auto_resume));
    let hardware = Hardware::simulated(&config, operator);
    let protocol = ProtocolRun::build(&config, hardware)?;
    let summary = protocol.execute().await?;

    if config.report.enabled {
        report::write_step_log(&summary, &config.report.output_dir)?;
    }

    if json {
        println!("{}", report::summary_json(&summary)?);
    } else {
        print!("{}", report::format_summary(&summary));
    }
    Ok(())
}

fn volumes(path: PathBuf) -> Result<()> {
    let config = RunConfig::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    println!("{} ({} samples)", config.application.name, config.run.num_samples);
    println!(
        "{:<16} {:<20} {:>10} {:>6} {:>12}",
        "REAGENT", "LABWARE", "FIRST WELL", "WELLS", "FILL (uL)"
    );
    for (line, _) in provision(&config)? {
        println!(
            "{:<16} {:<20} {:>10} {:>6} {:>12.1}",
            line.reagent, line.labware, line.first_well, line.num_wells, line.fill_volume
        );
    }
    Ok(())
}
