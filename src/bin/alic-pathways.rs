//! # alic-pathways
//!
//! Command line front end of the ALIC pathway pipeline.
//!
//! ## Usage
//!
//! ```bash
//! alic-pathways --config alic.toml subject --dir /data/sub-01/OCD_pipeline
//! alic-pathways --config alic.toml batch --study /data --subjects subjects.txt
//! alic-pathways --config alic.toml summarize --study /data --subjects subjects.txt
//! ```
//!
//! Without `--config` the file named by `ALIC_PATHWAYS_CONFIG` is used, else the built-in defaults.
//! Log verbosity follows `RUST_LOG` and defaults to `info`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::{Path, PathBuf};

use alic_pathways::{load_config, read_subject_list, run_batch, CohortAggregator, SubjectPipeline};

#[derive(Parser, Debug)]
#[command(name = "alic-pathways")]
#[command(about = "Subsegment ALIC pathways into per-target bundles and summarize their centroid trajectories")]
struct CliArgs {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run all pipeline stages for a single subject directory
    Subject {
        /// Directory holding the subject's input data
        #[arg(long)]
        dir: PathBuf,

        /// Subject id used in logs, defaults to the directory name
        #[arg(long)]
        id: Option<String>,
    },
    /// Run the pipeline for every subject of a study, one after the other
    Batch {
        #[arg(long)]
        study: PathBuf,

        /// Text file with subject ids, one per line or comma separated
        #[arg(long)]
        subjects: PathBuf,
    },
    /// Collect the standard space centroid trajectories of a cohort into summary tables
    Summarize {
        #[arg(long)]
        study: PathBuf,

        #[arg(long)]
        subjects: PathBuf,
    },
}

fn subject_id(dir: &Path, id: Option<String>) -> String {
    id.unwrap_or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| String::from("subject")))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CliArgs::parse();
    let config = load_config(args.config.as_deref()).context("Failed to load the configuration")?;

    match args.command {
        Commands::Subject { dir, id } => {
            let subject = subject_id(&dir, id);
            let report = SubjectPipeline::new(&config, &subject, &dir)
                .run()
                .with_context(|| format!("Pipeline failed for subject '{}'", subject))?;
            println!("Subject '{}': {} pathways written.", report.subject, report.pathways.len());
        }
        Commands::Batch { study, subjects } => {
            let subjects = read_subject_list(&subjects).context("Failed to read the subject list")?;
            let report = run_batch(&config, &study, &subjects);
            println!("{} subjects succeeded, {} failed.", report.succeeded.len(), report.failed.len());
            for (subject, reason) in report.failed.iter() {
                println!("  {}: {}", subject, reason);
            }
            if !report.all_succeeded() {
                bail!("{} of {} subjects failed", report.failed.len(), subjects.len());
            }
        }
        Commands::Summarize { study, subjects } => {
            let subjects = read_subject_list(&subjects).context("Failed to read the subject list")?;
            let report = CohortAggregator::new(&config, &study)
                .run(&subjects)
                .context("Failed to summarize the cohort")?;
            println!("{} pathways summarized, {} tables written, {} subject tables missing.",
                report.pathways, report.files_written.len(), report.missing.len());
        }
    }
    Ok(())
}
