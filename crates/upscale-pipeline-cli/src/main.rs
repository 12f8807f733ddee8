use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use upscale_pipeline_core::logging::{init_logger, LOG_ENV_VAR};
use upscale_pipeline_core::{
    Config, Decider, Pipeline, PipelineReport, Prompt, Similarity, StaticDecider,
};

#[derive(Parser)]
#[command(name = "upscale-pipeline")]
#[command(about = "Optimize, deduplicate and upscale a directory of images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the source images
    #[arg(long)]
    base_dir: Option<PathBuf>,
}

impl ConfigArgs {
    fn load(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(base) = &self.base_dir {
            config.directories.base = base.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// JPEG quality (0-100)
        #[arg(short, long)]
        quality: Option<u8>,

        /// Duplicate similarity: low, normal, high or an MSE threshold
        #[arg(short, long)]
        similarity: Option<Similarity>,

        /// Path to the Real-ESRGAN executable
        #[arg(long)]
        upscaler: Option<PathBuf>,

        /// Answer yes to every question
        #[arg(short, long)]
        yes: bool,

        /// Never delete duplicates
        #[arg(long)]
        no_delete: bool,

        /// Do not copy duplicate groups for review
        #[arg(long)]
        no_review_copy: bool,

        /// Keep temporary directories after the run
        #[arg(long)]
        keep_temp: bool,

        /// Number of re-encoding threads (0 = auto)
        #[arg(long)]
        threads: Option<usize>,

        /// Write a rotating log file into this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Verbosity level
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,
    },

    /// Remove temporary directories left by an earlier run
    Cleanup {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Path to save configuration file
        #[arg(default_value = "upscale-pipeline.json")]
        path: PathBuf,
    },
}

/// Asks on the terminal
struct TerminalDecider;

impl Decider for TerminalDecider {
    fn confirm(&self, prompt: &Prompt) -> bool {
        let default = !matches!(prompt, Prompt::DeleteDuplicates { .. });
        match Confirm::new()
            .with_prompt(prompt.to_string())
            .default(default)
            .interact()
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Could not read answer, assuming no: {}", e);
                false
            }
        }
    }
}

fn init_logging(log_dir: Option<&PathBuf>, level: LevelFilter) -> anyhow::Result<()> {
    match log_dir {
        Some(dir) => init_logger(dir, level).map_err(|e| anyhow!("{}", e)),
        None => {
            env_logger::Builder::new()
                .filter_level(level)
                .parse_env(LOG_ENV_VAR)
                .init();
            Ok(())
        }
    }
}

fn print_summary(report: &PipelineReport) {
    println!(
        "Optimized {} base image(s), {} already done",
        report.optimize_base.encoded, report.optimize_base.skipped
    );
    println!(
        "{} duplicate group(s), {} review copies, {} deleted",
        report.duplicates.groups, report.duplicates.copied, report.duplicates.deleted
    );
    println!(
        "{} upscaled, {} large enough to skip, {} already upscaled",
        report.upscaled,
        report.gate.skipped_large.len(),
        report.gate.already_upscaled.len()
    );
    println!(
        "Optimized {} upscaled image(s)",
        report.optimize_upscaled.encoded
    );

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("{} image(s) could not be processed:", failures.len());
        for failure in failures {
            println!("  {}: {}", failure.path.display(), failure.reason);
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    // Parse command line arguments
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            quality,
            similarity,
            upscaler,
            yes,
            no_delete,
            no_review_copy,
            keep_temp,
            threads,
            log_dir,
            verbose,
        } => {
            let mut config = config.load()?;

            // Override config with command line arguments
            if let Some(quality) = quality {
                config.quality = quality;
            }
            if let Some(similarity) = similarity {
                config.similarity = similarity;
            }
            if let Some(upscaler) = upscaler {
                config.upscale.executable = upscaler;
            }
            if let Some(threads) = threads {
                config.threads = threads;
            }
            config.allow_deleting &= !no_delete;
            config.allow_review_copies &= !no_review_copy;
            config.cleanup_on_exit &= !keep_temp;

            // Set log level based on verbosity
            let level = match verbose {
                0 => config.log_level.to_level_filter(),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            };
            init_logging(log_dir.as_ref(), level)?;

            let decider: Box<dyn Decider> = if yes {
                Box::new(StaticDecider::always(true))
            } else {
                Box::new(TerminalDecider)
            };
            let pipeline = Pipeline::new(config)?.with_decider(decider);

            let shutdown = pipeline.shutdown_handle();
            ctrlc::set_handler(move || {
                shutdown.store(true, Ordering::SeqCst);
            })
            .context("Failed to install Ctrl-C handler")?;

            info!("Starting upscale pipeline...");
            let report = pipeline.run().map_err(|e| {
                error!("{}", e);
                e
            })?;
            print_summary(&report);
            info!("Pipeline complete");

            Ok(())
        }

        Commands::Cleanup { config } => {
            init_logging(None, LevelFilter::Info)?;
            let pipeline = Pipeline::new(config.load()?)?;
            pipeline.cleanup()?;
            Ok(())
        }

        Commands::GenerateConfig { path } => {
            let config = Config::default();
            config.save_to_file(&path)?;
            println!("Configuration file generated at: {}", path.display());
            Ok(())
        }
    }
}
