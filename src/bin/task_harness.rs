use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use task_harness::{logging, BatchReport, Harness, HarnessConfig, Strategy, Task};

#[derive(Parser)]
#[command(name = "task-harness")]
#[command(about = "Run batches of slow tasks on a bounded pool or one lightweight task each", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single batch
    Run {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// bounded, bounded:<size> or unbounded
        #[arg(short, long)]
        strategy: Option<Strategy>,

        /// Number of tasks
        #[arg(short, long)]
        tasks: Option<usize>,

        /// Simulated delay per task in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Cancel whatever is still pending after this many milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Give up on a single task after this many milliseconds
        #[arg(long)]
        task_timeout_ms: Option<u64>,
    },

    /// Run the same kind of workload on a bounded pool, then one task per context
    Compare {
        /// Tasks for the bounded pool
        #[arg(long, default_value_t = 1_000)]
        tasks: usize,

        /// Tasks for the unbounded strategy
        #[arg(long, default_value_t = 100_000)]
        lightweight_tasks: usize,

        /// Contexts in the bounded pool
        #[arg(long, default_value_t = 100)]
        pool_size: usize,

        /// Simulated delay per task in milliseconds
        #[arg(long, default_value_t = 1_000)]
        delay_ms: u64,
    },

    /// Write a default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "harness.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level).context("failed to initialise logging")?;

    match cli.command {
        Commands::Run {
            config,
            strategy,
            tasks,
            delay_ms,
            deadline_ms,
            task_timeout_ms,
        } => {
            let mut cfg = match config {
                Some(path) => HarnessConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => HarnessConfig::default(),
            };

            if let Some(strategy) = strategy {
                cfg.batch.set_strategy(strategy);
            }
            if let Some(tasks) = tasks {
                cfg.batch.task_count = tasks;
            }
            if let Some(delay) = delay_ms {
                cfg.batch.delay_ms = delay;
            }
            if deadline_ms.is_some() {
                cfg.batch.deadline_ms = deadline_ms;
            }
            if task_timeout_ms.is_some() {
                cfg.batch.task_timeout_ms = task_timeout_ms;
            }

            let harness = Harness::from_config(&cfg)?;
            let strategy = cfg.batch.strategy();
            println!(
                "{}",
                format!(
                    "Running {} tasks ({} ms each) with {} strategy",
                    cfg.batch.task_count, cfg.batch.delay_ms, strategy
                )
                .cyan()
            );

            let report = harness.run(cfg.batch.tasks(), strategy)?;
            print_report(&strategy, &report);
        }

        Commands::Compare {
            tasks,
            lightweight_tasks,
            pool_size,
            delay_ms,
        } => {
            let harness = Harness::new()?;
            let delay = Duration::from_millis(delay_ms);

            let bounded = Strategy::bounded(pool_size);
            let pooled = harness.run(Task::batch(tasks, delay), bounded)?;
            print_report(&bounded, &pooled);

            let lightweight = harness.run(Task::batch(lightweight_tasks, delay), Strategy::Unbounded)?;
            print_report(&Strategy::Unbounded, &lightweight);

            println!(
                "{}",
                format!(
                    "Throughput: {:.0} tasks/s on the bounded pool vs {:.0} tasks/s with one task per context",
                    pooled.throughput(),
                    lightweight.throughput()
                )
                .bold()
            );
        }

        Commands::Init { output, force } => {
            if output.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", output.display());
            }
            let content = HarnessConfig::default().to_toml_string()?;
            std::fs::write(&output, content)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("{}", format!("Wrote {}", output.display()).green());
        }
    }

    Ok(())
}

fn print_report(strategy: &Strategy, report: &BatchReport) {
    let label = match strategy {
        Strategy::Bounded { max_concurrent } => format!("pool of {max_concurrent}"),
        Strategy::Unbounded => "one task per context".to_string(),
    };

    println!(
        "{} sum of {} results = {}; needed {} ms",
        format!("[{label}]").bold(),
        report.total(),
        report.sum().to_string().green(),
        report.elapsed().as_millis().to_string().yellow()
    );

    if report.cancellations() > 0 {
        println!(
            "  {} {} cancelled ({} timed out, {} failed)",
            "!".red().bold(),
            report.cancellations(),
            report.timed_out(),
            report.failed()
        );
    }
}
