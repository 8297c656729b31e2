//! vrl-forge - generate fast VRL parsers from log samples
//!
//! `generate` runs the full candidate pipeline, `check` validates one
//! program, `calibrate` prints this machine's scoring constants.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use vrl_forge::config::{Config, PerformanceConfig};
use vrl_forge::fixer::store::PatternStore;
use vrl_forge::fixer::LocalFixer;
use vrl_forge::generator::{CandidateStrategy, CodeGenerator, Generator};
use vrl_forge::llm::{CostLedger, LlmProvider, OpenAiCompatibleClient};
use vrl_forge::logging::init_logging;
use vrl_forge::sample::{load_samples, Sample};
use vrl_forge::scorer::{estimate_performance, Calibration, CandidateScorer};
use vrl_forge::selector::{CandidateSelector, Selection};
use vrl_forge::validator::{
    CodeValidator, Checker, Runner, ValidationOutcome, Validator, VectorChecker, VectorRunner,
};

const EXIT_NO_RESULT: u8 = 2;
const EXIT_FAILURE: u8 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "vrl-forge",
    about = "Generate, repair and rank VRL parsers for log samples",
    version
)]
struct Args {
    /// Config file (defaults to ~/.config/vrl-forge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate candidates and keep the fastest valid parser
    Generate {
        /// JSON array or JSON-lines file of log events
        #[arg(long)]
        samples: PathBuf,

        /// Working VRL used as a style reference
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Directory for parser.vrl and report.json
        #[arg(long, default_value = "vrl-forge-out")]
        out: PathBuf,

        /// Number of concurrent candidates (overrides config)
        #[arg(long)]
        candidates: Option<usize>,
    },
    /// Validate one VRL program
    Check {
        program: PathBuf,

        /// Run the program against these events as well
        #[arg(long)]
        samples: Option<PathBuf>,
    },
    /// Print the CPU multiplier and engine startup time
    Calibrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref());
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("  ! {e}");
    }

    let result = match args.command {
        Command::Generate {
            samples,
            baseline,
            out,
            candidates,
        } => generate(config, &samples, baseline.as_deref(), &out, candidates).await,
        Command::Check { program, samples } => check(config, &program, samples.as_deref()).await,
        Command::Calibrate => calibrate(config).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("  ! {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn engine(config: &Config) -> (Option<Arc<dyn Checker>>, Option<Arc<dyn Runner>>) {
    let validation = &config.validation;
    let checker = validation.checker_enabled.then(|| {
        Arc::new(VectorChecker::new(
            validation.vector_binary.clone(),
            validation.timeout(),
        )) as Arc<dyn Checker>
    });
    let runner = validation.runner_enabled.then(|| {
        Arc::new(VectorRunner::from_config(validation, &config.performance)) as Arc<dyn Runner>
    });
    (checker, runner)
}

fn read_samples(path: &Path) -> Result<Vec<Sample>> {
    let samples = load_samples(path)?;
    if samples.is_empty() {
        anyhow::bail!("{} contains no events", path.display());
    }
    Ok(samples)
}

async fn calibration_for(
    runner: Option<Arc<dyn Runner>>,
    settings: &PerformanceConfig,
) -> Result<Calibration> {
    let settings = settings.clone();
    let calibration =
        tokio::task::spawn_blocking(move || *Calibration::global(runner.as_deref(), &settings))
            .await
            .context("Calibration task failed")?;
    Ok(calibration)
}

async fn generate(
    config: Config,
    samples_path: &Path,
    baseline_path: Option<&Path>,
    out: &Path,
    candidates: Option<usize>,
) -> Result<ExitCode> {
    let samples = read_samples(samples_path)?;
    let baseline = match baseline_path {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };
    eprintln!("  Loaded {} sample events", samples.len());

    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
    let models = config.llm.models.clone();
    let ledger = Arc::new(CostLedger::new());

    let count = candidates.unwrap_or(config.generation.candidate_count).max(1);
    let planner = Generator::new(provider.clone(), models.clone(), config.generation.clone());
    let (strategies, usage) = planner.plan_strategies(&samples, count).await?;
    ledger.record(usage.as_ref());
    eprintln!(
        "  Strategies: {}",
        strategies
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let (checker, runner) = engine(&config);
    eprint!("  Calibrating...");
    let calibration = calibration_for(runner.clone(), &config.performance).await?;
    eprintln!(
        " multiplier {:.2}, engine startup {:.2}s",
        calibration.cpu_multiplier,
        calibration.engine_startup.as_secs_f64()
    );

    let settings = config.generation.clone();
    let factory = move |_strategy: &CandidateStrategy| -> Arc<dyn CodeGenerator> {
        Arc::new(Generator::new(provider.clone(), models.clone(), settings.clone()))
    };
    let validator: Arc<dyn CodeValidator> =
        Arc::new(Validator::new(config.validation.clone(), checker, runner.clone()));
    let scorer = CandidateScorer::new(runner, calibration, config.performance.clone());
    let selector = CandidateSelector::new(
        Arc::new(factory),
        validator,
        Arc::new(LocalFixer::new(Arc::new(PatternStore::new()))),
        Arc::new(scorer),
        config.generation.clone(),
        config.performance.clone(),
        config.concurrency.worker_count(),
    )
    .with_ledger(ledger);

    let selection = selector
        .select(&strategies, &samples, baseline.as_deref())
        .await?;
    print_selection(&selection);
    for path in selection.write_outputs(out)? {
        eprintln!("  + Wrote {}", path.display());
    }

    Ok(match selection {
        Selection::Winner { .. } => ExitCode::SUCCESS,
        Selection::NoWinner { .. } => ExitCode::from(EXIT_NO_RESULT),
    })
}

fn print_selection(selection: &Selection) {
    println!(
        "{:<28} {:>6} {:>6} {:>9} {:>10} {:<12}",
        "strategy", "valid", "iters", "cost", "index", "tier"
    );
    for row in selection.candidates() {
        println!(
            "{:<28} {:>6} {:>6} {:>9.4} {:>10} {:<12}",
            row.strategy,
            match (row.valid, row.unavailable) {
                (_, true) => "n/a",
                (true, false) => "yes",
                (false, false) => "no",
            },
            row.iterations,
            row.cost,
            row.performance_index
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string()),
            row.tier.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string()),
        );
        if let Some(reason) = &row.failure_reason {
            println!("    {}", reason.lines().next().unwrap_or_default());
        }
    }
    match selection.winner() {
        Some(winner) => println!(
            "\nWinner: {} (total cost ${:.4})",
            winner.strategy.name,
            selection.total_cost()
        ),
        None => println!(
            "\nNo candidate validated (total cost ${:.4})",
            selection.total_cost()
        ),
    }
}

async fn check(config: Config, program: &Path, samples_path: Option<&Path>) -> Result<ExitCode> {
    let code = std::fs::read_to_string(program)
        .with_context(|| format!("Failed to read {}", program.display()))?;
    let samples = samples_path.map(read_samples).transpose()?;

    let (checker, runner) = engine(&config);
    let validator = Validator::new(config.validation.clone(), checker, runner);
    let estimate = estimate_performance(&code, &config.performance.tier_breakpoints);

    let outcome: ValidationOutcome = tokio::task::spawn_blocking(move || {
        validator.validate(&code, samples.as_deref())
    })
    .await
    .context("Validation task failed")??;

    println!(
        "estimated events/CPU%: {:.0} ({})",
        estimate.events_per_cpu_percent, estimate.tier
    );
    if outcome.passed {
        println!("valid");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("invalid: {}", outcome.message());
        Ok(ExitCode::from(EXIT_NO_RESULT))
    }
}

async fn calibrate(config: Config) -> Result<ExitCode> {
    let (_, runner) = engine(&config);
    let settings = config.performance.clone();
    let calibration =
        tokio::task::spawn_blocking(move || Calibration::measure(runner.as_deref(), &settings))
            .await
            .context("Calibration task failed")?;
    println!("{}", serde_json::to_string_pretty(&calibration)?);
    Ok(ExitCode::SUCCESS)
}

