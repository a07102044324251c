// dsverify CLI
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use dsverify::config::VerifierConfig;
use dsverify::effects::EffectAnalyzer;
use dsverify::ir::DataStore;
use dsverify::solver::Dialect;
use dsverify::verify::{Report, Verifier};

#[derive(Parser)]
#[command(name = "dsverify")]
#[command(version)]
#[command(about = "Checks that data-store actions preserve their invariants", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify actions against invariants
    Verify {
        /// Specification in JSON form
        #[arg(value_name = "SPEC")]
        spec: PathBuf,

        /// Actions to check (defaults to all)
        #[arg(short, long = "action", value_name = "ACTION")]
        actions: Vec<String>,

        /// Invariants to check (defaults to all, cardinalities included)
        #[arg(short, long = "invariant", value_name = "INVARIANT")]
        invariants: Vec<String>,

        /// Verifier configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Per-goal prover timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Stop at the first incorrect goal and exit non-zero
        #[arg(long)]
        halt_on_first_error: bool,

        /// Check goals one at a time
        #[arg(long)]
        sequential: bool,

        /// Write the rendered theory of every goal into this directory
        #[arg(long, value_name = "DIR")]
        emit_dir: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effect map of an action
    Effects {
        #[arg(value_name = "SPEC")]
        spec: PathBuf,

        #[arg(short, long)]
        action: String,
    },

    /// Render the theory of one goal without solving it
    Emit {
        #[arg(value_name = "SPEC")]
        spec: PathBuf,

        #[arg(short, long)]
        action: String,

        /// Invariant to check; the consistency theory when omitted
        #[arg(short, long)]
        invariant: Option<String>,

        #[arg(short, long, value_enum, default_value = "dfg")]
        format: Format,

        /// Output file (defaults to stdout)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Dfg,
    Smtlib,
}

impl From<Format> for Dialect {
    fn from(format: Format) -> Self {
        match format {
            Format::Dfg => Dialect::Dfg,
            Format::Smtlib => Dialect::SmtLib,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_store(path: &Path) -> Result<DataStore> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read specification {}", path.display()))?;
    DataStore::from_json(&text)
        .with_context(|| format!("Invalid specification {}", path.display()))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Verify {
            spec,
            actions,
            invariants,
            config,
            timeout,
            halt_on_first_error,
            sequential,
            emit_dir,
            json,
        } => {
            let mut settings = match config {
                Some(path) => VerifierConfig::load(&path)?,
                None => VerifierConfig::default(),
            };
            if let Some(timeout) = timeout {
                settings.timeout_secs = timeout;
            }
            settings.halt_on_first_error |= halt_on_first_error;
            settings.parallel &= !sequential;
            if emit_dir.is_some() {
                settings.emit_dir = emit_dir;
            }
            verify_command(&spec, &actions, &invariants, settings, json)
        }
        Commands::Effects { spec, action } => {
            effects_command(&spec, &action)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Emit {
            spec,
            action,
            invariant,
            format,
            output,
        } => {
            emit_command(&spec, &action, invariant.as_deref(), format.into(), output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn verify_command(
    spec: &Path,
    actions: &[String],
    invariants: &[String],
    config: VerifierConfig,
    json: bool,
) -> Result<ExitCode> {
    let store = load_store(spec)?;
    let halt = config.halt_on_first_error;
    let verifier = Verifier::new(&store, config).context("Failed to prepare invariants")?;

    let report = if actions.is_empty() {
        verifier.verify_all(invariants)?
    } else {
        let mut report = Report::default();
        for action in actions {
            let partial = verifier.verify_action(action, invariants)?;
            let stop = halt && partial.has_incorrect();
            report.extend(partial);
            if stop {
                break;
            }
        }
        report
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    if halt && report.has_incorrect() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn effects_command(spec: &Path, action: &str) -> Result<()> {
    let store = load_store(spec)?;
    let action = store.action(action)?;
    let effects = EffectAnalyzer::analyze_action(&store, action)
        .with_context(|| format!("Effect analysis of {} failed", action.name))?;
    for line in effects.describe(&store) {
        println!("{}", line);
    }
    Ok(())
}

fn emit_command(
    spec: &Path,
    action: &str,
    invariant: Option<&str>,
    dialect: Dialect,
    output: Option<PathBuf>,
) -> Result<()> {
    let store = load_store(spec)?;
    let verifier = Verifier::new(&store, VerifierConfig::default())?;
    let action = store.action(action)?;
    let invariant = invariant.map(|name| verifier.invariant(name)).transpose()?;
    let theory = verifier
        .goal_theory(action, invariant)
        .with_context(|| format!("Translation of {} failed", action.name))?;
    let text = dialect.render(&theory);
    match output {
        Some(path) => fs::write(&path, text)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{}", text),
    }
    Ok(())
}
