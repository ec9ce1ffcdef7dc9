use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use gauge_core::{
    autoselect_day, CategoryId, Day, Engine, EngineConfig, InMemoryStore, Mode, Severity, UserId,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Gauge — restricted script engine CLI
///
/// Check, hash, and run workout-day decision scripts and measurement
/// category scripts against a JSON data file.
#[derive(Parser)]
#[command(name = "gauge", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Suppress human-readable output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Log engine activity to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script without running it
    Check {
        /// Path to script file
        file: PathBuf,
        /// Which outcome the script produces
        #[arg(long, value_enum, default_value_t = ModeArg::Decision)]
        mode: ModeArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a decision script for one user
    Decide {
        /// Path to script file
        file: PathBuf,
        /// JSON data file
        #[arg(long)]
        data: PathBuf,
        /// Invoking user id
        #[arg(long)]
        user: u64,
        /// Date bound to `today` (defaults to the local date)
        #[arg(long)]
        today: Option<NaiveDate>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a results script and print the payload JSON
    Results {
        /// Path to script file (defaults to the category's stored code)
        file: Option<PathBuf>,
        /// JSON data file
        #[arg(long)]
        data: PathBuf,
        /// Invoking user id
        #[arg(long)]
        user: u64,
        /// Category the rows belong to
        #[arg(long)]
        category: u64,
    },

    /// Pick the workout day to perform
    Autoselect {
        /// JSON file with a list of days
        days: PathBuf,
        /// JSON data file
        #[arg(long)]
        data: PathBuf,
        /// Invoking user id
        #[arg(long)]
        user: u64,
        /// Date bound to `today` (defaults to the local date)
        #[arg(long)]
        today: Option<NaiveDate>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute the fingerprint (SHA-256) of a script
    Hash {
        /// Path to script file
        file: PathBuf,
    },

    /// Show version information
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Decision,
    Results,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Mode {
        match mode {
            ModeArg::Decision => Mode::Decision,
            ModeArg::Results => Mode::Results,
        }
    }
}

/// Exit code 2: the command itself could not run
type CliResult = Result<i32, String>;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(&cli) {
        Ok(code) => code,
        Err(message) => {
            eprintln!("{} {}", "error:".red().bold(), message);
            2
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("GAUGE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> CliResult {
    match &cli.command {
        Commands::Check { file, mode, json } => cmd_check(file, (*mode).into(), *json, cli.quiet),
        Commands::Decide {
            file,
            data,
            user,
            today,
            json,
        } => {
            let engine = engine(cli)?;
            let code = read_source(file)?;
            let store = load_store(data)?;
            let today = today.unwrap_or_else(local_today);
            let outcome = engine.evaluate_decision(&code, &store, UserId(*user), today);
            if *json {
                println!("{}", to_json(&outcome)?);
            } else if !cli.quiet {
                let decision = if outcome.decision {
                    "True".green().bold()
                } else {
                    "False".red().bold()
                };
                println!("decision: {}", decision);
                if !outcome.debug.is_empty() {
                    println!("debug: {}", outcome.debug);
                }
            }
            Ok(0)
        }
        Commands::Results {
            file,
            data,
            user,
            category,
        } => {
            let engine = engine(cli)?;
            let store = load_store(data)?;
            let (user, category) = (UserId(*user), CategoryId(*category));
            let code = match file {
                Some(file) => read_source(file)?,
                None => store
                    .category(user, category)
                    .and_then(|c| c.code.clone())
                    .ok_or_else(|| {
                        format!("category {} of user {} has no code", category, user)
                    })?,
            };
            let payload = engine.compute_results(&code, category, &store, user);
            println!("{}", to_json(&payload)?);
            Ok(if payload.is_error() { 1 } else { 0 })
        }
        Commands::Autoselect {
            days,
            data,
            user,
            today,
            json,
        } => {
            let engine = engine(cli)?;
            let text = read_source(days)?;
            let days: Vec<Day> = serde_json::from_str(&text)
                .map_err(|e| format!("invalid days file {}: {}", days.display(), e))?;
            tracing::debug!(count = days.len(), "loaded days");
            let store = load_store(data)?;
            let today = today.unwrap_or_else(local_today);

            let Some(selection) = autoselect_day(&engine, &days, &store, UserId(*user), today)
            else {
                eprintln!("{} no days to select from", "error:".red().bold());
                return Ok(1);
            };
            if *json {
                println!("{}", to_json(&selection)?);
            } else if !cli.quiet {
                let how = if selection.fallback {
                    "(fallback)".yellow()
                } else {
                    "(decided)".green()
                };
                println!(
                    "selected day {} {} {}",
                    selection.day.id.to_string().bold(),
                    selection.day.description,
                    how
                );
                println!("evaluated: {}", selection.evaluated);
                if !selection.debug.is_empty() {
                    println!("debug: {}", selection.debug);
                }
            }
            Ok(0)
        }
        Commands::Hash { file } => {
            let source = read_source(file)?;
            match gauge_core::fingerprint(&source) {
                Ok(hash) => {
                    println!("{}", hash);
                    Ok(0)
                }
                Err(err) => {
                    eprintln!("{} {}", "error:".red().bold(), err);
                    Ok(1)
                }
            }
        }
        Commands::Version => {
            println!(
                "gauge {} (gauge-core {})",
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_VERSION")
            );
            Ok(0)
        }
    }
}

fn cmd_check(file: &Path, mode: Mode, json: bool, quiet: bool) -> CliResult {
    let source = read_source(file)?;

    match gauge_core::compile(&source, mode) {
        Ok(unit) => {
            if json {
                let report = serde_json::json!({
                    "valid": true,
                    "mode": mode,
                    "fingerprint": unit.fingerprint(),
                    "errors": 0,
                    "warnings": unit.warnings().len(),
                    "diagnostics": unit.warnings().iter().map(|d| d.to_string()).collect::<Vec<_>>(),
                });
                println!("{}", to_json(&report)?);
            } else if !quiet {
                for warning in unit.warnings() {
                    eprintln!("{}", warning.to_string().yellow());
                }
                println!(
                    "{} {} is valid ({} mode)",
                    "✓".green().bold(),
                    file.display(),
                    mode
                );
            }
            Ok(0)
        }
        Err(err) => {
            let errors = err
                .diagnostics
                .iter()
                .filter(|d| d.severity == Severity::Error)
                .count()
                .max(1);
            if json {
                let report = serde_json::json!({
                    "valid": false,
                    "mode": mode,
                    "errors": errors,
                    "message": err.message,
                    "diagnostics": err.diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
                });
                println!("{}", to_json(&report)?);
            } else {
                eprintln!("{} {}", "error:".red().bold(), err.message);
                for diagnostic in &err.diagnostics {
                    match diagnostic.severity {
                        Severity::Error => eprintln!("  {}", diagnostic.to_string().red()),
                        Severity::Warning => eprintln!("  {}", diagnostic.to_string().yellow()),
                    }
                }
            }
            Ok(1)
        }
    }
}

// ── Helpers ───────────────────────────────────────────────

fn engine(cli: &Cli) -> Result<Engine, String> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    Ok(Engine::new(config))
}

fn read_source(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))
}

fn load_store(path: &Path) -> Result<InMemoryStore, String> {
    InMemoryStore::load(path).map_err(|e| e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
