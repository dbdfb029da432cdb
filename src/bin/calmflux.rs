//! Calm Flux CLI - Command-line interface for the Calm Flux engine
//!
//! Commands:
//! - replay: Feed a recorded snapshot stream through the engine on a simulated clock
//! - score: Score one snapshot against a baseline file
//! - doctor: Diagnose configuration and persisted state
//! - schema: Print input and output formats

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use calm_flux::baseline::{Baseline, BaselineHistory};
use calm_flux::calibration::CalibrationState;
use calm_flux::scheduler::{AnnoyanceCounters, InterventionLogEntry};
use calm_flux::storage::StateKey;
use calm_flux::{
    EngineConfig, EngineError, FileStore, MemoryStore, MetricSnapshot, PolicyTable, Sensitivity,
    SignalEncoder, StateStore, StressEngine, StressScorer, TickOutcome, PRODUCER_NAME, VERSION,
};

/// Calm Flux - Behavioral stress scoring and intervention scheduling
#[derive(Parser)]
#[command(name = "calmflux")]
#[command(version = VERSION)]
#[command(about = "Score behavioral metrics and schedule interventions", long_about = None)]
struct Cli {
    /// Log verbosely to stderr (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an NDJSON snapshot stream through the engine
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Engine configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Baseline JSON file; without one the replay calibrates from the stream
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Intervention policy JSON file
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Persist engine state in this directory
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Simulate a presenter that shows every emitted intervention
        #[arg(long)]
        present: bool,

        /// Only write ticks that emitted an intervention
        #[arg(long)]
        interventions_only: bool,
    },

    /// Score a single snapshot against a baseline
    Score {
        /// Snapshot JSON file (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Baseline JSON file
        #[arg(long)]
        baseline: PathBuf,

        /// Detection sensitivity
        #[arg(long, value_enum, default_value = "medium")]
        sensitivity: SensitivityArg,
    },

    /// Diagnose configuration and persisted state
    Doctor {
        /// Engine configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// State directory to inspect
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print input or output formats
    Schema {
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Clone, ValueEnum)]
enum SensitivityArg {
    Low,
    Medium,
    High,
}

impl From<SensitivityArg> for Sensitivity {
    fn from(arg: SensitivityArg) -> Self {
        match arg {
            SensitivityArg::Low => Sensitivity::Low,
            SensitivityArg::Medium => Sensitivity::Medium,
            SensitivityArg::High => Sensitivity::High,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Metric snapshot input
    Input,
    /// Signal payload output
    Output,
}

/// One replay line: a bare snapshot or one tagged with its source
#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Tagged {
        source: String,
        snapshot: MetricSnapshot,
    },
    Bare(MetricSnapshot),
}

impl ReplayLine {
    fn into_parts(self) -> (String, MetricSnapshot) {
        match self {
            ReplayLine::Tagged { source, snapshot } => (source, snapshot),
            ReplayLine::Bare(snapshot) => ("default".to_string(), snapshot),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), CalmCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            config,
            baseline,
            policy,
            state_dir,
            present,
            interventions_only,
        } => cmd_replay(ReplayOptions {
            input,
            output,
            config,
            baseline,
            policy,
            state_dir,
            present,
            interventions_only,
        }),

        Commands::Score {
            input,
            baseline,
            sensitivity,
        } => cmd_score(&input, &baseline, sensitivity.into()),

        Commands::Doctor {
            config,
            state_dir,
            json,
        } => cmd_doctor(config.as_deref(), state_dir.as_deref(), json),

        Commands::Schema { schema_type } => cmd_schema(schema_type),
    }
}

struct ReplayOptions {
    input: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    baseline: Option<PathBuf>,
    policy: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    present: bool,
    interventions_only: bool,
}

fn cmd_replay(opts: ReplayOptions) -> Result<(), CalmCliError> {
    let config = load_config(opts.config.as_deref())?;
    let tick_millis = i64::try_from(config.tick_millis).map_err(|_| {
        EngineError::InvalidConfig(format!("tickMillis {} out of range", config.tick_millis))
    })?;
    let tick = Duration::milliseconds(tick_millis);

    let mut store: Box<dyn StateStore> = match &opts.state_dir {
        Some(dir) => Box::new(FileStore::new(dir)),
        None => Box::new(MemoryStore::new()),
    };
    // A supplied baseline is seeded into the store so the engine loads it like persisted state
    if let Some(path) = &opts.baseline {
        let baseline = Baseline::from_json(&fs::read_to_string(path)?)?;
        store.set(&StateKey::Baseline.key(), &baseline.to_json()?)?;
    }

    let mut engine = StressEngine::new(config, store)?;
    if let Some(path) = &opts.policy {
        engine = engine.with_policy(PolicyTable::from_json(&fs::read_to_string(path)?)?);
    }

    let reader = open_input(&opts.input)?;
    let mut writer = open_output(&opts.output)?;
    let encoder = SignalEncoder::new();

    let mut clock: Option<DateTime<Utc>> = None;
    let mut emitted = 0usize;
    let mut lines = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (source, snapshot) = serde_json::from_str::<ReplayLine>(line)
            .map_err(|e| CalmCliError::ParseError(format!("line {}: {e}", index + 1)))?
            .into_parts();
        lines += 1;

        let next = match clock {
            Some(next) => next,
            None => {
                let calibrating = engine.calibration_state(snapshot.timestamp).is_calibrating;
                if engine.baseline().is_none() && !calibrating {
                    engine.start_calibration(snapshot.timestamp);
                }
                snapshot.timestamp
            }
        };

        // Run every tick due before this snapshot arrives
        let mut next = next;
        while next < snapshot.timestamp {
            emitted += emit_tick(&mut engine, &encoder, next, &opts, writer.as_mut())?;
            next += tick;
        }
        clock = Some(next);

        engine.push_snapshot(&source, snapshot, snapshot.timestamp);
    }

    match clock {
        Some(last) => {
            emitted += emit_tick(&mut engine, &encoder, last, &opts, writer.as_mut())?;
        }
        None => return Err(CalmCliError::NoSnapshots),
    }
    writer.flush()?;

    tracing::info!(lines, emitted, "replay finished");
    Ok(())
}

/// Tick once and write the payload; returns 1 if an intervention fired
fn emit_tick<S: StateStore>(
    engine: &mut StressEngine<S>,
    encoder: &SignalEncoder,
    now: DateTime<Utc>,
    opts: &ReplayOptions,
    writer: &mut dyn Write,
) -> Result<usize, CalmCliError> {
    let outcome = engine.tick(now);
    let fired = outcome.intervention().is_some();
    let status = engine.scheduler_status(now);

    if fired || !opts.interventions_only {
        writeln!(writer, "{}", encoder.encode_to_json(&outcome, status, now)?)?;
    }
    if fired && opts.present {
        engine.record_shown(now);
    }
    if let TickOutcome::Calibrating { progress } = outcome {
        tracing::debug!(progress, "calibrating");
    }
    Ok(usize::from(fired))
}

fn cmd_score(
    input: &Path,
    baseline_path: &Path,
    sensitivity: Sensitivity,
) -> Result<(), CalmCliError> {
    let baseline = Baseline::from_json(&fs::read_to_string(baseline_path)?)?;

    let mut raw = String::new();
    open_input(input)?.read_to_string(&mut raw)?;
    let snapshot: MetricSnapshot = serde_json::from_str(&raw)?;
    let snapshot = calm_flux::normalizer::MetricNormalizer::sanitize(snapshot).snapshot;

    let score = StressScorer::new(sensitivity).score(&snapshot, &baseline, snapshot.timestamp);
    println!("{}", serde_json::to_string_pretty(&score)?);
    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    state_dir: Option<&Path>,
    json: bool,
) -> Result<(), CalmCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Calm Flux version {}", VERSION),
    });

    match load_config(config) {
        Ok(cfg) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "sensitivity {:?}, cooldown {} min, caps {}/h {}/day, calibration {} s",
                cfg.sensitivity,
                cfg.scheduler.cooldown_minutes,
                cfg.scheduler.max_per_hour,
                cfg.scheduler.max_per_day,
                cfg.calibration_duration_seconds
            ),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: CliError::from(e).message,
        }),
    }

    if let Some(dir) = state_dir {
        if dir.is_dir() {
            let store = FileStore::new(dir);
            for key in StateKey::ALL {
                checks.push(check_state_key(&store, key));
            }
        } else {
            checks.push(DoctorCheck {
                name: "state_dir".to_string(),
                status: CheckStatus::Warning,
                message: "State directory does not exist (first run)".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Calm Flux Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CalmCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_state_key(store: &FileStore, key: StateKey) -> DoctorCheck {
    let name = key.key();
    let raw = match store.get(&name) {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            return DoctorCheck {
                name,
                status: CheckStatus::Warning,
                message: "absent".to_string(),
            }
        }
        Err(e) => {
            return DoctorCheck {
                name,
                status: CheckStatus::Error,
                message: e.to_string(),
            }
        }
    };

    let parsed: Result<String, EngineError> = match key {
        StateKey::Baseline => Baseline::from_json(&raw)
            .map(|b| format!("{} samples, captured {}", b.sample_count, b.timestamp)),
        StateKey::BaselineHistory => BaselineHistory::from_json(&raw)
            .map(|h| format!("{} archived baselines", h.len()))
            .map_err(EngineError::from),
        StateKey::CalibrationState => serde_json::from_str::<CalibrationState>(&raw)
            .map(|s| format!("calibrating: {}", s.is_calibrating))
            .map_err(EngineError::from),
        StateKey::CalibrationData => serde_json::from_str::<Vec<MetricSnapshot>>(&raw)
            .map(|s| format!("{} in-flight samples", s.len()))
            .map_err(EngineError::from),
        StateKey::AnnoyanceLog => serde_json::from_str::<Vec<InterventionLogEntry>>(&raw)
            .map(|log| format!("{} logged interventions", log.len()))
            .map_err(EngineError::from),
        StateKey::AnnoyanceState => serde_json::from_str::<AnnoyanceCounters>(&raw)
            .map(|c| match c.snoozed_until {
                Some(until) => format!("snoozed until {until}"),
                None => format!("{} consecutive dismissals", c.consecutive_dismissals),
            })
            .map_err(EngineError::from),
    };

    match parsed {
        Ok(message) => DoctorCheck {
            name,
            status: CheckStatus::Ok,
            message,
        },
        Err(e) => DoctorCheck {
            name,
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    }
}

fn cmd_schema(schema_type: SchemaType) -> Result<(), CalmCliError> {
    match schema_type {
        SchemaType::Input => {
            println!("Input: metric snapshot (one JSON object per line for replay)");
            println!();
            println!("{{");
            println!("  \"source\": \"tab-1\",              (optional, replay only)");
            println!("  \"snapshot\": {{");
            println!("    \"mouse\": {{ movementVelocity, movementAcceleration, mouseJitter,");
            println!("               clickFrequencyPerMin, multiClickRatePerMin,");
            println!("               pathEfficiency (0-1), pauseRatio (0-1), scrollVelocity }},");
            println!("    \"keyboard\": {{ typingErrorRate, typingSpeedPerMin,");
            println!("                  pauseRegularity, avgPauseDuration }},");
            println!("    \"scroll\": {{ velocity }},");
            println!("    \"timestamp\": RFC 3339");
            println!("  }}");
            println!("}}");
            println!();
            println!("Missing metrics default to 0. Non-finite or negative values are");
            println!("sanitized to 0 and ratios are clamped to [0, 1].");
        }
        SchemaType::Output => {
            println!("Output: signal payload (one JSON object per tick)");
            println!();
            println!(
                "- signal_version: Payload version ({})",
                calm_flux::encoder::SIGNAL_VERSION
            );
            println!("- producer: {{ name, version, instance_id }}");
            println!("- computed_at_utc: RFC 3339");
            println!("- outcome: tagged by status:");
            println!("  - disabled | uncalibrated");
            println!("  - calibrating {{ progress }}");
            println!("  - no_data {{ held }}");
            println!("  - scored {{ score, intervention? }}");
            println!("    score: {{ mouseScore, keyboardScore, combined, level, percentage,");
            println!("             severity, timestamp, metrics, contributions }}");
            println!("- scheduler: tagged by state:");
            println!("  available | cooling_down | capped | snoozed {{ until }}");
        }
    }

    Ok(())
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<EngineConfig, CalmCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

fn open_input(path: &Path) -> Result<Box<dyn BufRead>, CalmCliError> {
    if path.as_os_str() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(fs::File::open(path)?)))
    }
}

fn open_output(path: &Path) -> Result<Box<dyn Write>, CalmCliError> {
    if path.as_os_str() == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(fs::File::create(path)?))
    }
}

// Error types

#[derive(Debug)]
enum CalmCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoSnapshots,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for CalmCliError {
    fn from(e: io::Error) -> Self {
        CalmCliError::Io(e)
    }
}

impl From<EngineError> for CalmCliError {
    fn from(e: EngineError) -> Self {
        CalmCliError::Engine(e)
    }
}

impl From<serde_json::Error> for CalmCliError {
    fn from(e: serde_json::Error) -> Self {
        CalmCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CalmCliError> for CliError {
    fn from(e: CalmCliError) -> Self {
        match e {
            CalmCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CalmCliError::Engine(EngineError::InvalidConfig(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'calmflux doctor --config <file>' for details".to_string()),
            },
            CalmCliError::Engine(e @ EngineError::InvalidBaselineStructure(_)) => CliError {
                code: "BASELINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Recalibrate or supply a baseline written by calmflux".to_string()),
            },
            CalmCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CalmCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CalmCliError::NoSnapshots => CliError {
                code: "NO_SNAPSHOTS".to_string(),
                message: "No snapshots found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            CalmCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            CalmCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'calmflux schema input' for the expected format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
