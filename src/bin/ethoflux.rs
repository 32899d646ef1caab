//! ethoflux CLI - score rodent pose-tracking sessions
//!
//! Commands:
//! - score: Score one or more sessions (optionally against a saved session)
//! - rerun: Re-run the threshold-only tail of the cascade on a saved session
//! - edit: Resize one stored episode and reconcile its neighbours
//! - validate: Check session inputs without scoring them
//! - config: Print the default scoring configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ethoflux::adapter::{parse_session, session_to_data, SessionInput};
use ethoflux::{
    Behaviour, BehaviourProcessor, Episode, SavedSession, ScoringConfig, ScoringError,
    ScoringResult, ETHOFLUX_VERSION,
};

/// ethoflux - behaviour detection for rodent pose-tracking sessions
#[derive(Parser)]
#[command(name = "ethoflux")]
#[command(version = ETHOFLUX_VERSION)]
#[command(about = "Score behaviour episodes from pose-tracking sessions", long_about = None)]
struct Cli {
    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score sessions
    Score {
        /// Session input files (use - for stdin)
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Scoring configuration (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Previously saved session to reprocess against (single input only)
        #[arg(long)]
        saved: Option<PathBuf>,

        /// Write the saved-session document here (single input only)
        #[arg(long)]
        save: Option<PathBuf>,

        /// User recorded in the processing history
        #[arg(long, default_value = "unknown")]
        user: String,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Re-run Freezing, AreaBound, Flight and Remaining with new thresholds
    Rerun {
        /// Session input file
        #[arg(short, long)]
        input: PathBuf,

        /// Saved session to update in place
        #[arg(long)]
        saved: PathBuf,

        /// New scoring configuration (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long, default_value = "unknown")]
        user: String,
    },

    /// Resize one stored episode
    Edit {
        /// Session input file
        #[arg(short, long)]
        input: PathBuf,

        /// Saved session to update in place
        #[arg(long)]
        saved: PathBuf,

        /// Behaviour name, e.g. Grooming
        #[arg(long)]
        behaviour: String,

        /// Index of the episode within the behaviour's list
        #[arg(long)]
        index: usize,

        /// New start (seconds)
        #[arg(long)]
        start: f64,

        /// New end (seconds)
        #[arg(long)]
        end: f64,

        #[arg(long, default_value = "unknown")]
        user: String,
    },

    /// Validate session inputs
    Validate {
        /// Session input files (use - for stdin)
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default scoring configuration
    Config {
        #[arg(long, default_value = "toml")]
        format: ConfigFormat,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one result per line)
    Ndjson,
    /// JSON array of results
    Json,
    /// Pretty-printed JSON array
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum ConfigFormat {
    Toml,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli.command) {
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

fn run(command: Commands) -> Result<(), EthofluxCliError> {
    match command {
        Commands::Score {
            input,
            output,
            config,
            saved,
            save,
            user,
            output_format,
        } => cmd_score(
            &input,
            &output,
            config.as_deref(),
            saved.as_deref(),
            save.as_deref(),
            &user,
            &output_format,
        ),

        Commands::Rerun {
            input,
            saved,
            config,
            user,
        } => cmd_rerun(&input, &saved, &config, &user),

        Commands::Edit {
            input,
            saved,
            behaviour,
            index,
            start,
            end,
            user,
        } => cmd_edit(&input, &saved, &behaviour, index, Episode::new(start, end)?, &user),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Config { format } => {
            let config = ScoringConfig::default();
            match format {
                ConfigFormat::Toml => print!("{}", config.to_toml_string()?),
                ConfigFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
            }
            Ok(())
        }
    }
}

fn cmd_score(
    inputs: &[PathBuf],
    output: &Path,
    config: Option<&Path>,
    saved: Option<&Path>,
    save: Option<&Path>,
    user: &str,
    output_format: &OutputFormat,
) -> Result<(), EthofluxCliError> {
    if inputs.len() > 1 && (saved.is_some() || save.is_some()) {
        return Err(EthofluxCliError::Usage(
            "--saved and --save take a single input".to_string(),
        ));
    }

    let config = match config {
        Some(path) => ScoringConfig::from_file(path)?,
        None => ScoringConfig::default(),
    };
    let processor = BehaviourProcessor::with_config(config).with_user(user);

    let sessions = inputs
        .iter()
        .map(|path| Ok(parse_session(&read_input(path)?)?))
        .collect::<Result<Vec<SessionInput>, EthofluxCliError>>()?;

    let results: Vec<ScoringResult> = match (sessions.as_slice(), saved) {
        ([single], Some(saved)) => {
            let prior = SavedSession::load(saved)?;
            let ctx = processor.process(single, Some(&prior))?;
            save_if_requested(save, &ctx.to_saved())?;
            vec![ctx.result()]
        }
        _ => {
            let mut results = Vec::with_capacity(sessions.len());
            for ctx in processor.process_batch(&sessions) {
                let ctx = ctx?;
                save_if_requested(save, &ctx.to_saved())?;
                results.push(ctx.result());
            }
            results
        }
    };

    info!(sessions = results.len(), "scoring finished");
    write_output(output, &format_output(&results, output_format)?)
}

fn cmd_rerun(
    input: &Path,
    saved: &Path,
    config: &Path,
    user: &str,
) -> Result<(), EthofluxCliError> {
    let session = parse_session(&read_input(input)?)?;
    let prior = SavedSession::load(saved)?;
    let config = ScoringConfig::from_file(config)?;

    let processor = BehaviourProcessor::new().with_user(user);
    let mut ctx = processor.process(&session, Some(&prior))?;
    processor.rerun_tail(&mut ctx, &config)?;

    ctx.to_saved().save(saved)?;
    Ok(())
}

fn cmd_edit(
    input: &Path,
    saved: &Path,
    behaviour: &str,
    index: usize,
    range: Episode,
    user: &str,
) -> Result<(), EthofluxCliError> {
    let behaviour = Behaviour::PRIORITY
        .into_iter()
        .find(|b| b.as_str().eq_ignore_ascii_case(behaviour))
        .ok_or_else(|| EthofluxCliError::Usage(format!("unknown behaviour '{}'", behaviour)))?;

    let session = parse_session(&read_input(input)?)?;
    let prior = SavedSession::load(saved)?;
    let mut ctx = BehaviourProcessor::new()
        .with_user(user)
        .process(&session, Some(&prior))?;

    let cases = ctx.edit_episode(behaviour, index, range)?;
    info!(behaviour = behaviour.as_str(), ?cases, "episode edited");

    ctx.to_saved().save(saved)?;
    Ok(())
}

fn cmd_validate(inputs: &[PathBuf], json: bool) -> Result<(), EthofluxCliError> {
    let config = ScoringConfig::default();
    let entries: Vec<ValidationEntry> = inputs
        .iter()
        .map(|path| {
            let checked = read_input(path)
                .and_then(|content| Ok(parse_session(&content)?))
                .and_then(|input| Ok(session_to_data(&input, &config.tracking)?));
            match checked {
                Ok(data) => ValidationEntry {
                    input: path.display().to_string(),
                    valid: true,
                    frames: Some(data.time_base.len()),
                    paradigm: Some(data.paradigm.as_str().to_string()),
                    flags: data.flags.iter().map(|f| format!("{:?}", f)).collect(),
                    error: None,
                },
                Err(e) => ValidationEntry {
                    input: path.display().to_string(),
                    valid: false,
                    frames: None,
                    paradigm: None,
                    flags: Vec::new(),
                    error: Some(CliError::from(e).message),
                },
            }
        })
        .collect();

    let invalid = entries.iter().filter(|e| !e.valid).count();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!("Validation Report");
        println!("=================");
        for entry in &entries {
            match (&entry.error, entry.frames, &entry.paradigm) {
                (Some(error), _, _) => println!("  [ERR] {}: {}", entry.input, error),
                (None, Some(frames), Some(paradigm)) => {
                    println!("  [OK]  {}: {} frames, {}", entry.input, frames, paradigm);
                    for flag in &entry.flags {
                        println!("        flag: {}", flag);
                    }
                }
                _ => println!("  [OK]  {}", entry.input),
            }
        }
    }

    if invalid > 0 {
        Err(EthofluxCliError::ValidationFailed(invalid))
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(path: &Path) -> Result<String, EthofluxCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), EthofluxCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn save_if_requested(path: Option<&Path>, saved: &SavedSession) -> Result<(), EthofluxCliError> {
    if let Some(path) = path {
        saved.save(path)?;
    }
    Ok(())
}

fn format_output(results: &[ScoringResult], format: &OutputFormat) -> Result<String, EthofluxCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for result in results {
                lines.push(serde_json::to_string(result)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(results)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(results)? + "\n"),
    }
}

// Error handling

#[derive(Debug)]
enum EthofluxCliError {
    Io(io::Error),
    Scoring(ScoringError),
    Json(serde_json::Error),
    Usage(String),
    ValidationFailed(usize),
}

impl From<io::Error> for EthofluxCliError {
    fn from(e: io::Error) -> Self {
        EthofluxCliError::Io(e)
    }
}

impl From<ScoringError> for EthofluxCliError {
    fn from(e: ScoringError) -> Self {
        EthofluxCliError::Scoring(e)
    }
}

impl From<serde_json::Error> for EthofluxCliError {
    fn from(e: serde_json::Error) -> Self {
        EthofluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<EthofluxCliError> for CliError {
    fn from(e: EthofluxCliError) -> Self {
        match e {
            EthofluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            EthofluxCliError::Scoring(e) => {
                let (code, hint) = match &e {
                    ScoringError::ParseError(_) | ScoringError::JsonError(_) => {
                        ("PARSE_ERROR", "Check the session input JSON layout")
                    }
                    ScoringError::MissingInputData(_) | ScoringError::InvalidTimeBase(_) => {
                        ("INPUT_ERROR", "Run 'ethoflux validate' for details")
                    }
                    ScoringError::ConfigError(_) => {
                        ("CONFIG_ERROR", "Compare against 'ethoflux config'")
                    }
                    ScoringError::InvalidEdit(_) => {
                        ("EDIT_ERROR", "Check the episode index and range")
                    }
                    ScoringError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                    ScoringError::InvariantViolation(_) => {
                        ("INTERNAL_ERROR", "Please report this session")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            EthofluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            EthofluxCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("See 'ethoflux --help'".to_string()),
            },
            EthofluxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} inputs failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationEntry {
    input: String,
    valid: bool,
    frames: Option<usize>,
    paradigm: Option<String>,
    flags: Vec<String>,
    error: Option<String>,
}
