//! Mindscore CLI - Command-line interface for Mindscore
//!
//! Commands:
//! - analyze: Score one user-day
//! - browse: List collections or dump one
//! - doctor: Diagnose model and store configuration
//! - schema: Print the feature schema and input formats

use chrono::FixedOffset;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use mindscore::document::Document;
use mindscore::error::ErrorKind;
use mindscore::selector::{parse_utc_offset, RecordSelector};
use mindscore::store::{FileStore, RecordStore};
use mindscore::types::{parse_date, AnalyzeError};
use mindscore::{
    AnalyzeResponse, ComputeError, Config, EnsembleModel, FeatureMapper, PredictionPipeline,
    UserKey, FEATURE_NAMES, MINDSCORE_VERSION,
};

const LOG_LEVEL_ENV: &str = "MINDSCORE_LOG_LEVEL";

/// Mindscore - daily biometric records to a mental-health score
#[derive(Parser)]
#[command(name = "mindscore")]
#[command(version = MINDSCORE_VERSION)]
#[command(about = "Score a user's daily wearable records", long_about = None)]
struct Cli {
    /// Model artifact (overrides MINDSCORE_MODEL_PATH)
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Directory of exported collections (overrides MINDSCORE_STORE_DIR)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Record collection name (overrides MINDSCORE_COLLECTION)
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Offset calendar days are measured in, e.g. "+02:00" (overrides MINDSCORE_UTC_OFFSET)
    #[arg(long, global = true, value_parser = parse_utc_offset)]
    utc_offset: Option<FixedOffset>,

    /// Record fetch timeout in ms, 0 to disable (overrides MINDSCORE_FETCH_TIMEOUT_MS)
    #[arg(long, global = true)]
    fetch_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one user's records for one calendar day
    Analyze {
        /// User key (the records' _id)
        #[arg(short, long)]
        user: String,

        /// Calendar date, YYYY-MM-DD
        #[arg(short, long)]
        date: String,

        /// Print the matched records and their feature vectors first
        #[arg(long)]
        show_records: bool,

        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// List collections, or print every document of one
    Browse {
        /// Collection to print; lists collection names when omitted
        name: Option<String>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        format: OutputFormat,
    },

    /// Diagnose model and store configuration
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the feature schema and input formats
    Schema {
        /// Output JSON Schema instead of a description
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one document per line)
    Ndjson,
    /// JSON array of documents
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!(
                "{}",
                serde_json::to_string(&error).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = std::env::var(LOG_LEVEL_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(&filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
}

fn run(cli: Cli) -> Result<(), CliFailure> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Analyze {
            user,
            date,
            show_records,
            json,
        } => cmd_analyze(&config, &user, &date, show_records, json),

        Commands::Browse { name, format } => cmd_browse(&config, name.as_deref(), format),

        Commands::Doctor { json } => cmd_doctor(&config, json),

        Commands::Schema { json_schema } => cmd_schema(json_schema),
    }
}

/// Environment first, then flags on top
fn load_config(cli: &Cli) -> Result<Config, CliFailure> {
    let mut config = Config::from_env().map_err(CliFailure::Config)?;

    if let Some(model) = &cli.model {
        config.model_path = Some(model.clone());
    }
    if let Some(store) = &cli.store {
        config.store_dir = store.clone();
    }
    if let Some(collection) = &cli.collection {
        config.collection = collection.clone();
    }
    if let Some(offset) = cli.utc_offset {
        config.utc_offset = offset;
    }
    if let Some(ms) = cli.fetch_timeout_ms {
        config.fetch_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }

    Ok(config)
}

fn cmd_analyze(
    config: &Config,
    user: &str,
    date: &str,
    show_records: bool,
    json: bool,
) -> Result<(), CliFailure> {
    let pipeline = PredictionPipeline::from_config(config).map_err(CliFailure::Startup)?;

    if show_records {
        print_records(&pipeline, config, user, date)?;
    }

    let response = pipeline.analyze(user, date);
    if json {
        println!("{}", serde_json::to_string(&response)?);
    }

    match response {
        AnalyzeResponse::Score { score } => {
            if !json {
                println!("Predicted mental health score: {:.2}", score);
            }
            Ok(())
        }
        AnalyzeResponse::Error { error } => Err(CliFailure::Analyze(error)),
    }
}

/// Print the day's records and, where they map cleanly, their feature vectors
fn print_records(
    pipeline: &PredictionPipeline,
    config: &Config,
    user: &str,
    date: &str,
) -> Result<(), CliFailure> {
    let request = UserKey::parse(user)
        .and_then(|key| RecordSelector::new(key, parse_date(date)?, config.utc_offset));
    let selector = match request {
        Ok(selector) => selector,
        // analyze reports the same error
        Err(_) => return Ok(()),
    };

    let window = selector.window();
    let fetched = match pipeline
        .store()
        .find_by_key_and_window(selector.user_key(), window.start, window.end)
    {
        Ok(fetched) => fetched,
        Err(_) => return Ok(()),
    };
    let records = selector.select(fetched);

    println!("Raw records ({}):", records.len());
    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }

    if let Ok(features) = FeatureMapper::map(&records)
        .and_then(|mapped| FeatureMapper::resolve_durations(&mapped))
    {
        println!("Feature vectors:");
        for vector in &features {
            println!("{}", serde_json::to_string(vector)?);
        }
    }
    println!();

    Ok(())
}

fn cmd_browse(
    config: &Config,
    collection: Option<&str>,
    format: OutputFormat,
) -> Result<(), CliFailure> {
    let store = FileStore::with_collection(&config.store_dir, config.collection.clone());

    match collection {
        None => {
            for name in store.list_collections().map_err(CliFailure::Store)? {
                println!("{}", name);
            }
        }
        Some(name) => {
            let documents = store.find_all(name).map_err(CliFailure::Store)?;
            tracing::info!(collection = name, documents = documents.len(), "collection read");
            print!("{}", format_output(&documents, &format)?);
        }
    }

    Ok(())
}

fn cmd_doctor(config: &Config, json: bool) -> Result<(), CliFailure> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "mindscore_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Mindscore version {}", MINDSCORE_VERSION),
    });

    match &config.model_path {
        Some(path) => match EnsembleModel::load(path) {
            Ok(model) => checks.push(DoctorCheck {
                name: "model".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Loaded {} v{} from {}",
                    model.name(),
                    model.version(),
                    path.display()
                ),
            }),
            Err(e) => checks.push(DoctorCheck {
                name: "model".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        },
        None => checks.push(DoctorCheck {
            name: "model".to_string(),
            status: CheckStatus::Error,
            message: "No model artifact configured".to_string(),
        }),
    }

    let store = FileStore::with_collection(&config.store_dir, config.collection.clone());
    match store.list_collections() {
        Ok(collections) => {
            checks.push(DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "{} ({} collections)",
                    store.dir().display(),
                    collections.len()
                ),
            });

            let present = collections.iter().any(|c| c == store.record_collection());
            checks.push(DoctorCheck {
                name: "record_collection".to_string(),
                status: if present {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Error
                },
                message: if present {
                    format!("Collection {:?} found", store.record_collection())
                } else {
                    format!("Collection {:?} not found", store.record_collection())
                },
            });
        }
        Err(e) => checks.push(DoctorCheck {
            name: "store".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    checks.push(DoctorCheck {
        name: "day_window".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "UTC offset {}, fetch timeout {}",
            config.utc_offset,
            match config.fetch_timeout {
                Some(timeout) => format!("{} ms", timeout.as_millis()),
                None => "disabled".to_string(),
            }
        ),
    });

    let report = DoctorReport {
        version: MINDSCORE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Mindscore Doctor Report");
        println!("=======================");
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CliFailure::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(json_schema: bool) -> Result<(), CliFailure> {
    if json_schema {
        println!("{}", get_record_json_schema());
        return Ok(());
    }

    println!("Feature vector (model input, in order):");
    println!();
    for (name, source) in [
        ("Heart_Rate_BPM", "heartRateAvg (number)"),
        ("Sleep_Duration_Hours", "sleepDuration (text such as \"6 hr 30 min\")"),
        ("Physical_Activity_Steps", "totalSteps (non-negative integer)"),
        ("Oxygen_Saturation", "oxygenAvg (number)"),
        ("Body_Temperature_Celsius", "temperature (number)"),
    ] {
        println!("  {:<26} <- {}", name, source);
    }
    println!();
    println!("Records:");
    println!("  - _id: user key (string or {{\"$oid\": ...}})");
    println!("  - createdAt: RFC 3339, epoch millis, or {{\"$date\": ...}}");
    println!("  - stored as <collection>.json (array) or <collection>.ndjson");
    println!();
    println!("Model artifact:");
    println!("  - name, version, feature_names (exactly the five above, in order)");
    println!("  - scaler {{mean[5], scale[5]}} (optional)");
    println!("  - estimators [{{coefficients[5], intercept}}], averaged");
    println!("  - classes [number] (optional, output snaps to the nearest)");

    Ok(())
}

// Helper functions

fn format_output(documents: &[Document], format: &OutputFormat) -> Result<String, CliFailure> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for doc in documents {
                out.push_str(&serde_json::to_string(doc)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(documents)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(documents)? + "\n"),
    }
}

fn get_record_json_schema() -> String {
    let number = serde_json::json!({
        "oneOf": [
            {"type": "number"},
            {"type": "object", "description": "$numberInt, $numberLong, $numberDouble or $numberDecimal"}
        ]
    });

    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "mindscore record",
        "type": "object",
        "required": ["_id", "createdAt", "heartRateAvg", "oxygenAvg", "temperature", "totalSteps", "sleepDuration"],
        "properties": {
            "_id": {"oneOf": [{"type": "string"}, {"type": "object", "required": ["$oid"]}]},
            "createdAt": {"oneOf": [
                {"type": "string", "format": "date-time"},
                {"type": "integer"},
                {"type": "object", "required": ["$date"]}
            ]},
            "heartRateAvg": number,
            "oxygenAvg": number,
            "temperature": number,
            "totalSteps": number,
            "sleepDuration": {"type": "string", "pattern": "^\\s*(\\d+\\s*hr)?\\s*(\\d+\\s*min)?\\s*$"}
        },
        "x-feature-order": FEATURE_NAMES,
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum CliFailure {
    Config(ComputeError),
    Startup(ComputeError),
    Store(ComputeError),
    Analyze(AnalyzeError),
    Json(serde_json::Error),
    DoctorFailed,
}

impl From<serde_json::Error> for CliFailure {
    fn from(e: serde_json::Error) -> Self {
        CliFailure::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CliFailure> for CliError {
    fn from(e: CliFailure) -> Self {
        match e {
            CliFailure::Config(e) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check MINDSCORE_* environment variables".to_string()),
            },
            CliFailure::Startup(e) => CliError {
                code: "MODEL_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(
                    "Pass --model or set MINDSCORE_MODEL_PATH; run 'mindscore doctor'".to_string(),
                ),
            },
            CliFailure::Store(e) => CliError {
                code: "STORE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(
                    "Check --store points at a directory of exported collections".to_string(),
                ),
            },
            CliFailure::Analyze(error) => CliError {
                code: error.kind.as_str().to_uppercase(),
                message: error.message,
                hint: analyze_hint(error.kind, error.retryable),
            },
            CliFailure::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CliFailure::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

fn analyze_hint(kind: ErrorKind, retryable: bool) -> Option<String> {
    let hint = match kind {
        ErrorKind::Connection if retryable => "The store may be temporarily unavailable; retry",
        ErrorKind::Connection => "Check the store directory",
        ErrorKind::NoData => "Check the user key and date; run 'mindscore browse' to inspect records",
        ErrorKind::Schema => "Run with --show-records to inspect the record fields",
        ErrorKind::Parse => "sleepDuration must look like \"6 hr 30 min\"",
        ErrorKind::Inference => "Run 'mindscore doctor' to check the model artifact",
        ErrorKind::InvalidRequest => "Dates are YYYY-MM-DD; user keys must not be blank",
    };
    Some(hint.to_string())
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
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
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Error,
}
