//! ssnhl CLI - Command-line interface for the SSNHL outcome pipeline
//!
//! Commands:
//! - transform: Preprocess patient records into finalized feature rows
//! - validate: Validate patient records
//! - advise: Report lab values outside their reference ranges
//! - schema: Print the finalized feature schema
//! - hospitals: List the hospital sites
//! - doctor: Diagnose configuration and artifacts

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ssnhl_outcome::advisory::assess_labs;
use ssnhl_outcome::artifacts::{parse_accuracy, ArtifactStore, DirectoryStore};
use ssnhl_outcome::imputer::ImputationOrder;
use ssnhl_outcome::model::StandardScaler;
use ssnhl_outcome::schema::{feature_schema, ColumnKind, PatientRecord};
use ssnhl_outcome::types::FinalizedBatch;
use ssnhl_outcome::{
    preprocess_records, Hospital, ModelKind, PipelineConfig, PipelineError, RecordAdapter,
    FEATURE_SCHEMA_VERSION, PRODUCER_NAME, VERSION,
};

/// ssnhl - Clinical feature pipeline for sudden sensorineural hearing loss
#[derive(Parser)]
#[command(name = "ssnhl")]
#[command(version = VERSION)]
#[command(about = "Preprocess SSNHL patient records for recovery prediction", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preprocess patient records into finalized feature rows
    Transform {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the number of imputation rounds
        #[arg(long)]
        max_iter: Option<usize>,

        /// Override the imputation seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the imputation visiting order
        #[arg(long)]
        order: Option<OrderArg>,

        /// Report lab flags changed by imputation on stderr
        #[arg(long)]
        flag_changes: bool,
    },

    /// Validate patient records
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report lab values outside their reference ranges
    Advise {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "json")]
        input_format: InputFormat,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the finalized feature schema
    Schema {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the hospital sites
    Hospitals {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and artifacts
    Doctor {
        /// Pipeline configuration file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Artifact directory to check
        #[arg(long)]
        artifacts: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one patient per line)
    Ndjson,
    /// The finalized batch as one JSON document
    Json,
    /// Pretty-printed batch
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum OrderArg {
    Ascending,
    Descending,
    Roman,
    Arabic,
    Random,
}

impl From<OrderArg> for ImputationOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Ascending => ImputationOrder::Ascending,
            OrderArg::Descending => ImputationOrder::Descending,
            OrderArg::Roman => ImputationOrder::Roman,
            OrderArg::Arabic => ImputationOrder::Arabic,
            OrderArg::Random => ImputationOrder::Random,
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
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), SsnhlCliError> {
    match cli.command {
        Commands::Transform {
            input,
            output,
            input_format,
            output_format,
            config,
            max_iter,
            seed,
            order,
            flag_changes,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::from_file(path)?,
                None => PipelineConfig::default(),
            };
            if let Some(max_iter) = max_iter {
                config.imputer.max_iter = max_iter;
            }
            if let Some(seed) = seed {
                config.imputer.random_seed = seed;
            }
            if let Some(order) = order {
                config.imputer.order = order.into();
            }
            config.validate()?;
            cmd_transform(&input, &output, input_format, output_format, &config, flag_changes)
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Advise {
            input,
            input_format,
            json,
        } => cmd_advise(&input, input_format, json),

        Commands::Schema { json } => cmd_schema(json),

        Commands::Hospitals { json } => cmd_hospitals(json),

        Commands::Doctor {
            config,
            artifacts,
            json,
        } => cmd_doctor(config.as_deref(), artifacts.as_deref(), json),
    }
}

fn read_input(input: &Path) -> Result<String, SsnhlCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_records(input: &Path, input_format: InputFormat) -> Result<Vec<PatientRecord>, SsnhlCliError> {
    let input_data = read_input(input)?;
    let records = match input_format {
        InputFormat::Ndjson => RecordAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => RecordAdapter::parse_array(&input_data)?,
    };
    if records.is_empty() {
        return Err(SsnhlCliError::NoRecords);
    }
    Ok(records)
}

fn cmd_transform(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: &PipelineConfig,
    flag_changes: bool,
) -> Result<(), SsnhlCliError> {
    let records = read_records(input, input_format)?;
    let batch = preprocess_records(&records, config)?;

    if batch.n_rows() == 0 {
        return Err(SsnhlCliError::NoRows);
    }

    if flag_changes {
        for change in batch.flag_changes() {
            eprintln!("{}", serde_json::to_string(&change)?);
        }
    }

    let output_data = format_output(&batch, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), SsnhlCliError> {
    let records = read_records(input, input_format)?;
    let results = RecordAdapter::validate_records(&records);

    let report = ValidationReport {
        total_records: records.len(),
        valid_records: records.len() - results.len(),
        invalid_records: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                patient_id: r.patient_id.clone(),
                error: r.result.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Patient {} (index {}): {}",
                    err.patient_id.as_deref().unwrap_or("unknown"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_records > 0 {
        Err(SsnhlCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_advise(input: &Path, input_format: InputFormat, json: bool) -> Result<(), SsnhlCliError> {
    let records = read_records(input, input_format)?;

    let advice: Vec<PatientAdvice> = records
        .iter()
        .map(|record| PatientAdvice {
            patient_id: record.id.clone(),
            findings: assess_labs(&record.labs).iter().map(|f| f.to_string()).collect(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&advice)?);
    } else {
        for patient in &advice {
            println!("Patient {}", patient.patient_id);
            if patient.findings.is_empty() {
                println!("  all entered lab values are within their reference ranges");
            }
            for finding in &patient.findings {
                println!("  - {}", finding);
            }
        }
    }

    Ok(())
}

fn cmd_schema(json: bool) -> Result<(), SsnhlCliError> {
    let schema = feature_schema();

    if json {
        let document = serde_json::json!({
            "schema_version": FEATURE_SCHEMA_VERSION,
            "columns": schema,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        println!("Feature Schema: {}", FEATURE_SCHEMA_VERSION);
        println!();
        for (idx, column) in schema.iter().enumerate() {
            let kind = match column.kind {
                ColumnKind::Continuous => "continuous",
                ColumnKind::Ordinal => "ordinal",
                ColumnKind::Binary => "binary",
            };
            println!("{:>3}  {:<22} {}", idx, column.name, kind);
        }
    }

    Ok(())
}

fn cmd_hospitals(json: bool) -> Result<(), SsnhlCliError> {
    let sites: Vec<HospitalEntry> = Hospital::SITES
        .iter()
        .map(|h| HospitalEntry {
            key: h.key(),
            name: h.display_name(),
            uses_scaler: h.uses_scaler(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&sites)?);
    } else {
        for site in &sites {
            let scaler = if site.uses_scaler { " (scaled)" } else { "" };
            println!("{:<8} {}{}", site.key, site.name, scaler);
        }
    }

    Ok(())
}

fn cmd_doctor(config: Option<&Path>, artifacts: Option<&Path>, json: bool) -> Result<(), SsnhlCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "version".to_string(),
        status: CheckStatus::Ok,
        message: format!("{} version {}", PRODUCER_NAME, VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Feature schema: {} ({} columns)",
            FEATURE_SCHEMA_VERSION,
            feature_schema().len()
        ),
    });

    if let Some(config_path) = config {
        checks.push(match PipelineConfig::from_file(config_path) {
            Ok(cfg) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid (max_iter {}, seed {})",
                    cfg.imputer.max_iter, cfg.imputer.random_seed
                ),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid config: {}", e),
            },
        });
    }

    if let Some(root) = artifacts {
        if root.is_dir() {
            let store = DirectoryStore::new(root);
            for hospital in Hospital::SITES {
                checks.extend(artifact_checks(&store, hospital));
            }
        } else {
            checks.push(DoctorCheck {
                name: "artifacts".to_string(),
                status: CheckStatus::Error,
                message: format!("Artifact directory {} does not exist", root.display()),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (use -i <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (-i - ready)".to_string(),
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
        println!("ssnhl Doctor Report");
        println!("===================");
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SsnhlCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn artifact_checks(store: &DirectoryStore, hospital: Hospital) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    for model in [ModelKind::Lgbm, ModelKind::Xgb] {
        let key = hospital.accuracy_key(model);
        let (status, message) = match store.fetch(&key) {
            Ok(Some(bytes)) => match parse_accuracy(&String::from_utf8_lossy(&bytes)) {
                Some(acc) => (CheckStatus::Ok, format!("accuracy {:.1}%", acc * 100.0)),
                None => (CheckStatus::Warning, "no accuracy value, default applies".to_string()),
            },
            Ok(None) => (CheckStatus::Warning, "missing, default accuracy applies".to_string()),
            Err(e) => (CheckStatus::Error, e.to_string()),
        };
        checks.push(DoctorCheck {
            name: key,
            status,
            message,
        });
    }

    let key = hospital.scaler_key();
    let check = match store.fetch(&key) {
        Ok(Some(bytes)) => match StandardScaler::from_json(&String::from_utf8_lossy(&bytes)) {
            Ok(scaler) => Some((CheckStatus::Ok, format!("{} scaled columns", scaler.columns.len()))),
            Err(e) => Some((CheckStatus::Error, format!("invalid scaler: {}", e))),
        },
        Ok(None) if hospital.uses_scaler() => Some((
            CheckStatus::Warning,
            "missing, features will stay unscaled".to_string(),
        )),
        Ok(None) => None,
        Err(e) => Some((CheckStatus::Error, e.to_string())),
    };
    if let Some((status, message)) = check {
        checks.push(DoctorCheck {
            name: key,
            status,
            message,
        });
    }

    checks
}

// Helper functions

fn format_output(batch: &FinalizedBatch, format: &OutputFormat) -> Result<String, SsnhlCliError> {
    match format {
        OutputFormat::Ndjson => {
            let names = batch.column_names();
            let mut lines: Vec<String> = Vec::new();
            for (idx, row) in batch.rows.iter().enumerate() {
                let features: serde_json::Map<String, serde_json::Value> = names
                    .iter()
                    .zip(row)
                    .map(|(name, value)| (name.to_string(), serde_json::json!(value)))
                    .collect();
                let line = serde_json::json!({
                    "schema_version": batch.schema_version,
                    "id": batch.identifiers.get(idx),
                    "features": features,
                });
                lines.push(serde_json::to_string(&line)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(batch)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(batch)?),
    }
}

// Error types

#[derive(Debug)]
enum SsnhlCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
    NoRecords,
    NoRows,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for SsnhlCliError {
    fn from(e: io::Error) -> Self {
        SsnhlCliError::Io(e)
    }
}

impl From<PipelineError> for SsnhlCliError {
    fn from(e: PipelineError) -> Self {
        SsnhlCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for SsnhlCliError {
    fn from(e: serde_json::Error) -> Self {
        SsnhlCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SsnhlCliError> for CliError {
    fn from(e: SsnhlCliError) -> Self {
        match e {
            SsnhlCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SsnhlCliError::Pipeline(e) => {
                let (code, hint) = match &e {
                    PipelineError::ParseError(_) | PipelineError::JsonError(_) => {
                        ("PARSE_ERROR", "Ensure input is a JSON array or NDJSON of patient records")
                    }
                    PipelineError::Transformation { .. } => {
                        ("TRANSFORMATION_ERROR", "Run 'ssnhl validate' to check the records")
                    }
                    PipelineError::Imputation { .. } => {
                        ("IMPUTATION_ERROR", "Check for non-numeric values in numeric fields")
                    }
                    PipelineError::Config(_) => ("CONFIG_ERROR", "Check the configuration values"),
                    _ => ("PIPELINE_ERROR", "Run with -v for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            SsnhlCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SsnhlCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No patient records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            SsnhlCliError::NoRows => CliError {
                code: "NO_ROWS".to_string(),
                message: "No records remain after filtering".to_string(),
                hint: Some("Records need an ID and a complete test_date".to_string()),
            },
            SsnhlCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            SsnhlCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    patient_id: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct PatientAdvice {
    patient_id: String,
    findings: Vec<String>,
}

#[derive(serde::Serialize)]
struct HospitalEntry {
    key: &'static str,
    name: &'static str,
    uses_scaler: bool,
}

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
