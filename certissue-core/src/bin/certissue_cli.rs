//! Certissue CLI - Batch runner and lookups
//!
//! Commands: run, inspect, verify, layout
//! Outputs JSON to stdout, logs to stderr
//! Returns 1 on fatal errors, 2 on validation failure or lookup miss

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use certissue_core::{
    ledger::VERIFICATION_FILE,
    source::inspect,
    transport::DisabledTransport,
    BatchMode, BatchRunner, CsvSource, MailTransport, PipelineError, Settings, SmtpMailer,
    VerificationStore,
};

#[derive(Parser)]
#[command(name = "certissue-cli")]
#[command(about = "Certissue CLI - Certificate issuance and delivery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML, JSON or YAML); CERTISSUE_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue and deliver certificates for every participant in the source
    Run {
        /// Participant CSV (overrides paths.source)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Render and record, but send nothing
        #[arg(long, conflicts_with = "test")]
        dry_run: bool,

        /// Send every certificate to the operator address
        #[arg(long)]
        test: bool,
    },

    /// Preview a participant source without issuing anything
    Inspect {
        #[arg(short, long)]
        source: Option<PathBuf>,
    },

    /// Look up an issued certificate
    Verify {
        /// Certificate ID
        certificate_id: String,
    },

    /// Print the resolved certificate layout
    Layout,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{}", out),
        Err(e) => println!(r#"{{"success": false, "error": "Serialization failed: {}"}}"#, e),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            print_json(&json!({"success": false, "error": e.to_string()}));
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Run { source, dry_run, test } => {
            let mut settings = settings;
            if dry_run {
                settings = settings.with_mode(BatchMode::DryRun);
            } else if test {
                settings = settings.with_mode(BatchMode::Test);
            }
            if let Some(path) = source {
                settings.paths.source = path;
            }
            run(settings).await
        }

        Commands::Inspect { source } => {
            let source = CsvSource::new(source.unwrap_or_else(|| settings.paths.source.clone()));
            match inspect(&source, &settings.event_name) {
                Ok(report) => {
                    print_json(&report);
                    if report.valid_rows > 0 && report.has_required_columns {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2)
                    }
                }
                Err(e) => {
                    print_json(&json!({"success": false, "error": e.to_string()}));
                    ExitCode::FAILURE
                }
            }
        }

        Commands::Verify { certificate_id } => {
            let store = match VerificationStore::open(settings.paths.data_dir.join(VERIFICATION_FILE)) {
                Ok(store) => store,
                Err(e) => {
                    print_json(&json!({"valid": false, "error": e.to_string()}));
                    return ExitCode::FAILURE;
                }
            };
            match store.get(&certificate_id) {
                Some(record) => {
                    print_json(&json!({"valid": true, "certificate": record}));
                    ExitCode::SUCCESS
                }
                None => {
                    print_json(&json!({"valid": false, "error": "Certificate not found"}));
                    ExitCode::from(2)
                }
            }
        }

        Commands::Layout => {
            print_json(&settings.layout);
            ExitCode::SUCCESS
        }
    }
}

async fn run(settings: Settings) -> ExitCode {
    let transport: Arc<dyn MailTransport> = if settings.mode.is_dry_run() {
        Arc::new(DisabledTransport)
    } else {
        match SmtpMailer::from_settings(&settings.email) {
            Ok(mailer) => Arc::new(mailer),
            Err(e) => {
                print_json(&json!({"success": false, "error": e.to_string()}));
                return ExitCode::FAILURE;
            }
        }
    };

    let runner = BatchRunner::new(transport);
    let source = CsvSource::new(settings.paths.source.clone());

    match runner.run_batch(&settings, &source).await {
        Ok(result) => {
            print_json(&json!({"success": true, "result": result}));
            ExitCode::SUCCESS
        }
        Err(PipelineError::NoValidRecords { rejected, errors }) => {
            print_json(&json!({
                "success": false,
                "error": format!("No valid participants ({} row(s) rejected)", rejected),
                "rejected": errors,
            }));
            ExitCode::from(2)
        }
        Err(e) => {
            print_json(&json!({"success": false, "error": e.to_string()}));
            ExitCode::FAILURE
        }
    }
}
