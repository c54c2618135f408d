//! relcheck
//!
//! Verify downloaded release artifacts from the command line.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use relcheck_cli::canary::{self, CanaryReport};
use relcheck_cli::verify::{verify, VerificationOutcome, VerificationRequest};
use relcheck_cli::{VerificationMode, VerifyError};

/// relcheck - Verify release artifacts with checksums and PGP signatures
#[derive(Parser, Debug)]
#[command(name = "relcheck")]
#[command(author = "Best Day Labs")]
#[command(version)]
#[command(about = "Verify downloaded release artifacts from the command line")]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Show the verification transcript and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare an artifact with a trusted reference copy
    Compare {
        file1: PathBuf,
        file2: PathBuf,
    },
    /// Check an artifact against a checksum value
    Checksum {
        file: PathBuf,
        checksum: String,
        #[arg(short, long)]
        algorithm: Option<String>,
    },
    /// Look an artifact's checksum up in a checksum file
    Checksumfile {
        file: PathBuf,
        checksum_file: PathBuf,
        #[arg(short, long)]
        algorithm: Option<String>,
    },
    /// Check a detached PGP signature over an artifact
    Pgp {
        file: PathBuf,
        signature_file: PathBuf,
        #[command(flatten)]
        keys: KeyArgs,
    },
    /// Check a signed checksum file, then the artifact against it
    Pgpchecksumfile {
        file: PathBuf,
        checksum_file: PathBuf,
        signature_file: PathBuf,
        #[arg(short, long)]
        algorithm: Option<String>,
        #[command(flatten)]
        keys: KeyArgs,
    },
    /// Run every verification described in a JSON canary descriptor
    Canary {
        descriptor: PathBuf,
        /// Write the JSON reports to this file
        #[arg(short, long, value_name = "REPORT")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct KeyArgs {
    /// Public key file (armored or binary)
    #[arg(long, value_name = "PATH")]
    keyfile: Option<PathBuf>,

    /// Key id or fingerprint to fetch from --keyserver
    #[arg(long, value_name = "ID")]
    keyid: Option<String>,

    /// HKP key server to fetch --keyid from
    #[arg(long, value_name = "HOST")]
    keyserver: Option<String>,

    /// Persistent keyring directory (default: a temporary keyring)
    #[arg(long, value_name = "DIR")]
    keyring_dir: Option<PathBuf>,
}

impl KeyArgs {
    fn apply(self, request: &mut VerificationRequest) {
        request.keyfile = self.keyfile;
        request.keyid = self.keyid;
        request.keyserver = self.keyserver;
        request.keyring_dir = self.keyring_dir;
    }
}

#[derive(Clone, Debug, PartialEq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use 'text' or 'json'", s)),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let format = cli.format.clone();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            print_error(&e, &format);
            let code = e
                .downcast_ref::<VerifyError>()
                .map(VerifyError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let request = match cli.command {
        Command::Canary { descriptor, output } => {
            return run_canary(&descriptor, output.as_deref(), &cli.format, cli.verbose);
        }
        Command::Compare { file1, file2 } => VerificationRequest::compare(file1, file2),
        Command::Checksum {
            file,
            checksum,
            algorithm,
        } => {
            let mut request = VerificationRequest::checksum(file, checksum);
            request.algorithm = algorithm;
            request
        }
        Command::Checksumfile {
            file,
            checksum_file,
            algorithm,
        } => {
            let mut request = VerificationRequest::checksum_file(file, checksum_file);
            request.algorithm = algorithm;
            request
        }
        Command::Pgp {
            file,
            signature_file,
            keys,
        } => {
            let mut request = VerificationRequest::pgp(file, signature_file);
            keys.apply(&mut request);
            request
        }
        Command::Pgpchecksumfile {
            file,
            checksum_file,
            signature_file,
            algorithm,
            keys,
        } => {
            let mut request =
                VerificationRequest::pgp_checksum_file(file, checksum_file, signature_file);
            request.algorithm = algorithm;
            keys.apply(&mut request);
            request
        }
    };

    let outcome = verify(&request)?;
    match cli.format {
        OutputFormat::Json => print_outcome_json(request.mode, &outcome)?,
        OutputFormat::Text => print_outcome_text(request.mode, &outcome, cli.verbose),
    }
    Ok(outcome.verified)
}

fn run_canary(
    descriptor: &Path,
    output: Option<&Path>,
    format: &OutputFormat,
    verbose: bool,
) -> anyhow::Result<bool> {
    let reports = canary::run_file(descriptor)?;

    if let Some(path) = output {
        let file = File::create(path)
            .with_context(|| format!("cannot create report file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &reports)
            .with_context(|| format!("cannot write report file {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => print_reports_text(&reports, verbose),
    }
    Ok(reports.iter().all(|report| report.verified))
}

fn print_outcome_text(mode: VerificationMode, outcome: &VerificationOutcome, verbose: bool) {
    println!("Using verification mode: {mode}");
    if verbose {
        for line in &outcome.messages {
            println!("{line}");
        }
    }
    if outcome.verified {
        println!("File verified");
    } else {
        println!("ERROR: File cannot be verified!");
    }
}

fn print_outcome_json(mode: VerificationMode, outcome: &VerificationOutcome) -> anyhow::Result<()> {
    let json = serde_json::json!({
        "mode": mode.tag(),
        "verified": outcome.verified,
        "messages": outcome.messages,
    });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn print_reports_text(reports: &[CanaryReport], verbose: bool) {
    let reset = "\x1b[0m";
    let green = "\x1b[32m";
    let red = "\x1b[31m";

    for report in reports {
        let (color, status) = if report.verified {
            (green, "VERIFIED")
        } else {
            (red, "FAILED")
        };
        println!("{:<24} {:<28} {}{}{}", report.name, report.mode, color, status, reset);
        if verbose {
            for line in &report.messages {
                println!("    {}", line.trim_start_matches('\n'));
            }
        }
    }
}

fn print_error(error: &anyhow::Error, format: &OutputFormat) {
    if *format == OutputFormat::Json {
        let exit_code = error
            .downcast_ref::<VerifyError>()
            .map(VerifyError::exit_code)
            .unwrap_or(1);
        let json = serde_json::json!({
            "status": "error",
            "error": format!("{error:#}"),
            "exitCode": exit_code,
        });
        println!("{json}");
    } else {
        eprintln!("ERROR: {error:#}");
    }
}
