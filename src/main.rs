use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::Serialize;

use luppa_mrtd::models::{ParsedMrzRecord, RecognizedLine};
use luppa_mrtd::processing::parsers::MrzParserManager;
use luppa_mrtd::processing::stabilizer::{MrzStabilizer, StabilizerVerdict};
use luppa_mrtd::validation::FormatClassifier;
use luppa_mrtd::verification::BacKey;
use luppa_mrtd::{PassportError, ScanConfig};

#[derive(Parser, Debug)]
#[command(name = "mrtd_cli", version, about = "MRZ parsing, stabilization and BAC key tools")]
struct Cli {
    /// JSON scan configuration; missing fields use the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse MRZ text (lines separated by newlines) into a JSON record
    Parse {
        text: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Guess the document format from the first MRZ line
    Classify {
        line: String,
        #[arg(long, default_value_t = 2)]
        lines: usize,
    },
    /// Replay recognized frames (a JSON array of arrays of lines) through the stabilizer
    Stabilize { frames: PathBuf },
    /// Derive the BAC key seed and keys
    BacKey {
        document_number: String,
        date_of_birth: String,
        date_of_expiry: String,
    },
}

#[derive(Serialize)]
struct FrameTrace {
    frame: usize,
    verdict: String,
    consecutive_count: Option<u32>,
}

#[derive(Serialize)]
struct StabilizeReport {
    frames: Vec<FrameTrace>,
    record: Option<ParsedMrzRecord>,
}

fn load_config(path: Option<&PathBuf>) -> Result<ScanConfig, PassportError> {
    match path {
        Some(path) => ScanConfig::from_json_file(path),
        None => Ok(ScanConfig::default()),
    }
}

fn parse(text: Option<String>, file: Option<PathBuf>) -> Result<(), PassportError> {
    let text = match (text, file) {
        (Some(text), _) => text.replace("\\n", "\n"),
        (None, Some(path)) => fs::read_to_string(path)?,
        (None, None) => return Err(PassportError::MrzParsingError("Provide MRZ text or --file".to_string())),
    };
    let record = MrzParserManager::new().parse_required(&text)?;
    if !record.check_digits.all_valid() {
        warn!("Some check digits failed: {:?}", record.check_digits);
    }
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn stabilize(config: &ScanConfig, frames: PathBuf) -> Result<(), PassportError> {
    let frames: Vec<Vec<RecognizedLine>> = serde_json::from_str(&fs::read_to_string(frames)?)?;
    let mut stabilizer = MrzStabilizer::new(config.stabilizer.clone());
    let parsers = MrzParserManager::new();
    let mut report = StabilizeReport {
        frames: Vec::new(),
        record: None,
    };
    for (index, lines) in frames.iter().enumerate() {
        let verdict = stabilizer.process_frame(lines);
        let (name, count) = match &verdict {
            StabilizerVerdict::NoCandidates => ("no_candidates", None),
            StabilizerVerdict::Pending { consecutive_count, .. } => ("pending", Some(*consecutive_count)),
            StabilizerVerdict::Accepted { consecutive_count, .. } => ("accepted", Some(*consecutive_count)),
            StabilizerVerdict::AlreadyAccepted => ("already_accepted", None),
        };
        report.frames.push(FrameTrace {
            frame: index,
            verdict: name.to_string(),
            consecutive_count: count,
        });
        if let StabilizerVerdict::Accepted { text, .. } = verdict {
            report.record = parsers.parse(&text);
            if report.record.is_none() {
                warn!("Accepted MRZ did not parse");
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn bac_key(document_number: &str, date_of_birth: &str, date_of_expiry: &str) -> Result<(), PassportError> {
    let key = BacKey::new(document_number, date_of_birth, date_of_expiry)?;
    let keys = key.derive_keys();
    println!("MRZ information: {}", key.mrz_information());
    println!("Kseed: {}", hex::encode_upper(key.key_seed()));
    println!("Kenc:  {}", hex::encode_upper(&keys.k_enc));
    println!("Kmac:  {}", hex::encode_upper(&keys.k_mac));
    Ok(())
}

fn run(cli: Cli) -> Result<(), PassportError> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Parse { text, file } => parse(text, file),
        Commands::Classify { line, lines } => {
            let format = FormatClassifier::classify(&line, lines);
            info!("Classified {} line(s)", lines);
            println!("{}", format);
            Ok(())
        }
        Commands::Stabilize { frames } => stabilize(&config, frames),
        Commands::BacKey {
            document_number,
            date_of_birth,
            date_of_expiry,
        } => bac_key(&document_number, &date_of_birth, &date_of_expiry),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
