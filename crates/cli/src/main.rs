use std::path::{Path, PathBuf};
use std::time::Instant;
use std::{fs, process};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vbox_cli::{App, Command, GenerateArgs, Input, VerifyArgs};
use vbox_core::{check, History, Outcome};
use vbox_testgen::generator::{generate_mult_histories, HistParams};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let app = App::parse();
    match &app.command {
        Command::Generate(args) => generate(args),
        Command::Verify(args) => verify(args),
    }
}

fn generate(args: &GenerateArgs) {
    fs::create_dir_all(&args.output_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create output directory: {e}");
        process::exit(1);
    });

    let params = HistParams::builder()
        .n_node(args.n_node)
        .n_variable(args.n_var)
        .n_transaction(args.n_txn)
        .n_event(args.n_evt)
        .n_value(args.n_value)
        .build();
    if params.n_variable == 0 || params.n_value == 0 {
        eprintln!("--n-var and --n-value must be positive");
        process::exit(1);
    }
    let histories = generate_mult_histories(args.n_hist, &params);

    for history in &histories {
        let path = args.output_dir.join(format!("{}.json", history.get_id()));
        let file = fs::File::create(&path).unwrap_or_else(|e| {
            eprintln!("Failed to create {}: {e}", path.display());
            process::exit(1);
        });
        serde_json::to_writer_pretty(file, history).unwrap_or_else(|e| {
            eprintln!("Failed to write {}: {e}", path.display());
            process::exit(1);
        });
    }

    println!(
        "Generated {} histories to {}",
        histories.len(),
        args.output_dir.display()
    );
}

/// The input itself when it is a file, otherwise its `*.json` entries sorted.
fn inputs(input: &Path) -> Vec<PathBuf> {
    if input.is_file() {
        return vec![input.to_path_buf()];
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(input)
        .unwrap_or_else(|e| {
            eprintln!("Failed to read {}: {e}", input.display());
            process::exit(1);
        })
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    entries.sort();
    if entries.is_empty() {
        eprintln!("No .json files found in {}", input.display());
        process::exit(1);
    }
    entries
}

fn verify(args: &VerifyArgs) {
    let options = args.options();
    let mut any_failed = false;

    for path in inputs(&args.input) {
        let filename = path.file_name().unwrap_or_default().to_string_lossy();

        let file = fs::File::open(&path).unwrap_or_else(|e| {
            eprintln!("Failed to open {filename}: {e}");
            process::exit(1);
        });
        let input: Input = serde_json::from_reader(file).unwrap_or_else(|e| {
            eprintln!("Failed to parse {filename}: {e}");
            process::exit(1);
        });

        let history = History::from_sessions(input.into_sessions());
        let started = Instant::now();
        let outcome = check(&history, &options).unwrap_or_else(|defect| {
            eprintln!("{filename}: internal error: {defect}");
            process::exit(2);
        });
        let elapsed = started.elapsed();
        tracing::debug!(file = %filename, ?elapsed, accept = outcome.is_accept(), "verified");
        any_failed |= !outcome.is_accept();

        if args.json {
            let result = serde_json::json!({
                "file": filename,
                "ok": outcome.is_accept(),
                "millis": elapsed.as_secs_f64() * 1000.0,
                "outcome": outcome,
            });
            println!("{result}");
            continue;
        }
        match &outcome {
            Outcome::Accept(report) => {
                println!("{filename}: PASS ({elapsed:.2?})");
                if args.verbose {
                    println!("  order: {:?}", report.witness.transactions());
                    println!("  statistics: {:?}", report.statistics);
                }
            }
            Outcome::Reject(rejection) => {
                println!("{filename}: FAIL ({elapsed:.2?}) {rejection}");
            }
        }
    }

    if any_failed {
        process::exit(1);
    }
}
