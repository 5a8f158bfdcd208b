//! A small local driver for manual testing and scripting against a
//! directory-backed store, in the same role `cmd/main.go` plays for the
//! Go original this crate's design is distilled from. Not the HTTP
//! dispatcher — that's an external collaborator out of scope for this
//! crate (see spec §1).

use bitcask::{Config, Engine};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "bitcask-cli", version, about = "Drive a bitcask store directly")]
struct Args {
    /// Store directory; created if missing.
    #[arg(long, default_value = "./data")]
    dir: PathBuf,

    /// Active segment rotation threshold, in bytes.
    #[arg(long)]
    max_size: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a key/value pair.
    Put { key: String, value: String },
    /// Read a key; prints nothing and exits non-zero if absent.
    Get { key: String },
    /// Remove a key.
    Del { key: String },
    /// List every key currently present, one per line.
    List,
    /// Run a compaction pass over archived segments.
    Merge,
    /// Flush the active segment to stable storage.
    Sync,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.max_size {
        Some(bytes) => Config::new().max_size(bytes),
        None => Config::default(),
    };

    let engine = match Engine::open_with_config(&args.dir, config) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("bitcask-cli: failed to open {}: {err}", args.dir.display());
            return ExitCode::FAILURE;
        }
    };

    let result = match args.command {
        Command::Put { key, value } => engine.put(&key, value.as_bytes()),
        Command::Get { key } => match engine.get(&key) {
            Ok(Some(value)) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(())
            }
            Ok(None) => return ExitCode::FAILURE,
            Err(err) => Err(err),
        },
        Command::Del { key } => engine.delete(&key),
        Command::List => {
            let mut keys: Vec<String> = engine.list().iter().map(ToString::to_string).collect();
            keys.sort();
            for key in keys {
                println!("{key}");
            }
            Ok(())
        }
        Command::Merge => engine.merge(),
        Command::Sync => engine.sync(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("bitcask-cli: {err}");
            ExitCode::FAILURE
        }
    }
}
