//! Bulk-import the book awards dataset into the document database.

#![warn(clippy::all, clippy::pedantic)]

use clap::Parser;
use libros_common::DEFAULT_DATASET_PATH;
use libros_common::dataset::{Dataset, ImportMode, import_dataset};
use libros_common::db_util;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The dataset file to import
    #[arg(default_value = DEFAULT_DATASET_PATH, env = "LIBROS_DATASET")]
    file: PathBuf,

    /// Append to the existing collections or replace them
    #[arg(short, long, value_enum, default_value = "append", env = "LIBROS_IMPORT_MODE")]
    mode: ImportMode,

    /// Suppress the per-collection summary
    #[arg(short, long, env = "LIBROS_QUIET")]
    quiet: bool,
}

/// Load `env_file` (default `.env`) so clap's `env` fallbacks can see it.
fn parse_cli<I, T>(env_file: Option<&Path>, args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    // a missing file is fine, the process environment still applies
    if let Some(path) = env_file {
        dotenvy::from_path(path).ok();
    } else {
        dotenvy::dotenv().ok();
    }
    Cli::try_parse_from(args)
}

fn main() {
    let cli = parse_cli(None, std::env::args_os()).unwrap_or_else(|e| e.exit());
    env_logger::init();

    let dataset = match Dataset::from_path(&cli.file) {
        Ok(dataset) => dataset,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    log::debug!(
        "Loaded {} collections from {}",
        dataset.len(),
        cli.file.display()
    );

    let store = match db_util::get_database_connection() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: could not connect to the database: {e:#}");
            eprintln!("Check the settings in .env and that the server is running.");
            std::process::exit(1);
        }
    };

    if cli.mode == ImportMode::Append && !cli.quiet {
        println!("Appending: re-running this import duplicates documents.");
    }

    match import_dataset(&store, &dataset, cli.mode) {
        Ok(summaries) => {
            if !cli.quiet {
                for summary in &summaries {
                    print!("{}: {} inserted", summary.collection, summary.inserted);
                    if cli.mode == ImportMode::Replace {
                        print!(", {} cleared", summary.cleared);
                    }
                    println!();
                }
            }
            println!("Data imported successfully.");
        }
        Err(e) => {
            eprintln!("Error: import failed: {e:#}");
            std::process::exit(1);
        }
    }
}
