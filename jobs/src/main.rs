//! Run the fixed aggregation queries over the book awards dataset.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::too_many_lines)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libros_common::catalog::{Catalog, CategoryNames};
use libros_common::dataset::Dataset;
use libros_common::db_util::{self, DocumentStore, Filter, InMemoryStore};
use libros_common::export::{render_console, save_csv};
use libros_common::join_rank::{QuerySpec, run_query};
use libros_common::{DEFAULT_GENRE, DEFAULT_LANGUAGE, OutputFormat, QueryOutcome};
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Query a dataset file in memory instead of the database
    #[arg(long, global = true, env = "LIBROS_OFFLINE_DATASET")]
    dataset: Option<PathBuf>,

    /// Replace the built-in queries with a JSON catalog
    #[arg(long, global = true, env = "LIBROS_CATALOG")]
    catalog: Option<PathBuf>,

    /// The genre resolved by the per-genre queries
    #[arg(long, global = true, default_value = DEFAULT_GENRE, env = "LIBROS_GENRE")]
    genre: String,

    /// The language resolved by the per-language queries
    #[arg(long, global = true, default_value = DEFAULT_LANGUAGE, env = "LIBROS_LANGUAGE")]
    language: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run queries and print or save their results
    Run {
        /// Only run these queries (default: all)
        #[arg(short, long)]
        only: Vec<String>,

        /// How to present the results
        #[arg(short, long, value_enum, default_value = "console", env = "LIBROS_FORMAT")]
        format: OutputFormat,

        /// Where csv files are written
        #[arg(short, long, default_value = ".", env = "LIBROS_OUTPUT_DIR")]
        output_dir: PathBuf,
    },
    /// List the queries in the catalog
    List,
    /// Show every collection with its document count
    Status,
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

fn open_store(cli: &Cli) -> Result<Box<dyn DocumentStore>> {
    if let Some(path) = &cli.dataset {
        let dataset = Dataset::from_path(path)?;
        log::info!("Querying {} in memory", path.display());
        return Ok(Box::new(InMemoryStore::from_dataset(&dataset)));
    }
    let store = db_util::get_database_connection().context("could not connect to the database")?;
    Ok(Box::new(store))
}

fn load_catalog(cli: &Cli) -> Result<Catalog> {
    match &cli.catalog {
        Some(path) => Catalog::from_path(path),
        None => Ok(Catalog::builtin(&CategoryNames {
            genre: cli.genre.clone(),
            language: cli.language.clone(),
        })),
    }
}

fn title_of(spec: &QuerySpec) -> &str {
    if spec.title.is_empty() {
        &spec.name
    } else {
        &spec.title
    }
}

fn run_queries(
    store: &dyn DocumentStore,
    queries: &[&QuerySpec],
    format: OutputFormat,
    output_dir: &Path,
) -> Result<()> {
    let mut json_results = Map::new();

    for spec in queries {
        let outcome =
            run_query(store, spec).with_context(|| format!("query {} failed", spec.name))?;

        match format {
            OutputFormat::Console => println!("{}", render_console(title_of(spec), &outcome)),
            OutputFormat::Csv => match &outcome {
                QueryOutcome::Found(table) => {
                    let path = save_csv(table, output_dir, &spec.name)?;
                    println!("{}: saved {}", spec.name, path.display());
                }
                QueryOutcome::EmptyResult => {
                    println!("{}: no data matched, nothing saved", spec.name);
                }
                QueryOutcome::CategoryNotFound { collection, name } => println!(
                    "{}: category {name:?} does not exist in {collection}, nothing saved",
                    spec.name
                ),
            },
            OutputFormat::Json => {
                json_results.insert(spec.name.clone(), serde_json::to_value(&outcome)?);
            }
        }
    }

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&Value::Object(json_results))?);
    }
    Ok(())
}

fn print_status(store: &dyn DocumentStore) -> Result<()> {
    let names = store.collection_names()?;
    if names.is_empty() {
        println!("No collections found.");
    }
    for name in names {
        let count = store.count(&name, &Filter::new())?;
        println!("{name}: {count} documents");
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let catalog = load_catalog(cli)?;

    match &cli.command {
        Command::List => {
            for spec in catalog.queries() {
                println!("{}: {}", spec.name, title_of(spec));
            }
            Ok(())
        }
        Command::Status => {
            let store = open_store(cli)?;
            print_status(store.as_ref())
        }
        Command::Run {
            only,
            format,
            output_dir,
        } => {
            let queries: Vec<&QuerySpec> = if only.is_empty() {
                catalog.queries().iter().collect()
            } else {
                catalog.select(only)?
            };
            let store = open_store(cli)?;
            log::debug!("Running {} queries", queries.len());
            run_queries(store.as_ref(), &queries, *format, output_dir)
        }
    }
}

fn main() {
    let cli = parse_cli(None, std::env::args_os()).unwrap_or_else(|e| e.exit());
    env_logger::init();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test_log::test]
    fn test_env_file_feeds_cli_defaults() {
        let mut env_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(env_file, "LIBROS_GENRE=Terror").unwrap();
        writeln!(env_file, "LIBROS_FORMAT=csv").unwrap();

        let cli = parse_cli(Some(env_file.path()), ["libros_jobs", "run"]).unwrap();
        assert_eq!(cli.genre, "Terror");
        let Command::Run { format, .. } = cli.command else {
            panic!("expected the run command");
        };
        assert_eq!(format, OutputFormat::Csv);

        // flags still win over the file
        let cli = parse_cli(
            Some(env_file.path()),
            ["libros_jobs", "--genre", "Policial", "list"],
        )
        .unwrap();
        assert_eq!(cli.genre, "Policial");
    }
}
