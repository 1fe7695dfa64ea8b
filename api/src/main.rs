//! A dashboard backend serving the book awards queries as JSON and CSV.

#[macro_use]
extern crate rocket;

mod helpers;
mod query_cache;

use anyhow::{Context, Result};
use helpers::{
    ApiError, ApiErrorBody, ApiResult, CorsFairing, RequestTimingFairing, internal_error,
    not_found_error,
};
use libros_common::catalog::{Catalog, CategoryNames};
use libros_common::dataset::Dataset;
use libros_common::db_util::{self, DocumentStore, Filter, InMemoryStore};
use libros_common::export::to_csv_string;
use libros_common::join_rank::run_query;
use libros_common::{DEFAULT_GENRE, DEFAULT_LANGUAGE, QueryOutcome, Table};
use query_cache::QueryCache;
use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};
use rocket::{Build, Request, Rocket, State};
use std::path::Path;
use tracing_subscriber::EnvFilter;

pub struct AppState {
    store: Box<dyn DocumentStore>,
    catalog: Catalog,
    cache: QueryCache,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct QuerySummary {
    name: String,
    title: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct CollectionStatus {
    name: String,
    count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct CacheCleared {
    cleared: usize,
}

fn outcome_for(state: &AppState, name: &str) -> Result<QueryOutcome, ApiError> {
    let Some(spec) = state.catalog.get(name) else {
        return Err(not_found_error(format!("Unknown query {name}.")));
    };
    state
        .cache
        .get_or_run(name, || run_query(state.store.as_ref(), spec))
        .map_err(|e| internal_error(&e))
}

#[get("/queries")]
fn list_queries(state: &State<AppState>) -> Json<Vec<QuerySummary>> {
    let summaries = state
        .catalog
        .queries()
        .iter()
        .map(|spec| QuerySummary {
            name: spec.name.clone(),
            title: spec.title.clone(),
        })
        .collect();
    Json(summaries)
}

#[get("/queries/<name>")]
fn get_query(state: &State<AppState>, name: &str) -> ApiResult<QueryOutcome> {
    outcome_for(state, name).map(Json)
}

/// An empty result still yields the header row so the file shape is stable.
#[get("/queries/<name>/csv")]
fn get_query_csv(state: &State<AppState>, name: &str) -> Result<(ContentType, String), ApiError> {
    let outcome = outcome_for(state, name)?;
    let table = match outcome {
        QueryOutcome::Found(table) => table,
        QueryOutcome::EmptyResult => {
            let Some(spec) = state.catalog.get(name) else {
                return Err(not_found_error(format!("Unknown query {name}.")));
            };
            Table {
                name_column: spec.name_column.clone(),
                metric_column: spec.metric_column.clone(),
                rows: Vec::new(),
            }
        }
        QueryOutcome::CategoryNotFound { collection, name } => {
            return Err(not_found_error(format!(
                "Category {name:?} does not exist in {collection}."
            )));
        }
    };
    let csv = to_csv_string(&table).map_err(|e| internal_error(&e))?;
    Ok((ContentType::CSV, csv))
}

#[get("/status")]
fn status(state: &State<AppState>) -> ApiResult<Vec<CollectionStatus>> {
    let collections = state
        .store
        .collection_names()
        .and_then(|names| {
            names
                .into_iter()
                .map(|name| {
                    let count = state.store.count(&name, &Filter::new())?;
                    Ok(CollectionStatus { name, count })
                })
                .collect::<Result<Vec<_>>>()
        })
        .map_err(|e| internal_error(&e))?;
    Ok(Json(collections))
}

#[post("/cache/clear")]
fn clear_cache(state: &State<AppState>) -> Json<CacheCleared> {
    let cleared = state.cache.clear();
    tracing::info!(cleared = cleared, "Cleared query cache");
    Json(CacheCleared { cleared })
}

#[catch(404)]
fn not_found(request: &Request<'_>) -> Json<ApiErrorBody> {
    not_found_error(format!("No route for {}.", request.uri())).1
}

pub fn build_rocket(store: Box<dyn DocumentStore>, catalog: Catalog) -> Rocket<Build> {
    let state = AppState {
        store,
        catalog,
        cache: QueryCache::new(),
    };
    rocket::build()
        .manage(state)
        .attach(RequestTimingFairing)
        .attach(CorsFairing)
        .mount(
            "/",
            routes![list_queries, get_query, get_query_csv, status, clear_cache],
        )
        .register("/", catchers![not_found])
}

/// Load `env_file` (default `.env`) before any setting is read.
fn load_env_file(env_file: Option<&Path>) {
    // a missing file is fine, the process environment still applies
    if let Some(path) = env_file {
        dotenvy::from_path(path).ok();
    } else {
        dotenvy::dotenv().ok();
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn open_store() -> Result<Box<dyn DocumentStore>> {
    if let Ok(path) = std::env::var("LIBROS_OFFLINE_DATASET") {
        let dataset = Dataset::from_path(Path::new(&path))?;
        tracing::info!(path = %path, "Serving dataset from memory");
        return Ok(Box::new(InMemoryStore::from_dataset(&dataset)));
    }
    let store = db_util::get_database_connection().context("could not connect to the database")?;
    Ok(Box::new(store))
}

fn load_catalog() -> Result<Catalog> {
    match std::env::var("LIBROS_CATALOG") {
        Ok(path) => Catalog::from_path(Path::new(&path)),
        Err(_) => Ok(Catalog::builtin(&CategoryNames {
            genre: env_or("LIBROS_GENRE", DEFAULT_GENRE),
            language: env_or("LIBROS_LANGUAGE", DEFAULT_LANGUAGE),
        })),
    }
}

#[launch]
fn rocket() -> _ {
    load_env_file(None);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (store, catalog) = match open_store().and_then(|store| Ok((store, load_catalog()?))) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Startup failed: {e:#}");
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    tracing::info!(queries = catalog.queries().len(), "Catalog loaded");

    build_rocket(store, catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;
    use rocket::local::blocking::Client;
    use rocket::serde::json::{Value, json};
    use std::io::Write;

    fn client() -> Client {
        let dataset = Dataset::from_value(json!({
            "libros": [
                {"_id": 1, "titulo": "A", "genero": 1, "idioma": 1, "paginas": 200},
                {"_id": 2, "titulo": "B", "genero": 1, "idioma": 2, "paginas": 400},
                {"_id": 3, "titulo": "C", "genero": 2, "idioma": 1, "paginas": "n/a"},
            ],
            "generos": [
                {"_id": 1, "nombre": "Misterio"},
                {"_id": 2, "nombre": "Terror"},
            ],
            "idiomas": [
                {"_id": 1, "nombre": "Español"},
                {"_id": 2, "nombre": "Inglés"},
            ],
            "nominaciones": [],
        }))
        .unwrap();
        let store = Box::new(InMemoryStore::from_dataset(&dataset));
        let catalog = Catalog::builtin(&CategoryNames::default());
        Client::tracked(build_rocket(store, catalog)).unwrap()
    }

    #[test_log::test]
    fn test_env_file_sets_catalog_categories() {
        let mut env_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(env_file, "LIBROS_GENRE=Terror").unwrap();
        load_env_file(Some(env_file.path()));

        let catalog = load_catalog().unwrap();
        let spec = catalog.get("promedio_paginas_genero").unwrap();
        assert_eq!(spec.category.as_ref().unwrap().name, "Terror");
    }

    #[test_log::test]
    fn test_list_queries() {
        let client = client();
        let response = client.get("/queries").dispatch();
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().unwrap();
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|q| q["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"libros_en_idioma"));
    }

    #[test_log::test]
    fn test_get_query_json() {
        let client = client();
        let response = client.get("/queries/promedio_paginas_genero").dispatch();
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().unwrap();
        assert_eq!(
            body,
            json!({"status": "found", "data": [{"nombre_genero": "Misterio", "promedio_paginas": 300.0}]})
        );
    }

    #[test_log::test]
    fn test_empty_result_is_not_an_error() {
        let client = client();
        let response = client.get("/queries/premio_con_mas_nominaciones").dispatch();
        assert_eq!(response.status(), Status::Ok);
        let body: Value = response.into_json().unwrap();
        assert_eq!(body, json!({"status": "empty_result"}));

        let csv = client
            .get("/queries/premio_con_mas_nominaciones/csv")
            .dispatch()
            .into_string()
            .unwrap();
        assert_eq!(csv, "nombre_premio,total_nominaciones\n");
    }

    #[test_log::test]
    fn test_get_query_csv() {
        let client = client();
        let response = client.get("/queries/libros_en_idioma/csv").dispatch();
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.content_type(), Some(ContentType::CSV));
        assert_eq!(
            response.into_string().unwrap(),
            "nombre_idioma,total_libros\nEspañol,2\n"
        );
    }

    #[test_log::test]
    fn test_unknown_query_is_not_found() {
        let client = client();
        let response = client.get("/queries/nada").dispatch();
        assert_eq!(response.status(), Status::NotFound);
        let body: Value = response.into_json().unwrap();
        assert_eq!(body["error"], "not_found");

        let response = client.get("/no/such/route").dispatch();
        assert_eq!(response.status(), Status::NotFound);
        let body: Value = response.into_json().unwrap();
        assert_eq!(body["error"], "not_found");
    }

    #[test_log::test]
    fn test_status_lists_collections() {
        let client = client();
        let body: Value = client.get("/status").dispatch().into_json().unwrap();
        assert_eq!(
            body,
            json!([
                {"name": "generos", "count": 2},
                {"name": "idiomas", "count": 2},
                {"name": "libros", "count": 3},
            ])
        );
    }

    #[test_log::test]
    fn test_cors_methods_follow_the_route() {
        let client = client();
        let response = client.get("/queries").dispatch();
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Methods"),
            Some("GET, OPTIONS")
        );
        let response = client.post("/cache/clear").dispatch();
        assert_eq!(
            response.headers().get_one("Access-Control-Allow-Methods"),
            Some("POST, OPTIONS")
        );
    }

    #[test_log::test]
    fn test_cache_clear_counts_entries() {
        let client = client();
        client.get("/queries/libros_en_idioma").dispatch();
        client.get("/queries/formato_mas_comun").dispatch();
        let body: Value = client.post("/cache/clear").dispatch().into_json().unwrap();
        assert_eq!(body, json!({"cleared": 2}));
    }
}
