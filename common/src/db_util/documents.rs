//! Postgres-backed document store. Every collection lives in one JSONB table.

use super::{DatabaseConfig, DocumentStore, Filter, Projection, conversions};
use crate::Document;
use anyhow::{Context, Result};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use serde_json::Value;
use std::time::Duration;

table! {
    documents (id) {
        id -> BigInt,
        collection -> Text,
        body -> Jsonb,
    }
}

const CREATE_DOCUMENTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS documents (
    id BIGSERIAL PRIMARY KEY,
    collection TEXT NOT NULL,
    body JSONB NOT NULL
)";
const CREATE_COLLECTION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS documents_collection_idx ON documents (collection)";

const CONNECT_TIMEOUT_SECS: u64 = 5;
// two bind parameters per row, well under the postgres limit
const INSERT_BATCH_SIZE: usize = 1000;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Insertable)]
#[diesel(table_name = documents)]
struct DocumentPrivateNew<'a> {
    collection: &'a str,
    body: Value,
}

pub struct PgDocumentStore {
    pool: PgPool,
}

/// Load `.env`, read the database settings and open the store.
///
/// # Errors
/// Returns an error if the settings are invalid or the database is unreachable.
pub fn get_database_connection() -> Result<PgDocumentStore> {
    dotenvy::dotenv().ok();
    let config = DatabaseConfig::from_env()?;
    if config.authenticated {
        log::info!("Using authenticated database URL.");
    } else {
        log::info!("Using unauthenticated database URL.");
    }
    PgDocumentStore::connect(&config)
}

impl PgDocumentStore {
    /// Open a pool, ping the server and make sure the documents table exists.
    ///
    /// # Errors
    /// Returns an error if no connection can be established.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        log::info!("Connecting to {}", config.redacted_url());
        let manager = ConnectionManager::<PgConnection>::new(config.url.clone());
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build(manager)
            .with_context(|| format!("could not connect to {}", config.redacted_url()))?;

        let store = Self { pool };
        let mut conn = store.conn()?;
        diesel::sql_query("SELECT 1")
            .execute(&mut conn)
            .context("database ping failed")?;
        diesel::sql_query(CREATE_DOCUMENTS_TABLE)
            .execute(&mut conn)
            .context("could not create the documents table")?;
        diesel::sql_query(CREATE_COLLECTION_INDEX)
            .execute(&mut conn)
            .context("could not create the collection index")?;
        log::info!("Database connection established.");
        Ok(store)
    }

    fn conn(&self) -> Result<PgPooledConnection> {
        self.pool
            .get()
            .context("could not check out a database connection")
    }

    fn load_bodies(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let mut conn = self.conn()?;

        let mut query = documents::table
            .filter(documents::collection.eq(collection.to_string()))
            .select(documents::body)
            .order(documents::id.asc())
            .into_boxed();
        if !filter.equals().is_empty() {
            let containment = Value::Object(filter.equals().clone());
            query = query.filter(documents::body.contains(containment));
        }

        let bodies: Vec<Value> = query
            .load(&mut conn)
            .with_context(|| format!("could not read collection {collection}"))?;

        let mut matching = Vec::with_capacity(bodies.len());
        for body in bodies {
            match conversions::value_to_document(body) {
                Ok(document) if filter.matches(&document) => matching.push(document),
                Ok(_) => {}
                Err(e) => log::warn!("Skipping malformed document in {collection}: {e}"),
            }
        }
        Ok(matching)
    }
}

impl DocumentStore for PgDocumentStore {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        Ok(self
            .load_bodies(collection, filter)?
            .into_iter()
            .map(|d| projection.apply(d))
            .collect())
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        // memberships are checked client-side, so those counts need the rows
        if filter.has_memberships() {
            return Ok(self.load_bodies(collection, filter)?.len() as u64);
        }

        let mut conn = self.conn()?;
        let mut query = documents::table
            .filter(documents::collection.eq(collection.to_string()))
            .into_boxed();
        if !filter.equals().is_empty() {
            let containment = Value::Object(filter.equals().clone());
            query = query.filter(documents::body.contains(containment));
        }
        let total: i64 = query
            .count()
            .get_result(&mut conn)
            .with_context(|| format!("could not count collection {collection}"))?;
        u64::try_from(total).context("negative document count")
    }

    fn insert_many(&self, collection: &str, documents: &[Document]) -> Result<usize> {
        let rows: Vec<DocumentPrivateNew> = documents
            .iter()
            .map(|d| DocumentPrivateNew {
                collection,
                body: Value::Object(d.clone()),
            })
            .collect();

        let mut conn = self.conn()?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let mut inserted = 0;
            for batch in rows.chunks(INSERT_BATCH_SIZE) {
                inserted += diesel::insert_into(documents::table)
                    .values(batch)
                    .execute(conn)?;
            }
            Ok(inserted)
        })
        .with_context(|| format!("could not insert into collection {collection}"))
    }

    fn clear(&self, collection: &str) -> Result<u64> {
        let mut conn = self.conn()?;
        let removed = diesel::delete(
            documents::table.filter(documents::collection.eq(collection.to_string())),
        )
        .execute(&mut conn)
        .with_context(|| format!("could not clear collection {collection}"))?;
        Ok(removed as u64)
    }

    fn collection_names(&self) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        documents::table
            .select(documents::collection)
            .distinct()
            .order(documents::collection.asc())
            .load::<String>(&mut conn)
            .context("could not list collections")
    }
}
