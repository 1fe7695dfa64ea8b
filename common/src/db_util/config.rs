//! Database settings read from the environment.

use anyhow::{Context, Result};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: &str = "5432";
const DEFAULT_DBNAME: &str = "libros";
const DEFAULT_POOL_SIZE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub authenticated: bool,
    pub pool_size: u32,
}

impl DatabaseConfig {
    /// Read settings from the process environment.
    ///
    /// # Errors
    /// Returns an error if a numeric setting does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`.
    ///
    /// `DATABASE_URL` wins when set. Otherwise the URL is composed from
    /// `LIBROS_DB_HOST`, `LIBROS_DB_PORT` and `LIBROS_DB_NAME`, with
    /// credentials only when both `LIBROS_DB_USER` and `LIBROS_DB_PASS` are set.
    ///
    /// # Errors
    /// Returns an error if a numeric setting does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let pool_size = match get("LIBROS_DB_POOL_SIZE") {
            Some(size) => size
                .trim()
                .parse::<u32>()
                .with_context(|| format!("LIBROS_DB_POOL_SIZE is not a number: {size}"))?
                .max(1),
            None => DEFAULT_POOL_SIZE,
        };

        if let Some(url) = get("DATABASE_URL") {
            let authenticated = url_has_credentials(&url);
            return Ok(Self {
                url,
                authenticated,
                pool_size,
            });
        }

        let host = get("LIBROS_DB_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = get("LIBROS_DB_PORT").unwrap_or_else(|| DEFAULT_PORT.to_string());
        port.trim()
            .parse::<u16>()
            .with_context(|| format!("LIBROS_DB_PORT is not a valid port: {port}"))?;
        let dbname = get("LIBROS_DB_NAME").unwrap_or_else(|| DEFAULT_DBNAME.to_string());

        match (get("LIBROS_DB_USER"), get("LIBROS_DB_PASS")) {
            (Some(user), Some(pass)) => Ok(Self {
                url: format!("postgres://{user}:{pass}@{host}:{port}/{dbname}"),
                authenticated: true,
                pool_size,
            }),
            _ => Ok(Self {
                url: format!("postgres://{host}:{port}/{dbname}"),
                authenticated: false,
                pool_size,
            }),
        }
    }

    /// The URL with any password replaced, for log output.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        match rest.rsplit_once('@') {
            Some((credentials, host)) => {
                let user = credentials.split(':').next().unwrap_or_default();
                format!("{scheme}://{user}:***@{host}")
            }
            None => self.url.clone(),
        }
    }
}

fn url_has_credentials(url: &str) -> bool {
    url.split_once("://")
        .is_some_and(|(_, rest)| rest.split('/').next().is_some_and(|a| a.contains('@')))
}
