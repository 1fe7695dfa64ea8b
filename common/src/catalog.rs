//! The fixed set of queries the tools run, as configuration.

use crate::db_util::Filter;
use crate::join_rank::{CategoryFilter, LookupSpec, QuerySpec};
use crate::{DEFAULT_GENRE, DEFAULT_LANGUAGE};
use anyhow::{Context, Result, anyhow};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Category names the built-in queries resolve against their lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryNames {
    pub genre: String,
    pub language: String,
}

impl Default for CategoryNames {
    fn default() -> Self {
        Self {
            genre: DEFAULT_GENRE.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// An ordered list of uniquely named queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    queries: Vec<QuerySpec>,
}

impl Catalog {
    /// # Errors
    /// Returns an error if two queries share a name.
    pub fn new(queries: Vec<QuerySpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for query in &queries {
            if !seen.insert(query.name.as_str()) {
                return Err(anyhow!("duplicate query name {}", query.name));
            }
        }
        Ok(Self { queries })
    }

    /// The standard queries over the awards dataset.
    pub fn builtin(categories: &CategoryNames) -> Self {
        let genre_category = CategoryFilter {
            lookup: LookupSpec::new("generos"),
            name: categories.genre.clone(),
            field: "genero".to_string(),
        };
        let language_category = CategoryFilter {
            lookup: LookupSpec::new("idiomas"),
            name: categories.language.clone(),
            field: "idioma".to_string(),
        };

        let queries = vec![
            QuerySpec::new("idioma_mas_ganador", "nominaciones", "libro", "idiomas")
                .titled("Idioma con más libros ganadores")
                .with_filter(Filter::new().with_eq("ganador", true))
                .through("libros", "idioma")
                .columns("nombre_idioma", "total_premios"),
            QuerySpec::new("genero_mas_nominado", "nominaciones", "libro", "generos")
                .titled("Género con más libros nominados")
                .through("libros", "genero")
                .columns("nombre_genero", "total_nominaciones"),
            QuerySpec::new("premio_con_mas_nominaciones", "nominaciones", "premio", "premios")
                .titled("Premio con más nominaciones")
                .columns("nombre_premio", "total_nominaciones"),
            QuerySpec::new("autor_con_mas_libros", "libros", "autor", "autores")
                .titled("Autor con más libros")
                .columns("nombre_autor", "total_libros"),
            QuerySpec::new("formato_mas_comun", "libros", "formato", "formatos")
                .titled("Formato más común")
                .columns("nombre_formato", "total_libros"),
            QuerySpec::new("genero_mejor_valorado", "libros", "genero", "generos")
                .titled("Género con mejor calificación promedio")
                .mean_of("calificacion")
                .columns("nombre_genero", "promedio_calificacion"),
            QuerySpec::new("promedio_paginas_genero", "libros", "genero", "generos")
                .titled(format!("Promedio de páginas ({})", categories.genre))
                .with_category(genre_category)
                .mean_of("paginas")
                .columns("nombre_genero", "promedio_paginas"),
            QuerySpec::new("libros_en_idioma", "libros", "idioma", "idiomas")
                .titled(format!("Libros en {}", categories.language))
                .with_category(language_category)
                .columns("nombre_idioma", "total_libros"),
        ];
        Self { queries }
    }

    /// Load a catalog from a JSON array of query specs.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, does not parse, or
    /// repeats a query name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("could not open {}", path.display()))?;
        let queries: Vec<QuerySpec> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("could not parse catalog {}", path.display()))?;
        Self::new(queries)
    }

    pub fn get(&self, name: &str) -> Option<&QuerySpec> {
        self.queries.iter().find(|q| q.name == name)
    }

    pub fn queries(&self) -> &[QuerySpec] {
        &self.queries
    }

    /// The named queries, in the order given.
    ///
    /// # Errors
    /// Returns an error naming the first query that is not in the catalog.
    pub fn select(&self, names: &[String]) -> Result<Vec<&QuerySpec>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| anyhow!("unknown query {name}"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueryOutcome;
    use crate::db_util::{DocumentStore, InMemoryStore};
    use crate::join_rank::run_query;
    use crate::{Document, Metric};
    use serde_json::{Value, json};

    fn store_with(collections: Value) -> InMemoryStore {
        let store = InMemoryStore::new();
        let Value::Object(collections) = collections else {
            panic!("collections must be an object");
        };
        for (name, docs) in collections {
            let docs: Vec<Document> = serde_json::from_value(docs).unwrap();
            store.insert_many(&name, &docs).unwrap();
        }
        store
    }

    #[test_log::test]
    fn test_builtin_names_are_unique() {
        let catalog = Catalog::builtin(&CategoryNames::default());
        let names: Vec<&str> = catalog.queries().iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names.len(), 8);
        assert!(Catalog::new(catalog.queries().to_vec()).is_ok());
    }

    #[test_log::test]
    fn test_duplicate_names_rejected() {
        let q = QuerySpec::new("x", "libros", "genero", "generos");
        assert!(Catalog::new(vec![q.clone(), q]).is_err());
    }

    #[test_log::test]
    fn test_select_unknown_query() {
        let catalog = Catalog::builtin(&CategoryNames::default());
        let selected = catalog
            .select(&["libros_en_idioma".to_string()])
            .unwrap();
        assert_eq!(selected[0].name, "libros_en_idioma");
        assert!(catalog.select(&["nada".to_string()]).is_err());
    }

    #[test_log::test]
    fn test_category_names_are_configurable() {
        let store = store_with(json!({
            "libros": [
                {"_id": 1, "genero": 1, "paginas": 100, "idioma": 1},
                {"_id": 2, "genero": 2, "paginas": 300, "idioma": 1},
            ],
            "generos": [
                {"_id": 1, "nombre": "Misterio"},
                {"_id": 2, "nombre": "Policial"},
            ],
            "idiomas": [{"_id": 1, "nombre": "Español"}],
        }));

        let default = Catalog::builtin(&CategoryNames::default());
        let spec = default.get("promedio_paginas_genero").unwrap();
        let outcome = run_query(&store, spec).unwrap();
        assert_eq!(outcome.table().unwrap().rows[0].metric, Metric::Mean(100.0));

        let policial = Catalog::builtin(&CategoryNames {
            genre: "Policial".to_string(),
            language: "Alemán".to_string(),
        });
        let spec = policial.get("promedio_paginas_genero").unwrap();
        let outcome = run_query(&store, spec).unwrap();
        assert_eq!(outcome.table().unwrap().rows[0].name, "Policial");
        assert_eq!(outcome.table().unwrap().rows[0].metric, Metric::Mean(300.0));

        let spec = policial.get("libros_en_idioma").unwrap();
        assert_eq!(
            run_query(&store, spec).unwrap(),
            QueryOutcome::CategoryNotFound {
                collection: "idiomas".to_string(),
                name: "Alemán".to_string(),
            }
        );
    }

    #[test_log::test]
    fn test_language_count() {
        let store = store_with(json!({
            "libros": [
                {"_id": 1, "idioma": 1},
                {"_id": 2, "idioma": 2},
                {"_id": 3, "idioma": 1},
            ],
            "idiomas": [
                {"_id": 1, "nombre": "Español"},
                {"_id": 2, "nombre": "Inglés"},
            ],
        }));
        let catalog = Catalog::builtin(&CategoryNames::default());
        let outcome = run_query(&store, catalog.get("libros_en_idioma").unwrap()).unwrap();
        let table = outcome.table().unwrap();
        assert_eq!(table.name_column, "nombre_idioma");
        assert_eq!(table.rows[0].name, "Español");
        assert_eq!(table.rows[0].metric, Metric::Count(2));
    }
}
