use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, error};

use crate::database::schema::SCHEMA;
use crate::error::{CatalogError, CatalogResult};

/// SQLite virtual machine instructions between two deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewModel {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcategory {
    pub id: i64,
    pub name: String,
    pub category_id: i64,
}

/// Handle on the catalog database. One connection per handle; concurrent
/// readers open their own.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open(path: &Path) -> CatalogResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened catalog {:?} (journal_mode={})", path, mode);
        Self::init(conn)
    }

    /// In-memory catalog, used by tests.
    pub fn open_in_memory() -> CatalogResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CatalogResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs `f` inside an immediate transaction that commits on success and
    /// rolls back on any error. Statements of `f` still running after `budget`
    /// are interrupted and the call fails with [`CatalogError::Timeout`].
    pub fn with_transaction<T, F>(&mut self, label: &str, budget: Duration, f: F) -> CatalogResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CatalogResult<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let deadline = Instant::now() + budget;
        tx.progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() > deadline));
        let result = f(&tx);
        tx.progress_handler(0, None::<fn() -> bool>);

        let result = match result {
            Ok(value) => tx.commit().map(|_| value).map_err(CatalogError::from),
            Err(e) => {
                // The caller's error is the cause; a failed rollback only gets logged.
                if let Err(rollback) = tx.rollback() {
                    error!("Rollback of {} failed: {}", label, rollback);
                }
                Err(e)
            }
        };

        match result {
            Err(CatalogError::Database(e)) if is_interrupt(&e) => Err(CatalogError::Timeout {
                name: label.to_string(),
            }),
            other => other,
        }
    }

    pub fn existing_urls(&self) -> CatalogResult<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT url FROM models")?;
        let urls = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(urls)
    }

    pub fn model(&self, id: i64) -> CatalogResult<ModelRecord> {
        self.conn
            .query_row(
                "SELECT id, name, url FROM models WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ModelRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        url: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(CatalogError::NotFound { entity: "model", id })
    }

    pub fn list_categories(&self) -> CatalogResult<Vec<Category>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM categories ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn category(&self, id: i64) -> CatalogResult<Category> {
        self.conn
            .query_row(
                "SELECT id, name FROM categories WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Category {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or(CatalogError::NotFound { entity: "category", id })
    }

    pub fn list_subcategories(&self, category_id: i64) -> CatalogResult<Vec<Subcategory>> {
        // Distinguish "unknown category" from "category without subcategories".
        self.category(category_id)?;

        let mut stmt = self.conn.prepare(
            "SELECT id, name, category_id FROM subcategories WHERE category_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![category_id], |row| {
                Ok(Subcategory {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    category_id: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

pub fn find_model_by_url(conn: &Connection, url: &str) -> CatalogResult<Option<i64>> {
    let id = conn
        .query_row("SELECT id FROM models WHERE url = ?1", params![url], |row| row.get(0))
        .optional()?;
    Ok(id)
}

pub fn insert_model(conn: &Connection, model: &NewModel) -> CatalogResult<ModelRecord> {
    let id: i64 = conn.query_row(
        "INSERT INTO models (name, url) VALUES (?1, ?2) RETURNING id",
        params![model.name, model.url],
        |row| row.get(0),
    )?;
    Ok(ModelRecord {
        id,
        name: model.name.clone(),
        url: model.url.clone(),
    })
}

pub fn link_category(conn: &Connection, model_id: i64, category_id: i64) -> CatalogResult<()> {
    conn.execute(
        "INSERT INTO models_categories (model_id, category_id) VALUES (?1, ?2)",
        params![model_id, category_id],
    )?;
    Ok(())
}

pub fn link_subcategory(conn: &Connection, model_id: i64, subcategory_id: i64) -> CatalogResult<()> {
    conn.execute(
        "INSERT INTO models_subcategories (model_id, subcategory_id) VALUES (?1, ?2)",
        params![model_id, subcategory_id],
    )?;
    Ok(())
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

fn is_interrupt(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_model(name: &str) -> NewModel {
        NewModel {
            name: name.to_string(),
            url: format!("static/{}.glb", name),
        }
    }

    #[test]
    fn insert_and_fetch_model() -> CatalogResult<()> {
        let catalog = Catalog::open_in_memory()?;
        let inserted = insert_model(catalog.conn(), &new_model("chair"))?;

        let fetched = catalog.model(inserted.id)?;
        assert_eq!(fetched, inserted);
        assert_eq!(find_model_by_url(catalog.conn(), "static/chair.glb")?, Some(inserted.id));
        assert_eq!(find_model_by_url(catalog.conn(), "static/table.glb")?, None);
        Ok(())
    }

    #[test]
    fn missing_model_is_not_found() -> CatalogResult<()> {
        let catalog = Catalog::open_in_memory()?;
        match catalog.model(42) {
            Err(CatalogError::NotFound { entity, id }) => {
                assert_eq!(entity, "model");
                assert_eq!(id, 42);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn duplicate_url_is_a_unique_violation() -> CatalogResult<()> {
        let catalog = Catalog::open_in_memory()?;
        insert_model(catalog.conn(), &new_model("chair"))?;
        match insert_model(catalog.conn(), &new_model("chair")) {
            Err(CatalogError::Database(e)) => assert!(is_unique_violation(&e)),
            other => panic!("expected unique violation, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn failed_transaction_rolls_back() -> CatalogResult<()> {
        let mut catalog = Catalog::open_in_memory()?;
        let result: CatalogResult<()> =
            catalog.with_transaction("chair", Duration::from_secs(5), |tx| {
                insert_model(tx, &new_model("chair"))?;
                Err(CatalogError::TaxonomyResolution("forced".into()))
            });
        assert!(result.is_err());
        assert!(catalog.existing_urls()?.is_empty());
        Ok(())
    }

    #[test]
    fn rollback_failure_keeps_the_original_error() -> CatalogResult<()> {
        let mut catalog = Catalog::open_in_memory()?;
        let result: CatalogResult<()> =
            catalog.with_transaction("chair", Duration::from_secs(5), |tx| {
                // Ending the transaction early makes the rollback itself fail.
                tx.execute_batch("COMMIT")?;
                Err(CatalogError::Asset {
                    name: "chair".into(),
                    reason: "forced".into(),
                })
            });
        match result {
            Err(CatalogError::Asset { name, reason }) => {
                assert_eq!(name, "chair");
                assert_eq!(reason, "forced");
            }
            other => panic!("expected the closure's error, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn overrunning_transaction_times_out() -> CatalogResult<()> {
        let mut catalog = Catalog::open_in_memory()?;
        let result: CatalogResult<i64> =
            catalog.with_transaction("slow", Duration::from_millis(1), |tx| {
                insert_model(tx, &new_model("slow"))?;
                std::thread::sleep(Duration::from_millis(20));
                let n = tx.query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 5000000)
                     SELECT count(*) FROM c",
                    [],
                    |row| row.get(0),
                )?;
                Ok(n)
            });
        assert!(matches!(result, Err(CatalogError::Timeout { ref name }) if name == "slow"));
        assert!(catalog.existing_urls()?.is_empty());
        Ok(())
    }

    #[test]
    fn subcategories_of_unknown_category_is_not_found() -> CatalogResult<()> {
        let catalog = Catalog::open_in_memory()?;
        assert!(matches!(
            catalog.list_subcategories(3),
            Err(CatalogError::NotFound { entity: "category", id: 3 })
        ));
        Ok(())
    }

    #[test]
    fn subcategories_are_scoped_to_their_category() -> CatalogResult<()> {
        let catalog = Catalog::open_in_memory()?;
        catalog.conn().execute_batch(
            "INSERT INTO categories (name) VALUES ('Muebles'), ('Luces');
             INSERT INTO subcategories (category_id, name) VALUES (1, 'Mesas'), (2, 'Lamparas'), (1, 'Sillas');",
        )?;

        let subs = catalog.list_subcategories(1)?;
        let names: Vec<_> = subs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Mesas", "Sillas"]);
        assert!(subs.iter().all(|s| s.category_id == 1));
        assert_eq!(catalog.list_categories()?.len(), 2);
        assert_eq!(catalog.category(2)?.name, "Luces");
        Ok(())
    }
}
