use rusqlite::{params, OptionalExtension, Transaction};
use serde::Serialize;
use tracing::{debug, warn};

use crate::database::repo::is_unique_violation;
use crate::error::{CatalogError, CatalogResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTaxonomy {
    pub category_id: i64,
    pub subcategory_id: i64,
}

/// Maps a `(category, subcategory)` name pair to row ids, creating rows on
/// first reference. Takes a transaction so that the caller's link inserts
/// commit or roll back together with any rows created here.
///
/// Each lookup inserts, swallows a unique violation, then re-reads by name.
/// Concurrent writers converge on one row through the schema's `UNIQUE`
/// constraints.
pub fn resolve(tx: &Transaction<'_>, category: &str, subcategory: &str) -> CatalogResult<ResolvedTaxonomy> {
    let category_id = resolve_category(tx, category)?;
    let subcategory_id = resolve_subcategory(tx, category_id, subcategory)?;
    Ok(ResolvedTaxonomy {
        category_id,
        subcategory_id,
    })
}

fn resolve_category(tx: &Transaction<'_>, name: &str) -> CatalogResult<i64> {
    insert_tolerating_conflict(
        tx.execute("INSERT INTO categories (name) VALUES (?1)", params![name]),
        "category",
        name,
    )?;

    tx.query_row("SELECT id FROM categories WHERE name = ?1", params![name], |row| row.get(0))
        .optional()?
        .ok_or_else(|| {
            CatalogError::TaxonomyResolution(format!("category '{}' missing after insert", name))
        })
}

fn resolve_subcategory(tx: &Transaction<'_>, category_id: i64, name: &str) -> CatalogResult<i64> {
    insert_tolerating_conflict(
        tx.execute(
            "INSERT INTO subcategories (name, category_id) VALUES (?1, ?2)",
            params![name, category_id],
        ),
        "subcategory",
        name,
    )?;

    let (id, owner): (i64, i64) = tx
        .query_row(
            "SELECT id, category_id FROM subcategories WHERE name = ?1",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| {
            CatalogError::TaxonomyResolution(format!("subcategory '{}' missing after insert", name))
        })?;

    if owner != category_id {
        warn!(
            "Subcategory '{}' already belongs to category {}, not {}; linking the existing row",
            name, owner, category_id
        );
    }
    Ok(id)
}

fn insert_tolerating_conflict(
    result: rusqlite::Result<usize>,
    kind: &str,
    name: &str,
) -> CatalogResult<()> {
    match result {
        Ok(_) => {
            debug!("Created {} '{}'", kind, name);
            Ok(())
        }
        Err(e) if is_unique_violation(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
