use std::collections::HashMap;

use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use crate::database::repo::{Catalog, Category, ModelRecord, Subcategory};
use crate::error::{CatalogError, CatalogResult};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelQuery {
    pub page: u32,
    pub page_size: u32,
    pub category_ids: Vec<i64>,
    pub subcategory_ids: Vec<i64>,
}

impl Default for ModelQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            page_size: DEFAULT_PAGE_SIZE,
            category_ids: Vec::new(),
            subcategory_ids: Vec::new(),
        }
    }
}

impl ModelQuery {
    /// Builds a query from transport strings. Bad paging values fall back to
    /// their defaults and unparsable ids are dropped; this never fails.
    pub fn from_raw(
        page: Option<&str>,
        page_size: Option<&str>,
        categories: Option<&str>,
        subcategories: Option<&str>,
    ) -> Self {
        Self {
            page: parse_positive("page", page, DEFAULT_PAGE),
            page_size: parse_positive("pageSize", page_size, DEFAULT_PAGE_SIZE),
            category_ids: parse_id_list("categories", categories),
            subcategory_ids: parse_id_list("subcategories", subcategories),
        }
    }

    // Saturates; an offset past the end just yields an empty page.
    fn offset(&self) -> i64 {
        (i64::from(self.page.max(1)) - 1).saturating_mul(self.limit())
    }

    fn limit(&self) -> i64 {
        i64::from(self.page_size.max(1))
    }

    fn filter(&self) -> Filter<'_> {
        if !self.subcategory_ids.is_empty() {
            Filter::Subcategories(&self.subcategory_ids)
        } else if !self.category_ids.is_empty() {
            Filter::Categories(&self.category_ids)
        } else {
            Filter::All
        }
    }
}

/// Parses a model id from transport. Unlike paging values, a bad id is
/// rejected rather than defaulted.
pub fn parse_model_id(raw: &str) -> CatalogResult<i64> {
    raw.trim()
        .parse()
        .map_err(|_| CatalogError::Validation("Invalid model ID".to_string()))
}

fn parse_positive(field: &str, raw: Option<&str>, default: u32) -> u32 {
    let Some(raw) = raw else { return default };
    match raw.trim().parse::<u32>() {
        Ok(n) if n >= 1 => n,
        _ => {
            debug!("Invalid {} '{}', using {}", field, raw, default);
            default
        }
    }
}

fn parse_id_list(field: &str, raw: Option<&str>) -> Vec<i64> {
    let Some(raw) = raw else { return Vec::new() };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring non-numeric id '{}' in {}", s, field);
                None
            }
        })
        .collect()
}

/// Candidate predicate. Subcategories win over categories; the two are never
/// combined.
enum Filter<'a> {
    All,
    Categories(&'a [i64]),
    Subcategories(&'a [i64]),
}

impl Filter<'_> {
    fn where_clause(&self) -> (String, Vec<i64>) {
        let (table, column, ids) = match self {
            Filter::All => return (String::new(), Vec::new()),
            Filter::Categories(ids) => ("models_categories", "category_id", *ids),
            Filter::Subcategories(ids) => ("models_subcategories", "subcategory_id", *ids),
        };
        let sql = format!(
            "WHERE EXISTS (SELECT 1 FROM {table} l WHERE l.model_id = m.id AND l.{column} IN ({}))",
            placeholders(ids.len())
        );
        (sql, ids.to_vec())
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSummary<C = i64, S = i64> {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub categories: Vec<C>,
    pub subcategories: Vec<S>,
}

/// Model with its taxonomy resolved to full rows.
pub type ModelDetail = ModelSummary<Category, Subcategory>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPage<T> {
    pub page: u32,
    pub page_size: u32,
    /// Number of models in `data`. Existing clients read this as the total.
    pub total: usize,
    /// Number of models matching the filter across all pages.
    pub grand_total: i64,
    pub data: Vec<T>,
}

/// One row of the model × category-link × subcategory-link join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRow {
    pub model: ModelRecord,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
}

/// Groups join rows by model id. Output order and the order of ids inside each
/// list follow first appearance in `rows`.
pub fn flatten(rows: impl IntoIterator<Item = JoinRow>) -> Vec<ModelSummary> {
    let mut out: Vec<ModelSummary> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for row in rows {
        let slot = *index.entry(row.model.id).or_insert_with(|| {
            out.push(ModelSummary {
                id: row.model.id,
                name: row.model.name.clone(),
                url: row.model.url.clone(),
                categories: Vec::new(),
                subcategories: Vec::new(),
            });
            out.len() - 1
        });
        let summary = &mut out[slot];

        if let Some(id) = row.category_id {
            if !summary.categories.contains(&id) {
                summary.categories.push(id);
            }
        }
        if let Some(id) = row.subcategory_id {
            if !summary.subcategories.contains(&id) {
                summary.subcategories.push(id);
            }
        }
    }
    out
}

/// Runs `window` (a SELECT yielding `id, name, url`) as a CTE and joins in
/// every link of the selected models.
fn load_join_rows(conn: &Connection, window: &str, params: Vec<i64>) -> CatalogResult<Vec<JoinRow>> {
    let sql = format!(
        "WITH page AS ({window})
         SELECT page.id, page.name, page.url, mc.category_id, ms.subcategory_id
         FROM page
         LEFT JOIN models_categories mc ON mc.model_id = page.id
         LEFT JOIN models_subcategories ms ON ms.model_id = page.id
         ORDER BY page.id, mc.rowid, ms.rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            Ok(JoinRow {
                model: ModelRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                },
                category_id: row.get(3)?,
                subcategory_id: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

impl Catalog {
    pub fn list_models(&self, query: &ModelQuery) -> CatalogResult<ModelPage<ModelSummary>> {
        let (where_sql, mut params) = query.filter().where_clause();
        let grand_total = self.count_where(&where_sql, &params)?;

        let window = format!(
            "SELECT m.id, m.name, m.url FROM models m {where_sql} ORDER BY m.id LIMIT ? OFFSET ?"
        );
        params.push(query.limit());
        params.push(query.offset());

        let rows = load_join_rows(self.conn(), &window, params)?;
        let data = flatten(rows);
        debug!(
            "Listed {} of {} models (page {}, size {})",
            data.len(),
            grand_total,
            query.page,
            query.page_size
        );

        Ok(ModelPage {
            page: query.page,
            page_size: query.page_size,
            total: data.len(),
            grand_total,
            data,
        })
    }

    pub fn list_models_expanded(&self, query: &ModelQuery) -> CatalogResult<ModelPage<ModelDetail>> {
        let page = self.list_models(query)?;
        let data = self.expand(page.data)?;
        Ok(ModelPage {
            page: page.page,
            page_size: page.page_size,
            total: page.total,
            grand_total: page.grand_total,
            data,
        })
    }

    pub fn get_model(&self, id: i64) -> CatalogResult<ModelSummary> {
        let rows = load_join_rows(
            self.conn(),
            "SELECT m.id, m.name, m.url FROM models m WHERE m.id = ?",
            vec![id],
        )?;
        flatten(rows)
            .into_iter()
            .next()
            .ok_or(CatalogError::NotFound { entity: "model", id })
    }

    pub fn get_model_expanded(&self, id: i64) -> CatalogResult<ModelDetail> {
        let summary = self.get_model(id)?;
        let mut expanded = self.expand(vec![summary])?;
        expanded
            .pop()
            .ok_or(CatalogError::NotFound { entity: "model", id })
    }

    fn count_where(&self, where_sql: &str, params: &[i64]) -> CatalogResult<i64> {
        let sql = format!("SELECT count(*) FROM models m {where_sql}");
        let n = self
            .conn()
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(n)
    }

    /// Replaces taxonomy ids with their rows. Ids whose row has vanished are
    /// dropped with a warning.
    fn expand(&self, summaries: Vec<ModelSummary>) -> CatalogResult<Vec<ModelDetail>> {
        let mut category_ids: Vec<i64> = summaries.iter().flat_map(|s| s.categories.iter().copied()).collect();
        category_ids.sort_unstable();
        category_ids.dedup();
        let mut subcategory_ids: Vec<i64> =
            summaries.iter().flat_map(|s| s.subcategories.iter().copied()).collect();
        subcategory_ids.sort_unstable();
        subcategory_ids.dedup();

        let categories = self.categories_by_id(&category_ids)?;
        let subcategories = self.subcategories_by_id(&subcategory_ids)?;

        Ok(summaries
            .into_iter()
            .map(|s| ModelSummary {
                categories: pick(&categories, &s.categories, "category"),
                subcategories: pick(&subcategories, &s.subcategories, "subcategory"),
                id: s.id,
                name: s.name,
                url: s.url,
            })
            .collect())
    }

    fn categories_by_id(&self, ids: &[i64]) -> CatalogResult<HashMap<i64, Category>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!("SELECT id, name FROM categories WHERE id IN ({})", placeholders(ids.len()));
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .map(|r| r.map(|c| (c.id, c)))
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }

    fn subcategories_by_id(&self, ids: &[i64]) -> CatalogResult<HashMap<i64, Subcategory>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT id, name, category_id FROM subcategories WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok(Subcategory {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    category_id: row.get(2)?,
                })
            })?
            .map(|r| r.map(|s| (s.id, s)))
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(rows)
    }
}

fn pick<T: Clone>(rows: &HashMap<i64, T>, ids: &[i64], kind: &str) -> Vec<T> {
    ids.iter()
        .filter_map(|id| {
            let row = rows.get(id).cloned();
            if row.is_none() {
                warn!("Linked {} {} has no row", kind, id);
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn record(id: i64, name: &str) -> ModelRecord {
        ModelRecord {
            id,
            name: name.to_string(),
            url: format!("static/{}.glb", name),
        }
    }

    fn join(id: i64, name: &str, category: Option<i64>, subcategory: Option<i64>) -> JoinRow {
        JoinRow {
            model: record(id, name),
            category_id: category,
            subcategory_id: subcategory,
        }
    }

    /// Catalog with models 1..=4:
    /// chair -> Muebles(1)/Sillas(1)
    /// table -> Muebles(1), Exterior(2) / Mesas(2)
    /// lamp  -> Luces(3)/Lamparas(3)
    /// rock  -> no links
    fn fixture() -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .conn()
            .execute_batch(
                "INSERT INTO models (name, url) VALUES
                    ('chair', 'static/chair.glb'),
                    ('table', 'static/table.glb'),
                    ('lamp', 'static/lamp.glb'),
                    ('rock', 'static/rock.glb');
                 INSERT INTO categories (name) VALUES ('Muebles'), ('Exterior'), ('Luces');
                 INSERT INTO subcategories (category_id, name) VALUES (1, 'Sillas'), (1, 'Mesas'), (3, 'Lamparas');
                 INSERT INTO models_categories (model_id, category_id) VALUES (1, 1), (2, 1), (2, 2), (3, 3);
                 INSERT INTO models_subcategories (model_id, subcategory_id) VALUES (1, 1), (2, 2), (3, 3);",
            )
            .unwrap();
        catalog
    }

    fn ids(page: &ModelPage<ModelSummary>) -> Vec<i64> {
        page.data.iter().map(|m| m.id).collect()
    }

    #[test]
    fn flatten_dedupes_cross_product() {
        let rows = vec![
            join(1, "table", Some(1), Some(5)),
            join(1, "table", Some(2), Some(5)),
            join(1, "table", Some(1), Some(5)),
        ];
        let out = flatten(rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].categories, vec![1, 2]);
        assert_eq!(out[0].subcategories, vec![5]);
    }

    #[test]
    fn flatten_keeps_unlinked_models() {
        let out = flatten(vec![join(3, "rock", None, None), join(4, "lamp", Some(2), None)]);
        assert_eq!(out.len(), 2);
        assert!(out[0].categories.is_empty());
        assert!(out[0].subcategories.is_empty());
        assert_eq!(out[1].categories, vec![2]);
        assert!(out[1].subcategories.is_empty());
    }

    #[test]
    fn flatten_preserves_first_seen_order() {
        let rows = vec![
            join(9, "b", Some(7), Some(3)),
            join(2, "a", Some(1), None),
            join(9, "b", Some(4), Some(1)),
        ];
        let out = flatten(rows);
        assert_eq!(out.iter().map(|m| m.id).collect::<Vec<_>>(), vec![9, 2]);
        assert_eq!(out[0].categories, vec![7, 4]);
        assert_eq!(out[0].subcategories, vec![3, 1]);
    }

    #[test]
    fn unfiltered_listing_reports_full_membership() -> CatalogResult<()> {
        let catalog = fixture();
        let page = catalog.list_models(&ModelQuery::default())?;

        assert_eq!(ids(&page), vec![1, 2, 3, 4]);
        assert_eq!(page.total, 4);
        assert_eq!(page.grand_total, 4);
        assert_eq!(page.data[1].categories, vec![1, 2]);
        assert_eq!(page.data[1].subcategories, vec![2]);
        assert!(page.data[3].categories.is_empty());
        assert!(page.data[3].subcategories.is_empty());
        Ok(())
    }

    #[test]
    fn first_page_of_one_returns_lowest_id() -> CatalogResult<()> {
        let catalog = fixture();
        let query = ModelQuery {
            page_size: 1,
            ..ModelQuery::default()
        };
        let page = catalog.list_models(&query)?;
        assert_eq!(ids(&page), vec![1]);
        assert_eq!(page.total, 1);
        assert_eq!(page.grand_total, 4);
        Ok(())
    }

    #[test]
    fn pages_never_exceed_page_size() -> CatalogResult<()> {
        let catalog = fixture();
        let mut seen = Vec::new();
        for page_no in 1..=3 {
            let page = catalog.list_models(&ModelQuery {
                page: page_no,
                page_size: 3,
                ..ModelQuery::default()
            })?;
            assert!(page.data.len() <= 3);
            seen.extend(ids(&page));
        }
        assert_eq!(seen, vec![1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn category_filter_matches_any_link_but_reports_all() -> CatalogResult<()> {
        let catalog = fixture();
        let page = catalog.list_models(&ModelQuery {
            category_ids: vec![2],
            ..ModelQuery::default()
        })?;
        assert_eq!(ids(&page), vec![2]);
        assert_eq!(page.data[0].categories, vec![1, 2]);

        let page = catalog.list_models(&ModelQuery {
            category_ids: vec![1, 3],
            ..ModelQuery::default()
        })?;
        assert_eq!(ids(&page), vec![1, 2, 3]);
        assert_eq!(page.grand_total, 3);
        Ok(())
    }

    #[test]
    fn subcategory_filter_takes_precedence() -> CatalogResult<()> {
        let catalog = fixture();
        let page = catalog.list_models(&ModelQuery {
            category_ids: vec![1],
            subcategory_ids: vec![3],
            ..ModelQuery::default()
        })?;
        assert_eq!(ids(&page), vec![3]);
        Ok(())
    }

    #[test]
    fn every_returned_model_matches_the_filter() -> CatalogResult<()> {
        let catalog = fixture();
        let category_ids: Vec<i64> = (0..=4).collect();
        let subcategory_ids: Vec<i64> = (0..=4).collect();

        for &category in &category_ids {
            let page = catalog.list_models(&ModelQuery {
                category_ids: vec![category],
                ..ModelQuery::default()
            })?;
            assert_eq!(page.grand_total, page.data.len() as i64);
            for model in &page.data {
                assert!(
                    model.categories.contains(&category),
                    "model {} lacks category {}",
                    model.id,
                    category
                );
            }
        }

        for &subcategory in &subcategory_ids {
            // Category ids must not widen or narrow a subcategory filter.
            for category_filter in [vec![], category_ids.clone()] {
                let page = catalog.list_models(&ModelQuery {
                    category_ids: category_filter,
                    subcategory_ids: vec![subcategory],
                    ..ModelQuery::default()
                })?;
                for model in &page.data {
                    assert!(
                        model.subcategories.contains(&subcategory),
                        "model {} lacks subcategory {}",
                        model.id,
                        subcategory
                    );
                }
                let expected = catalog
                    .list_models(&ModelQuery::default())?
                    .data
                    .iter()
                    .filter(|m| m.subcategories.contains(&subcategory))
                    .count();
                assert_eq!(page.data.len(), expected);
            }
        }
        Ok(())
    }

    #[test]
    fn huge_page_numbers_give_an_empty_page() -> CatalogResult<()> {
        let catalog = fixture();
        let max = u32::MAX.to_string();
        let query = ModelQuery::from_raw(Some(&max), Some(&max), None, None);
        assert_eq!(query.offset(), i64::MAX);

        let page = catalog.list_models(&query)?;
        assert!(page.data.is_empty());
        assert_eq!(page.page, u32::MAX);
        assert_eq!(page.grand_total, 4);

        let query = ModelQuery {
            page: 2,
            page_size: u32::MAX,
            ..ModelQuery::default()
        };
        assert!(catalog.list_models(&query)?.data.is_empty());
        Ok(())
    }

    #[test]
    fn unknown_subcategory_yields_empty_page() -> CatalogResult<()> {
        let catalog = fixture();
        let page = catalog.list_models(&ModelQuery {
            subcategory_ids: vec![5],
            ..ModelQuery::default()
        })?;
        assert!(page.data.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.grand_total, 0);
        Ok(())
    }

    #[test]
    fn page_past_the_end_is_empty() -> CatalogResult<()> {
        let catalog = fixture();
        let page = catalog.list_models(&ModelQuery {
            page: 5,
            page_size: 2,
            ..ModelQuery::default()
        })?;
        assert!(page.data.is_empty());
        assert_eq!(page.grand_total, 4);
        Ok(())
    }

    #[test]
    fn link_order_follows_insertion() -> CatalogResult<()> {
        let catalog = fixture();
        catalog.conn().execute(
            "INSERT INTO models_categories (model_id, category_id) VALUES (?1, ?2)",
            params![4, 3],
        )?;
        catalog.conn().execute(
            "INSERT INTO models_categories (model_id, category_id) VALUES (?1, ?2)",
            params![4, 1],
        )?;
        assert_eq!(catalog.get_model(4)?.categories, vec![3, 1]);
        Ok(())
    }

    #[test]
    fn get_model_and_not_found() -> CatalogResult<()> {
        let catalog = fixture();
        let table = catalog.get_model(2)?;
        assert_eq!(table.name, "table");
        assert_eq!(table.categories, vec![1, 2]);
        assert_eq!(table.subcategories, vec![2]);

        let rock = catalog.get_model(4)?;
        assert!(rock.categories.is_empty());

        assert!(matches!(
            catalog.get_model(99),
            Err(CatalogError::NotFound { entity: "model", id: 99 })
        ));
        Ok(())
    }

    #[test]
    fn expanded_shape_resolves_rows() -> CatalogResult<()> {
        let catalog = fixture();
        let page = catalog.list_models_expanded(&ModelQuery {
            subcategory_ids: vec![2],
            ..ModelQuery::default()
        })?;
        assert_eq!(page.data.len(), 1);
        let table = &page.data[0];
        let names: Vec<_> = table.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Muebles", "Exterior"]);
        assert_eq!(table.subcategories[0].name, "Mesas");
        assert_eq!(table.subcategories[0].category_id, 1);

        let chair = catalog.get_model_expanded(1)?;
        assert_eq!(chair.subcategories[0].name, "Sillas");
        Ok(())
    }

    #[test]
    fn page_serializes_in_camel_case() -> CatalogResult<()> {
        let catalog = fixture();
        let page = catalog.list_models(&ModelQuery {
            page_size: 1,
            ..ModelQuery::default()
        })?;
        let json = serde_json::to_value(&page)?;
        assert_eq!(json["pageSize"], 1);
        assert_eq!(json["grandTotal"], 4);
        assert_eq!(json["data"][0]["categories"], serde_json::json!([1]));
        Ok(())
    }

    #[test]
    fn raw_parameters_fall_back_to_defaults() {
        let q = ModelQuery::from_raw(Some("abc"), Some("0"), Some("1, 2,x,,3"), None);
        assert_eq!(q.page, DEFAULT_PAGE);
        assert_eq!(q.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(q.category_ids, vec![1, 2, 3]);
        assert!(q.subcategory_ids.is_empty());

        let q = ModelQuery::from_raw(Some("3"), Some("25"), None, Some("5"));
        assert_eq!((q.page, q.page_size), (3, 25));
        assert_eq!(q.offset(), 50);
        assert_eq!(q.subcategory_ids, vec![5]);
    }

    #[test]
    fn model_ids_are_validated() {
        assert_eq!(parse_model_id(" 12 ").unwrap(), 12);
        assert!(matches!(parse_model_id("twelve"), Err(CatalogError::Validation(_))));
    }
}
