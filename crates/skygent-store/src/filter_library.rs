//! Named-filter persistence (spec.md §4.5, C6).
//!
//! The library itself is oblivious to cycles/nesting — `skygent-filter`'s
//! parser owns the depth-first path set and the 50-deep bound (spec.md
//! §4.1); this module only stores and retrieves `(name -> FilterExpr)`.

use skygent_core::FilterExpr;
use snafu::{Location, ResultExt, Snafu};

use crate::store::{Store, StoreIoError};
use crate::tables::{filter_library, FilterLibraryRecord};

#[derive(Debug, Snafu)]
pub enum FilterLibraryError {
    #[snafu(transparent)]
    Io { source: StoreIoError },
    #[snafu(display("named filter `{name}` not found"))]
    NotFound { name: String },
    #[snafu(display("stored filter `{name}` failed to decode: {source}"))]
    Corrupt {
        name: String,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type FilterLibraryResult<T> = Result<T, FilterLibraryError>;

#[derive(Debug, Clone)]
pub struct FilterLibraryEntry {
    pub name: String,
    pub expr: FilterExpr,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Store {
    pub async fn filter_get(&self, name: &str) -> FilterLibraryResult<FilterExpr> {
        let key = name.to_string();
        let record = self
            .read_with(move |tx| Ok(tx.open_table(&filter_library::TABLE)?.get(&key)?.map(|v| v.value())))
            .await?;
        let Some(record) = record else {
            return NotFoundSnafu { name }.fail();
        };
        serde_json::from_str(&record.expr_json).context(CorruptSnafu { name })
    }

    pub async fn filter_put(
        &self,
        name: &str,
        expr: &FilterExpr,
        description: Option<String>,
        now_millis: i64,
    ) -> FilterLibraryResult<()> {
        let key = name.to_string();
        let expr_json = serde_json::to_string(expr).expect("FilterExpr serialization cannot fail");
        self.write_with(move |tx| {
            let mut table = tx.open_table(&filter_library::TABLE)?;
            let created_at = table.get(&key)?.map(|v| v.value().created_at).unwrap_or(now_millis);
            table.insert(
                &key,
                &FilterLibraryRecord { expr_json, description, created_at, updated_at: now_millis },
            )?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn filter_delete(&self, name: &str) -> FilterLibraryResult<()> {
        let key = name.to_string();
        self.write_with(move |tx| {
            tx.open_table(&filter_library::TABLE)?.remove(&key)?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    pub async fn filter_list(&self) -> FilterLibraryResult<Vec<FilterLibraryEntry>> {
        let records: Vec<(String, FilterLibraryRecord)> = self
            .read_with(|tx| {
                let table = tx.open_table(&filter_library::TABLE)?;
                table
                    .range(..)?
                    .map(|row| row.map(|(k, v)| (k.value(), v.value())))
                    .collect::<Result<_, _>>()
                    .map_err(StoreIoError::from)
            })
            .await?;

        records
            .into_iter()
            .map(|(name, record)| {
                let expr = serde_json::from_str(&record.expr_json)
                    .with_context(|_| CorruptSnafu { name: name.clone() })?;
                Ok(FilterLibraryEntry {
                    name,
                    expr,
                    description: record.description,
                    created_at: record.created_at,
                    updated_at: record.updated_at,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use skygent_core::FilterExpr;

    use super::*;

    #[tokio::test]
    async fn put_get_list_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let expr = FilterExpr::Hashtag { tag: "ai".into() };

        store.filter_put("ai-posts", &expr, Some("AI content".into()), 1_000).await.unwrap();
        assert_eq!(store.filter_get("ai-posts").await.unwrap(), expr);
        assert_eq!(store.filter_list().await.unwrap().len(), 1);

        store.filter_delete("ai-posts").await.unwrap();
        assert!(matches!(store.filter_get("ai-posts").await, Err(FilterLibraryError::NotFound { .. })));
    }
}
