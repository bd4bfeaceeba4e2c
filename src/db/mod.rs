use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    errors::DbError,
    models::schema::{ColumnInfo, IndexInfo},
};

pub mod mysql;
pub mod postgres;

/// Access to the live database: structure introspection, DDL execution and
/// the bounded data probes the risk evaluator and fixer rely on.
///
/// Table names are unprefixed everywhere on this surface; implementations
/// apply the configured prefix when talking to the server. Column and index
/// maps are memoised per table; [`DatabaseAdapter::reset_caches`] must be
/// called before a fixer run.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Unprefixed names of the application's tables.
    async fn table_names(&self) -> Result<BTreeSet<String>, DbError>;

    /// Column descriptors in ordinal order.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, DbError>;

    /// Index descriptors in name order, columns in index order.
    async fn indexes(&self, table: &str, include_primary: bool)
        -> Result<Vec<IndexInfo>, DbError>;

    /// Runs a DDL batch, transactionally where the dialect allows it.
    /// Invalidates the cache entries of `affected_tables`. Failure maps to
    /// [`DbError::ChangeStructure`].
    async fn execute_ddl(
        &self,
        statements: &[String],
        affected_tables: &[String],
    ) -> Result<(), DbError>;

    async fn count_rows(&self, table: &str) -> Result<u64, DbError>;

    /// True when at least one row satisfies the predicate. The predicate is
    /// a SQL fragment with `?` placeholders; adapters rewrite placeholders
    /// for their dialect.
    async fn exists_where(
        &self,
        table: &str,
        predicate: &str,
        args: &[Value],
    ) -> Result<bool, DbError>;

    /// Reads the given columns of every row. Adapters may buffer; callers
    /// treat the result as a forward-only cursor.
    async fn select_rows(&self, table: &str, columns: &[&str]) -> Result<Vec<Value>, DbError>;

    /// `UPDATE <table> SET <column> = <value> WHERE <predicate>`; returns
    /// the number of affected rows.
    async fn set_where(
        &self,
        table: &str,
        column: &str,
        value: &Value,
        predicate: &str,
        args: &[Value],
    ) -> Result<u64, DbError>;

    /// Writes one row back, keyed by its `id` member.
    async fn update_row(&self, table: &str, row: &Value) -> Result<(), DbError>;

    /// Dialect hook: reorganise the table's row format so longer index keys
    /// fit. Returns false when the dialect has no such conversion.
    async fn convert_table_row_format(&self, table: &str) -> Result<bool, DbError>;

    /// Drops all memoised column/index maps.
    async fn reset_caches(&self);
}
