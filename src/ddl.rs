use std::collections::HashSet;

use crate::db::DatabaseAdapter;
use crate::errors::DbError;
use crate::models::schema::{Field, Index, Key, KeyType, Table};
use crate::sql::{key_suffix, SqlGenerator};

/// High-level DDL operations. Every operation re-checks existence and
/// dependencies against the live database before any statement runs, so
/// callers can safely repeat a partially applied plan.
pub struct DdlDispatcher<'a> {
    adapter: &'a dyn DatabaseAdapter,
    generator: &'a dyn SqlGenerator,
}

impl<'a> DdlDispatcher<'a> {
    pub fn new(adapter: &'a dyn DatabaseAdapter, generator: &'a dyn SqlGenerator) -> Self {
        Self { adapter, generator }
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        Ok(self.adapter.table_names().await?.contains(table))
    }

    pub async fn field_exists(&self, table: &str, field: &str) -> Result<bool, DbError> {
        Ok(self
            .adapter
            .columns(table)
            .await?
            .iter()
            .any(|c| c.name == field))
    }

    /// Fails with [`DbError::Dependency`] when the column participates in
    /// any secondary index. The caller is expected to drop those indexes
    /// first; the dispatcher never drops them itself.
    async fn check_column_dependencies(&self, table: &str, column: &str) -> Result<(), DbError> {
        for index in self.adapter.indexes(table, false).await? {
            if index.columns.iter().any(|c| c == column) {
                return Err(DbError::Dependency(format!(
                    "Column '{}' of table '{}' is used by index '{}'",
                    column, table, index.name
                )));
            }
        }
        Ok(())
    }

    async fn require_table(&self, table: &str) -> Result<(), DbError> {
        if !self.table_exists(table).await? {
            return Err(DbError::TableMissing(table.to_string()));
        }
        Ok(())
    }

    async fn require_field(&self, table: &str, field: &str) -> Result<(), DbError> {
        if !self.field_exists(table, field).await? {
            return Err(DbError::FieldMissing(table.to_string(), field.to_string()));
        }
        Ok(())
    }

    async fn execute(&self, statements: Vec<String>, tables: &[&str]) -> Result<(), DbError> {
        if statements.is_empty() {
            return Err(DbError::Unknown(
                "No SQL generated for the requested change".to_string(),
            ));
        }
        let affected: Vec<String> = tables.iter().map(|t| t.to_string()).collect();
        self.adapter.execute_ddl(&statements, &affected).await
    }

    pub async fn create_table(&self, table: &Table) -> Result<(), DbError> {
        if self.table_exists(&table.name).await? {
            return Err(DbError::TableAlreadyExists(table.name.clone()));
        }
        let sql = self.generator.create_table_sql(table);
        self.execute(sql, &[&table.name]).await
    }

    pub async fn drop_table(&self, table: &str) -> Result<(), DbError> {
        self.require_table(table).await?;
        let sql = self.generator.drop_table_sql(table);
        self.execute(sql, &[table]).await
    }

    pub async fn rename_table(&self, table: &str, new_name: &str) -> Result<(), DbError> {
        if new_name.is_empty() {
            return Err(DbError::Unknown("New table name is empty".to_string()));
        }
        let target_exists = self.table_exists(new_name).await?;
        if !self.table_exists(table).await? {
            if target_exists {
                return Err(DbError::Unknown(format!(
                    "Table '{}' appears to be renamed to '{}' already",
                    table, new_name
                )));
            }
            return Err(DbError::TableMissing(table.to_string()));
        }
        if target_exists {
            return Err(DbError::TableAlreadyExists(new_name.to_string()));
        }
        let sql = self.generator.rename_table_sql(table, new_name);
        self.execute(sql, &[table, new_name]).await
    }

    pub async fn add_field(&self, table: &str, field: &Field) -> Result<(), DbError> {
        self.require_table(table).await?;
        if self.field_exists(table, &field.name).await? {
            return Err(DbError::FieldAlreadyExists(
                table.to_string(),
                field.name.clone(),
            ));
        }
        if field.not_null
            && self.generator.default_value(field).is_none()
            && self.adapter.count_rows(table).await? > 0
        {
            return Err(DbError::Unknown(format!(
                "Cannot add NOT NULL column '{}' without default to non-empty table '{}'",
                field.name, table
            )));
        }
        let sql = self.generator.add_field_sql(table, field);
        self.execute(sql, &[table]).await
    }

    pub async fn drop_field(&self, table: &str, field: &str) -> Result<(), DbError> {
        self.require_table(table).await?;
        self.require_field(table, field).await?;
        self.check_column_dependencies(table, field).await?;
        let sql = self.generator.drop_field_sql(table, field);
        self.execute(sql, &[table]).await
    }

    /// The single ALTER path: type, length, precision and nullability all
    /// funnel through here.
    pub async fn change_field_type(&self, table: &str, field: &Field) -> Result<(), DbError> {
        self.require_table(table).await?;
        self.require_field(table, &field.name).await?;
        self.check_column_dependencies(table, &field.name).await?;
        let sql = self.generator.alter_field_sql(table, field);
        self.execute(sql, &[table]).await
    }

    pub async fn change_field_precision(&self, table: &str, field: &Field) -> Result<(), DbError> {
        self.change_field_type(table, field).await
    }

    pub async fn change_field_notnull(&self, table: &str, field: &Field) -> Result<(), DbError> {
        self.change_field_type(table, field).await
    }

    pub async fn change_field_default(&self, table: &str, field: &Field) -> Result<(), DbError> {
        self.require_table(table).await?;
        self.require_field(table, &field.name).await?;
        let sql = self.generator.modify_default_sql(table, field);
        self.execute(sql, &[table]).await
    }

    pub async fn rename_field(
        &self,
        table: &str,
        field: &Field,
        new_name: &str,
    ) -> Result<(), DbError> {
        if new_name.is_empty() {
            return Err(DbError::Unknown("New column name is empty".to_string()));
        }
        if field.name == "id" {
            return Err(DbError::Unknown(
                "Renaming the 'id' column is not allowed".to_string(),
            ));
        }
        self.require_table(table).await?;
        self.require_field(table, &field.name).await?;
        self.check_column_dependencies(table, &field.name).await?;
        if self.field_exists(table, new_name).await? {
            return Err(DbError::FieldAlreadyExists(
                table.to_string(),
                new_name.to_string(),
            ));
        }
        let sql = self.generator.rename_field_sql(table, &field.name, new_name);
        self.execute(sql, &[table]).await
    }

    pub async fn add_key(&self, table: &str, key: &Key) -> Result<(), DbError> {
        if key.key_type == KeyType::Primary {
            return Err(DbError::Unknown(
                "Primary keys can only be created together with their table".to_string(),
            ));
        }
        self.require_table(table).await?;
        let sql = self.generator.add_key_sql(table, key);
        self.execute(sql, &[table]).await
    }

    pub async fn drop_key(&self, table: &str, key: &Key) -> Result<(), DbError> {
        if key.key_type == KeyType::Primary {
            return Err(DbError::Unknown(
                "Primary keys cannot be dropped after table creation".to_string(),
            ));
        }
        self.require_table(table).await?;
        let sql = self.generator.drop_key_sql(table, key);
        self.execute(sql, &[table]).await
    }

    pub async fn rename_key(&self, table: &str, key: &Key, new_name: &str) -> Result<(), DbError> {
        if key.key_type == KeyType::Primary {
            return Err(DbError::Unknown(
                "Primary keys cannot be renamed".to_string(),
            ));
        }
        if new_name.is_empty() {
            return Err(DbError::Unknown("New key name is empty".to_string()));
        }
        self.require_table(table).await?;
        let sql = self.generator.rename_key_sql(table, key, new_name);
        self.execute(sql, &[table]).await
    }

    pub async fn add_index(&self, table: &str, index: &Index) -> Result<(), DbError> {
        self.require_table(table).await?;
        if self.index_exists(table, index).await? {
            return Err(DbError::Unknown(format!(
                "Index on ({}) already exists in table '{}'",
                index.fields.join(", "),
                table
            )));
        }
        let sql = self.generator.add_index_sql(table, index);
        match self.execute(sql.clone(), &[table]).await {
            Err(DbError::ChangeStructure(reason)) => {
                // Some engines refuse long index keys until the table's row
                // format is converted; retry once if the dialect can do it.
                if self.adapter.convert_table_row_format(table).await? {
                    self.execute(sql, &[table]).await
                } else {
                    Err(DbError::ChangeStructure(reason))
                }
            }
            other => other,
        }
    }

    pub async fn drop_index(&self, table: &str, index_name: &str) -> Result<(), DbError> {
        self.require_table(table).await?;
        let known = self.adapter.indexes(table, true).await?;
        if !known.iter().any(|i| i.name == index_name) {
            return Err(DbError::Unknown(format!(
                "Index '{}' does not exist in table '{}'",
                index_name, table
            )));
        }
        let sql = self.generator.drop_index_sql(table, index_name);
        self.execute(sql, &[table]).await
    }

    pub async fn rename_index(
        &self,
        table: &str,
        index_name: &str,
        new_name: &str,
    ) -> Result<(), DbError> {
        if new_name.is_empty() {
            return Err(DbError::Unknown("New index name is empty".to_string()));
        }
        self.require_table(table).await?;
        let known = self.adapter.indexes(table, true).await?;
        if !known.iter().any(|i| i.name == index_name) {
            return Err(DbError::Unknown(format!(
                "Index '{}' does not exist in table '{}'",
                index_name, table
            )));
        }
        let sql = self.generator.rename_index_sql(table, index_name, new_name);
        self.execute(sql, &[table]).await
    }

    /// True iff a live index has exactly the candidate's column sequence.
    pub async fn index_exists(&self, table: &str, index: &Index) -> Result<bool, DbError> {
        Ok(self
            .adapter
            .indexes(table, true)
            .await?
            .iter()
            .any(|i| i.columns == index.fields))
    }

    /// Names of live indexes covering the same column *set* as the
    /// candidate, in database order. Looser than [`Self::index_exists`],
    /// which demands the exact sequence; both behaviours are relied upon.
    pub async fn find_index_name(
        &self,
        table: &str,
        index: &Index,
        return_all: bool,
    ) -> Result<Vec<String>, DbError> {
        let wanted: HashSet<&str> = index.fields.iter().map(|s| s.as_str()).collect();
        let mut names = Vec::new();
        for live in self.adapter.indexes(table, true).await? {
            let columns: HashSet<&str> = live.columns.iter().map(|s| s.as_str()).collect();
            if columns == wanted {
                names.push(live.name.clone());
                if !return_all {
                    break;
                }
            }
        }
        Ok(names)
    }

    /// The canonical name for a key. Purely nominal; the database is never
    /// consulted.
    pub fn find_key_name(&self, table: &str, key: &Key) -> String {
        if key.key_type == KeyType::Primary {
            if let Some(name) = self.generator.primary_key_name() {
                return name.to_string();
            }
        }
        self.generator
            .identifier_for(table, &key.fields, key_suffix(key.key_type))
    }
}
