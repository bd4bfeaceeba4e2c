use serde_json::Value;
use tracing::{error, info, warn};

use crate::check::risk::{evaluate_risky, group_changed_columns};
use crate::db::DatabaseAdapter;
use crate::ddl::DdlDispatcher;
use crate::errors::DbError;
use crate::models::report::{filter_errors, DataFix, ErrorKind, SchemaError, Safety};
use crate::models::schema::{Field, FieldType, Index, Structure};
use crate::sql::SqlGenerator;

/// Repairs the live database to match the declared structure, one pass per
/// discrepancy category, in a fixed order: additions first, then column
/// alignment, then removals. Every pass re-checks existence before acting,
/// so a partially applied run can simply be repeated.
pub struct SchemaFixer<'a> {
    adapter: &'a dyn DatabaseAdapter,
    generator: &'a dyn SqlGenerator,
}

impl<'a> SchemaFixer<'a> {
    pub fn new(adapter: &'a dyn DatabaseAdapter, generator: &'a dyn SqlGenerator) -> Self {
        Self { adapter, generator }
    }

    /// Applies every error whose safety is within `levels` and returns the
    /// number of applied changes. Records classified `unfixable` are never
    /// acted on, whatever the requested levels.
    pub async fn fix(
        &self,
        structure: &Structure,
        errors: &mut [SchemaError],
        levels: &[Safety],
    ) -> Result<u32, DbError> {
        self.adapter.reset_caches().await;
        let ddl = DdlDispatcher::new(self.adapter, self.generator);
        let mut count = 0;

        count += self.add_missing_tables(&ddl, structure, errors, levels).await?;
        count += self.add_missing_fields(&ddl, errors, levels).await?;

        if levels.contains(&Safety::Risky) {
            evaluate_risky(self.adapter, errors).await?;
        }
        count += self.align_column_definitions(&ddl, errors, levels).await?;

        count += self.add_missing_indexes(&ddl, errors, levels).await?;
        count += self.drop_extra_indexes(&ddl, errors, levels).await?;
        count += self.drop_extra_fields(&ddl, errors, levels).await?;
        count += self.drop_extra_tables(&ddl, errors, levels).await?;

        Ok(count)
    }

    async fn add_missing_tables(
        &self,
        ddl: &DdlDispatcher<'_>,
        structure: &Structure,
        errors: &[SchemaError],
        levels: &[Safety],
    ) -> Result<u32, DbError> {
        let mut count = 0;
        for error in actionable(errors, ErrorKind::MissingTables, levels) {
            let Some(table) = structure.table(&error.table) else {
                continue;
            };
            if !ddl.table_exists(&error.table).await? {
                ddl.create_table(table).await?;
                info!(table = %error.table, "created table");
                count += 1;
            }
        }
        Ok(count)
    }

    async fn add_missing_fields(
        &self,
        ddl: &DdlDispatcher<'_>,
        errors: &[SchemaError],
        levels: &[Safety],
    ) -> Result<u32, DbError> {
        let mut count = 0;
        for error in actionable(errors, ErrorKind::MissingColumns, levels) {
            let Some(field) = &error.field else {
                continue;
            };
            if ddl.table_exists(&error.table).await?
                && !ddl.field_exists(&error.table, &field.name).await?
            {
                ddl.add_field(&error.table, field).await?;
                info!(table = %error.table, column = %field.name, "added column");
                count += 1;
            }
        }
        Ok(count)
    }

    async fn align_column_definitions(
        &self,
        ddl: &DdlDispatcher<'_>,
        errors: &[SchemaError],
        levels: &[Safety],
    ) -> Result<u32, DbError> {
        let mut count = 0;
        for group in group_changed_columns(errors) {
            if group.safety == Safety::Unfixable || !levels.contains(&group.safety) {
                continue;
            }
            let first = &errors[group.indices[0]];
            let Some(field) = first.field.clone() else {
                continue;
            };
            if !ddl.table_exists(&group.table).await?
                || !ddl.field_exists(&group.table, &group.column).await?
            {
                continue;
            }

            // Data fixes run before the column definition changes so the
            // ALTER finds only conforming values.
            for fix in &first.fixes {
                match fix {
                    DataFix::NullDefault => {
                        let value = default_fill_value(self.generator, &field);
                        let updated = self
                            .adapter
                            .set_where(
                                &group.table,
                                &group.column,
                                &value,
                                &format!("{} IS NULL", group.column),
                                &[],
                            )
                            .await?;
                        info!(
                            table = %group.table,
                            column = %group.column,
                            rows = updated,
                            "filled NULL values with the declared default"
                        );
                    }
                    DataFix::Truncate => {
                        self.truncate_column(&group.table, &group.column, &field).await?;
                    }
                }
            }

            // Indexes over the column cannot survive the ALTER; drop them
            // now and restore them whatever happens to the ALTER itself.
            let dropped = self.drop_column_indexes(ddl, &group.table, &group.column).await?;

            let altered = async {
                ddl.change_field_type(&group.table, &field).await?;
                // The default does not reliably survive a type change, so
                // it is always reapplied.
                ddl.change_field_default(&group.table, &field).await
            }
            .await;

            self.restore_indexes(ddl, &group.table, &dropped).await;

            match altered {
                Ok(()) => {
                    info!(table = %group.table, column = %group.column, "aligned column");
                    count += group.issues.len() as u32;
                }
                Err(DbError::ChangeStructure(reason)) => {
                    error!(
                        table = %group.table,
                        column = %group.column,
                        %reason,
                        "column alignment failed"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        Ok(count)
    }

    async fn add_missing_indexes(
        &self,
        ddl: &DdlDispatcher<'_>,
        errors: &[SchemaError],
        levels: &[Safety],
    ) -> Result<u32, DbError> {
        let mut count = 0;
        for error in actionable(errors, ErrorKind::MissingIndexes, levels) {
            let Some(index) = &error.index else {
                continue;
            };
            if !ddl.table_exists(&error.table).await? {
                continue;
            }
            let columns = self.adapter.columns(&error.table).await?;
            if !index
                .fields
                .iter()
                .all(|f| columns.iter().any(|c| &c.name == f))
            {
                warn!(
                    table = %error.table,
                    index = %index.name,
                    "skipping index whose columns are not all present"
                );
                continue;
            }
            if !ddl.index_exists(&error.table, index).await? {
                ddl.add_index(&error.table, index).await?;
                info!(table = %error.table, index = %index.name, "created index");
                count += 1;
            }
        }
        Ok(count)
    }

    async fn drop_extra_indexes(
        &self,
        ddl: &DdlDispatcher<'_>,
        errors: &[SchemaError],
        levels: &[Safety],
    ) -> Result<u32, DbError> {
        let mut count = 0;
        for error in actionable(errors, ErrorKind::ExtraIndexes, levels) {
            let Some(index) = &error.index else {
                continue;
            };
            if !ddl.table_exists(&error.table).await? {
                continue;
            }
            let live = self.adapter.indexes(&error.table, true).await?;
            if live.iter().any(|i| i.name == index.name) {
                ddl.drop_index(&error.table, &index.name).await?;
                info!(table = %error.table, index = %index.name, "dropped index");
                count += 1;
            }
        }
        Ok(count)
    }

    async fn drop_extra_fields(
        &self,
        ddl: &DdlDispatcher<'_>,
        errors: &[SchemaError],
        levels: &[Safety],
    ) -> Result<u32, DbError> {
        let mut count = 0;
        for error in actionable(errors, ErrorKind::ExtraColumns, levels) {
            let Some(column) = error.column_name().map(str::to_string) else {
                continue;
            };
            if ddl.table_exists(&error.table).await?
                && ddl.field_exists(&error.table, &column).await?
            {
                self.drop_column_indexes(ddl, &error.table, &column).await?;
                ddl.drop_field(&error.table, &column).await?;
                info!(table = %error.table, column = %column, "dropped column");
                count += 1;
            }
        }
        Ok(count)
    }

    async fn drop_extra_tables(
        &self,
        ddl: &DdlDispatcher<'_>,
        errors: &[SchemaError],
        levels: &[Safety],
    ) -> Result<u32, DbError> {
        let mut count = 0;
        for error in actionable(errors, ErrorKind::ExtraTables, levels) {
            if ddl.table_exists(&error.table).await? {
                ddl.drop_table(&error.table).await?;
                info!(table = %error.table, "dropped table");
                count += 1;
            }
        }
        Ok(count)
    }

    /// Rewrites oversize values down to the declared length, character by
    /// character, never splitting a multi-byte character.
    async fn truncate_column(
        &self,
        table: &str,
        column: &str,
        field: &Field,
    ) -> Result<(), DbError> {
        let Some(target) = field.length else {
            return Ok(());
        };
        let target = target as usize;

        let rows = self.adapter.select_rows(table, &["id", column]).await?;
        for row in rows {
            let Some(object) = row.as_object() else {
                continue;
            };
            let Some(Value::String(value)) = object.get(column) else {
                continue;
            };
            if value.chars().count() > target {
                let truncated: String = value.chars().take(target).collect();
                let mut updated = serde_json::Map::new();
                updated.insert(
                    "id".to_string(),
                    object.get("id").cloned().unwrap_or(Value::Null),
                );
                updated.insert(column.to_string(), Value::String(truncated));
                self.adapter.update_row(table, &Value::Object(updated)).await?;
            }
        }
        Ok(())
    }

    async fn drop_column_indexes(
        &self,
        ddl: &DdlDispatcher<'_>,
        table: &str,
        column: &str,
    ) -> Result<Vec<Index>, DbError> {
        let mut dropped = Vec::new();
        for info in self.adapter.indexes(table, false).await? {
            if info.columns.iter().any(|c| c == column) {
                ddl.drop_index(table, &info.name).await?;
                dropped.push(Index {
                    name: info.name,
                    unique: info.unique,
                    fields: info.columns,
                });
            }
        }
        Ok(dropped)
    }

    /// Restore failures are logged and skipped; the pass must go on to the
    /// remaining columns either way.
    async fn restore_indexes(&self, ddl: &DdlDispatcher<'_>, table: &str, indexes: &[Index]) {
        for index in indexes {
            if let Err(e) = ddl.add_index(table, index).await {
                warn!(table, index = %index.name, error = %e, "failed to restore index");
            }
        }
    }
}

/// The records a pass acts on: matching kind, requested safety, and never
/// `unfixable`.
fn actionable<'e>(
    errors: &'e [SchemaError],
    kind: ErrorKind,
    levels: &[Safety],
) -> Vec<&'e SchemaError> {
    filter_errors(errors, kind, levels)
        .into_iter()
        .filter(|e| e.safety != Safety::Unfixable)
        .collect()
}

/// The value written over NULLs when a column tightens to NOT NULL, typed
/// to match the column.
fn default_fill_value(generator: &dyn SqlGenerator, field: &Field) -> Value {
    let raw = generator.default_value(field).unwrap_or_default();
    match field.field_type.comparison_type() {
        FieldType::Integer => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(0)),
        FieldType::Number => raw
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(0.0)),
        _ => Value::String(raw),
    }
}
