use tracing::debug;

use crate::db::DatabaseAdapter;
use crate::ddl::DdlDispatcher;
use crate::errors::DbError;
use crate::models::report::{ErrorKind, Issue, SchemaError, Safety, Status};
use crate::models::schema::{ColumnInfo, Field, FieldType, Index, IndexInfo, KeyType, Structure};
use crate::sql::SqlGenerator;

/// Tables whose extra indexes are managed elsewhere and must not be
/// reported.
const EXTRA_INDEX_EXEMPT_TABLES: &[&str] = &["search_simpledb_index"];

/// Selects which discrepancy categories a comparison reports, plus the
/// optional table filters.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub missing_tables: bool,
    pub extra_tables: bool,
    pub missing_columns: bool,
    pub extra_columns: bool,
    pub changed_columns: bool,
    pub missing_indexes: bool,
    pub extra_indexes: bool,
    pub limit: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            missing_tables: true,
            extra_tables: true,
            missing_columns: true,
            extra_columns: true,
            changed_columns: true,
            missing_indexes: true,
            extra_indexes: true,
            limit: None,
            exclude: None,
        }
    }
}

/// Compares a declared structure against the live database and reports
/// every discrepancy as a typed record. Never writes to the database and
/// never fails on a discrepancy; problems become error records instead.
pub struct SchemaComparator<'a> {
    adapter: &'a dyn DatabaseAdapter,
    generator: &'a dyn SqlGenerator,
}

impl<'a> SchemaComparator<'a> {
    pub fn new(adapter: &'a dyn DatabaseAdapter, generator: &'a dyn SqlGenerator) -> Self {
        Self { adapter, generator }
    }

    /// Runs the comparison. Records come back in discovery order: declared
    /// tables first, in declaration order, then unexpected live tables.
    pub async fn compare(
        &self,
        structure: &Structure,
        options: &CheckOptions,
    ) -> Result<Vec<SchemaError>, DbError> {
        let ddl = DdlDispatcher::new(self.adapter, self.generator);
        let structure = structure.filtered(options.limit.as_deref(), options.exclude.as_deref());

        let mut db_tables = self.adapter.table_names().await?;
        let mut errors = Vec::new();

        for table in &structure.tables {
            if !db_tables.contains(&table.name) {
                if options.missing_tables {
                    errors.push(
                        SchemaError::new(
                            &table.name,
                            ErrorKind::MissingTables,
                            Status::Error,
                            Safety::Safe,
                            format!("Table '{}' is missing", table.name),
                        ),
                    );
                }
                continue;
            }

            let mut db_fields = self.adapter.columns(&table.name).await?;
            let mut db_indexes = self.adapter.indexes(&table.name, false).await?;
            debug!(
                table = %table.name,
                columns = db_fields.len(),
                indexes = db_indexes.len(),
                "comparing table"
            );

            for field in &table.fields {
                match db_fields.iter().position(|c| c.name == field.name) {
                    None => {
                        if options.missing_columns {
                            errors.push(self.missing_column_error(&table.name, field).await?);
                        }
                    }
                    Some(position) => {
                        let db_column = db_fields.remove(position);
                        if options.changed_columns {
                            self.compare_column(&table.name, field, &db_column, &mut errors);
                        }
                    }
                }
            }

            // Keys and declared indexes both have to be backed by a live
            // index; matching entries leave the pool so the remainder can
            // be reported as unexpected.
            for key in table.keys.iter().filter(|k| k.key_type != KeyType::Primary) {
                if let Some(mut expected) = key.implicit_index() {
                    expected.name = self.generator.identifier_for(
                        &table.name,
                        &expected.fields,
                        if expected.unique { "uix" } else { "ix" },
                    );
                    self.match_index(
                        &ddl,
                        &table.name,
                        &expected,
                        &mut db_indexes,
                        &mut errors,
                        options,
                    )
                    .await?;
                }
            }
            for index in &table.indexes {
                self.match_index(&ddl, &table.name, index, &mut db_indexes, &mut errors, options)
                    .await?;
            }

            if options.extra_indexes
                && !EXTRA_INDEX_EXEMPT_TABLES.contains(&table.name.as_str())
            {
                for leftover in &db_indexes {
                    errors.push(
                        SchemaError::new(
                            &table.name,
                            ErrorKind::ExtraIndexes,
                            Status::Info,
                            Safety::DbIndex,
                            format!(
                                "Unexpected index '{}' on ({})",
                                leftover.name,
                                leftover.columns.join(", ")
                            ),
                        )
                        .with_index(Index {
                            name: leftover.name.clone(),
                            unique: leftover.unique,
                            fields: leftover.columns.clone(),
                        }),
                    );
                }
            }

            if options.extra_columns {
                for leftover in &db_fields {
                    errors.push(
                        SchemaError::new(
                            &table.name,
                            ErrorKind::ExtraColumns,
                            Status::Info,
                            Safety::Unsafe,
                            format!("Unexpected column '{}'", leftover.name),
                        )
                        .with_db_column(leftover.clone()),
                    );
                }
            }

            db_tables.remove(&table.name);
        }

        if options.extra_tables && !self.generator.prefix().is_empty() {
            for name in &db_tables {
                if let Some(limit) = &options.limit {
                    if !limit.iter().any(|n| n == name) {
                        continue;
                    }
                }
                if let Some(exclude) = &options.exclude {
                    if exclude.iter().any(|n| n == name) {
                        continue;
                    }
                }
                if name.starts_with("pma_") {
                    continue;
                }
                // Leftovers from old test runs are harmless to drop; any
                // other unexpected table may hold live data.
                let safety = if name.starts_with("test") {
                    Safety::Safe
                } else {
                    Safety::Unsafe
                };
                errors.push(SchemaError::new(
                    name,
                    ErrorKind::ExtraTables,
                    Status::Info,
                    safety,
                    format!("Unexpected table '{}'", name),
                ));
            }
        }

        Ok(errors)
    }

    async fn missing_column_error(
        &self,
        table: &str,
        field: &Field,
    ) -> Result<SchemaError, DbError> {
        // Adding a NOT NULL column without a usable default only works on
        // an empty table; the row count keeps this probe cheap.
        let addable = !field.not_null
            || self.generator.default_value(field).is_some()
            || self.adapter.count_rows(table).await? == 0;

        let safety = if addable { Safety::Safe } else { Safety::Unfixable };
        Ok(SchemaError::new(
            table,
            ErrorKind::MissingColumns,
            Status::Error,
            safety,
            format!("Column '{}' is missing", field.name),
        )
        .with_field(field.clone()))
    }

    fn compare_column(
        &self,
        table: &str,
        field: &Field,
        db_column: &ColumnInfo,
        errors: &mut Vec<SchemaError>,
    ) {
        let declared_type = field.field_type.comparison_type();
        let db_type = db_column.field_type();
        let types_match = db_type == Some(declared_type);

        if !types_match {
            let safety = if declared_type == FieldType::Text {
                Safety::Safe
            } else {
                Safety::Risky
            };
            let mut desc = format!(
                "Column '{}' has type metadata '{}', expected {:?}",
                field.name, db_column.meta_type, declared_type
            );
            if let Some(expected) = field.field_type.meta_char() {
                desc.push_str(&format!(" ('{}')", expected));
            }
            errors.push(
                SchemaError::new(table, ErrorKind::ChangedColumns, Status::Error, safety, desc)
                    .with_issue(Issue::Type)
                    .with_field(field.clone())
                    .with_db_column(db_column.clone()),
            );
        }

        if field.not_null != db_column.not_null {
            // Tightening depends on the data; loosening never does.
            let (safety, desc) = if field.not_null {
                (
                    Safety::Risky,
                    format!("Column '{}' should be NOT NULL", field.name),
                )
            } else {
                (
                    Safety::Safe,
                    format!("Column '{}' should allow NULL", field.name),
                )
            };
            errors.push(
                SchemaError::new(table, ErrorKind::ChangedColumns, Status::Error, safety, desc)
                    .with_issue(Issue::Null)
                    .with_field(field.clone())
                    .with_db_column(db_column.clone()),
            );
        }

        if types_match {
            self.compare_length(table, field, db_column, errors);
        }

        if matches!(
            field.field_type,
            FieldType::Timestamp | FieldType::Datetime
        ) {
            errors.push(
                SchemaError::new(
                    table,
                    ErrorKind::ChangedColumns,
                    Status::Error,
                    Safety::Risky,
                    format!(
                        "Column '{}' is declared {:?}, a type this tool cannot align",
                        field.name, field.field_type
                    ),
                )
                .with_issue(Issue::Type)
                .with_field(field.clone())
                .with_db_column(db_column.clone()),
            );
        }

        self.compare_default(table, field, db_column, errors);
    }

    fn compare_length(
        &self,
        table: &str,
        field: &Field,
        db_column: &ColumnInfo,
        errors: &mut Vec<SchemaError>,
    ) {
        let declared_type = field.field_type.comparison_type();
        let length = field.comparison_length().unwrap_or(0);
        let max_length = db_column.max_length.unwrap_or(0);

        let (safety, desc) = match declared_type {
            FieldType::Number => {
                // Float declarations have no meaningful digit budget.
                if field.field_type == FieldType::Float {
                    return;
                }
                let decimals = field.decimals.unwrap_or(0);
                let scale = db_column.scale.unwrap_or(0);
                if length == max_length && decimals == scale {
                    return;
                }
                let safety = if decimals < scale {
                    Safety::Unsafe
                } else if length < max_length || decimals > scale {
                    Safety::Risky
                } else {
                    Safety::Safe
                };
                (
                    safety,
                    format!(
                        "Column '{}' has precision ({},{}), expected ({},{})",
                        field.name, max_length, scale, length, decimals
                    ),
                )
            }
            FieldType::Char => {
                if length == max_length {
                    return;
                }
                let safety = if length > max_length {
                    Safety::Safe
                } else {
                    Safety::Risky
                };
                (
                    safety,
                    format!(
                        "Column '{}' has length {}, expected {}",
                        field.name, max_length, length
                    ),
                )
            }
            FieldType::Integer => {
                if length <= max_length {
                    return;
                }
                (
                    Safety::Safe,
                    format!(
                        "Column '{}' has length {}, expected at least {}",
                        field.name, max_length, length
                    ),
                )
            }
            _ => return,
        };

        errors.push(
            SchemaError::new(table, ErrorKind::ChangedColumns, Status::Error, safety, desc)
                .with_issue(Issue::Length)
                .with_field(field.clone())
                .with_db_column(db_column.clone()),
        );
    }

    fn compare_default(
        &self,
        table: &str,
        field: &Field,
        db_column: &ColumnInfo,
        errors: &mut Vec<SchemaError>,
    ) {
        let declared = self.generator.default_value(field);
        let live = if db_column.has_default {
            db_column.default_value.clone()
        } else {
            None
        };

        // Defaults compare as floats for numeric columns and as plain
        // strings otherwise; a missing default is distinct from the literal
        // string "NULL".
        let equal = if field.field_type.comparison_type() == FieldType::Number {
            let cast = |v: &Option<String>| v.as_ref().map(|s| s.parse::<f64>().unwrap_or(0.0));
            cast(&declared) == cast(&live)
        } else {
            declared == live
        };

        if !equal {
            let render = |v: &Option<String>| v.clone().unwrap_or_else(|| "NULL".to_string());
            errors.push(
                SchemaError::new(
                    table,
                    ErrorKind::ChangedColumns,
                    Status::Error,
                    Safety::Safe,
                    format!(
                        "Column '{}' has default '{}', expected '{}'",
                        field.name,
                        render(&live),
                        render(&declared)
                    ),
                )
                .with_issue(Issue::Default)
                .with_field(field.clone())
                .with_db_column(db_column.clone()),
            );
        }
    }

    /// Looks for a live index with the expected column sequence. A match
    /// leaves the live pool; a miss is reported with the SQL that would
    /// create it.
    async fn match_index(
        &self,
        ddl: &DdlDispatcher<'_>,
        table: &str,
        expected: &Index,
        db_indexes: &mut Vec<IndexInfo>,
        errors: &mut Vec<SchemaError>,
        options: &CheckOptions,
    ) -> Result<(), DbError> {
        if ddl.index_exists(table, expected).await? {
            if let Some(position) = db_indexes.iter().position(|i| i.columns == expected.fields) {
                db_indexes.remove(position);
            }
            return Ok(());
        }

        if options.missing_indexes {
            let sql = self
                .generator
                .ended_statements(&self.generator.add_index_sql(table, expected))
                .join(" ");
            errors.push(
                SchemaError::new(
                    table,
                    ErrorKind::MissingIndexes,
                    Status::Error,
                    Safety::Safe,
                    format!("Index '{}' is missing: {}", expected.name, sql),
                )
                .with_index(expected.clone()),
            );
        }
        Ok(())
    }
}

/// Reduces a record list to per-table description lines, preserving the
/// order tables were first seen in.
pub fn summarize(errors: &[SchemaError]) -> Vec<(String, Vec<String>)> {
    let mut summary: Vec<(String, Vec<String>)> = Vec::new();
    for error in errors {
        match summary.iter_mut().find(|(table, _)| *table == error.table) {
            Some((_, descs)) => descs.push(error.desc.clone()),
            None => summary.push((error.table.clone(), vec![error.desc.clone()])),
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries_group_by_table_in_first_seen_order() {
        let errors = vec![
            SchemaError::new("b", ErrorKind::MissingTables, Status::Error, Safety::Safe, "one"),
            SchemaError::new("a", ErrorKind::ExtraTables, Status::Info, Safety::Unsafe, "two"),
            SchemaError::new("b", ErrorKind::ExtraColumns, Status::Info, Safety::Unsafe, "three"),
        ];
        let summary = summarize(&errors);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].0, "b");
        assert_eq!(summary[0].1, vec!["one".to_string(), "three".to_string()]);
        assert_eq!(summary[1].0, "a");
    }
}
