use crate::models::schema::{Field, Index, Key, KeyType, Structure, Table};

pub mod mysql;
pub mod postgres;

/// Per-dialect SQL emission. Every `*_sql` operation returns a batch of
/// statements; an empty batch means the dialect cannot express the
/// operation, which the dispatcher turns into an error.
pub trait SqlGenerator: Send + Sync {
    /// Table-name prefix applied to every declared table, may be empty.
    fn prefix(&self) -> &str;

    /// The server-side name of a declared table.
    fn table_name(&self, table: &str) -> String {
        format!("{}{}", self.prefix(), table)
    }

    /// The fixed name of primary-key constraints, for dialects that have
    /// one (MySQL's `PRIMARY`); `None` when names are per-table.
    fn primary_key_name(&self) -> Option<&str>;

    fn create_table_sql(&self, table: &Table) -> Vec<String>;

    /// DDL for a whole declared structure, table by table.
    fn create_structure_sql(&self, structure: &Structure) -> Vec<String> {
        structure
            .tables
            .iter()
            .flat_map(|t| self.create_table_sql(t))
            .collect()
    }

    fn drop_table_sql(&self, table: &str) -> Vec<String>;
    fn rename_table_sql(&self, table: &str, new_name: &str) -> Vec<String>;

    fn add_field_sql(&self, table: &str, field: &Field) -> Vec<String>;
    fn drop_field_sql(&self, table: &str, field: &str) -> Vec<String>;

    /// Aligns type, length, precision and nullability in one batch.
    /// Defaults are handled separately via [`SqlGenerator::modify_default_sql`].
    fn alter_field_sql(&self, table: &str, field: &Field) -> Vec<String>;
    fn modify_default_sql(&self, table: &str, field: &Field) -> Vec<String>;
    fn rename_field_sql(&self, table: &str, field: &str, new_name: &str) -> Vec<String>;

    fn add_key_sql(&self, table: &str, key: &Key) -> Vec<String>;
    fn drop_key_sql(&self, table: &str, key: &Key) -> Vec<String>;
    fn rename_key_sql(&self, table: &str, key: &Key, new_name: &str) -> Vec<String>;

    fn add_index_sql(&self, table: &str, index: &Index) -> Vec<String>;
    fn drop_index_sql(&self, table: &str, index_name: &str) -> Vec<String>;
    fn rename_index_sql(&self, table: &str, index_name: &str, new_name: &str) -> Vec<String>;

    fn reset_sequence_sql(&self, table: &str, field: &str, next_value: u64) -> Vec<String>;

    /// The effective declared default of a field as a plain (unquoted)
    /// value. Sequence fields never carry one.
    fn default_value(&self, field: &Field) -> Option<String> {
        if field.sequence {
            return None;
        }
        field.default.clone()
    }

    /// The declared default as a SQL literal, quoted per type family.
    fn formatted_default(&self, field: &Field) -> Option<String>;

    /// Deterministic name for a table-scoped object over a column list.
    /// Suffixes in use: `pk`, `uk`, `fk`, `ix`, `uix`.
    fn identifier_for(&self, table: &str, columns: &[String], suffix: &str) -> String {
        let mut name = format!("{}_{}_{}", table, columns.join("_"), suffix);
        // Identifier length is capped at 63 on the dialects we target.
        if name.len() > 63 {
            name.truncate(63 - suffix.len() - 1);
            name.push('_');
            name.push_str(suffix);
        }
        name
    }

    /// Statement-terminated copies, used only when SQL is embedded into
    /// human-readable report strings.
    fn ended_statements(&self, statements: &[String]) -> Vec<String> {
        statements
            .iter()
            .map(|s| {
                if s.trim_end().ends_with(';') {
                    s.clone()
                } else {
                    format!("{};", s)
                }
            })
            .collect()
    }
}

/// The canonical suffix for a key type, shared by both dialects.
pub(crate) fn key_suffix(key_type: KeyType) -> &'static str {
    match key_type {
        KeyType::Primary => "pk",
        KeyType::Unique => "uk",
        KeyType::Foreign | KeyType::ForeignUnique => "fk",
    }
}
