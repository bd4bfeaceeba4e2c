//! An in-memory database double for driving the check/repair pipeline
//! without a server. It understands exactly the statement shapes the
//! Postgres generator emits and applies them to its own table map, so a
//! repaired fake can be re-checked like a real database.
#![allow(dead_code)]

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use dbalign::db::DatabaseAdapter;
use dbalign::errors::DbError;
use dbalign::models::schema::{
    ColumnInfo, Field, FieldType, IndexInfo, KeyType, Structure, Table,
};

#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub columns: Vec<ColumnInfo>,
    /// `(descriptor, is_primary)` pairs, in creation order.
    pub indexes: Vec<(IndexInfo, bool)>,
    pub rows: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub tables: Vec<(String, FakeTable)>,
    pub ddl_log: Vec<String>,
    pub cache_resets: u32,
}

pub struct FakeAdapter {
    /// The declared structure, used to derive column definitions when DDL
    /// references a declared table or field.
    structure: Structure,
    prefix: String,
    /// Substrings that make an executed statement fail with
    /// `ChangeStructure`, for failure-path tests.
    pub fail_on: Vec<String>,
    pub state: Mutex<FakeState>,
}

impl FakeAdapter {
    pub fn new(structure: &Structure) -> Self {
        Self::with_prefix(structure, "")
    }

    pub fn with_prefix(structure: &Structure, prefix: &str) -> Self {
        Self {
            structure: structure.clone(),
            prefix: prefix.to_string(),
            fail_on: Vec::new(),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Seeds one live table.
    pub async fn seed(&self, name: &str, table: FakeTable) {
        self.state
            .lock()
            .await
            .tables
            .push((name.to_string(), table));
    }

    /// Seeds every declared table in its fully aligned live shape.
    pub async fn seed_aligned(&self) {
        for table in &self.structure.tables {
            self.seed(&table.name, aligned_table(table)).await;
        }
    }

    pub async fn ddl_log(&self) -> Vec<String> {
        self.state.lock().await.ddl_log.clone()
    }

    pub async fn cache_resets(&self) -> u32 {
        self.state.lock().await.cache_resets
    }

    pub async fn table(&self, name: &str) -> Option<FakeTable> {
        self.state
            .lock()
            .await
            .tables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.clone())
    }

    fn strip_prefix<'s>(&self, name: &'s str) -> &'s str {
        name.strip_prefix(&self.prefix).unwrap_or(name)
    }

    fn apply(&self, state: &mut FakeState, sql: &str) -> Result<(), DbError> {
        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let name = self
                .strip_prefix(rest.split(' ').next().unwrap_or(""))
                .to_string();
            let declared = self
                .structure
                .table(&name)
                .ok_or_else(|| DbError::ChangeStructure(format!("unknown table '{}'", name)))?;
            let mut table = FakeTable {
                columns: declared.fields.iter().map(column_info_from_field).collect(),
                indexes: Vec::new(),
                rows: Vec::new(),
            };
            if let Some(pk) = declared.primary_key() {
                table.indexes.push((
                    IndexInfo {
                        name: format!("{}_{}_pk", name, pk.fields.join("_")),
                        unique: true,
                        columns: pk.fields.clone(),
                    },
                    true,
                ));
            }
            state.tables.push((name, table));
            return Ok(());
        }

        let index_create = sql
            .strip_prefix("CREATE UNIQUE INDEX ")
            .map(|r| (r, true))
            .or_else(|| sql.strip_prefix("CREATE INDEX ").map(|r| (r, false)));
        if let Some((rest, unique)) = index_create {
            let mut words = rest.split(' ');
            let index_name = words.next().unwrap_or("").to_string();
            words.next(); // ON
            let table_name = self.strip_prefix(words.next().unwrap_or("")).to_string();
            let columns = parse_parenthesized(rest)?;
            let table = lookup_mut(state, &table_name)?;
            if !table.indexes.iter().any(|(i, _)| i.name == index_name) {
                table.indexes.push((
                    IndexInfo {
                        name: index_name,
                        unique,
                        columns,
                    },
                    false,
                ));
            }
            return Ok(());
        }

        if let Some(rest) = sql.strip_prefix("DROP INDEX ") {
            let index_name = rest.trim();
            for (_, table) in state.tables.iter_mut() {
                table.indexes.retain(|(i, _)| i.name != index_name);
            }
            return Ok(());
        }

        if let Some(rest) = sql.strip_prefix("DROP TABLE ") {
            let name = self.strip_prefix(rest.trim()).to_string();
            state.tables.retain(|(n, _)| *n != name);
            return Ok(());
        }

        if let Some(rest) = sql.strip_prefix("ALTER TABLE ") {
            let mut words = rest.split(' ');
            let table_name = self.strip_prefix(words.next().unwrap_or("")).to_string();
            let operation = rest
                .split_once(' ')
                .map(|(_, op)| op.trim())
                .unwrap_or_default()
                .to_string();
            return self.apply_alter(state, &table_name, &operation);
        }

        Err(DbError::ChangeStructure(format!(
            "unsupported statement: {}",
            sql
        )))
    }

    fn apply_alter(
        &self,
        state: &mut FakeState,
        table_name: &str,
        operation: &str,
    ) -> Result<(), DbError> {
        if let Some(definition) = operation.strip_prefix("ADD COLUMN ") {
            let column_name = definition.split(' ').next().unwrap_or("");
            let field = self
                .structure
                .table(table_name)
                .and_then(|t| t.field(column_name))
                .ok_or_else(|| {
                    DbError::ChangeStructure(format!("unknown column '{}'", column_name))
                })?;
            let info = column_info_from_field(field);
            let default = field.default.clone();
            let table = lookup_mut(state, table_name)?;
            for row in table.rows.iter_mut() {
                if let Some(object) = row.as_object_mut() {
                    object.insert(
                        column_name.to_string(),
                        default.clone().map(Value::String).unwrap_or(Value::Null),
                    );
                }
            }
            table.columns.push(info);
            return Ok(());
        }

        if let Some(column) = operation.strip_prefix("DROP COLUMN ") {
            let column = column.trim();
            let table = lookup_mut(state, table_name)?;
            table.columns.retain(|c| c.name != column);
            for row in table.rows.iter_mut() {
                if let Some(object) = row.as_object_mut() {
                    object.remove(column);
                }
            }
            return Ok(());
        }

        if let Some(rest) = operation.strip_prefix("ADD CONSTRAINT ") {
            // Only UNIQUE constraints reach the fake; they surface as
            // unique indexes, the way the live catalog reports them.
            let constraint_name = rest.split(' ').next().unwrap_or("").to_string();
            let columns = parse_parenthesized(rest)?;
            let table = lookup_mut(state, table_name)?;
            if !table.indexes.iter().any(|(i, _)| i.name == constraint_name) {
                table.indexes.push((
                    IndexInfo {
                        name: constraint_name,
                        unique: true,
                        columns,
                    },
                    false,
                ));
            }
            return Ok(());
        }

        if let Some(name) = operation.strip_prefix("DROP CONSTRAINT ") {
            let name = name.trim();
            let table = lookup_mut(state, table_name)?;
            table.indexes.retain(|(i, _)| i.name != name);
            return Ok(());
        }

        if let Some(rest) = operation.strip_prefix("ALTER COLUMN ") {
            let column_name = rest.split(' ').next().unwrap_or("").to_string();
            let action = rest
                .split_once(' ')
                .map(|(_, a)| a.trim())
                .unwrap_or_default()
                .to_string();

            if action.starts_with("TYPE ") {
                // Re-derive the definition from the declared field; the
                // default never survives a type change here, mirroring the
                // engines that drop it.
                let field = self
                    .structure
                    .table(table_name)
                    .and_then(|t| t.field(&column_name))
                    .ok_or_else(|| {
                        DbError::ChangeStructure(format!("unknown column '{}'", column_name))
                    })?;
                let mut info = column_info_from_field(field);
                let table = lookup_mut(state, table_name)?;
                let existing = table
                    .columns
                    .iter_mut()
                    .find(|c| c.name == column_name)
                    .ok_or_else(|| {
                        DbError::ChangeStructure(format!("missing column '{}'", column_name))
                    })?;
                info.not_null = existing.not_null;
                info.has_default = false;
                info.default_value = None;
                *existing = info;
                return Ok(());
            }

            let table = lookup_mut(state, table_name)?;
            let column = table
                .columns
                .iter_mut()
                .find(|c| c.name == column_name)
                .ok_or_else(|| {
                    DbError::ChangeStructure(format!("missing column '{}'", column_name))
                })?;

            if action == "SET NOT NULL" {
                column.not_null = true;
            } else if action == "DROP NOT NULL" {
                column.not_null = false;
            } else if let Some(literal) = action.strip_prefix("SET DEFAULT ") {
                column.has_default = true;
                column.default_value = Some(literal.trim().trim_matches('\'').to_string());
            } else if action == "DROP DEFAULT" {
                column.has_default = false;
                column.default_value = None;
            } else {
                return Err(DbError::ChangeStructure(format!(
                    "unsupported alter action: {}",
                    action
                )));
            }
            return Ok(());
        }

        Err(DbError::ChangeStructure(format!(
            "unsupported alter: {}",
            operation
        )))
    }
}

fn lookup_mut<'s>(state: &'s mut FakeState, table: &str) -> Result<&'s mut FakeTable, DbError> {
    state
        .tables
        .iter_mut()
        .find(|(n, _)| n == table)
        .map(|(_, t)| t)
        .ok_or_else(|| DbError::ChangeStructure(format!("no such table '{}'", table)))
}

fn parse_parenthesized(fragment: &str) -> Result<Vec<String>, DbError> {
    let start = fragment
        .find('(')
        .ok_or_else(|| DbError::ChangeStructure("missing column list".to_string()))?;
    let end = fragment
        .rfind(')')
        .ok_or_else(|| DbError::ChangeStructure("missing column list".to_string()))?;
    Ok(fragment[start + 1..end]
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect())
}

/// The live descriptor a freshly created declared field would have.
pub fn column_info_from_field(field: &Field) -> ColumnInfo {
    let (meta_type, max_length, scale) = match field.field_type {
        FieldType::Integer => {
            let length = field.length.unwrap_or(10);
            let digits = if length > 9 {
                19
            } else if length > 4 {
                10
            } else {
                5
            };
            (
                if field.sequence { 'R' } else { 'I' },
                Some(digits),
                None,
            )
        }
        FieldType::Number => ('N', field.length, field.decimals),
        FieldType::Float => ('F', field.length, field.decimals),
        FieldType::Char => ('C', field.length, None),
        FieldType::Text => ('X', None, None),
        FieldType::Binary => ('B', None, None),
        FieldType::Timestamp => ('T', None, None),
        FieldType::Datetime => ('D', None, None),
    };
    let has_default = field.default.is_some() && !field.sequence;
    ColumnInfo {
        name: field.name.clone(),
        meta_type,
        max_length,
        scale,
        not_null: field.not_null,
        has_default,
        default_value: if has_default {
            field.default.clone()
        } else {
            None
        },
    }
}

/// The fully aligned live shape of a declared table: columns, the primary
/// key index, and one backing index per key and declared index.
pub fn aligned_table(table: &Table) -> FakeTable {
    let mut fake = FakeTable {
        columns: table.fields.iter().map(column_info_from_field).collect(),
        indexes: Vec::new(),
        rows: Vec::new(),
    };
    if let Some(pk) = table.primary_key() {
        fake.indexes.push((
            IndexInfo {
                name: format!("{}_{}_pk", table.name, pk.fields.join("_")),
                unique: true,
                columns: pk.fields.clone(),
            },
            true,
        ));
    }
    for key in table.keys.iter().filter(|k| k.key_type != KeyType::Primary) {
        if let Some(index) = key.implicit_index() {
            fake.indexes.push((
                IndexInfo {
                    name: format!("{}_{}_bk", table.name, index.fields.join("_")),
                    unique: index.unique,
                    columns: index.fields,
                },
                false,
            ));
        }
    }
    for index in &table.indexes {
        fake.indexes.push((
            IndexInfo {
                name: index.name.clone(),
                unique: index.unique,
                columns: index.fields.clone(),
            },
            false,
        ));
    }
    fake
}

pub fn integer_field(name: &str, length: u32, sequence: bool) -> Field {
    Field {
        name: name.to_string(),
        field_type: FieldType::Integer,
        length: Some(length),
        decimals: None,
        not_null: true,
        default: None,
        sequence,
    }
}

pub fn char_field(name: &str, length: u32, not_null: bool, default: Option<&str>) -> Field {
    Field {
        name: name.to_string(),
        field_type: FieldType::Char,
        length: Some(length),
        decimals: None,
        not_null,
        default: default.map(str::to_string),
        sequence: false,
    }
}

pub fn number_field(name: &str, length: u32, decimals: u32) -> Field {
    Field {
        name: name.to_string(),
        field_type: FieldType::Number,
        length: Some(length),
        decimals: Some(decimals),
        not_null: false,
        default: None,
        sequence: false,
    }
}

pub fn primary_key() -> dbalign::models::schema::Key {
    dbalign::models::schema::Key {
        name: "primary".to_string(),
        key_type: KeyType::Primary,
        fields: vec!["id".to_string()],
        ref_table: None,
        ref_fields: vec![],
    }
}

pub fn table(name: &str, fields: Vec<Field>) -> Table {
    Table {
        name: name.to_string(),
        fields,
        keys: vec![primary_key()],
        indexes: vec![],
    }
}

/// Builds a JSON row object from column/value pairs.
pub fn row(pairs: &[(&str, Value)]) -> Value {
    let mut map = Map::new();
    for (name, value) in pairs {
        map.insert(name.to_string(), value.clone());
    }
    Value::Object(map)
}

fn matches_predicate(row: &Value, predicate: &str, args: &[Value]) -> bool {
    if let Some(column) = predicate.strip_suffix(" IS NULL") {
        return matches!(row.get(column.trim()), None | Some(Value::Null));
    }
    if let Some(rest) = predicate.strip_prefix("LENGTH(") {
        if let Some((column, tail)) = rest.split_once(')') {
            if tail.trim().starts_with('>') {
                let threshold = args
                    .first()
                    .and_then(Value::as_u64)
                    .unwrap_or(u64::MAX) as usize;
                return match row.get(column.trim()) {
                    Some(Value::String(s)) => s.chars().count() > threshold,
                    _ => false,
                };
            }
        }
    }
    false
}

#[async_trait]
impl DatabaseAdapter for FakeAdapter {
    async fn table_names(&self) -> Result<BTreeSet<String>, DbError> {
        let state = self.state.lock().await;
        Ok(state.tables.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .iter()
            .find(|(n, _)| n == table)
            .map(|(_, t)| t.columns.clone())
            .unwrap_or_default())
    }

    async fn indexes(
        &self,
        table: &str,
        include_primary: bool,
    ) -> Result<Vec<IndexInfo>, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .iter()
            .find(|(n, _)| n == table)
            .map(|(_, t)| {
                t.indexes
                    .iter()
                    .filter(|(_, primary)| include_primary || !primary)
                    .map(|(i, _)| i.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn execute_ddl(
        &self,
        statements: &[String],
        _affected_tables: &[String],
    ) -> Result<(), DbError> {
        let mut state = self.state.lock().await;
        for sql in statements {
            state.ddl_log.push(sql.clone());
            if self.fail_on.iter().any(|marker| sql.contains(marker)) {
                return Err(DbError::ChangeStructure(format!("refused: {}", sql)));
            }
            self.apply(&mut state, sql)?;
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .iter()
            .find(|(n, _)| n == table)
            .map(|(_, t)| t.rows.len() as u64)
            .unwrap_or(0))
    }

    async fn exists_where(
        &self,
        table: &str,
        predicate: &str,
        args: &[Value],
    ) -> Result<bool, DbError> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .iter()
            .find(|(n, _)| n == table)
            .map(|(_, t)| t.rows.iter().any(|r| matches_predicate(r, predicate, args)))
            .unwrap_or(false))
    }

    async fn select_rows(&self, table: &str, columns: &[&str]) -> Result<Vec<Value>, DbError> {
        let state = self.state.lock().await;
        let rows = state
            .tables
            .iter()
            .find(|(n, _)| n == table)
            .map(|(_, t)| t.rows.clone())
            .unwrap_or_default();
        Ok(rows
            .iter()
            .map(|r| {
                let mut projected = Map::new();
                for column in columns {
                    projected.insert(
                        column.to_string(),
                        r.get(*column).cloned().unwrap_or(Value::Null),
                    );
                }
                Value::Object(projected)
            })
            .collect())
    }

    async fn set_where(
        &self,
        table: &str,
        column: &str,
        value: &Value,
        predicate: &str,
        args: &[Value],
    ) -> Result<u64, DbError> {
        let mut state = self.state.lock().await;
        let fake = lookup_mut(&mut state, table)?;
        let mut affected = 0;
        for row in fake.rows.iter_mut() {
            if matches_predicate(row, predicate, args) {
                if let Some(object) = row.as_object_mut() {
                    object.insert(column.to_string(), value.clone());
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }

    async fn update_row(&self, table: &str, row: &Value) -> Result<(), DbError> {
        let id = row.get("id").cloned().unwrap_or(Value::Null);
        let mut state = self.state.lock().await;
        let fake = lookup_mut(&mut state, table)?;
        for existing in fake.rows.iter_mut() {
            if existing.get("id") == Some(&id) {
                if let (Some(target), Some(source)) = (existing.as_object_mut(), row.as_object()) {
                    for (name, value) in source {
                        if name != "id" {
                            target.insert(name.clone(), value.clone());
                        }
                    }
                }
                return Ok(());
            }
        }
        Err(DbError::Unknown(format!("no row with id {} in '{}'", id, table)))
    }

    async fn convert_table_row_format(&self, _table: &str) -> Result<bool, DbError> {
        Ok(false)
    }

    async fn reset_caches(&self) {
        self.state.lock().await.cache_resets += 1;
    }
}
