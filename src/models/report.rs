use std::fmt;

use serde::Serialize;

use crate::models::schema::{ColumnInfo, Field, Index};

/// Discrepancy categories produced by the schema comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    MissingTables,
    ExtraTables,
    MissingColumns,
    ExtraColumns,
    ChangedColumns,
    MissingIndexes,
    ExtraIndexes,
}

/// The specific aspect of a changed column that differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Issue {
    Type,
    Null,
    Length,
    Default,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Issue::Type => "type",
            Issue::Null => "null",
            Issue::Length => "length",
            Issue::Default => "default",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Info,
    Warning,
    Error,
}

/// Ordered classification of a discrepancy. Variant order is the severity
/// order used when collapsing several issues on one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Safety {
    Safe,
    DbIndex,
    Risky,
    Unsafe,
    Unfixable,
}

impl fmt::Display for Safety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Safety::Safe => "safe",
            Safety::DbIndex => "dbindex",
            Safety::Risky => "risky",
            Safety::Unsafe => "unsafe",
            Safety::Unfixable => "unfixable",
        };
        write!(f, "{}", name)
    }
}

/// Data transformations a repair must run before altering the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFix {
    NullDefault,
    Truncate,
}

/// One discrepancy between the declared schema and the live database.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaError {
    pub table: String,
    pub kind: ErrorKind,
    pub issue: Option<Issue>,
    /// The declared field this error refers to, when column-scoped.
    pub field: Option<Field>,
    /// The live column descriptor, when one exists.
    pub db_column: Option<ColumnInfo>,
    /// The declared or live index this error refers to, when index-scoped.
    pub index: Option<Index>,
    pub desc: String,
    pub status: Status,
    pub safety: Safety,
    pub fixes: Vec<DataFix>,
}

impl SchemaError {
    pub fn new(
        table: impl Into<String>,
        kind: ErrorKind,
        status: Status,
        safety: Safety,
        desc: impl Into<String>,
    ) -> Self {
        SchemaError {
            table: table.into(),
            kind,
            issue: None,
            field: None,
            db_column: None,
            index: None,
            desc: desc.into(),
            status,
            safety,
            fixes: Vec::new(),
        }
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issue = Some(issue);
        self
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.field = Some(field);
        self
    }

    pub fn with_db_column(mut self, column: ColumnInfo) -> Self {
        self.db_column = Some(column);
        self
    }

    pub fn with_index(mut self, index: Index) -> Self {
        self.index = Some(index);
        self
    }

    /// The column name this error is scoped to, if any.
    pub fn column_name(&self) -> Option<&str> {
        self.field
            .as_ref()
            .map(|f| f.name.as_str())
            .or_else(|| self.db_column.as_ref().map(|c| c.name.as_str()))
    }

    pub fn add_fix(&mut self, fix: DataFix) {
        if !self.fixes.contains(&fix) {
            self.fixes.push(fix);
        }
    }
}

/// Projects the records matching a kind and an accepted safety set.
/// Purely a filter; never adds, mutates or reorders records.
pub fn filter_errors<'a>(
    errors: &'a [SchemaError],
    kind: ErrorKind,
    levels: &[Safety],
) -> Vec<&'a SchemaError> {
    errors
        .iter()
        .filter(|e| e.kind == kind && levels.contains(&e.safety))
        .collect()
}
