use serde::{Deserialize, Serialize};

use crate::errors::DbError;

/// Column datatype families of the declared schema.
///
/// `Float` is accepted on input but treated as `Number` for all comparison
/// and alignment purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Number,
    Float,
    Char,
    Text,
    Binary,
    Timestamp,
    Datetime,
}

impl FieldType {
    /// The type used for diffing: FLOAT collapses into NUMBER.
    pub fn comparison_type(self) -> FieldType {
        match self {
            FieldType::Float => FieldType::Number,
            other => other,
        }
    }

    /// The live metadata character this type is expected to show up as,
    /// if it can be reverse-mapped at all.
    pub fn meta_char(self) -> Option<char> {
        match self.comparison_type() {
            FieldType::Integer => Some('I'),
            FieldType::Number => Some('N'),
            FieldType::Char => Some('C'),
            FieldType::Text => Some('X'),
            FieldType::Binary => Some('B'),
            FieldType::Timestamp => Some('T'),
            FieldType::Datetime => Some('D'),
            FieldType::Float => None,
        }
    }
}

/// Maximum integer length considered meaningful for comparison; longer
/// declarations are clamped.
pub const MAX_INTEGER_LENGTH: u32 = 18;

/// A declared column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub sequence: bool,
}

impl Field {
    /// Length as used for diffing: INTEGER lengths clamp to
    /// [`MAX_INTEGER_LENGTH`], everything else passes through.
    pub fn comparison_length(&self) -> Option<u32> {
        match self.field_type.comparison_type() {
            FieldType::Integer => self.length.map(|l| l.min(MAX_INTEGER_LENGTH)),
            _ => self.length,
        }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    Primary,
    Unique,
    Foreign,
    ForeignUnique,
}

/// A declared key. Foreign variants carry the referenced table and columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub fields: Vec<String>,
    #[serde(default)]
    pub ref_table: Option<String>,
    #[serde(default)]
    pub ref_fields: Vec<String>,
}

impl Key {
    /// The index that backs this key in the database. Primary keys are
    /// created with the table itself and carry no separate index here.
    pub fn implicit_index(&self) -> Option<Index> {
        match self.key_type {
            KeyType::Primary => None,
            KeyType::Unique | KeyType::ForeignUnique => Some(Index {
                name: self.name.clone(),
                unique: true,
                fields: self.fields.clone(),
            }),
            KeyType::Foreign => Some(Index {
                name: self.name.clone(),
                unique: false,
                fields: self.fields.clone(),
            }),
        }
    }
}

/// A declared index. Two indexes are logically equal when their column
/// sequences are identical; column order matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    pub fields: Vec<String>,
}

/// A declared table: ordered fields plus its keys and indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub keys: Vec<Key>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn primary_key(&self) -> Option<&Key> {
        self.keys.iter().find(|k| k.key_type == KeyType::Primary)
    }
}

/// The declared schema: an ordered collection of tables plus a version tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Structure {
    #[serde(default)]
    pub version: Option<String>,
    pub tables: Vec<Table>,
}

impl Structure {
    /// Parses a schema description document and validates its invariants.
    pub fn from_json_str(input: &str) -> Result<Self, DbError> {
        let structure: Structure =
            serde_json::from_str(input).map_err(|e| DbError::Schema(e.to_string()))?;
        structure.validate()?;
        Ok(structure)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// A new structure containing only the tables whose names pass both
    /// filters: name ∈ `limit` when a limit is given, name ∉ `exclude`
    /// when an exclusion list is given.
    pub fn filtered(&self, limit: Option<&[String]>, exclude: Option<&[String]>) -> Structure {
        let tables = self
            .tables
            .iter()
            .filter(|t| match limit {
                Some(names) => names.iter().any(|n| *n == t.name),
                None => true,
            })
            .filter(|t| match exclude {
                Some(names) => !names.iter().any(|n| *n == t.name),
                None => true,
            })
            .cloned()
            .collect();

        Structure {
            version: self.version.clone(),
            tables,
        }
    }

    /// Structural sanity checks on a freshly loaded tree.
    pub fn validate(&self) -> Result<(), DbError> {
        let mut seen_tables = std::collections::HashSet::new();
        for table in &self.tables {
            if !seen_tables.insert(&table.name) {
                return Err(DbError::Schema(format!(
                    "Duplicate table name '{}'",
                    table.name
                )));
            }

            let mut seen_fields = std::collections::HashSet::new();
            for field in &table.fields {
                if !seen_fields.insert(&field.name) {
                    return Err(DbError::Schema(format!(
                        "Duplicate field name '{}' in table '{}'",
                        field.name, table.name
                    )));
                }
                if let (Some(length), Some(decimals)) = (field.length, field.decimals) {
                    if decimals > length {
                        return Err(DbError::Schema(format!(
                            "Field '{}' in table '{}' declares more decimals ({}) than total digits ({})",
                            field.name, table.name, decimals, length
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Live column metadata as reported by a database adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// One of I, R, N, F, C, X, B, T, D.
    pub meta_type: char,
    pub max_length: Option<u32>,
    pub scale: Option<u32>,
    pub not_null: bool,
    pub has_default: bool,
    pub default_value: Option<String>,
}

impl ColumnInfo {
    /// Normalises the metadata character into a declared field type:
    /// I,R → INTEGER; N,F → NUMBER; C → CHAR; X → TEXT; B → BINARY;
    /// T → TIMESTAMP; D → DATETIME.
    pub fn field_type(&self) -> Option<FieldType> {
        match self.meta_type {
            'I' | 'R' => Some(FieldType::Integer),
            'N' | 'F' => Some(FieldType::Number),
            'C' => Some(FieldType::Char),
            'X' => Some(FieldType::Text),
            'B' => Some(FieldType::Binary),
            'T' => Some(FieldType::Timestamp),
            'D' => Some(FieldType::Datetime),
            _ => None,
        }
    }
}

/// Live index metadata as reported by a database adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}
