use crate::models::schema::{Field, FieldType, Index, Key, KeyType, Table};

use super::{key_suffix, SqlGenerator};

/// Statement emission for MySQL.
pub struct MySqlGenerator {
    prefix: String,
}

impl MySqlGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn sql_type(&self, field: &Field) -> String {
        let length = field.length.unwrap_or(10);
        match field.field_type {
            FieldType::Integer => {
                if length > 9 {
                    "BIGINT".to_string()
                } else if length > 4 {
                    "INT".to_string()
                } else {
                    "SMALLINT".to_string()
                }
            }
            FieldType::Number => {
                format!("DECIMAL({},{})", length, field.decimals.unwrap_or(0))
            }
            FieldType::Float => "DOUBLE".to_string(),
            FieldType::Char => format!("VARCHAR({})", length),
            FieldType::Text => "LONGTEXT".to_string(),
            FieldType::Binary => "LONGBLOB".to_string(),
            FieldType::Timestamp => "TIMESTAMP".to_string(),
            FieldType::Datetime => "DATETIME".to_string(),
        }
    }

    /// Full column clause as used by ADD/MODIFY; the default is included
    /// only at creation time (`with_default`).
    fn column_definition(&self, field: &Field, with_default: bool) -> String {
        let mut def = format!("{} {}", field.name, self.sql_type(field));
        if field.not_null {
            def.push_str(" NOT NULL");
        }
        if with_default {
            if let Some(default) = self.formatted_default(field) {
                def.push_str(&format!(" DEFAULT {}", default));
            }
        }
        if field.sequence {
            def.push_str(" AUTO_INCREMENT");
        }
        def
    }
}

impl SqlGenerator for MySqlGenerator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn primary_key_name(&self) -> Option<&str> {
        Some("PRIMARY")
    }

    fn create_table_sql(&self, table: &Table) -> Vec<String> {
        let name = self.table_name(&table.name);
        let mut parts: Vec<String> = table
            .fields
            .iter()
            .map(|f| self.column_definition(f, true))
            .collect();

        if let Some(pk) = table.primary_key() {
            parts.push(format!("PRIMARY KEY ({})", pk.fields.join(", ")));
        }

        let mut statements = vec![format!("CREATE TABLE {} ({})", name, parts.join(", "))];
        for key in table.keys.iter().filter(|k| k.key_type != KeyType::Primary) {
            statements.extend(self.add_key_sql(&table.name, key));
        }
        for index in &table.indexes {
            statements.extend(self.add_index_sql(&table.name, index));
        }
        statements
    }

    fn drop_table_sql(&self, table: &str) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.table_name(table))]
    }

    fn rename_table_sql(&self, table: &str, new_name: &str) -> Vec<String> {
        vec![format!(
            "RENAME TABLE {} TO {}",
            self.table_name(table),
            self.table_name(new_name)
        )]
    }

    fn add_field_sql(&self, table: &str, field: &Field) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table_name(table),
            self.column_definition(field, true)
        )]
    }

    fn drop_field_sql(&self, table: &str, field: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table_name(table),
            field
        )]
    }

    fn alter_field_sql(&self, table: &str, field: &Field) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.table_name(table),
            self.column_definition(field, false)
        )]
    }

    fn modify_default_sql(&self, table: &str, field: &Field) -> Vec<String> {
        let name = self.table_name(table);
        match self.formatted_default(field) {
            Some(default) => vec![format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                name, field.name, default
            )],
            None => vec![format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                name, field.name
            )],
        }
    }

    fn rename_field_sql(&self, table: &str, field: &str, new_name: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.table_name(table),
            field,
            new_name
        )]
    }

    fn add_key_sql(&self, table: &str, key: &Key) -> Vec<String> {
        let name = self.table_name(table);
        let key_name = self.identifier_for(table, &key.fields, key_suffix(key.key_type));
        match key.key_type {
            KeyType::Primary => vec![],
            KeyType::Unique => vec![format!(
                "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
                name,
                key_name,
                key.fields.join(", ")
            )],
            // Referential integrity is not enforced; foreign keys get
            // their supporting index and nothing else.
            KeyType::Foreign => vec![format!(
                "CREATE INDEX {} ON {} ({})",
                key_name,
                name,
                key.fields.join(", ")
            )],
            KeyType::ForeignUnique => vec![format!(
                "CREATE UNIQUE INDEX {} ON {} ({})",
                key_name,
                name,
                key.fields.join(", ")
            )],
        }
    }

    fn drop_key_sql(&self, table: &str, key: &Key) -> Vec<String> {
        let name = self.table_name(table);
        let key_name = self.identifier_for(table, &key.fields, key_suffix(key.key_type));
        match key.key_type {
            KeyType::Primary => vec![],
            KeyType::Unique | KeyType::Foreign | KeyType::ForeignUnique => {
                vec![format!("ALTER TABLE {} DROP INDEX {}", name, key_name)]
            }
        }
    }

    fn rename_key_sql(&self, _table: &str, _key: &Key, _new_name: &str) -> Vec<String> {
        // Constraints cannot be renamed in place on this dialect.
        vec![]
    }

    fn add_index_sql(&self, table: &str, index: &Index) -> Vec<String> {
        let unique = if index.unique { "UNIQUE " } else { "" };
        vec![format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            index.name,
            self.table_name(table),
            index.fields.join(", ")
        )]
    }

    fn drop_index_sql(&self, table: &str, index_name: &str) -> Vec<String> {
        vec![format!(
            "DROP INDEX {} ON {}",
            index_name,
            self.table_name(table)
        )]
    }

    fn rename_index_sql(&self, table: &str, index_name: &str, new_name: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} RENAME INDEX {} TO {}",
            self.table_name(table),
            index_name,
            new_name
        )]
    }

    fn reset_sequence_sql(&self, table: &str, _field: &str, next_value: u64) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} AUTO_INCREMENT = {}",
            self.table_name(table),
            next_value
        )]
    }

    fn formatted_default(&self, field: &Field) -> Option<String> {
        let value = self.default_value(field)?;
        match field.field_type.comparison_type() {
            FieldType::Integer | FieldType::Number | FieldType::Float => Some(value),
            _ => Some(format!("'{}'", value.replace('\'', "''"))),
        }
    }
}
