use crate::models::schema::{Field, FieldType, Index, Key, KeyType, Table};

use super::{key_suffix, SqlGenerator};

/// Statement emission for PostgreSQL.
pub struct PostgresGenerator {
    prefix: String,
}

impl PostgresGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// The bare SQL type of a field. Serial forms are only valid at
    /// creation time; ALTER paths pass `allow_serial = false`.
    fn sql_type(&self, field: &Field, allow_serial: bool) -> String {
        let length = field.length.unwrap_or(10);
        match field.field_type {
            FieldType::Integer if field.sequence && allow_serial => {
                if length > 9 {
                    "BIGSERIAL".to_string()
                } else {
                    "SERIAL".to_string()
                }
            }
            FieldType::Integer => {
                if length > 9 {
                    "BIGINT".to_string()
                } else if length > 4 {
                    "INTEGER".to_string()
                } else {
                    "SMALLINT".to_string()
                }
            }
            FieldType::Number => {
                format!("NUMERIC({},{})", length, field.decimals.unwrap_or(0))
            }
            FieldType::Float => "DOUBLE PRECISION".to_string(),
            FieldType::Char => format!("VARCHAR({})", length),
            FieldType::Text => "TEXT".to_string(),
            FieldType::Binary => "BYTEA".to_string(),
            FieldType::Timestamp | FieldType::Datetime => "TIMESTAMP".to_string(),
        }
    }

    fn column_definition(&self, field: &Field) -> String {
        let mut def = format!("{} {}", field.name, self.sql_type(field, true));
        if let Some(default) = self.formatted_default(field) {
            def.push_str(&format!(" DEFAULT {}", default));
        }
        if field.not_null && !field.sequence {
            def.push_str(" NOT NULL");
        }
        def
    }
}

impl SqlGenerator for PostgresGenerator {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn primary_key_name(&self) -> Option<&str> {
        None
    }

    fn create_table_sql(&self, table: &Table) -> Vec<String> {
        let name = self.table_name(&table.name);
        let mut parts: Vec<String> = table
            .fields
            .iter()
            .map(|f| self.column_definition(f))
            .collect();

        if let Some(pk) = table.primary_key() {
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.identifier_for(&table.name, &pk.fields, "pk"),
                pk.fields.join(", ")
            ));
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
            "ALTER TABLE {} RENAME TO {}",
            self.table_name(table),
            self.table_name(new_name)
        )]
    }

    fn add_field_sql(&self, table: &str, field: &Field) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table_name(table),
            self.column_definition(field)
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
        let name = self.table_name(table);
        let sql_type = self.sql_type(field, false);
        let mut statements = vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
            name, field.name, sql_type, field.name, sql_type
        )];
        if field.not_null {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                name, field.name
            ));
        } else {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                name, field.name
            ));
        }
        statements
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
            KeyType::Unique => vec![format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                name, key_name
            )],
            KeyType::Foreign | KeyType::ForeignUnique => {
                self.drop_index_sql(table, &key_name)
            }
        }
    }

    fn rename_key_sql(&self, table: &str, key: &Key, new_name: &str) -> Vec<String> {
        if key.key_type == KeyType::Primary {
            return vec![];
        }
        let key_name = self.identifier_for(table, &key.fields, key_suffix(key.key_type));
        vec![format!(
            "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
            self.table_name(table),
            key_name,
            new_name
        )]
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

    fn drop_index_sql(&self, _table: &str, index_name: &str) -> Vec<String> {
        vec![format!("DROP INDEX {}", index_name)]
    }

    fn rename_index_sql(&self, _table: &str, index_name: &str, new_name: &str) -> Vec<String> {
        vec![format!("ALTER INDEX {} RENAME TO {}", index_name, new_name)]
    }

    fn reset_sequence_sql(&self, table: &str, field: &str, next_value: u64) -> Vec<String> {
        vec![format!(
            "SELECT setval(pg_get_serial_sequence('{}', '{}'), {}, false)",
            self.table_name(table),
            field,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn char_field(name: &str, length: u32) -> Field {
        Field {
            name: name.to_string(),
            field_type: FieldType::Char,
            length: Some(length),
            decimals: None,
            not_null: true,
            default: None,
            sequence: false,
        }
    }

    #[test]
    fn create_table_emits_columns_and_primary_key() {
        let generator = PostgresGenerator::new("app_");
        let table = Table {
            name: "users".to_string(),
            fields: vec![
                Field {
                    name: "id".to_string(),
                    field_type: FieldType::Integer,
                    length: Some(10),
                    decimals: None,
                    not_null: true,
                    default: None,
                    sequence: true,
                },
                char_field("email", 100),
            ],
            keys: vec![Key {
                name: "primary".to_string(),
                key_type: KeyType::Primary,
                fields: vec!["id".to_string()],
                ref_table: None,
                ref_fields: vec![],
            }],
            indexes: vec![],
        };

        let sql = generator.create_table_sql(&table);
        assert_eq!(sql.len(), 1);
        assert_eq!(
            sql[0],
            "CREATE TABLE app_users (id BIGSERIAL, email VARCHAR(100) NOT NULL, \
             CONSTRAINT users_id_pk PRIMARY KEY (id))"
        );
    }

    #[test]
    fn alter_field_changes_type_then_nullability() {
        let generator = PostgresGenerator::new("");
        let sql = generator.alter_field_sql("notes", &char_field("body", 100));
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE notes ALTER COLUMN body TYPE VARCHAR(100) USING body::VARCHAR(100)",
                "ALTER TABLE notes ALTER COLUMN body SET NOT NULL",
            ]
        );
    }

    #[test]
    fn defaults_quote_per_type_family() {
        let generator = PostgresGenerator::new("");
        let mut field = char_field("note", 30);
        field.default = Some("it's".to_string());
        assert_eq!(generator.formatted_default(&field), Some("'it''s'".to_string()));

        let numeric = Field {
            name: "total".to_string(),
            field_type: FieldType::Number,
            length: Some(10),
            decimals: Some(2),
            not_null: false,
            default: Some("0".to_string()),
            sequence: false,
        };
        assert_eq!(generator.formatted_default(&numeric), Some("0".to_string()));
    }

    #[test]
    fn default_removal_drops_the_default() {
        let generator = PostgresGenerator::new("");
        let sql = generator.modify_default_sql("notes", &char_field("body", 100));
        assert_eq!(sql, vec!["ALTER TABLE notes ALTER COLUMN body DROP DEFAULT"]);
    }

    #[test]
    fn structure_sql_creates_tables_and_key_indexes() {
        use crate::models::schema::Structure;

        let generator = PostgresGenerator::new("app_");
        let groups = Table {
            name: "groups".to_string(),
            fields: vec![char_field("name", 50)],
            keys: vec![],
            indexes: vec![],
        };
        let members = Table {
            name: "members".to_string(),
            fields: vec![char_field("login", 50)],
            keys: vec![Key {
                name: "groupid".to_string(),
                key_type: KeyType::Foreign,
                fields: vec!["groupid".to_string()],
                ref_table: Some("groups".to_string()),
                ref_fields: vec!["id".to_string()],
            }],
            indexes: vec![],
        };
        let structure = Structure {
            version: None,
            tables: vec![groups, members],
        };

        let sql = generator.create_structure_sql(&structure);
        assert_eq!(sql.len(), 3);
        assert!(sql[0].starts_with("CREATE TABLE app_groups "));
        assert!(sql[1].starts_with("CREATE TABLE app_members "));
        // The foreign key materialises as its supporting index only.
        assert_eq!(
            sql[2],
            "CREATE INDEX members_groupid_fk ON app_members (groupid)"
        );
    }

    #[test]
    fn unique_index_sql_is_marked_unique() {
        let generator = PostgresGenerator::new("app_");
        let index = Index {
            name: "orders_total_ix".to_string(),
            unique: true,
            fields: vec!["total".to_string()],
        };
        assert_eq!(
            generator.add_index_sql("orders", &index),
            vec!["CREATE UNIQUE INDEX orders_total_ix ON app_orders (total)"]
        );
    }
}
