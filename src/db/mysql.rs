use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlArguments, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, MySqlPool, Row};
use tokio::sync::Mutex;

use crate::{
    errors::DbError,
    models::schema::{ColumnInfo, IndexInfo},
};

use super::DatabaseAdapter;

pub struct MySqlAdapter {
    pub pool: MySqlPool,
    prefix: String,
    columns_cache: Mutex<HashMap<String, Vec<ColumnInfo>>>,
    indexes_cache: Mutex<HashMap<String, Vec<(IndexInfo, bool)>>>,
}

impl MySqlAdapter {
    pub async fn connect(database_url: &str, prefix: &str) -> Result<Self, DbError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            prefix: prefix.to_string(),
            columns_cache: Mutex::new(HashMap::new()),
            indexes_cache: Mutex::new(HashMap::new()),
        })
    }

    fn prefixed(&self, table: &str) -> String {
        format!("{}{}", self.prefix, table)
    }

    async fn invalidate(&self, tables: &[String]) {
        let mut columns = self.columns_cache.lock().await;
        let mut indexes = self.indexes_cache.lock().await;
        for table in tables {
            columns.remove(table);
            indexes.remove(table);
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap_or_default()),
        Value::Number(n) => query.bind(n.as_f64().unwrap_or_default()),
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_json(row: &MySqlRow) -> Value {
    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        map.insert(column.name().to_string(), value);
    }
    Value::Object(map)
}

/// Maps an information_schema row onto the `(meta_type, max_length, scale)`
/// triple. MySQL reports digit precision for integer types directly.
fn classify_column(
    data_type: &str,
    auto_increment: bool,
    char_length: Option<u32>,
    precision: Option<u32>,
    scale: Option<u32>,
) -> (char, Option<u32>, Option<u32>) {
    match data_type {
        "tinyint" | "smallint" | "mediumint" | "int" | "bigint" => {
            (if auto_increment { 'R' } else { 'I' }, precision, None)
        }
        "decimal" | "numeric" => ('N', precision, scale),
        "float" | "double" => ('F', precision, scale),
        "char" | "varchar" => ('C', char_length, None),
        "tinytext" | "text" | "mediumtext" | "longtext" => ('X', None, None),
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            ('B', None, None)
        }
        "timestamp" => ('T', None, None),
        "datetime" | "date" => ('D', None, None),
        _ => ('X', None, None),
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    async fn table_names(&self) -> Result<BTreeSet<String>, DbError> {
        let query = r#"
            SELECT table_name AS table_name
            FROM information_schema.tables
            WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'
        "#;
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        let mut tables = BTreeSet::new();
        for row in &rows {
            let name: String = row.try_get("table_name").map_err(DbError::Sqlx)?;
            if let Some(stripped) = name.strip_prefix(&self.prefix) {
                tables.insert(stripped.to_string());
            }
        }

        Ok(tables)
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
        if let Some(cached) = self.columns_cache.lock().await.get(table) {
            return Ok(cached.clone());
        }

        let query = r#"
            SELECT column_name AS column_name, data_type AS data_type,
                   character_maximum_length AS character_maximum_length,
                   numeric_precision AS numeric_precision,
                   numeric_scale AS numeric_scale,
                   is_nullable AS is_nullable,
                   column_default AS column_default,
                   extra AS extra
            FROM information_schema.columns
            WHERE table_schema = DATABASE() AND table_name = ?
            ORDER BY ordinal_position
        "#;
        let rows = sqlx::query(query)
            .bind(self.prefixed(table))
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let data_type: String = row.try_get("data_type").map_err(DbError::Sqlx)?;
            let extra: String = row.try_get("extra").unwrap_or_default();
            let auto_increment = extra.contains("auto_increment");
            let raw_default: Option<String> = row.try_get("column_default").ok().flatten();

            // These columns are unsigned BIGINT in information_schema.
            let (meta_type, max_length, scale) = classify_column(
                &data_type,
                auto_increment,
                row.try_get::<Option<u64>, _>("character_maximum_length")
                    .ok()
                    .flatten()
                    .map(|v| v as u32),
                row.try_get::<Option<u64>, _>("numeric_precision")
                    .ok()
                    .flatten()
                    .map(|v| v as u32),
                row.try_get::<Option<u64>, _>("numeric_scale")
                    .ok()
                    .flatten()
                    .map(|v| v as u32),
            );

            let has_default = raw_default.is_some() && !auto_increment;
            columns.push(ColumnInfo {
                name: row.try_get("column_name").map_err(DbError::Sqlx)?,
                meta_type,
                max_length,
                scale,
                not_null: row.try_get::<String, _>("is_nullable").map_err(DbError::Sqlx)? == "NO",
                has_default,
                default_value: if has_default { raw_default } else { None },
            });
        }

        self.columns_cache
            .lock()
            .await
            .insert(table.to_string(), columns.clone());
        Ok(columns)
    }

    async fn indexes(
        &self,
        table: &str,
        include_primary: bool,
    ) -> Result<Vec<IndexInfo>, DbError> {
        let cached = self.indexes_cache.lock().await.get(table).cloned();
        let entries = match cached {
            Some(entries) => entries,
            None => {
                let query = r#"
                    SELECT index_name AS index_name,
                           non_unique AS non_unique,
                           column_name AS column_name
                    FROM information_schema.statistics
                    WHERE table_schema = DATABASE() AND table_name = ?
                    ORDER BY index_name, seq_in_index
                "#;
                let rows = sqlx::query(query)
                    .bind(self.prefixed(table))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(DbError::Sqlx)?;

                let mut entries: Vec<(IndexInfo, bool)> = Vec::new();
                for row in &rows {
                    let name: String = row.try_get("index_name").map_err(DbError::Sqlx)?;
                    let non_unique: i64 = row.try_get("non_unique").map_err(DbError::Sqlx)?;
                    let column: String = row.try_get("column_name").map_err(DbError::Sqlx)?;
                    let primary = name == "PRIMARY";

                    match entries.iter_mut().find(|(i, _)| i.name == name) {
                        Some((index, _)) => index.columns.push(column),
                        None => entries.push((
                            IndexInfo {
                                name,
                                unique: non_unique == 0,
                                columns: vec![column],
                            },
                            primary,
                        )),
                    }
                }

                self.indexes_cache
                    .lock()
                    .await
                    .insert(table.to_string(), entries.clone());
                entries
            }
        };

        Ok(entries
            .into_iter()
            .filter(|(_, primary)| include_primary || !primary)
            .map(|(index, _)| index)
            .collect())
    }

    async fn execute_ddl(
        &self,
        statements: &[String],
        affected_tables: &[String],
    ) -> Result<(), DbError> {
        // MySQL commits DDL implicitly, so the batch runs statement by
        // statement with no surrounding transaction.
        let result = async {
            for sql in statements {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| DbError::ChangeStructure(format!("{}: {}", sql, e)))?;
            }
            Ok(())
        }
        .await;

        self.invalidate(affected_tables).await;
        result
    }

    async fn count_rows(&self, table: &str) -> Result<u64, DbError> {
        let query = format!("SELECT COUNT(*) FROM {}", self.prefixed(table));
        let row = sqlx::query(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        let count: i64 = row.try_get(0).map_err(DbError::Sqlx)?;
        Ok(count as u64)
    }

    async fn exists_where(
        &self,
        table: &str,
        predicate: &str,
        args: &[Value],
    ) -> Result<bool, DbError> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} LIMIT 1",
            self.prefixed(table),
            predicate
        );
        let mut query = sqlx::query(&sql);
        for arg in args {
            query = bind_value(query, arg);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(row.is_some())
    }

    async fn select_rows(&self, table: &str, columns: &[&str]) -> Result<Vec<Value>, DbError> {
        let select_list = columns
            .iter()
            .map(|c| {
                if *c == "id" {
                    c.to_string()
                } else {
                    format!("CAST({} AS CHAR) AS {}", c, c)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!("SELECT {} FROM {}", select_list, self.prefixed(table));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn set_where(
        &self,
        table: &str,
        column: &str,
        value: &Value,
        predicate: &str,
        args: &[Value],
    ) -> Result<u64, DbError> {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {}",
            self.prefixed(table),
            column,
            predicate
        );
        let mut query = bind_value(sqlx::query(&sql), value);
        for arg in args {
            query = bind_value(query, arg);
        }
        let result = query.execute(&self.pool).await.map_err(DbError::Sqlx)?;
        Ok(result.rows_affected())
    }

    async fn update_row(&self, table: &str, row: &Value) -> Result<(), DbError> {
        let object = row
            .as_object()
            .ok_or_else(|| DbError::Unknown("Row update requires an object".to_string()))?;
        let id = object
            .get("id")
            .ok_or_else(|| DbError::Unknown("Row update requires an 'id' member".to_string()))?;

        let assignments: Vec<(&String, &Value)> =
            object.iter().filter(|(name, _)| *name != "id").collect();
        if assignments.is_empty() {
            return Ok(());
        }

        let set_list = assignments
            .iter()
            .map(|(name, _)| format!("{} = ?", name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            self.prefixed(table),
            set_list
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in &assignments {
            query = bind_value(query, value);
        }
        query = bind_value(query, id);
        query.execute(&self.pool).await.map_err(DbError::Sqlx)?;
        Ok(())
    }

    async fn convert_table_row_format(&self, table: &str) -> Result<bool, DbError> {
        let sql = format!(
            "ALTER TABLE {} ROW_FORMAT = Compressed",
            self.prefixed(table)
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| DbError::ChangeStructure(e.to_string()))?;
        self.invalidate(&[table.to_string()]).await;
        Ok(true)
    }

    async fn reset_caches(&self) {
        self.columns_cache.lock().await.clear();
        self.indexes_cache.lock().await.clear();
    }
}
