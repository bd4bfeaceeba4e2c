use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    MySql,
}

/// Connection settings for the target database. The `prefix` is prepended
/// to every declared table name when talking to the live server.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    pub db_type: DbType,
    pub database_url: String,
    #[serde(default)]
    pub prefix: String,
}
