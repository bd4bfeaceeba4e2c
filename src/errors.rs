use thiserror::Error;

/// Custom error type for database and DDL operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// Error that occurs during database interactions (e.g., SQL query failure).
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// Connection error (e.g., issues with network or database connection).
    #[error("Connection error: {0}")]
    Connection(String),
    /// Configuration error (e.g., invalid database URL or missing parameters).
    #[error("Configuration error: {0}")]
    Config(String),
    /// Schema description error (bad or inconsistent structure tree).
    #[error("Schema error: {0}")]
    Schema(String),
    /// Invalid argument or a generator that produced no SQL where some was required.
    #[error("Error: {0}")]
    Unknown(String),
    /// Operation referenced a table that is not present in the database.
    #[error("Table '{0}' does not exist")]
    TableMissing(String),
    /// Operation referenced a column that is not present in the table.
    #[error("Column '{1}' does not exist in table '{0}'")]
    FieldMissing(String, String),
    /// Create on an existing table, or a rename target that is already in use.
    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),
    /// Add on an existing column.
    #[error("Column '{1}' already exists in table '{0}'")]
    FieldAlreadyExists(String, String),
    /// The column participates in an index; the caller must drop indexes first.
    #[error("Dependency error: {0}")]
    Dependency(String),
    /// The adapter failed to execute a DDL batch.
    #[error("Structure change failed: {0}")]
    ChangeStructure(String),
}
