pub mod check;
pub mod client;
pub mod db;
pub mod ddl;
pub mod errors;
pub mod models;
pub mod sql;

pub use check::diff::{summarize, CheckOptions, SchemaComparator};
pub use check::fixer::SchemaFixer;
pub use check::risk::evaluate_risky;
pub use db::DatabaseAdapter;
pub use ddl::DdlDispatcher;
pub use errors::DbError;
pub use models::connections::{ConnectionConfig, DbType};
pub use models::report::{DataFix, ErrorKind, Issue, SchemaError, Safety, Status};
pub use models::schema::Structure;
pub use sql::SqlGenerator;
