pub mod connections;
pub mod report;
pub mod schema;
