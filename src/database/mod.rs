// Database module
// Dual storage: SQLite for the repository registry, LanceDB for vector collections

pub mod lancedb;
pub mod sqlite;

pub use sqlite::*;
