//! Persistence layer — libSQL-backed storage for registered users.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    ConflictKind, DEFAULT_LOCATION, Database, InsertOutcome, NewRegistration, RegistrationRecord,
};
