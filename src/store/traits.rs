//! `Database` trait — the persistence the registration dialogue relies on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// Location assigned to newly registered users until they pick one.
pub const DEFAULT_LOCATION: &str = "未選擇";

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    pub id: i64,
    pub name: String,
    pub phone: String,
    /// LINE user ID the account was registered from.
    pub line_user_id: String,
    pub location: String,
    pub is_driver: bool,
    pub created_at: DateTime<Utc>,
}

/// The fields collected by the dialogue for a new registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRegistration {
    pub name: String,
    pub phone: String,
    pub line_user_id: String,
}

/// Which uniqueness rule an insert ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The phone number belongs to another account.
    Phone,
    /// This LINE user already has an account.
    Identity,
}

/// Result of inserting a registration.
///
/// Uniqueness violations are an expected outcome, not an error; `Err` from
/// [`Database::insert_user`] means the insert could not be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(RegistrationRecord),
    Conflict(ConflictKind),
}

/// Backend-agnostic user persistence.
///
/// Phone numbers and LINE user IDs are unique; the backend enforces this
/// and reports violations as [`InsertOutcome::Conflict`].
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Look up the account registered from a LINE user ID.
    async fn find_user_by_line_id(
        &self,
        line_user_id: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError>;

    /// Look up the account owning a phone number.
    async fn find_user_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError>;

    /// Create an account.
    async fn insert_user(&self, new: &NewRegistration) -> Result<InsertOutcome, DatabaseError>;
}
