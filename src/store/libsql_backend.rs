//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    ConflictKind, DEFAULT_LOCATION, Database, InsertOutcome, NewRegistration, RegistrationRecord,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn find_user(
        &self,
        column: &str,
        value: &str,
        op: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"),
                params![value],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let user = row_to_user(&row)
                    .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
                Ok(Some(user))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, name, phone, line_user_id, location, is_driver, created_at";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to a RegistrationRecord.
///
/// Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<RegistrationRecord, libsql::Error> {
    let created_str: String = row.get(6)?;
    Ok(RegistrationRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        // NULL for accounts created outside LINE
        line_user_id: row.get::<String>(3).unwrap_or_default(),
        location: row.get(4)?,
        is_driver: row.get::<i64>(5)? != 0,
        created_at: parse_datetime(&created_str),
    })
}

/// Which unique constraint a failed insert ran into, if any.
///
/// SQLite reports these as `UNIQUE constraint failed: users.<column>`.
fn unique_violation(message: &str) -> Option<ConflictKind> {
    if !message.contains("UNIQUE constraint failed") {
        return None;
    }
    if message.contains("users.phone") {
        Some(ConflictKind::Phone)
    } else if message.contains("users.line_user_id") {
        Some(ConflictKind::Identity)
    } else {
        None
    }
}

/// Turn a failed insert into a conflict outcome when a unique constraint caused it.
fn classify_insert_error(e: libsql::Error) -> Result<InsertOutcome, DatabaseError> {
    let message = e.to_string();
    match unique_violation(&message) {
        Some(kind) => {
            debug!(conflict = ?kind, "insert_user hit a unique constraint");
            Ok(InsertOutcome::Conflict(kind))
        }
        None => Err(DatabaseError::Query(format!("insert_user: {message}"))),
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn find_user_by_line_id(
        &self,
        line_user_id: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        self.find_user("line_user_id", line_user_id, "find_user_by_line_id")
            .await
    }

    async fn find_user_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<RegistrationRecord>, DatabaseError> {
        self.find_user("phone", phone, "find_user_by_phone").await
    }

    async fn insert_user(&self, new: &NewRegistration) -> Result<InsertOutcome, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now();

        let result = conn
            .query(
                "INSERT INTO users (name, phone, location, is_driver, line_user_id, created_at) VALUES (?1, ?2, ?3, 0, ?4, ?5) RETURNING id",
                params![
                    new.name.as_str(),
                    new.phone.as_str(),
                    DEFAULT_LOCATION,
                    new.line_user_id.as_str(),
                    now.to_rfc3339(),
                ],
            )
            .await;

        let mut rows = match result {
            Ok(rows) => rows,
            Err(e) => return classify_insert_error(e),
        };
        let id: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("insert_user row parse: {e}")))?,
            Ok(None) => {
                return Err(DatabaseError::Query(
                    "insert_user: no id returned".to_string(),
                ));
            }
            Err(e) => return classify_insert_error(e),
        };

        let record = RegistrationRecord {
            id,
            name: new.name.clone(),
            phone: new.phone.clone(),
            line_user_id: new.line_user_id.clone(),
            location: DEFAULT_LOCATION.to_string(),
            is_driver: false,
            created_at: now,
        };
        debug!(user_id = record.id, "User inserted into DB");
        Ok(InsertOutcome::Created(record))
    }
}
