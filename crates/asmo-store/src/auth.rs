use asmo_core::SessionId;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// The single user the PIN gate protects.
pub const DEFAULT_USER_ID: &str = "default-user";

#[derive(Clone, Debug, Serialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// PIN verification and cookie sessions.
pub struct AuthRepo {
    db: Database,
}

fn hash_pin(pin: &str) -> String {
    hex::encode(Sha256::digest(pin.as_bytes()))
}

// Fixed-width UTC timestamps so `expires_at` compares correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl AuthRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create `user_id` with `pin` unless it already exists.
    #[instrument(skip(self, pin))]
    pub fn seed_user(&self, user_id: &str, pin: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO users (id, pin) VALUES (?1, ?2)",
                rusqlite::params![user_id, hash_pin(pin)],
            )?;
            if inserted > 0 {
                tracing::info!(user_id, "user created");
            }
            Ok(inserted > 0)
        })
    }

    #[instrument(skip(self, pin))]
    pub fn verify_pin(&self, user_id: &str, pin: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT pin FROM users WHERE id = ?1")?;
            let mut rows = stmt.query([user_id])?;
            match rows.next()? {
                Some(row) => {
                    let stored: String = row.get(0)?;
                    Ok(stored == hash_pin(pin))
                }
                None => Err(StoreError::NotFound(format!("user {user_id}"))),
            }
        })
    }

    #[instrument(skip(self))]
    pub fn create_session(&self, user_id: &str, ttl: Duration) -> Result<SessionRow, StoreError> {
        let id = SessionId::new();
        let expires_at = Utc::now() + ttl;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, expires_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), user_id, timestamp(expires_at)],
            )?;
            Ok(())
        })?;

        Ok(SessionRow {
            id,
            user_id: user_id.to_string(),
            expires_at,
        })
    }

    pub fn get_session(&self, id: &str) -> Result<SessionRow, StoreError> {
        let (user_id, expires_at): (String, String) = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id, expires_at FROM sessions WHERE id = ?1")?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => Ok((row.get(0)?, row.get(1)?)),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })?;

        Ok(SessionRow {
            id: SessionId::from_raw(id),
            user_id,
            expires_at: DateTime::parse_from_rfc3339(&expires_at)?.with_timezone(&Utc),
        })
    }

    /// True if the session exists and has not expired.
    pub fn session_valid(&self, id: &str) -> Result<bool, StoreError> {
        match self.get_session(id) {
            Ok(row) => Ok(row.expires_at > Utc::now()),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE id = ?1", [id])? > 0)
        })
    }

    /// Remove sessions past their expiry. Returns how many were removed.
    pub fn delete_expired(&self) -> Result<usize, StoreError> {
        let now = timestamp(Utc::now());
        self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> AuthRepo {
        let repo = AuthRepo::new(Database::in_memory().unwrap());
        repo.seed_user(DEFAULT_USER_ID, "0723").unwrap();
        repo
    }

    #[test]
    fn seed_is_idempotent() {
        let repo = repo();
        assert!(!repo.seed_user(DEFAULT_USER_ID, "9999").unwrap());
        // Original PIN still wins.
        assert!(repo.verify_pin(DEFAULT_USER_ID, "0723").unwrap());
    }

    #[test]
    fn verify_pin_checks_value() {
        let repo = repo();
        assert!(repo.verify_pin(DEFAULT_USER_ID, "0723").unwrap());
        assert!(!repo.verify_pin(DEFAULT_USER_ID, "1234").unwrap());
    }

    #[test]
    fn verify_pin_unknown_user() {
        let repo = repo();
        assert!(matches!(
            repo.verify_pin("nobody", "0723"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn pin_is_not_stored_in_clear() {
        let repo = repo();
        let stored: String = repo
            .db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT pin FROM users WHERE id = ?1", [DEFAULT_USER_ID], |r| {
                    r.get(0)
                })?)
            })
            .unwrap();
        assert_ne!(stored, "0723");
        assert_eq!(stored.len(), 64);
    }

    #[test]
    fn fresh_session_is_valid() {
        let repo = repo();
        let session = repo.create_session(DEFAULT_USER_ID, Duration::days(7)).unwrap();
        assert!(repo.session_valid(session.id.as_str()).unwrap());
        assert_eq!(repo.get_session(session.id.as_str()).unwrap().user_id, DEFAULT_USER_ID);
    }

    #[test]
    fn expired_session_is_invalid_and_purged() {
        let repo = repo();
        let session = repo.create_session(DEFAULT_USER_ID, Duration::seconds(-1)).unwrap();
        assert!(!repo.session_valid(session.id.as_str()).unwrap());
        assert_eq!(repo.delete_expired().unwrap(), 1);
        assert!(matches!(
            repo.get_session(session.id.as_str()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn unknown_session_is_invalid() {
        let repo = repo();
        assert!(!repo.session_valid("missing").unwrap());
    }

    #[test]
    fn delete_session_removes_row() {
        let repo = repo();
        let session = repo.create_session(DEFAULT_USER_ID, Duration::hours(1)).unwrap();
        assert!(repo.delete_session(session.id.as_str()).unwrap());
        assert!(!repo.session_valid(session.id.as_str()).unwrap());
    }

    #[test]
    fn session_for_unknown_user_violates_foreign_key() {
        let repo = repo();
        assert!(repo.create_session("ghost", Duration::hours(1)).is_err());
    }
}
