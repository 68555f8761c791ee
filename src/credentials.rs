//! Password check against the external user directory.

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::store::{db_span, PgStore};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRef {
    pub user_id: Uuid,
    pub email: String,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The user, if `password` matches. Unknown emails and wrong passwords look the same.
    async fn verify_password(&self, email: &str, password: &str) -> Result<Option<UserRef>>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRef>>;
}

/// Check a password against a PHC-formatted Argon2 hash. Unparseable hashes never match.
pub(crate) fn password_matches(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            debug!("Stored password hash is not PHC: {err}");
            false
        }
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn verify_password(&self, email: &str, password: &str) -> Result<Option<UserRef>> {
        let row: Option<(Uuid, String, String)> = sqlx::query_as(
            "SELECT id, email, password_hash FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email.trim())
        .fetch_optional(self.pool())
        .instrument(db_span("SELECT", "users"))
        .await
        .context("failed to fetch user")?;

        Ok(row.and_then(|(user_id, email, hash)| {
            password_matches(password, &hash).then_some(UserRef { user_id, email })
        }))
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRef>> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, email FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(self.pool())
                .instrument(db_span("SELECT", "users"))
                .await
                .context("failed to fetch user")?;
        Ok(row.map(|(user_id, email)| UserRef { user_id, email }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use argon2::{password_hash::SaltString, PasswordHasher};
    use rand::rngs::OsRng;

    #[test]
    fn password_matches_phc_hashes() {
        let salt = SaltString::generate(&mut OsRng);
        let phc = Argon2::default()
            .hash_password(b"hunter2", &salt)
            .unwrap()
            .to_string();
        assert!(password_matches("hunter2", &phc));
        assert!(!password_matches("hunter3", &phc));
        assert!(!password_matches("hunter2", "plaintext"));
    }
}
