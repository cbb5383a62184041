use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use sha2::{Digest, Sha256};
use tiller_store::Store;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::types::User;

/// Bearer tokens live this long; logging in again mints a fresh one.
const TOKEN_TTL_DAYS: i64 = 30;
const MIN_PASSWORD_CHARS: usize = 8;

/// Accounts and bearer tokens. Passwords are stored as argon2id hashes;
/// tokens are stored as sha-256 digests so a leaked database cannot replay
/// live sessions.
#[derive(Clone)]
pub struct AuthService {
    store: Store,
}

impl AuthService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[instrument(skip(self, password), fields(username, email))]
    pub fn register(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let username = username.trim();
        let email = email.trim().to_lowercase();
        if username.is_empty() {
            return Err(AuthError::Validation("username is empty".into()));
        }
        if !email.contains('@') {
            return Err(AuthError::Validation("email is malformed".into()));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }

        let conn = self.store.lock();
        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1",
            [username],
            |r| r.get(0),
        )?;
        if taken > 0 {
            return Err(AuthError::UsernameTaken);
        }
        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE email = ?1",
            [&email],
            |r| r.get(0),
        )?;
        if taken > 0 {
            return Err(AuthError::EmailTaken);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Hashing(e.to_string()))?
            .to_string();

        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![id, username, email, password_hash, now],
        )?;
        info!(user_id = %id, "user registered");

        Ok(User {
            id,
            username: username.to_string(),
            email,
            created_at: now,
            password_hash,
        })
    }

    /// Verify credentials and mint a bearer token. The plaintext token is
    /// returned exactly once; only its digest is stored.
    #[instrument(skip(self, password), fields(email))]
    pub fn login(&self, email: &str, password: &str) -> Result<(User, String)> {
        let email = email.trim().to_lowercase();
        let user = self
            .find_by_email(&email)?
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed =
            PasswordHash::new(&user.password_hash).map_err(|e| AuthError::Hashing(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let token = mint_token();
        let digest = token_digest(&token);
        let now = chrono::Utc::now();
        let expires = now + chrono::Duration::days(TOKEN_TTL_DAYS);

        let conn = self.store.lock();
        conn.execute(
            "INSERT INTO auth_tokens (token_hash, user_id, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![digest, user.id, expires.to_rfc3339(), now.to_rfc3339()],
        )?;
        debug!(user_id = %user.id, "token minted");

        Ok((user, token))
    }

    /// Resolve a bearer token to its user. Expired tokens are deleted on
    /// sight.
    pub fn authenticate(&self, token: &str) -> Result<User> {
        let digest = token_digest(token);
        let conn = self.store.lock();

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT user_id, expires_at FROM auth_tokens WHERE token_hash = ?1",
                [&digest],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        let (user_id, expires_at) = row.ok_or(AuthError::TokenInvalid)?;

        let expired = chrono::DateTime::parse_from_rfc3339(&expires_at)
            .map(|t| t < chrono::Utc::now())
            .unwrap_or(true);
        if expired {
            conn.execute("DELETE FROM auth_tokens WHERE token_hash = ?1", [&digest])?;
            return Err(AuthError::TokenInvalid);
        }

        conn.query_row(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = ?1",
            [&user_id],
            row_to_user,
        )
        .map_err(|_| AuthError::TokenInvalid)
    }

    /// Revoke a bearer token. Unknown tokens are a no-op, not an error.
    pub fn logout(&self, token: &str) -> Result<()> {
        let digest = token_digest(token);
        let conn = self.store.lock();
        conn.execute("DELETE FROM auth_tokens WHERE token_hash = ?1", [&digest])?;
        Ok(())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.store.lock();
        match conn.query_row(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE email = ?1",
            [email],
            row_to_user,
        ) {
            Ok(u) => Ok(Some(u)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// 64 hex chars of random token material.
fn mint_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> AuthService {
        AuthService::new(Store::open_in_memory().unwrap())
    }

    #[test]
    fn register_login_authenticate_logout_cycle() {
        let auth = fixture();
        let user = auth
            .register("alice", "Alice@Example.com", "correct horse")
            .unwrap();
        assert_eq!(user.email, "alice@example.com");

        let (logged_in, token) = auth.login("alice@example.com", "correct horse").unwrap();
        assert_eq!(logged_in.id, user.id);
        assert_eq!(token.len(), 64);

        let resolved = auth.authenticate(&token).unwrap();
        assert_eq!(resolved.id, user.id);

        auth.logout(&token).unwrap();
        assert!(matches!(
            auth.authenticate(&token),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn wrong_password_is_rejected_without_detail() {
        let auth = fixture();
        auth.register("alice", "a@x.io", "correct horse").unwrap();
        let err = auth.login("a@x.io", "wrong horse").unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        // Unknown email reads identically to a wrong password.
        let err = auth.login("b@x.io", "whatever pw").unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn duplicate_username_and_email_are_rejected() {
        let auth = fixture();
        auth.register("alice", "a@x.io", "long enough").unwrap();
        assert!(matches!(
            auth.register("alice", "other@x.io", "long enough"),
            Err(AuthError::UsernameTaken)
        ));
        assert!(matches!(
            auth.register("bob", "a@x.io", "long enough"),
            Err(AuthError::EmailTaken)
        ));
    }

    #[test]
    fn weak_password_is_rejected() {
        let auth = fixture();
        assert!(matches!(
            auth.register("alice", "a@x.io", "short"),
            Err(AuthError::Validation(_))
        ));
    }

    #[test]
    fn token_digest_is_stored_not_the_token() {
        let auth = fixture();
        auth.register("alice", "a@x.io", "long enough").unwrap();
        let (_, token) = auth.login("a@x.io", "long enough").unwrap();

        let stored: String = auth
            .store
            .lock()
            .query_row("SELECT token_hash FROM auth_tokens", [], |r| r.get(0))
            .unwrap();
        assert_ne!(stored, token);
        assert_eq!(stored, token_digest(&token));
    }
}
