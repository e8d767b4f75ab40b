use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::rand_core::{OsRng, RngCore};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::NaiveDateTime;
use dashmap::DashMap;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::observability::{AUTH_FAILURES_TOTAL, SESSIONS_ACTIVE};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("missing, unknown or expired token")]
    Unauthenticated,
    #[error("admin role required")]
    NotAdmin,
    #[error("invalid registration: {0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

/// A logged-in bearer. Lives in memory only; a restart logs everyone out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub expires_at: NaiveDateTime,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn requester(&self) -> Requester {
        Requester {
            user_id: self.user_id,
            is_admin: self.is_admin(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone_number: Option<String>,
}

impl Registration {
    fn validate(&self) -> Result<(), AuthError> {
        let name_len = self.username.chars().count();
        if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&name_len) {
            return Err(AuthError::Invalid("username length"));
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err(AuthError::Invalid("username contains whitespace"));
        }
        match self.email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(AuthError::Invalid("email")),
        }
        if self.email.len() > MAX_EMAIL_LEN {
            return Err(AuthError::Invalid("email too long"));
        }
        if self.password.len() < MIN_PASSWORD_LEN || self.password.len() > MAX_PASSWORD_LEN {
            return Err(AuthError::Invalid("password length"));
        }
        if self.phone_number.as_ref().is_some_and(|p| p.len() > MAX_PHONE_LEN) {
            return Err(AuthError::Invalid("phone number too long"));
        }
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(password_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// 256 random bits, hex encoded.
fn new_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Accounts and bearer sessions. Accounts persist through the engine's WAL;
/// sessions do not.
pub struct AuthService {
    engine: Arc<Engine>,
    sessions: DashMap<String, Session>,
    ttl: chrono::Duration,
}

impl AuthService {
    pub fn new(engine: Arc<Engine>, ttl: Duration) -> Self {
        Self {
            engine,
            sessions: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(1)),
        }
    }

    pub async fn register(&self, registration: Registration) -> Result<Session, AuthError> {
        let user = self.create_user(registration, Role::User).await?;
        Ok(self.open_session(&user))
    }

    async fn create_user(&self, registration: Registration, role: Role) -> Result<User, AuthError> {
        registration.validate()?;
        let password = registration.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))??;
        let user = User {
            id: Ulid::new(),
            username: registration.username,
            email: registration.email,
            password_hash,
            phone_number: registration.phone_number,
            role,
        };
        Ok(self.engine.register_user(user).await?)
    }

    /// Make sure an admin account named `username` exists. An existing
    /// account of that name is left untouched.
    pub async fn ensure_admin(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if let Some(existing) = self.engine.users.find_by_username(username) {
            if existing.role != Role::Admin {
                warn!(%username, "bootstrap admin name belongs to a non-admin account");
            }
            return Ok(());
        }
        let registration = Registration {
            username: username.to_string(),
            email: format!("{username}@admin.local"),
            password: password.to_string(),
            phone_number: None,
        };
        self.create_user(registration, Role::Admin).await?;
        info!(%username, "bootstrap admin created");
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let Some(user) = self.engine.users.find_by_username(username) else {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            return Err(AuthError::InvalidCredentials);
        };
        let candidate = password.to_string();
        let stored = user.password_hash.clone();
        let ok = tokio::task::spawn_blocking(move || verify_password(&candidate, &stored))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        if !ok {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            return Err(AuthError::InvalidCredentials);
        }
        info!(user_id = %user.id, %username, "login");
        Ok(self.open_session(&user))
    }

    fn open_session(&self, user: &User) -> Session {
        let session = Session {
            token: new_token(),
            user_id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            expires_at: self.engine.now() + self.ttl,
        };
        self.sessions.insert(session.token.clone(), session.clone());
        metrics::gauge!(SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        session
    }

    /// Resolve a bearer token to its live session.
    pub fn authenticate(&self, token: &str) -> Result<Session, AuthError> {
        let session = self
            .sessions
            .get(token)
            .map(|s| s.value().clone())
            .filter(|s| s.expires_at > self.engine.now());
        session.ok_or_else(|| {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            AuthError::Unauthenticated
        })
    }

    pub fn logout(&self, token: &str) {
        self.sessions.remove(token);
        metrics::gauge!(SESSIONS_ACTIVE).set(self.sessions.len() as f64);
    }

    /// Drop expired sessions; returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = self.engine.now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        let after = self.sessions.len();
        metrics::gauge!(SESSIONS_ACTIVE).set(after as f64);
        before.saturating_sub(after)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
