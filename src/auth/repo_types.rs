use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{limiter::AttemptState, oauth::AuthMethod};

/// Confirmed account.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub google_id: Option<String>,
    pub linkedin_id: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // absent for federated-only accounts
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub profile_image_url: Option<String>,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
}

impl User {
    /// Stored subject id for a federated provider.
    pub fn subject(&self, method: AuthMethod) -> Option<&str> {
        match method {
            AuthMethod::Google => self.google_id.as_deref(),
            AuthMethod::LinkedIn => self.linkedin_id.as_deref(),
            AuthMethod::Local => None,
        }
    }
}

/// Profile fields to overwrite; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub description: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub google_id: Option<String>,
    pub linkedin_id: Option<String>,
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub profile_image_url: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
}

impl NewUser {
    /// An account needs at least one way to authenticate.
    pub fn has_authenticator(&self) -> bool {
        self.google_id.is_some() || self.linkedin_id.is_some() || self.password_hash.is_some()
    }

    pub fn from_pending(pending: &PendingRegistration, now: OffsetDateTime) -> Self {
        Self {
            google_id: None,
            linkedin_id: None,
            password_hash: Some(pending.password_hash.clone()),
            first_name: pending.first_name.clone(),
            last_name: pending.last_name.clone(),
            email: pending.email.clone(),
            username: pending.username.clone(),
            profile_image_url: None,
            created_at: now,
            last_login: Some(now),
        }
    }
}

/// Unconfirmed signup awaiting its email code.
#[derive(Debug, Clone, FromRow)]
pub struct PendingRegistration {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub verification_attempts: i32,
    pub last_attempt_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl PendingRegistration {
    pub fn attempts(&self) -> AttemptState {
        AttemptState {
            count: self.verification_attempts,
            last_at: self.last_attempt_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPendingRegistration {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    Signup,
    PasswordReset,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::Signup => "signup",
            CodePurpose::PasswordReset => "password_reset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signup" => Some(CodePurpose::Signup),
            "password_reset" => Some(CodePurpose::PasswordReset),
            _ => None,
        }
    }
}

/// Record a verification code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeOwner {
    Pending(Uuid),
    User(Uuid),
}

#[derive(Debug, Clone)]
pub struct VerificationCode {
    pub id: Uuid,
    pub owner: CodeOwner,
    pub code: String,
    pub purpose: CodePurpose,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl VerificationCode {
    /// A code stays usable up to and including its expiry instant.
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        now <= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct NewVerificationCode {
    pub owner: CodeOwner,
    pub code: String,
    pub purpose: CodePurpose,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}
