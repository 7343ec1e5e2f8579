use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    limiter::AttemptState,
    oauth::AuthMethod,
    repo_types::{
        CodeOwner, CodePurpose, NewPendingRegistration, NewUser, NewVerificationCode,
        PendingRegistration, User, UserUpdate, VerificationCode,
    },
};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint violated; carries the offending field.
    #[error("{0} already exists")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for users, pending registrations and verification codes.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn user_by_subject(&self, method: AuthMethod, subject: &str)
        -> StoreResult<Option<User>>;
    async fn insert_user(&self, user: NewUser) -> StoreResult<User>;
    async fn link_subject(&self, user_id: Uuid, method: AuthMethod, subject: &str)
        -> StoreResult<User>;
    async fn touch_last_login(&self, user_id: Uuid, at: OffsetDateTime) -> StoreResult<()>;
    async fn set_password(&self, user_id: Uuid, password_hash: &str) -> StoreResult<()>;
    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> StoreResult<User>;
    /// Removes the user together with its verification codes.
    async fn delete_user(&self, user_id: Uuid) -> StoreResult<()>;

    async fn insert_pending(&self, pending: NewPendingRegistration)
        -> StoreResult<PendingRegistration>;
    async fn pending_by_id(&self, id: Uuid) -> StoreResult<Option<PendingRegistration>>;
    async fn pending_by_email(&self, email: &str) -> StoreResult<Option<PendingRegistration>>;
    async fn pending_by_username(&self, username: &str)
        -> StoreResult<Option<PendingRegistration>>;
    /// Writes `next` only if the stored attempt pair still equals `expected`.
    async fn compare_and_set_attempts(
        &self,
        id: Uuid,
        expected: AttemptState,
        next: AttemptState,
    ) -> StoreResult<bool>;
    async fn delete_pending(&self, id: Uuid) -> StoreResult<bool>;
    /// Creates the user and removes the pending record (and its codes) atomically.
    async fn promote_pending(&self, pending_id: Uuid, user: NewUser) -> StoreResult<User>;

    async fn insert_code(&self, code: NewVerificationCode) -> StoreResult<VerificationCode>;
    /// Latest code matching owner, value and purpose, expired or not.
    async fn find_code(
        &self,
        owner: CodeOwner,
        code: &str,
        purpose: CodePurpose,
    ) -> StoreResult<Option<VerificationCode>>;
    async fn delete_code(&self, id: Uuid) -> StoreResult<()>;
    async fn purge_expired_codes(&self, now: OffsetDateTime) -> StoreResult<u64>;
}

/// Maps unique/check violations to store errors.
fn map_db_err(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            let field = db.constraint().map(field_from_constraint).unwrap_or("record");
            return StoreError::Conflict(field.to_string());
        }
        if db.is_check_violation() {
            return StoreError::Constraint(db.message().to_string());
        }
    }
    StoreError::Database(e)
}

fn field_from_constraint(constraint: &str) -> &'static str {
    let base = constraint.strip_suffix("_key").unwrap_or(constraint);
    ["username", "email", "google_id", "linkedin_id"]
        .into_iter()
        .find(|field| base.ends_with(field))
        .unwrap_or("record")
}

#[derive(Debug, FromRow)]
struct CodeRow {
    id: Uuid,
    pending_user_id: Option<Uuid>,
    user_id: Option<Uuid>,
    code: String,
    purpose: String,
    expires_at: OffsetDateTime,
    created_at: OffsetDateTime,
}

impl TryFrom<CodeRow> for VerificationCode {
    type Error = StoreError;

    fn try_from(row: CodeRow) -> Result<Self, Self::Error> {
        let owner = match (row.pending_user_id, row.user_id) {
            (Some(p), None) => CodeOwner::Pending(p),
            (None, Some(u)) => CodeOwner::User(u),
            _ => return Err(StoreError::Constraint("code must have exactly one owner".into())),
        };
        let purpose = CodePurpose::parse(&row.purpose)
            .ok_or_else(|| StoreError::Constraint(format!("unknown purpose {}", row.purpose)))?;
        Ok(VerificationCode {
            id: row.id,
            owner,
            code: row.code,
            purpose,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgIdentityStore {
    db: PgPool,
}

impl PgIdentityStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, google_id, linkedin_id, password_hash, first_name, last_name,
                   email, username, profile_image_url, description, created_at, last_login
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, google_id, linkedin_id, password_hash, first_name, last_name,
                   email, username, profile_image_url, description, created_at, last_login
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, google_id, linkedin_id, password_hash, first_name, last_name,
                   email, username, profile_image_url, description, created_at, last_login
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn user_by_subject(
        &self,
        method: AuthMethod,
        subject: &str,
    ) -> StoreResult<Option<User>> {
        let sql = match method {
            AuthMethod::Google => {
                r#"
                SELECT id, google_id, linkedin_id, password_hash, first_name, last_name,
                       email, username, profile_image_url, description, created_at, last_login
                FROM users
                WHERE google_id = $1
                "#
            }
            AuthMethod::LinkedIn => {
                r#"
                SELECT id, google_id, linkedin_id, password_hash, first_name, last_name,
                       email, username, profile_image_url, description, created_at, last_login
                FROM users
                WHERE linkedin_id = $1
                "#
            }
            AuthMethod::Local => return Ok(None),
        };
        let user = sqlx::query_as::<_, User>(sql)
            .bind(subject)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        if !user.has_authenticator() {
            return Err(StoreError::Constraint("user has no way to authenticate".into()));
        }
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (google_id, linkedin_id, password_hash, first_name, last_name,
                               email, username, profile_image_url, created_at, last_login)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, google_id, linkedin_id, password_hash, first_name, last_name,
                      email, username, profile_image_url, description, created_at, last_login
            "#,
        )
        .bind(user.google_id)
        .bind(user.linkedin_id)
        .bind(user.password_hash)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.email)
        .bind(user.username)
        .bind(user.profile_image_url)
        .bind(user.created_at)
        .bind(user.last_login)
        .fetch_one(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn link_subject(
        &self,
        user_id: Uuid,
        method: AuthMethod,
        subject: &str,
    ) -> StoreResult<User> {
        let sql = match method {
            AuthMethod::Google => {
                r#"
                UPDATE users SET google_id = $2
                WHERE id = $1
                RETURNING id, google_id, linkedin_id, password_hash, first_name, last_name,
                          email, username, profile_image_url, description, created_at, last_login
                "#
            }
            AuthMethod::LinkedIn => {
                r#"
                UPDATE users SET linkedin_id = $2
                WHERE id = $1
                RETURNING id, google_id, linkedin_id, password_hash, first_name, last_name,
                          email, username, profile_image_url, description, created_at, last_login
                "#
            }
            AuthMethod::Local => {
                return Err(StoreError::Constraint("local login has no subject".into()))
            }
        };
        sqlx::query_as::<_, User>(sql)
            .bind(user_id)
            .bind(subject)
            .fetch_optional(&self.db)
            .await
            .map_err(map_db_err)?
            .ok_or(StoreError::NotFound)
    }

    async fn touch_last_login(&self, user_id: Uuid, at: OffsetDateTime) -> StoreResult<()> {
        let res = sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_password(&self, user_id: Uuid, password_hash: &str) -> StoreResult<()> {
        let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> StoreResult<User> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET first_name    = COALESCE($2, first_name),
                   last_name     = COALESCE($3, last_name),
                   username      = COALESCE($4, username),
                   description   = COALESCE($5, description),
                   password_hash = COALESCE($6, password_hash)
             WHERE id = $1
            RETURNING id, google_id, linkedin_id, password_hash, first_name, last_name,
                      email, username, profile_image_url, description, created_at, last_login
            "#,
        )
        .bind(user_id)
        .bind(update.first_name)
        .bind(update.last_name)
        .bind(update.username)
        .bind(update.description)
        .bind(update.password_hash)
        .fetch_optional(&self.db)
        .await
        .map_err(map_db_err)?
        .ok_or(StoreError::NotFound)
    }

    async fn delete_user(&self, user_id: Uuid) -> StoreResult<()> {
        // verification_codes rows go with it (ON DELETE CASCADE)
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_pending(
        &self,
        pending: NewPendingRegistration,
    ) -> StoreResult<PendingRegistration> {
        sqlx::query_as::<_, PendingRegistration>(
            r#"
            INSERT INTO pending_users (email, username, password_hash, first_name, last_name,
                                       verification_attempts, last_attempt_at, created_at)
            VALUES ($1, $2, $3, $4, $5, 0, NULL, $6)
            RETURNING id, email, username, password_hash, first_name, last_name,
                      verification_attempts, last_attempt_at, created_at
            "#,
        )
        .bind(pending.email)
        .bind(pending.username)
        .bind(pending.password_hash)
        .bind(pending.first_name)
        .bind(pending.last_name)
        .bind(pending.created_at)
        .fetch_one(&self.db)
        .await
        .map_err(map_db_err)
    }

    async fn pending_by_id(&self, id: Uuid) -> StoreResult<Option<PendingRegistration>> {
        let pending = sqlx::query_as::<_, PendingRegistration>(
            r#"
            SELECT id, email, username, password_hash, first_name, last_name,
                   verification_attempts, last_attempt_at, created_at
            FROM pending_users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(pending)
    }

    async fn pending_by_email(&self, email: &str) -> StoreResult<Option<PendingRegistration>> {
        let pending = sqlx::query_as::<_, PendingRegistration>(
            r#"
            SELECT id, email, username, password_hash, first_name, last_name,
                   verification_attempts, last_attempt_at, created_at
            FROM pending_users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(pending)
    }

    async fn pending_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<PendingRegistration>> {
        let pending = sqlx::query_as::<_, PendingRegistration>(
            r#"
            SELECT id, email, username, password_hash, first_name, last_name,
                   verification_attempts, last_attempt_at, created_at
            FROM pending_users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(pending)
    }

    async fn compare_and_set_attempts(
        &self,
        id: Uuid,
        expected: AttemptState,
        next: AttemptState,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE pending_users
               SET verification_attempts = $2, last_attempt_at = $3
             WHERE id = $1
               AND verification_attempts = $4
               AND last_attempt_at IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(id)
        .bind(next.count)
        .bind(next.last_at)
        .bind(expected.count)
        .bind(expected.last_at)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_pending(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM pending_users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn promote_pending(&self, pending_id: Uuid, user: NewUser) -> StoreResult<User> {
        if !user.has_authenticator() {
            return Err(StoreError::Constraint("user has no way to authenticate".into()));
        }
        let mut tx = self.db.begin().await?;

        // Deleting first makes a concurrent promotion of the same record lose.
        let deleted = sqlx::query("DELETE FROM pending_users WHERE id = $1")
            .bind(pending_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (google_id, linkedin_id, password_hash, first_name, last_name,
                               email, username, profile_image_url, created_at, last_login)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, google_id, linkedin_id, password_hash, first_name, last_name,
                      email, username, profile_image_url, description, created_at, last_login
            "#,
        )
        .bind(user.google_id)
        .bind(user.linkedin_id)
        .bind(user.password_hash)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.email)
        .bind(user.username)
        .bind(user.profile_image_url)
        .bind(user.created_at)
        .bind(user.last_login)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await?;
        Ok(created)
    }

    async fn insert_code(&self, code: NewVerificationCode) -> StoreResult<VerificationCode> {
        let (pending_user_id, user_id) = match code.owner {
            CodeOwner::Pending(id) => (Some(id), None),
            CodeOwner::User(id) => (None, Some(id)),
        };
        let row = sqlx::query_as::<_, CodeRow>(
            r#"
            INSERT INTO verification_codes (pending_user_id, user_id, code, purpose,
                                            expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, pending_user_id, user_id, code, purpose, expires_at, created_at
            "#,
        )
        .bind(pending_user_id)
        .bind(user_id)
        .bind(code.code)
        .bind(code.purpose.as_str())
        .bind(code.expires_at)
        .bind(code.created_at)
        .fetch_one(&self.db)
        .await
        .map_err(map_db_err)?;
        row.try_into()
    }

    async fn find_code(
        &self,
        owner: CodeOwner,
        code: &str,
        purpose: CodePurpose,
    ) -> StoreResult<Option<VerificationCode>> {
        let (sql, owner_id) = match owner {
            CodeOwner::Pending(id) => (
                r#"
                SELECT id, pending_user_id, user_id, code, purpose, expires_at, created_at
                FROM verification_codes
                WHERE pending_user_id = $1 AND code = $2 AND purpose = $3
                ORDER BY expires_at DESC
                LIMIT 1
                "#,
                id,
            ),
            CodeOwner::User(id) => (
                r#"
                SELECT id, pending_user_id, user_id, code, purpose, expires_at, created_at
                FROM verification_codes
                WHERE user_id = $1 AND code = $2 AND purpose = $3
                ORDER BY expires_at DESC
                LIMIT 1
                "#,
                id,
            ),
        };
        let row = sqlx::query_as::<_, CodeRow>(sql)
            .bind(owner_id)
            .bind(code)
            .bind(purpose.as_str())
            .fetch_optional(&self.db)
            .await?;
        row.map(VerificationCode::try_from).transpose()
    }

    async fn delete_code(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM verification_codes WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn purge_expired_codes(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM verification_codes WHERE expires_at < $1")
            .bind(now)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected())
    }
}
