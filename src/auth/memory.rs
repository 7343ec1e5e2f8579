//! In-process identity store.
//!
//! Enforces the same uniqueness rules as the Postgres schema. All state sits
//! behind one lock so promotion and the attempt compare-and-set are atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    limiter::AttemptState,
    oauth::AuthMethod,
    repo::{IdentityStore, StoreError, StoreResult},
    repo_types::{
        CodeOwner, CodePurpose, NewPendingRegistration, NewUser, NewVerificationCode,
        PendingRegistration, User, UserUpdate, VerificationCode,
    },
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    pending: HashMap<Uuid, PendingRegistration>,
    codes: HashMap<Uuid, VerificationCode>,
}

impl Tables {
    fn check_user_unique(&self, user: &NewUser) -> StoreResult<()> {
        for existing in self.users.values() {
            if existing.email == user.email {
                return Err(StoreError::Conflict("email".into()));
            }
            if existing.username == user.username {
                return Err(StoreError::Conflict("username".into()));
            }
            if user.google_id.is_some() && existing.google_id == user.google_id {
                return Err(StoreError::Conflict("google_id".into()));
            }
            if user.linkedin_id.is_some() && existing.linkedin_id == user.linkedin_id {
                return Err(StoreError::Conflict("linkedin_id".into()));
            }
        }
        Ok(())
    }

    fn insert_user(&mut self, user: NewUser) -> StoreResult<User> {
        if !user.has_authenticator() {
            return Err(StoreError::Constraint("user has no way to authenticate".into()));
        }
        self.check_user_unique(&user)?;
        let created = User {
            id: Uuid::new_v4(),
            google_id: user.google_id,
            linkedin_id: user.linkedin_id,
            password_hash: user.password_hash,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            username: user.username,
            profile_image_url: user.profile_image_url,
            description: None,
            created_at: user.created_at,
            last_login: user.last_login,
        };
        self.users.insert(created.id, created.clone());
        Ok(created)
    }

    fn remove_pending(&mut self, id: Uuid) -> bool {
        let removed = self.pending.remove(&id).is_some();
        if removed {
            self.codes.retain(|_, c| c.owner != CodeOwner::Pending(id));
        }
        removed
    }
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    tables: RwLock<Tables>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn user_by_subject(
        &self,
        method: AuthMethod,
        subject: &str,
    ) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.subject(method) == Some(subject))
            .cloned())
    }

    async fn insert_user(&self, user: NewUser) -> StoreResult<User> {
        self.tables.write().await.insert_user(user)
    }

    async fn link_subject(
        &self,
        user_id: Uuid,
        method: AuthMethod,
        subject: &str,
    ) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let taken = tables
            .users
            .values()
            .any(|u| u.id != user_id && u.subject(method) == Some(subject));
        if taken {
            return Err(StoreError::Conflict(format!("{}_id", method.as_str())));
        }
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        match method {
            AuthMethod::Google => user.google_id = Some(subject.to_string()),
            AuthMethod::LinkedIn => user.linkedin_id = Some(subject.to_string()),
            AuthMethod::Local => {
                return Err(StoreError::Constraint("local login has no subject".into()))
            }
        }
        Ok(user.clone())
    }

    async fn touch_last_login(&self, user_id: Uuid, at: OffsetDateTime) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.last_login = Some(at);
        Ok(())
    }

    async fn set_password(&self, user_id: Uuid, password_hash: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.password_hash = Some(password_hash.to_string());
        Ok(())
    }

    async fn update_user(&self, user_id: Uuid, update: UserUpdate) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if let Some(username) = update.username.as_deref() {
            let taken = tables
                .users
                .values()
                .any(|u| u.id != user_id && u.username == username);
            if taken {
                return Err(StoreError::Conflict("username".into()));
            }
        }
        let user = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        if let Some(v) = update.first_name {
            user.first_name = v;
        }
        if let Some(v) = update.last_name {
            user.last_name = v;
        }
        if let Some(v) = update.username {
            user.username = v;
        }
        if let Some(v) = update.description {
            user.description = Some(v);
        }
        if let Some(v) = update.password_hash {
            user.password_hash = Some(v);
        }
        Ok(user.clone())
    }

    async fn delete_user(&self, user_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(&user_id).is_none() {
            return Err(StoreError::NotFound);
        }
        tables.codes.retain(|_, c| c.owner != CodeOwner::User(user_id));
        Ok(())
    }

    async fn insert_pending(
        &self,
        pending: NewPendingRegistration,
    ) -> StoreResult<PendingRegistration> {
        let mut tables = self.tables.write().await;
        for existing in tables.pending.values() {
            if existing.email == pending.email {
                return Err(StoreError::Conflict("email".into()));
            }
            if existing.username == pending.username {
                return Err(StoreError::Conflict("username".into()));
            }
        }
        let created = PendingRegistration {
            id: Uuid::new_v4(),
            email: pending.email,
            username: pending.username,
            password_hash: pending.password_hash,
            first_name: pending.first_name,
            last_name: pending.last_name,
            verification_attempts: 0,
            last_attempt_at: None,
            created_at: pending.created_at,
        };
        tables.pending.insert(created.id, created.clone());
        Ok(created)
    }

    async fn pending_by_id(&self, id: Uuid) -> StoreResult<Option<PendingRegistration>> {
        Ok(self.tables.read().await.pending.get(&id).cloned())
    }

    async fn pending_by_email(&self, email: &str) -> StoreResult<Option<PendingRegistration>> {
        let tables = self.tables.read().await;
        Ok(tables.pending.values().find(|p| p.email == email).cloned())
    }

    async fn pending_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<PendingRegistration>> {
        let tables = self.tables.read().await;
        Ok(tables.pending.values().find(|p| p.username == username).cloned())
    }

    async fn compare_and_set_attempts(
        &self,
        id: Uuid,
        expected: AttemptState,
        next: AttemptState,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(pending) = tables.pending.get_mut(&id) else {
            return Ok(false);
        };
        if pending.attempts() != expected {
            return Ok(false);
        }
        pending.verification_attempts = next.count;
        pending.last_attempt_at = next.last_at;
        Ok(true)
    }

    async fn delete_pending(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.write().await.remove_pending(id))
    }

    async fn promote_pending(&self, pending_id: Uuid, user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if !tables.pending.contains_key(&pending_id) {
            return Err(StoreError::NotFound);
        }
        let created = tables.insert_user(user)?;
        tables.remove_pending(pending_id);
        Ok(created)
    }

    async fn insert_code(&self, code: NewVerificationCode) -> StoreResult<VerificationCode> {
        let mut tables = self.tables.write().await;
        let owner_exists = match code.owner {
            CodeOwner::Pending(id) => tables.pending.contains_key(&id),
            CodeOwner::User(id) => tables.users.contains_key(&id),
        };
        if !owner_exists {
            return Err(StoreError::Constraint("code owner does not exist".into()));
        }
        let created = VerificationCode {
            id: Uuid::new_v4(),
            owner: code.owner,
            code: code.code,
            purpose: code.purpose,
            expires_at: code.expires_at,
            created_at: code.created_at,
        };
        tables.codes.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_code(
        &self,
        owner: CodeOwner,
        code: &str,
        purpose: CodePurpose,
    ) -> StoreResult<Option<VerificationCode>> {
        let tables = self.tables.read().await;
        Ok(tables
            .codes
            .values()
            .filter(|c| c.owner == owner && c.code == code && c.purpose == purpose)
            .max_by_key(|c| c.expires_at)
            .cloned())
    }

    async fn delete_code(&self, id: Uuid) -> StoreResult<()> {
        self.tables.write().await.codes.remove(&id);
        Ok(())
    }

    async fn purge_expired_codes(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.codes.len();
        tables.codes.retain(|_, c| c.is_live(now));
        Ok((before - tables.codes.len()) as u64)
    }
}
