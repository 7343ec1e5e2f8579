use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::UpdateProfileRequest;
use crate::{
    auth::{
        claims::AuthContext,
        repo_types::{User, UserUpdate},
        validation,
    },
    error::{AuthError, AuthResult},
    state::AppState,
};

/// The only authorization rule: callers may change their own account and nothing else.
pub fn ensure_owner(ctx: &AuthContext, owner_id: Uuid) -> AuthResult<()> {
    if ctx.user_id != owner_id {
        warn!(caller = %ctx.user_id, owner = %owner_id, "ownership check failed");
        return Err(AuthError::Forbidden("You can only modify your own account".into()));
    }
    Ok(())
}

pub async fn load_user(st: &AppState, user_id: Uuid) -> AuthResult<User> {
    st.store
        .user_by_id(user_id)
        .await?
        .ok_or_else(|| AuthError::NotFound("User not found".into()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Applies a partial profile update. A new password needs the current one.
#[instrument(skip(st, ctx, req), fields(caller = %ctx.user_id))]
pub async fn update_profile(
    st: &AppState,
    ctx: &AuthContext,
    user_id: Uuid,
    req: UpdateProfileRequest,
) -> AuthResult<User> {
    ensure_owner(ctx, user_id)?;
    let user = load_user(st, user_id).await?;

    let mut update = UserUpdate {
        first_name: non_blank(req.first_name),
        last_name: non_blank(req.last_name),
        description: req.description.map(|d| d.trim().to_string()),
        ..Default::default()
    };

    if let Some(username) = non_blank(req.username).filter(|u| *u != user.username) {
        validation::check_username(&username)?;
        if st.store.user_by_username(&username).await?.is_some() {
            return Err(AuthError::Conflict("Username already taken".into()));
        }
        update.username = Some(username);
    }

    if let Some(new_password) = req.new_password.filter(|p| !p.is_empty()) {
        let current = req
            .current_password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AuthError::Validation("Current password is required".into()))?;
        let Some(digest) = user.password_hash.as_deref() else {
            return Err(AuthError::Unauthorized("Account uses social login".into()));
        };
        if !st.verifier.verify(&current, digest).await {
            warn!(user_id = %user.id, "password change with wrong current password");
            return Err(AuthError::Unauthorized("Current password is incorrect".into()));
        }
        validation::check_password(&new_password)?;
        update.password_hash = Some(st.verifier.hash(&new_password).await?);
    }

    let updated = st.store.update_user(user_id, update).await?;
    info!(user_id = %updated.id, username = %updated.username, "profile updated");
    Ok(updated)
}

/// Deletes the account. Accounts with a password must confirm it.
#[instrument(skip(st, ctx, password), fields(caller = %ctx.user_id))]
pub async fn delete_account(
    st: &AppState,
    ctx: &AuthContext,
    user_id: Uuid,
    password: Option<&str>,
) -> AuthResult<()> {
    ensure_owner(ctx, user_id)?;
    let user = load_user(st, user_id).await?;

    if let Some(digest) = user.password_hash.as_deref() {
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AuthError::Validation("Password is required to delete account".into()))?;
        if !st.verifier.verify(password, digest).await {
            warn!(user_id = %user.id, "account deletion with wrong password");
            return Err(AuthError::Unauthorized("Password is incorrect".into()));
        }
    }

    st.store.delete_user(user_id).await?;
    info!(user_id = %user_id, email = %user.email, "account deleted");
    Ok(())
}
