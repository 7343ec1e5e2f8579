//! Pending-registration lifecycle: signup request, then email-code confirmation.
//!
//! A pending record either gets promoted to a [`User`] by a matching live code,
//! or stops being confirmable once its code expires. Confirmation attempts are
//! throttled by [`limiter`]; the attempt is recorded before the code is checked.

use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    code::{self, CODE_TTL},
    jwt::TokenPair,
    limiter,
    repo_types::{CodeOwner, CodePurpose, NewPendingRegistration, NewUser, NewVerificationCode, User},
    validation,
};
use crate::{
    error::{AuthError, AuthResult},
    mail::{deliver, Effect, MailMessage},
    state::AppState,
};

/// Lost compare-and-set races tolerated before the attempt is refused.
const CAS_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct Signup {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

/// Validates the signup, stores a pending registration and mails its code.
///
/// Returns the pending id the client later confirms with. If the mail cannot be
/// sent the pending record stays behind and the error propagates.
#[instrument(skip(st, signup), fields(email = %signup.email))]
pub async fn begin_signup(st: &AppState, signup: Signup) -> AuthResult<Uuid> {
    let email = validation::normalize_email(&signup.email)?;
    validation::check_password(&signup.password)?;
    let username = signup.username.trim().to_string();
    validation::check_username(&username)?;
    let first_name = validation::required("First name", &signup.first_name)?;
    let last_name = validation::required("Last name", &signup.last_name)?;

    if st.store.user_by_email(&email).await?.is_some() {
        warn!(email = %email, "signup for registered email");
        return Err(AuthError::Conflict("Email already registered".into()));
    }
    if st.store.user_by_username(&username).await?.is_some() {
        return Err(AuthError::Conflict("Username already taken".into()));
    }

    let now = st.clock.now();
    supersede_stale_pending(st, &email, &username, now).await?;

    let password_hash = st.verifier.hash(&signup.password).await?;
    let pending = st
        .store
        .insert_pending(NewPendingRegistration {
            email: email.clone(),
            username,
            password_hash,
            first_name,
            last_name,
            created_at: now,
        })
        .await?;

    let code = code::generate_code();
    st.store
        .insert_code(NewVerificationCode {
            owner: CodeOwner::Pending(pending.id),
            code: code.clone(),
            purpose: CodePurpose::Signup,
            expires_at: now + CODE_TTL,
            created_at: now,
        })
        .await?;

    deliver(
        Effect::Required,
        "verification code",
        st.mailer.send(MailMessage::VerificationCode { to: email.clone(), code }),
    )
    .await?;

    info!(pending_id = %pending.id, email = %email, "signup pending");
    Ok(pending.id)
}

/// Pending records whose code has expired can no longer be confirmed; a new
/// signup for the same email or username replaces them. Live ones conflict.
async fn supersede_stale_pending(
    st: &AppState,
    email: &str,
    username: &str,
    now: OffsetDateTime,
) -> AuthResult<()> {
    let by_email = st.store.pending_by_email(email).await?;
    let by_username = st.store.pending_by_username(username).await?;
    for (pending, message) in [
        (by_email, "Email is awaiting verification"),
        (by_username, "Username already taken"),
    ] {
        let Some(pending) = pending else { continue };
        if now - pending.created_at < CODE_TTL {
            return Err(AuthError::Conflict(message.into()));
        }
        if st.store.delete_pending(pending.id).await? {
            debug!(pending_id = %pending.id, "stale pending registration superseded");
        }
    }
    Ok(())
}

/// Records an attempt, checks the code and promotes the pending record.
#[instrument(skip(st, code))]
pub async fn confirm_signup(
    st: &AppState,
    pending_id: Uuid,
    code: &str,
) -> AuthResult<(User, TokenPair)> {
    let mut recorded = None;
    for _ in 0..CAS_RETRIES {
        let pending = st
            .store
            .pending_by_id(pending_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("Pending registration not found".into()))?;
        let now = st.clock.now();
        let current = pending.attempts();
        if limiter::is_locked(current.count, current.last_at, now) {
            warn!(pending_id = %pending_id, attempts = current.count, "verification locked out");
            return Err(AuthError::RateLimited);
        }
        let next = limiter::next_attempt(current, now);
        if st.store.compare_and_set_attempts(pending_id, current, next).await? {
            recorded = Some((pending, now));
            break;
        }
        debug!(pending_id = %pending_id, "concurrent attempt, re-reading");
    }
    let Some((pending, now)) = recorded else {
        return Err(AuthError::RateLimited);
    };

    if !code::is_well_formed(code) {
        return Err(AuthError::InvalidCode);
    }
    let live = st
        .store
        .find_code(CodeOwner::Pending(pending_id), code, CodePurpose::Signup)
        .await?
        .filter(|c| c.is_live(now));
    if live.is_none() {
        debug!(pending_id = %pending_id, "wrong or expired signup code");
        return Err(AuthError::InvalidCode);
    }

    let user = st
        .store
        .promote_pending(pending_id, NewUser::from_pending(&pending, now))
        .await?;
    info!(user_id = %user.id, pending_id = %pending_id, email = %user.email, "signup confirmed");

    deliver(
        Effect::BestEffort,
        "welcome",
        st.mailer.send(MailMessage::Welcome {
            to: user.email.clone(),
            first_name: user.first_name.clone(),
        }),
    )
    .await?;

    let tokens = st.keys.issue(&user)?;
    Ok((user, tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::repo::IdentityStore, mail::MailKind, state::TestHarness};
    use time::Duration;

    fn signup(email: &str, username: &str) -> Signup {
        Signup {
            email: email.into(),
            password: "Secret123".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            username: username.into(),
        }
    }

    async fn pending(h: &TestHarness) -> (Uuid, String) {
        let id = begin_signup(&h.state, signup("a@x.com", "auser")).await.unwrap();
        let code = h.mailer.last_code("a@x.com").expect("code mailed");
        (id, code)
    }

    fn wrong(code: &str) -> String {
        let first = if code.starts_with('0') { '1' } else { '0' };
        format!("{first}{}", &code[1..])
    }

    #[tokio::test]
    async fn signup_then_confirm_creates_user() {
        let h = AppState::harness();
        let (id, code) = pending(&h).await;

        let (user, tokens) = confirm_signup(&h.state, id, &code).await.unwrap();
        assert_eq!(user.email, "a@x.com");
        assert_eq!(user.username, "auser");
        assert!(user.password_hash.is_some());
        assert_eq!(h.state.keys.verify_access(&tokens.access_token).unwrap().user_id, user.id);

        let sent = h.mailer.sent();
        assert!(sent.iter().any(|m| m.kind() == MailKind::Welcome));

        // pending record is gone
        let again = confirm_signup(&h.state, id, &code).await.unwrap_err();
        assert!(matches!(again, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn email_is_normalized_before_storage() {
        let h = AppState::harness();
        begin_signup(&h.state, signup("  A@X.COM ", "auser")).await.unwrap();
        assert!(h.store.pending_by_email("a@x.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_pending_id_is_not_found() {
        let h = AppState::harness();
        let err = confirm_signup(&h.state, Uuid::new_v4(), "123456").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let h = AppState::harness();
        let (id, code) = pending(&h).await;
        h.clock.advance(CODE_TTL + Duration::seconds(1));
        let err = confirm_signup(&h.state, id, &code).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
    }

    #[tokio::test]
    async fn three_failures_lock_out_until_window_passes() {
        let h = AppState::harness();
        let (id, code) = pending(&h).await;

        for _ in 0..3 {
            let err = confirm_signup(&h.state, id, &wrong(&code)).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCode));
            h.clock.advance(Duration::seconds(10));
        }
        let err = confirm_signup(&h.state, id, &code).await.unwrap_err();
        assert!(matches!(err, AuthError::RateLimited));
        let stored = h.store.pending_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.verification_attempts, 3);

        h.clock.advance(limiter::LOCKOUT_WINDOW);
        let (user, _) = confirm_signup(&h.state, id, &code).await.unwrap();
        assert_eq!(user.email, "a@x.com");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_wrong_codes_never_exceed_attempt_cap() {
        let h = AppState::harness();
        let (id, code) = pending(&h).await;
        let bad = wrong(&code);

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let st = h.state.clone();
                let bad = bad.clone();
                tokio::spawn(async move { confirm_signup(&st, id, &bad).await })
            })
            .collect();

        let (mut invalid, mut limited) = (0, 0);
        for task in tasks {
            match task.await.unwrap() {
                Err(AuthError::InvalidCode) => invalid += 1,
                Err(AuthError::RateLimited) => limited += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert!(invalid <= 3, "{invalid} attempts got past the limiter");
        assert_eq!(invalid + limited, 20);
        let stored = h.store.pending_by_id(id).await.unwrap().unwrap();
        assert!(stored.verification_attempts <= 3);
        assert_eq!(stored.verification_attempts, invalid);
    }

    #[tokio::test]
    async fn attempt_counter_resets_after_quiet_window() {
        let h = AppState::harness();
        let (id, code) = pending(&h).await;
        for _ in 0..2 {
            confirm_signup(&h.state, id, &wrong(&code)).await.unwrap_err();
        }
        h.clock.advance(limiter::LOCKOUT_WINDOW);
        confirm_signup(&h.state, id, &wrong(&code)).await.unwrap_err();
        let stored = h.store.pending_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.verification_attempts, 1);
    }

    #[tokio::test]
    async fn malformed_code_still_counts_as_attempt() {
        let h = AppState::harness();
        let (id, _) = pending(&h).await;
        let err = confirm_signup(&h.state, id, "12ab").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
        let stored = h.store.pending_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.verification_attempts, 1);
    }

    #[tokio::test]
    async fn duplicate_pending_email_conflicts() {
        let h = AppState::harness();
        begin_signup(&h.state, signup("a@x.com", "auser")).await.unwrap();
        let err = begin_signup(&h.state, signup("a@x.com", "buser")).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
        let err = begin_signup(&h.state, signup("b@x.com", "auser")).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[tokio::test]
    async fn registered_email_conflicts() {
        let h = AppState::harness();
        let (id, code) = pending(&h).await;
        confirm_signup(&h.state, id, &code).await.unwrap();
        let err = begin_signup(&h.state, signup("a@x.com", "other")).await.unwrap_err();
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[tokio::test]
    async fn expired_pending_is_superseded() {
        let h = AppState::harness();
        let (old, _) = pending(&h).await;
        h.clock.advance(CODE_TTL + Duration::minutes(1));
        let new = begin_signup(&h.state, signup("a@x.com", "auser")).await.unwrap();
        assert_ne!(old, new);
        assert!(h.store.pending_by_id(old).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verification_mail_failure_aborts_signup() {
        let h = AppState::harness();
        h.mailer.fail_on(MailKind::VerificationCode);
        let err = begin_signup(&h.state, signup("a@x.com", "auser")).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_failure");
        // the pending record is not rolled back
        assert!(h.store.pending_by_email("a@x.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn welcome_mail_failure_is_swallowed() {
        let h = AppState::harness();
        h.mailer.fail_on(MailKind::Welcome);
        let (id, code) = pending(&h).await;
        assert!(confirm_signup(&h.state, id, &code).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let h = AppState::harness();
        let mut bad = signup("a@x.com", "auser");
        bad.password = "short".into();
        assert!(matches!(begin_signup(&h.state, bad).await, Err(AuthError::Validation(_))));
        let bad = signup("not-an-email", "auser");
        assert!(matches!(begin_signup(&h.state, bad).await, Err(AuthError::Validation(_))));
        let mut bad = signup("a@x.com", "auser");
        bad.first_name = " ".into();
        assert!(matches!(begin_signup(&h.state, bad).await, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn confirmed_user_can_log_in() {
        let h = AppState::harness();
        let (id, code) = pending(&h).await;
        confirm_signup(&h.state, id, &code).await.unwrap();
        let out = crate::auth::session::login(&h.state, "a@x.com", "Secret123").await.unwrap();
        assert_eq!(out.user.email, "a@x.com");
    }
}
