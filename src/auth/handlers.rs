use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, CallbackParams, LoginRequest, MessageResponse, ResetPasswordRequest,
            ResetRequest, SignupRequest, SignupResponse, UserSummary, VerifyRequest,
        },
        extractors::{AuthUser, JsonBody},
        oauth::{AuthMethod, ProviderClient},
        registration,
        session::{self, AuthOutcome, CredentialDirective, Credentials},
    },
    error::{AuthError, AuthResult},
    state::AppState,
};

pub const REFRESH_COOKIE: &str = "refreshToken";
const STATE_COOKIE: &str = "oauth_state";
/// How long a provider round trip may take before the state cookie lapses.
const OAUTH_STATE_TTL: time::Duration = time::Duration::minutes(10);

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/verify", post(verify))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/password/request-reset", post(request_reset))
        .route("/auth/password/reset", post(reset_password))
}

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google/login", get(google_login))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/linkedin/login", get(linkedin_login))
        .route("/auth/linkedin/callback", get(linkedin_callback))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

fn refresh_cookie(st: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .http_only(true)
        .secure(st.config.production)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::minutes(st.config.jwt.refresh_ttl_minutes))
        .build()
}

/// Response body plus the rotated refresh cookie.
fn issue_session(
    st: &AppState,
    jar: CookieJar,
    outcome: AuthOutcome,
) -> (CookieJar, Json<AuthResponse>) {
    let body = AuthResponse {
        access_token: outcome.tokens.access_token,
        user: UserSummary::from(&outcome.user),
    };
    (jar.add(refresh_cookie(st, outcome.tokens.refresh_token)), Json(body))
}

#[instrument(skip(st, payload))]
pub async fn signup(
    State(st): State<AppState>,
    JsonBody(payload): JsonBody<SignupRequest>,
) -> AuthResult<(StatusCode, Json<SignupResponse>)> {
    let pending_user_id = registration::begin_signup(&st, payload.into()).await?;
    Ok((StatusCode::CREATED, Json(SignupResponse { pending_user_id })))
}

#[instrument(skip(st, jar, payload))]
pub async fn verify(
    State(st): State<AppState>,
    jar: CookieJar,
    JsonBody(payload): JsonBody<VerifyRequest>,
) -> AuthResult<(CookieJar, Json<AuthResponse>)> {
    let pending_id = payload.pending_id()?;
    let (user, tokens) = registration::confirm_signup(&st, pending_id, payload.code.trim()).await?;
    Ok(issue_session(&st, jar, AuthOutcome { user, tokens }))
}

#[instrument(skip(st, jar, payload))]
pub async fn login(
    State(st): State<AppState>,
    jar: CookieJar,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AuthResult<(CookieJar, Json<AuthResponse>)> {
    let outcome = session::login(&st, &payload.email, &payload.password).await?;
    Ok(issue_session(&st, jar, outcome))
}

#[instrument(skip(st, jar))]
pub async fn refresh(
    State(st): State<AppState>,
    jar: CookieJar,
) -> AuthResult<(CookieJar, Json<AuthResponse>)> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AuthError::Unauthorized("Refresh token missing".into()))?;
    let outcome = session::refresh(&st, &token).await?;
    Ok(issue_session(&st, jar, outcome))
}

pub async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    let jar = match session::logout() {
        CredentialDirective::Discard => jar.remove(Cookie::build(REFRESH_COOKIE).path("/")),
    };
    (jar, Json(MessageResponse { message: "Logged out" }))
}

#[instrument(skip(st, payload))]
pub async fn request_reset(
    State(st): State<AppState>,
    JsonBody(payload): JsonBody<ResetRequest>,
) -> AuthResult<Json<MessageResponse>> {
    session::request_password_reset(&st, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: "If that email is registered, a reset code has been sent",
    }))
}

#[instrument(skip(st, payload))]
pub async fn reset_password(
    State(st): State<AppState>,
    JsonBody(payload): JsonBody<ResetPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    session::reset_password(&st, &payload.email, payload.code.trim(), &payload.new_password)
        .await?;
    Ok(Json(MessageResponse { message: "Password reset successfully" }))
}

#[instrument(skip(st, ctx))]
pub async fn get_me(
    State(st): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> AuthResult<Json<UserSummary>> {
    let user = st
        .store
        .user_by_id(ctx.user_id)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %ctx.user_id, email = %ctx.email, "token for missing user");
            AuthError::NotFound("User not found".into())
        })?;
    Ok(Json(UserSummary::from(&user)))
}

async fn google_login(State(st): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    provider_login(&st, jar, AuthMethod::Google)
}

async fn google_callback(
    State(st): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, Redirect) {
    provider_callback(&st, jar, params, AuthMethod::Google).await
}

async fn linkedin_login(State(st): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    provider_login(&st, jar, AuthMethod::LinkedIn)
}

async fn linkedin_callback(
    State(st): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, Redirect) {
    provider_callback(&st, jar, params, AuthMethod::LinkedIn).await
}

fn failure_redirect(st: &AppState) -> Redirect {
    Redirect::to(&format!("{}/login?error=auth_failed", st.config.frontend_url))
}

fn provider_login(st: &AppState, jar: CookieJar, method: AuthMethod) -> (CookieJar, Redirect) {
    let Some(client) = ProviderClient::for_method(&st.config, method) else {
        warn!(provider = method.as_str(), "provider not configured");
        return (jar, failure_redirect(st));
    };
    let state: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    match client.authorize_url(&state) {
        Ok(url) => {
            let cookie = Cookie::build((STATE_COOKIE, state))
                .http_only(true)
                .secure(st.config.production)
                .same_site(SameSite::Lax)
                .path("/auth")
                .max_age(OAUTH_STATE_TTL)
                .build();
            (jar.add(cookie), Redirect::to(&url))
        }
        Err(e) => {
            warn!(error = %e, provider = method.as_str(), "authorize url");
            (jar, failure_redirect(st))
        }
    }
}

async fn provider_callback(
    st: &AppState,
    jar: CookieJar,
    params: CallbackParams,
    method: AuthMethod,
) -> (CookieJar, Redirect) {
    let expected = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build(STATE_COOKIE).path("/auth"));
    match federated_login(st, method, expected, params).await {
        Ok(outcome) => {
            info!(user_id = %outcome.user.id, provider = method.as_str(), "federated login");
            let target = format!(
                "{}/auth-callback?token={}",
                st.config.frontend_url, outcome.tokens.access_token
            );
            let jar = jar.add(refresh_cookie(st, outcome.tokens.refresh_token));
            (jar, Redirect::to(&target))
        }
        Err(e) => {
            warn!(error = %e, provider = method.as_str(), "federated login failed");
            (jar, failure_redirect(st))
        }
    }
}

async fn federated_login(
    st: &AppState,
    method: AuthMethod,
    expected_state: Option<String>,
    params: CallbackParams,
) -> AuthResult<AuthOutcome> {
    let client = ProviderClient::for_method(&st.config, method)
        .ok_or_else(|| AuthError::Unauthorized(format!("{} is not configured", method.as_str())))?;
    if let Some(err) = params.error {
        return Err(AuthError::Unauthorized(format!("provider returned {err}")));
    }
    match (expected_state, params.state) {
        (Some(expected), Some(got)) if expected == got => {}
        _ => return Err(AuthError::Unauthorized("OAuth state mismatch".into())),
    }
    let code = params
        .code
        .ok_or_else(|| AuthError::Unauthorized("missing authorization code".into()))?;
    let assertion = client.exchange(&st.http, &code).await?;
    session::authenticate(st, Credentials::Federated(assertion)).await
}
