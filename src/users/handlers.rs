use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{DeleteAccountRequest, PublicProfile, UpdateProfileRequest, UserProfile},
    services,
};
use crate::{
    auth::{
        dto::MessageResponse,
        extractors::{AuthUser, JsonBody},
        handlers::REFRESH_COOKIE,
    },
    error::{AuthError, AuthResult},
    state::AppState,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/me",
            get(get_profile).put(update_profile).delete(delete_account),
        )
        .route("/users/:id", get(get_public_profile))
}

#[instrument(skip(st, ctx))]
pub async fn get_profile(
    State(st): State<AppState>,
    AuthUser(ctx): AuthUser,
) -> AuthResult<Json<UserProfile>> {
    let user = services::load_user(&st, ctx.user_id).await?;
    Ok(Json(UserProfile::from(&user)))
}

#[instrument(skip(st, ctx, payload))]
pub async fn update_profile(
    State(st): State<AppState>,
    AuthUser(ctx): AuthUser,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> AuthResult<Json<UserProfile>> {
    let user = services::update_profile(&st, &ctx, ctx.user_id, payload).await?;
    Ok(Json(UserProfile::from(&user)))
}

/// Body is optional: federated-only accounts have no password to confirm.
#[instrument(skip(st, ctx, jar, body))]
pub async fn delete_account(
    State(st): State<AppState>,
    AuthUser(ctx): AuthUser,
    jar: CookieJar,
    body: Bytes,
) -> AuthResult<(CookieJar, Json<MessageResponse>)> {
    let req = if body.is_empty() {
        DeleteAccountRequest::default()
    } else {
        serde_json::from_slice::<DeleteAccountRequest>(&body)
            .map_err(|e| AuthError::Validation(format!("Invalid request body: {e}")))?
    };
    services::delete_account(&st, &ctx, ctx.user_id, req.password.as_deref()).await?;
    let jar = jar.remove(Cookie::build(REFRESH_COOKIE).path("/"));
    Ok((jar, Json(MessageResponse { message: "Account deleted successfully" })))
}

#[instrument(skip(st, _ctx))]
pub async fn get_public_profile(
    State(st): State<AppState>,
    AuthUser(_ctx): AuthUser,
    Path(id): Path<String>,
) -> AuthResult<Json<PublicProfile>> {
    let id = Uuid::parse_str(id.trim()).map_err(|_| AuthError::NotFound("User not found".into()))?;
    let user = services::load_user(&st, id).await?;
    Ok(Json(PublicProfile::from(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::build_app,
        auth::{repo::IdentityStore, repo_types::NewUser},
        state::TestHarness,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, Response, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn body_json(res: Response<Body>) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Inserts a local account and returns its id and an access token.
    async fn signed_in(h: &TestHarness, email: &str, username: &str) -> (Uuid, String) {
        let now = h.state.clock.now();
        let user = h
            .store
            .insert_user(NewUser {
                google_id: None,
                linkedin_id: None,
                password_hash: Some(h.state.verifier.hash("Secret123").await.unwrap()),
                first_name: "A".into(),
                last_name: "B".into(),
                email: email.into(),
                username: username.into(),
                profile_image_url: None,
                created_at: now,
                last_login: Some(now),
            })
            .await
            .unwrap();
        let pair = h.state.keys.issue(&user).unwrap();
        (user.id, pair.access_token)
    }

    fn authed(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::COOKIE, "refreshToken=abc");
        match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[tokio::test]
    async fn profile_requires_a_token() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::builder().uri("/users/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn get_and_update_own_profile() {
        let h = AppState::harness();
        let (_, token) = signed_in(&h, "a@x.com", "auser").await;
        let app = build_app(h.state.clone());

        let res = app.clone().oneshot(authed("GET", "/users/me", &token, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["email"], "a@x.com");
        assert!(body["createdAt"].as_str().is_some());

        let res = app
            .clone()
            .oneshot(authed(
                "PUT",
                "/users/me",
                &token,
                Some(json!({ "username": "renamed", "description": "bio" })),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["username"], "renamed");
        assert_eq!(body["description"], "bio");
    }

    #[tokio::test]
    async fn update_to_taken_username_conflicts() {
        let h = AppState::harness();
        let (_, token) = signed_in(&h, "a@x.com", "auser").await;
        signed_in(&h, "b@x.com", "buser").await;
        let app = build_app(h.state.clone());

        let res = app
            .oneshot(authed("PUT", "/users/me", &token, Some(json!({ "username": "buser" }))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(res).await["error"], "conflict");
    }

    #[tokio::test]
    async fn public_profile_lookup() {
        let h = AppState::harness();
        let (_, token) = signed_in(&h, "a@x.com", "auser").await;
        let (other, _) = signed_in(&h, "b@x.com", "buser").await;
        let app = build_app(h.state.clone());

        let res = app
            .clone()
            .oneshot(authed("GET", &format!("/users/{other}"), &token, None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["username"], "buser");
        assert!(body.get("email").is_none());

        let res = app
            .clone()
            .oneshot(authed("GET", &format!("/users/{}", Uuid::new_v4()), &token, None))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app.oneshot(authed("GET", "/users/not-a-uuid", &token, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_account_clears_refresh_cookie() {
        let h = AppState::harness();
        let (id, token) = signed_in(&h, "a@x.com", "auser").await;
        let app = build_app(h.state.clone());

        let res = app.clone().oneshot(authed("DELETE", "/users/me", &token, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(authed("DELETE", "/users/me", &token, Some(json!({ "password": "Secret123" }))))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let cleared = res
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("refreshToken="))
            .map(str::to_string)
            .unwrap();
        assert!(cleared.contains("Max-Age=0"));
        assert!(h.store.user_by_id(id).await.unwrap().is_none());

        // the access token outlives the account but now resolves to nothing
        let res = app.oneshot(authed("GET", "/users/me", &token, None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
