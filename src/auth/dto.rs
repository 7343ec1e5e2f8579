use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{registration::Signup, repo_types::User};
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

impl From<SignupRequest> for Signup {
    fn from(r: SignupRequest) -> Self {
        Signup {
            email: r.email,
            password: r.password,
            first_name: r.first_name,
            last_name: r.last_name,
            username: r.username,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub pending_user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub pending_user_id: String,
    pub code: String,
}

impl VerifyRequest {
    /// An id that does not parse cannot name a pending record.
    pub fn pending_id(&self) -> AuthResult<Uuid> {
        Uuid::parse_str(self.pending_user_id.trim())
            .map_err(|_| AuthError::NotFound("Pending registration not found".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub profile_image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            profile_image_url: u.profile_image_url.clone(),
            last_login: u.last_login,
        }
    }
}

/// Returned by verify, login and refresh. The refresh token travels in a cookie.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Query string of a provider redirect back to us.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_request_uses_camel_case() {
        let req: SignupRequest = serde_json::from_str(
            r#"{"email":"a@x.com","password":"Secret123","firstName":"A","lastName":"B","username":"auser"}"#,
        )
        .unwrap();
        assert_eq!(req.first_name, "A");
        assert_eq!(req.last_name, "B");
    }

    #[test]
    fn malformed_pending_id_is_not_found() {
        let req = VerifyRequest { pending_user_id: "nope".into(), code: "123456".into() };
        assert!(matches!(req.pending_id(), Err(AuthError::NotFound(_))));
    }

    #[test]
    fn auth_response_serialization() {
        let response = AuthResponse {
            access_token: "tok".into(),
            user: UserSummary {
                id: Uuid::new_v4(),
                email: "test@example.com".into(),
                username: "tester".into(),
                first_name: "T".into(),
                last_name: "E".into(),
                profile_image_url: None,
                last_login: None,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["accessToken"], "tok");
        assert_eq!(json["user"]["email"], "test@example.com");
        assert_eq!(json["user"]["firstName"], "T");
        assert!(json.get("refreshToken").is_none());
    }
}
