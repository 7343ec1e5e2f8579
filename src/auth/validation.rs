use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{AuthError, AuthResult};

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Trimmed, lower-cased email, or a validation error.
pub fn normalize_email(raw: &str) -> AuthResult<String> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AuthError::Validation("Invalid email".into()));
    }
    Ok(email)
}

pub fn check_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn check_username(username: &str) -> AuthResult<()> {
    if !USERNAME_RE.is_match(username) {
        return Err(AuthError::Validation(
            "Username must be 3-32 letters, digits, '_', '.' or '-'".into(),
        ));
    }
    Ok(())
}

/// Non-empty after trimming; returns the trimmed value.
pub fn required(field: &str, value: &str) -> AuthResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AuthError::Validation(format!("{field} is required")));
    }
    Ok(v.to_string())
}
