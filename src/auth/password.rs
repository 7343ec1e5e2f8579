use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::{AuthError, AuthResult};

/// Salted one-way password hashing (Argon2id).
#[derive(Clone)]
pub struct CredentialVerifier {
    argon2: Argon2<'static>,
}

impl Default for CredentialVerifier {
    fn default() -> Self {
        Self::with_params(Params::default())
    }
}

impl CredentialVerifier {
    pub fn with_params(params: Params) -> Self {
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    /// Hashes off the async executor; the work factor is deliberately slow.
    pub async fn hash(&self, plain: &str) -> AuthResult<String> {
        let argon2 = self.argon2.clone();
        let plain = plain.to_owned();
        tokio::task::spawn_blocking(move || hash_password(&argon2, &plain))
            .await
            .map_err(|e| AuthError::Upstream(format!("hash task failed: {e}")))?
    }

    pub async fn verify(&self, plain: &str, digest: &str) -> bool {
        let argon2 = self.argon2.clone();
        let plain = plain.to_owned();
        let digest = digest.to_owned();
        tokio::task::spawn_blocking(move || verify_password(&argon2, &plain, &digest))
            .await
            .unwrap_or(false)
    }
}

fn hash_password(argon2: &Argon2<'_>, plain: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            AuthError::Upstream(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Parameters stored in the digest take precedence over `argon2`'s own.
fn verify_password(argon2: &Argon2<'_>, plain: &str, digest: &str) -> bool {
    let parsed = match PasswordHash::new(digest) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "argon2 parse hash error");
            return false;
        }
    };
    argon2.verify_password(plain.as_bytes(), &parsed).is_ok()
}

#[cfg(test)]
pub(crate) fn cheap_verifier() -> CredentialVerifier {
    CredentialVerifier::with_params(Params::new(8, 1, 1, None).expect("valid argon2 params"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify_roundtrip() {
        let verifier = cheap_verifier();
        let password = "Secur3P@ssw0rd!";
        let hash = verifier.hash(password).await.expect("hashing should succeed");
        assert!(verifier.verify(password, &hash).await);
    }

    #[tokio::test]
    async fn verify_rejects_wrong_password() {
        let verifier = cheap_verifier();
        let hash = verifier
            .hash("correct-horse-battery-staple")
            .await
            .expect("hashing should succeed");
        assert!(!verifier.verify("wrong-password", &hash).await);
    }

    #[tokio::test]
    async fn verify_is_false_on_malformed_hash() {
        assert!(!cheap_verifier().verify("anything", "not-a-valid-hash").await);
    }

    #[tokio::test]
    async fn hashes_are_salted() {
        let verifier = cheap_verifier();
        let a = verifier.hash("same").await.unwrap();
        let b = verifier.hash("same").await.unwrap();
        assert_ne!(a, b);
        assert!(!a.contains("same"));
    }
}
