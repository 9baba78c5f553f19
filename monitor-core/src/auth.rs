use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Password hashing and bearer token handling.
#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration: i64,
}

impl AuthService {
    /// `expiration` is the token lifetime in seconds.
    pub fn new(secret: impl AsRef<[u8]>, expiration: i64) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            expiration,
        }
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
            .map_err(|err| Error::password_hash(err.to_string()))?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| Error::password_hash(err.to_string()))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|err| Error::password_hash(err.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    pub fn issue_token(&self, username: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: username.to_string(),
            iat: now,
            exp: now + self.expiration,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| Error::auth(format!("invalid token: {err}")))
    }
}

impl fmt::Debug for AuthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new("test-secret", 3600)
    }

    #[test]
    fn password_round_trip() {
        let auth = service();
        let hash = auth.hash_password("hunter2").unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(auth.verify_password("hunter2", &hash).unwrap());
        assert!(!auth.verify_password("hunter3", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let auth = service();
        assert_ne!(
            auth.hash_password("same").unwrap(),
            auth.hash_password("same").unwrap()
        );
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(matches!(
            service().verify_password("x", "not-a-hash"),
            Err(Error::PasswordHash(_))
        ));
    }

    #[test]
    fn token_round_trip() {
        let auth = service();
        let token = auth.issue_token("alice").unwrap();

        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn foreign_and_expired_tokens_are_rejected() {
        let token = AuthService::new("other-secret", 3600)
            .issue_token("alice")
            .unwrap();
        assert!(matches!(service().verify_token(&token), Err(Error::Auth(_))));

        let expired = AuthService::new("test-secret", -3600)
            .issue_token("alice")
            .unwrap();
        assert!(matches!(service().verify_token(&expired), Err(Error::Auth(_))));

        assert!(service().verify_token("garbage").is_err());
    }
}
