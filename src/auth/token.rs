use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::User;
use crate::error::{unexpected_error, Error};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub roles: Vec<String>,
    pub exp: i64,
    pub iat: i64,
}

/// Verifies bearer credentials issued by the identity service.
#[derive(Clone)]
pub struct TokenVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user: &User, ttl: Duration) -> Result<String, Error> {
        let now = Utc::now();

        let claims = Claims {
            sub: user.id,
            roles: user.roles.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(|err| {
            tracing::error!(error = %err, "failed to sign credential");
            unexpected_error()
        })
    }

    pub fn verify(&self, token: &str) -> Result<User, Error> {
        let token_data = decode::<Claims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(User::new(token_data.claims.sub, token_data.claims.roles))
    }
}

#[test]
fn issued_tokens_verify() {
    let verifier = TokenVerifier::new("test_secret_key");
    let driver = User::new_driver(Uuid::new_v4());

    let token = verifier.issue(&driver, Duration::hours(1)).unwrap();

    assert_eq!(verifier.verify(&token).unwrap(), driver);
}

#[test]
fn wrong_secret_or_garbage_is_unauthorized() {
    let issuer = TokenVerifier::new("secret1");
    let verifier = TokenVerifier::new("secret2");

    let token = issuer
        .issue(&User::new_rider(Uuid::new_v4()), Duration::hours(1))
        .unwrap();

    assert_eq!(verifier.verify(&token).unwrap_err().code, crate::error::UNAUTHORIZED);
    assert!(verifier.verify("invalid_token").unwrap_err().is_auth_error());
}

#[test]
fn expired_tokens_are_rejected() {
    let verifier = TokenVerifier::new("test_secret_key");

    let token = verifier
        .issue(&User::new_rider(Uuid::new_v4()), Duration::hours(-2))
        .unwrap();

    assert!(verifier.verify(&token).unwrap_err().is_auth_error());
}
