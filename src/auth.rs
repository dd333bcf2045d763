use actix_web::{dev::Payload, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Session token claims as issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self { subject: subject.into(), display_name: None, email: None, avatar_url: None, is_admin: false }
    }

    pub fn admin(subject: impl Into<String>) -> Self {
        Self { is_admin: true, ..Self::new(subject) }
    }
}

impl From<Claims> for Identity {
    fn from(c: Claims) -> Self {
        Self {
            subject: c.sub,
            display_name: c.name,
            email: c.email,
            avatar_url: c.picture,
            is_admin: c.role == Some(Role::Admin),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("neither JWT_PUBLIC_KEY_PEM nor JWT_SECRET is set")]
    NotConfigured,
    #[error("invalid token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

// RS256 when the provider's public key is configured, HS256 otherwise.
fn decoding_key() -> Result<(DecodingKey, Algorithm), AuthError> {
    if let Ok(pem) = env::var("JWT_PUBLIC_KEY_PEM") {
        return Ok((DecodingKey::from_rsa_pem(pem.as_bytes())?, Algorithm::RS256));
    }
    let secret = env::var("JWT_SECRET").map_err(|_| AuthError::NotConfigured)?;
    Ok((DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256))
}

/// Validate a JWT and return its claims.
pub fn decode_jwt(token: &str) -> Result<Claims, AuthError> {
    let (key, algorithm) = decoding_key()?;
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    Ok(decode::<Claims>(token, &key, &validation)?.claims)
}

/// Mint an HS256 token for `identity` (tests and local development).
pub fn create_jwt(identity: &Identity, ttl: chrono::Duration) -> Result<String, AuthError> {
    let secret = env::var("JWT_SECRET").map_err(|_| AuthError::NotConfigured)?;
    let exp = (chrono::Utc::now() + ttl).timestamp().max(0) as usize;
    let claims = Claims {
        sub: identity.subject.clone(),
        exp,
        name: identity.display_name.clone(),
        email: identity.email.clone(),
        picture: identity.avatar_url.clone(),
        role: Some(if identity.is_admin { Role::Admin } else { Role::User }),
    };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
}

/// Extractor yielding the caller's [`Identity`]. Wrap in `Option` for
/// endpoints where signing in is optional.
pub struct Auth(pub Identity);

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() else {
            return ready(Err(ApiError::Unauthenticated));
        };
        ready(decode_jwt(bearer.token()).map(|claims| Auth(claims.into())).map_err(ApiError::from))
    }
}
