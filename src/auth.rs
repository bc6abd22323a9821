use std::collections::HashMap;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{config::AppConfig, error::AppError};

/// Name of the cookie carrying the session credential.
pub const SESSION_COOKIE: &str = "token";

/// Claims
///
/// The payload signed into every session credential. Only `sub` is consumed
/// downstream; `iat` is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the opaque user id the credential was issued to.
    pub sub: String,
    /// Expiration Time (exp): unix seconds after which the credential is rejected.
    pub exp: u64,
    /// Issued At (iat): unix seconds when the credential was signed.
    pub iat: u64,
}

/// CredentialError
///
/// Why a presented credential was refused. Collapsed into
/// `AppError::Unauthenticated` at the gate; the detail only reaches the logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Bad signature, malformed token structure, or elapsed/missing `exp`.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    /// Signature checked out but the claims do not carry a usable subject.
    #[error("malformed claims: {0}")]
    MalformedClaims(&'static str),
}

/// CredentialService
///
/// Issues and verifies HS256-signed session credentials. Holds the process-wide
/// signing key; cheap to clone and shared through `AppState`.
#[derive(Clone)]
pub struct CredentialService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl CredentialService {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl_secs)
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// issue
    ///
    /// Signs `{sub, iat: now, exp: now + ttl}` for the given subject.
    pub fn issue(&self, subject_id: &str) -> Result<String, AppError> {
        let now = Utc::now().timestamp().max(0) as u64;
        let claims = Claims {
            sub: subject_id.to_string(),
            iat: now,
            exp: now + self.ttl_secs,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("credential signing failed: {}", e)))
    }

    /// verify
    ///
    /// Validates signature, structure and expiry before reading a single claim.
    /// The claims are decoded as an opaque map so that a missing or non-string
    /// `sub` is reported as `MalformedClaims` rather than a decoding failure.
    pub fn verify(&self, credential: &str) -> Result<Claims, CredentialError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        let token_data = decode::<HashMap<String, Value>>(credential, &self.decoding, &validation)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "credential expired".to_string(),
                    ErrorKind::InvalidSignature => "signature mismatch".to_string(),
                    ErrorKind::MissingRequiredClaim(claim) => format!("missing {} claim", claim),
                    _ => e.to_string(),
                };
                CredentialError::InvalidCredential(reason)
            })?;

        let claims = token_data.claims;

        let sub = match claims.get("sub") {
            Some(Value::String(sub)) if !sub.is_empty() => sub.clone(),
            Some(Value::String(_)) => return Err(CredentialError::MalformedClaims("sub is empty")),
            Some(_) => return Err(CredentialError::MalformedClaims("sub must be a string")),
            None => return Err(CredentialError::MalformedClaims("sub is missing")),
        };

        let exp = claims
            .get("exp")
            .and_then(Value::as_u64)
            .ok_or(CredentialError::MalformedClaims("exp must be a number"))?;
        let iat = claims.get("iat").and_then(Value::as_u64).unwrap_or_default();

        Ok(Claims { sub, exp, iat })
    }
}

/// session_cookie
///
/// `Set-Cookie` value installing a freshly issued credential.
pub fn session_cookie(credential: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, credential, max_age_secs
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// expired_session_cookie
///
/// `Set-Cookie` value that makes the browser drop the session immediately.
pub fn expired_session_cookie(secure: bool) -> String {
    let mut cookie = format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        SESSION_COOKIE
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Hash a plain password with argon2id into a PHC string.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

/// Verify a password against a stored argon2 PHC string. Unparseable hashes never match.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
