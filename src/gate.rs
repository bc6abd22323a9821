use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};

use crate::{
    auth::{CredentialService, SESSION_COOKIE},
    error::AppError,
};

/// Principal
///
/// The authenticated identity bound to a single request. Produced only by
/// `authenticate`, i.e. only after the credential's signature and expiry have
/// been verified, and handed to handlers by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// The verified `sub` claim.
    pub user_id: String,
}

impl Principal {
    /// authorize_ownership
    ///
    /// Pure string equality between the authenticated subject and the owner id
    /// a request payload claims to act for. The payload id is only ever used as
    /// the comparison target here; the store is then called with it only once
    /// it is known to equal the principal.
    pub fn authorize_ownership(&self, claimed_owner_id: &str) -> Result<(), AppError> {
        if self.user_id == claimed_owner_id {
            Ok(())
        } else {
            tracing::warn!(
                principal = %self.user_id,
                claimed_owner = %claimed_owner_id,
                "ownership check failed"
            );
            Err(AppError::Forbidden)
        }
    }
}

/// session_credential
///
/// Finds the session cookie among all `Cookie` headers of a request.
pub fn session_credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// authenticate
///
/// Reads the session cookie, verifies it and binds the subject into a `Principal`.
/// Every failure is `Unauthenticated`; ownership is never evaluated for a
/// request that does not get past this point.
pub fn authenticate(headers: &HeaderMap, credentials: &CredentialService) -> Result<Principal, AppError> {
    let credential = session_credential(headers).ok_or_else(|| {
        tracing::debug!("session cookie not present");
        AppError::Unauthenticated("Unauthorized request to a protected endpoint".to_string())
    })?;

    let claims = credentials.verify(credential).map_err(|e| {
        tracing::warn!(reason = %e, "session credential rejected");
        AppError::Unauthenticated("Failed to verify token".to_string())
    })?;

    tracing::debug!(user_id = %claims.sub, "session credential verified");

    Ok(Principal { user_id: claims.sub })
}

/// Principal Extractor Implementation
///
/// Makes `Principal` usable as a handler argument. A principal already placed in
/// the request extensions by the session middleware is reused; otherwise the
/// credential is verified here. Rejection is the tagged `AppError`, so a failed
/// authentication renders like any other error.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    CredentialService: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(principal.clone());
        }

        let credentials = CredentialService::from_ref(state);
        let principal = authenticate(&parts.headers, &credentials)?;
        parts.extensions.insert(principal.clone());
        Ok(principal)
    }
}
