use axum::{
    extract::FromRequestParts,
    http::{Method, Request, StatusCode, Uri, header, request::Parts},
    response::IntoResponse,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use social_api::{
    AppError, AppState, MemoryRepository,
    auth::{self, CredentialError, CredentialService},
    config::AppConfig,
    gate::{Principal, authenticate, session_credential},
};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

// --- Helper Functions ---

const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";
const TEST_USER_ID: &str = "6f1c0d9e-3f43-4c5e-9a0e-0d7a4e0b2c11";

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Signs an arbitrary claims object with the test secret.
fn sign(claims: serde_json::Value, secret: &str) -> String {
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), &claims, &key).unwrap()
}

fn credentials() -> CredentialService {
    CredentialService::new(TEST_JWT_SECRET, 3600)
}

fn create_app_state() -> AppState {
    let mut config = AppConfig::default();
    config.jwt_secret = TEST_JWT_SECRET.to_string();
    AppState::new(Arc::new(MemoryRepository::new()), config)
}

fn get_request_parts(method: Method, uri: Uri) -> Parts {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let (parts, _) = request.into_parts();
    parts
}

fn parts_with_cookie(cookie: &str) -> Parts {
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::COOKIE,
        header::HeaderValue::from_str(cookie).unwrap(),
    );
    parts
}

// --- Credential verifier ---

#[test]
fn test_issue_then_verify_returns_subject() {
    let service = credentials();
    let token = service.issue(TEST_USER_ID).unwrap();

    let claims = service.verify(&token).unwrap();
    assert_eq!(claims.sub, TEST_USER_ID);
    assert_eq!(claims.exp, claims.iat + 3600);
}

#[test]
fn test_verify_rejects_tampered_signature() {
    let forged = sign(
        json!({ "sub": TEST_USER_ID, "exp": now() + 3600 }),
        "some-other-secret",
    );

    let result = credentials().verify(&forged);
    assert!(matches!(result, Err(CredentialError::InvalidCredential(_))));
}

#[test]
fn test_verify_rejects_modified_payload() {
    let service = credentials();
    let token = service.issue(TEST_USER_ID).unwrap();

    // Swap the payload segment for one claiming another subject.
    let mut segments: Vec<&str> = token.split('.').collect();
    let other = service.issue("someone-else").unwrap();
    let other_payload = other.split('.').nth(1).unwrap().to_string();
    segments[1] = &other_payload;
    let spliced = segments.join(".");

    assert!(matches!(
        service.verify(&spliced),
        Err(CredentialError::InvalidCredential(_))
    ));
}

#[test]
fn test_verify_rejects_expired_credential() {
    let expired = sign(
        json!({ "sub": TEST_USER_ID, "exp": now() - 3600 }),
        TEST_JWT_SECRET,
    );

    match credentials().verify(&expired) {
        Err(CredentialError::InvalidCredential(reason)) => assert_eq!(reason, "credential expired"),
        other => panic!("expected an expired credential, got {:?}", other),
    }
}

#[test]
fn test_verify_rejects_missing_exp() {
    let token = sign(json!({ "sub": TEST_USER_ID }), TEST_JWT_SECRET);
    assert!(matches!(
        credentials().verify(&token),
        Err(CredentialError::InvalidCredential(_))
    ));
}

#[test]
fn test_verify_rejects_non_string_subject() {
    let token = sign(json!({ "sub": 42, "exp": now() + 3600 }), TEST_JWT_SECRET);
    assert_eq!(
        credentials().verify(&token),
        Err(CredentialError::MalformedClaims("sub must be a string"))
    );
}

#[test]
fn test_verify_rejects_missing_subject() {
    let token = sign(json!({ "exp": now() + 3600 }), TEST_JWT_SECRET);
    assert_eq!(
        credentials().verify(&token),
        Err(CredentialError::MalformedClaims("sub is missing"))
    );
}

#[test]
fn test_verify_rejects_garbage() {
    assert!(matches!(
        credentials().verify("not-a-jwt"),
        Err(CredentialError::InvalidCredential(_))
    ));
}

// --- Cookies & passwords ---

#[test]
fn test_session_cookie_attributes() {
    let cookie = auth::session_cookie("abc", 60, true);
    assert!(cookie.starts_with("token=abc;"));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Max-Age=60"));
    assert!(cookie.ends_with("; Secure"));

    let expired = auth::expired_session_cookie(false);
    assert!(expired.starts_with("token=;"));
    assert!(expired.contains("Max-Age=0"));
    assert!(!expired.contains("Secure"));
}

#[test]
fn test_session_credential_found_among_other_cookies() {
    let parts = parts_with_cookie("theme=dark; token=abc.def.ghi; lang=en");
    assert_eq!(session_credential(&parts.headers), Some("abc.def.ghi"));

    let parts = parts_with_cookie("theme=dark");
    assert_eq!(session_credential(&parts.headers), None);

    let parts = parts_with_cookie("token=");
    assert_eq!(session_credential(&parts.headers), None);
}

#[test]
fn test_password_hash_round() {
    let hash = auth::hash_password("hunter2").unwrap();
    assert_ne!(hash, "hunter2");
    assert!(auth::verify_password("hunter2", &hash));
    assert!(!auth::verify_password("hunter3", &hash));
    assert!(!auth::verify_password("hunter2", "not-a-phc-string"));
}

// --- Gate ---

#[tokio::test]
async fn test_principal_extracted_from_valid_cookie() {
    let app_state = create_app_state();
    let token = app_state.credentials.issue(TEST_USER_ID).unwrap();
    let mut parts = parts_with_cookie(&format!("token={}", token));

    let principal = Principal::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(principal.user_id, TEST_USER_ID);
}

#[tokio::test]
async fn test_principal_rejected_without_cookie() {
    let app_state = create_app_state();
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());

    let rejection = Principal::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap_err();
    assert_eq!(rejection.into_response().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_principal_rejected_with_bearer_header_only() {
    // The session travels in the cookie; an Authorization header is not a carrier.
    let app_state = create_app_state();
    let token = app_state.credentials.issue(TEST_USER_ID).unwrap();
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::AUTHORIZATION,
        header::HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );

    let result = Principal::from_request_parts(&mut parts, &app_state).await;
    assert!(matches!(result, Err(AppError::Unauthenticated(_))));
}

#[tokio::test]
async fn test_principal_verified_once_per_request() {
    let app_state = create_app_state();
    let token = app_state.credentials.issue(TEST_USER_ID).unwrap();
    let mut parts = parts_with_cookie(&format!("token={}", token));

    Principal::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(
        parts.extensions.get::<Principal>().map(|p| p.user_id.as_str()),
        Some(TEST_USER_ID)
    );

    // Once stored, the principal is reused and the cookie is not read again.
    parts.headers.remove(header::COOKIE);
    let reused = Principal::from_request_parts(&mut parts, &app_state)
        .await
        .unwrap();
    assert_eq!(reused.user_id, TEST_USER_ID);
}

#[test]
fn test_authenticate_rejects_expired_cookie() {
    let expired = sign(
        json!({ "sub": TEST_USER_ID, "exp": now() - 3600 }),
        TEST_JWT_SECRET,
    );
    let parts = parts_with_cookie(&format!("token={}", expired));

    let result = authenticate(&parts.headers, &credentials());
    assert!(matches!(result, Err(AppError::Unauthenticated(_))));
}

#[test]
fn test_authorize_ownership() {
    let principal = Principal {
        user_id: TEST_USER_ID.to_string(),
    };

    assert!(principal.authorize_ownership(TEST_USER_ID).is_ok());
    assert!(matches!(
        principal.authorize_ownership("someone-else"),
        Err(AppError::Forbidden)
    ));
    // Pure string equality: no normalisation.
    assert!(matches!(
        principal.authorize_ownership(&TEST_USER_ID.to_uppercase()),
        Err(AppError::Forbidden)
    ));
}
