use crate::{
    AppState,
    auth::{self, CredentialService},
    error::{AppError, Result},
    gate::Principal,
    models::{
        ApiResponse, Comment, CommentWithUser, CreateCommentRequest, CreatePostRequest,
        DeleteCommentRequest, DeletePostRequest, LikePostRequest, NewUser, Page, Post, PostLike,
        SignInRequest, SignUpRequest, UpdateCommentRequest, UpdatePostRequest, User, UserPayload,
    },
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Query Structs ---
//
// Numeric query parameters arrive as raw strings so that a non-numeric value
// surfaces as a `Validation` error naming the parameter.

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserPageQuery {
    pub user_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostPageQuery {
    pub post_id: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostQuery {
    pub post_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserPostQuery {
    pub user_id: Option<String>,
    pub post_id: Option<String>,
}

/// LikeCount
///
/// Body of `GET /likes/count`.
#[derive(Debug, Serialize)]
pub struct LikeCount {
    pub post_id: i64,
    pub like_count: i64,
}

/// HasLiked
///
/// Body of `GET /likes/has_liked`.
#[derive(Debug, Serialize)]
pub struct HasLiked {
    pub user_id: String,
    pub post_id: i64,
    pub has_liked: bool,
}

// --- Helpers ---

fn respond<T: Serialize>(status: StatusCode, message: &str, data: Option<T>) -> Response {
    (
        status,
        Json(ApiResponse {
            message: message.to_string(),
            data,
        }),
    )
        .into_response()
}

fn parse_i64(name: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::Validation(format!("{} must be an integer", name)))
}

fn required_i64(name: &str, raw: Option<&str>) -> Result<i64> {
    match raw {
        Some(value) => parse_i64(name, value),
        None => Err(AppError::Validation(format!("{} is required", name))),
    }
}

fn required_str<'a>(name: &str, raw: Option<&'a str>) -> Result<&'a str> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation(format!("{} is required", name)))
}

/// page_from
///
/// Builds a validated `Page` from raw `limit`/`offset` parameters. Both are
/// required, must parse as integers and must lie in range.
fn page_from(limit: Option<&str>, offset: Option<&str>, max_limit: i64) -> Result<Page> {
    let limit = required_i64("limit", limit)?;
    let offset = required_i64("offset", offset)?;
    Page::new(limit, offset, max_limit)
}

/// Rejects blank text. The text itself is stored exactly as sent.
fn require_text(text: &str) -> Result<&str> {
    if text.trim().is_empty() {
        return Err(AppError::Validation("text must not be empty".to_string()));
    }
    Ok(text)
}

// --- Auth Handlers ---

/// sign_up
///
/// Creates an account and immediately opens a session for it.
pub async fn sign_up(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload?;

    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_lowercase();
    let password = payload.password;

    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(AppError::Validation(
            "username, email and password are required".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(AppError::Validation("email is not valid".to_string()));
    }

    if state.repo.user_exists(&email, &username).await? {
        return Err(AppError::UserExists);
    }

    let user = state
        .repo
        .create_user(NewUser {
            id: Uuid::new_v4().to_string(),
            username,
            email,
            password_hash: auth::hash_password(&password)?,
        })
        .await?;

    tracing::info!(user_id = %user.id, "user signed up");

    let cookie = issue_session_cookie(&state.credentials, &user.id, state.config.cookie_secure)?;
    let mut response = respond(
        StatusCode::CREATED,
        "User created successfully",
        Some(UserPayload::from(user)),
    );
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(response)
}

/// sign_in
///
/// Any session the client already holds is expired first, so a failed sign-in
/// always leaves the client signed out. Unknown email and wrong password give
/// the same answer.
pub async fn sign_in(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SignInRequest>, JsonRejection>,
) -> Response {
    let expired = auth::expired_session_cookie(state.config.cookie_secure);

    let outcome = check_sign_in(&state, payload).await;

    match outcome {
        Ok((cookie, user)) => {
            tracing::info!(user_id = %user.id, "user signed in");
            let mut response = respond(
                StatusCode::OK,
                "User signed in successfully",
                Some(UserPayload::from(user)),
            );
            response.headers_mut().append(header::SET_COOKIE, cookie);
            response
        }
        Err(e) => ([(header::SET_COOKIE, expired)], e).into_response(),
    }
}

async fn check_sign_in(
    state: &AppState,
    payload: std::result::Result<Json<SignInRequest>, JsonRejection>,
) -> Result<(header::HeaderValue, User)> {
    let Json(payload) = payload?;
    let email = payload.email.trim().to_lowercase();
    let password = payload.password.as_str();

    if email.is_empty() || password.is_empty() {
        return Err(AppError::Validation("email and password are required".to_string()));
    }

    let user = match state.repo.get_user_by_email(&email).await {
        Ok(user) => user,
        Err(AppError::NotFound(_)) => {
            return Err(AppError::Unauthenticated("Invalid email or password".to_string()));
        }
        Err(e) => return Err(e),
    };

    if !auth::verify_password(password, &user.password_hash) {
        tracing::warn!(user_id = %user.id, "sign-in with wrong password");
        return Err(AppError::Unauthenticated("Invalid email or password".to_string()));
    }

    let cookie = issue_session_cookie(&state.credentials, &user.id, state.config.cookie_secure)?;
    Ok((cookie, user))
}

/// sign_out
pub async fn sign_out(State(state): State<AppState>) -> Response {
    let expired = auth::expired_session_cookie(state.config.cookie_secure);
    (
        [(header::SET_COOKIE, expired)],
        respond::<()>(StatusCode::OK, "User signed out successfully", None),
    )
        .into_response()
}

fn issue_session_cookie(
    credentials: &CredentialService,
    user_id: &str,
    secure: bool,
) -> Result<header::HeaderValue> {
    let credential = credentials.issue(user_id)?;
    let cookie = auth::session_cookie(&credential, credentials.ttl_secs(), secure);
    header::HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(format!("invalid session cookie header: {}", e)))
}

// --- User Handlers ---

/// get_user
///
/// [Authenticated Route] Profile of the caller. Another user's id is `Forbidden`.
pub async fn get_user(
    principal: Principal,
    State(state): State<AppState>,
    id: std::result::Result<Path<String>, PathRejection>,
) -> Result<Response> {
    let Path(id) = id?;
    principal.authorize_ownership(&id)?;

    let user = state.repo.get_user_by_id(&id).await?;
    Ok(respond(
        StatusCode::OK,
        "User retrieved successfully",
        Some(UserPayload::from(user)),
    ))
}

// --- Post Handlers ---

/// get_post
///
/// [Public Route] Single post by id.
pub async fn get_post(
    State(state): State<AppState>,
    id: std::result::Result<Path<String>, PathRejection>,
) -> Result<Response> {
    let Path(raw) = id?;
    let post_id = parse_i64("id", &raw)?;

    let post = state.repo.get_post_by_id(post_id).await?;
    Ok(respond(StatusCode::OK, "Post retrieved successfully", Some(post)))
}

/// get_all_posts
///
/// [Public Route] All posts, newest first.
pub async fn get_all_posts(
    State(state): State<AppState>,
    query: std::result::Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let page = page_from(
        query.limit.as_deref(),
        query.offset.as_deref(),
        state.config.max_page_size,
    )?;

    let posts: Vec<Post> = state.repo.get_all_posts(page).await?;
    Ok(respond(StatusCode::OK, "Posts retrieved successfully", Some(posts)))
}

/// get_posts_by_user
///
/// [Public Route] Posts of one user, newest first.
pub async fn get_posts_by_user(
    State(state): State<AppState>,
    query: std::result::Result<Query<UserPageQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let user_id = required_str("user_id", query.user_id.as_deref())?;
    let page = page_from(
        query.limit.as_deref(),
        query.offset.as_deref(),
        state.config.max_page_size,
    )?;

    let posts: Vec<Post> = state.repo.get_posts_by_user(user_id, page).await?;
    Ok(respond(StatusCode::OK, "Posts retrieved successfully", Some(posts)))
}

/// create_post
///
/// [Authenticated Route] The payload's `user_id` must be the caller.
pub async fn create_post(
    principal: Principal,
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreatePostRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload?;
    principal.authorize_ownership(&payload.user_id)?;
    let text = require_text(&payload.text)?;

    let post = state.repo.create_post(&principal.user_id, text).await?;
    tracing::info!(post_id = post.id, user_id = %principal.user_id, "post created");

    Ok(respond(StatusCode::CREATED, "Post created successfully", Some(post)))
}

/// update_post
///
/// [Authenticated Route] Owner-only text update.
pub async fn update_post(
    principal: Principal,
    State(state): State<AppState>,
    payload: std::result::Result<Json<UpdatePostRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload?;
    principal.authorize_ownership(&payload.user_id)?;
    let text = require_text(&payload.text)?;

    let post = state
        .repo
        .update_post(payload.post_id, &principal.user_id, text)
        .await?;
    Ok(respond(StatusCode::OK, "Post updated successfully", Some(post)))
}

/// delete_post
///
/// [Authenticated Route] Owner-only. A post that is missing and a post owned by
/// someone else produce the same 404.
pub async fn delete_post(
    principal: Principal,
    State(state): State<AppState>,
    payload: std::result::Result<Json<DeletePostRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload?;
    principal.authorize_ownership(&payload.user_id)?;

    state
        .repo
        .delete_post(payload.post_id, &principal.user_id)
        .await?;
    tracing::info!(post_id = payload.post_id, user_id = %principal.user_id, "post deleted");

    Ok(respond::<()>(StatusCode::OK, "Post deleted successfully", None))
}

// --- Comment Handlers ---

/// get_comment
///
/// [Public Route] Single comment by id.
pub async fn get_comment(
    State(state): State<AppState>,
    id: std::result::Result<Path<String>, PathRejection>,
) -> Result<Response> {
    let Path(raw) = id?;
    let comment_id = parse_i64("id", &raw)?;

    let comment: Comment = state.repo.get_comment_by_id(comment_id).await?;
    Ok(respond(StatusCode::OK, "Comment retrieved successfully", Some(comment)))
}

/// get_comments_by_post
///
/// [Public Route] Comments of a post with their authors' usernames, newest first.
pub async fn get_comments_by_post(
    State(state): State<AppState>,
    query: std::result::Result<Query<PostPageQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let post_id = required_i64("post_id", query.post_id.as_deref())?;
    let page = page_from(
        query.limit.as_deref(),
        query.offset.as_deref(),
        state.config.max_page_size,
    )?;

    let comments: Vec<CommentWithUser> = state.repo.get_comments_by_post(post_id, page).await?;
    Ok(respond(StatusCode::OK, "Comments retrieved successfully", Some(comments)))
}

pub async fn create_comment(
    principal: Principal,
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateCommentRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload?;
    principal.authorize_ownership(&payload.user_id)?;
    let text = require_text(&payload.text)?;

    let comment = state
        .repo
        .create_comment(&principal.user_id, payload.post_id, text)
        .await?;
    Ok(respond(StatusCode::CREATED, "Comment created successfully", Some(comment)))
}

pub async fn update_comment(
    principal: Principal,
    State(state): State<AppState>,
    payload: std::result::Result<Json<UpdateCommentRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload?;
    principal.authorize_ownership(&payload.user_id)?;
    let text = require_text(&payload.text)?;

    let comment = state
        .repo
        .update_comment(payload.comment_id, &principal.user_id, text)
        .await?;
    Ok(respond(StatusCode::OK, "Comment updated successfully", Some(comment)))
}

pub async fn delete_comment(
    principal: Principal,
    State(state): State<AppState>,
    payload: std::result::Result<Json<DeleteCommentRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload?;
    principal.authorize_ownership(&payload.user_id)?;

    state
        .repo
        .delete_comment(payload.comment_id, &principal.user_id)
        .await?;
    Ok(respond::<()>(StatusCode::OK, "Comment deleted successfully", None))
}

// --- Like Handlers ---

/// get_like_count
///
/// [Public Route] Number of likes on a post. An unknown post has zero.
pub async fn get_like_count(
    State(state): State<AppState>,
    query: std::result::Result<Query<PostQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let post_id = required_i64("post_id", query.post_id.as_deref())?;

    let like_count = state.repo.get_like_count(post_id).await?;
    Ok(respond(
        StatusCode::OK,
        "Like count retrieved successfully",
        Some(LikeCount { post_id, like_count }),
    ))
}

pub async fn has_liked(
    State(state): State<AppState>,
    query: std::result::Result<Query<UserPostQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let user_id = required_str("user_id", query.user_id.as_deref())?;
    let post_id = required_i64("post_id", query.post_id.as_deref())?;

    let has_liked = state.repo.has_liked(user_id, post_id).await?;
    Ok(respond(
        StatusCode::OK,
        "Like status retrieved successfully",
        Some(HasLiked {
            user_id: user_id.to_string(),
            post_id,
            has_liked,
        }),
    ))
}

pub async fn get_likes_by_user(
    State(state): State<AppState>,
    query: std::result::Result<Query<UserPageQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let user_id = required_str("user_id", query.user_id.as_deref())?;
    let page = page_from(
        query.limit.as_deref(),
        query.offset.as_deref(),
        state.config.max_page_size,
    )?;

    let likes: Vec<PostLike> = state.repo.get_likes_by_user(user_id, page).await?;
    Ok(respond(StatusCode::OK, "User likes retrieved successfully", Some(likes)))
}

/// like_post
///
/// [Authenticated Route] A second like by the same user is a 409 and leaves the
/// count untouched.
pub async fn like_post(
    principal: Principal,
    State(state): State<AppState>,
    payload: std::result::Result<Json<LikePostRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload?;
    principal.authorize_ownership(&payload.user_id)?;

    state
        .repo
        .like_post(&principal.user_id, payload.post_id)
        .await?;
    tracing::debug!(post_id = payload.post_id, user_id = %principal.user_id, "post liked");

    Ok(respond::<()>(StatusCode::OK, "Post liked successfully", None))
}

pub async fn unlike_post(
    principal: Principal,
    State(state): State<AppState>,
    payload: std::result::Result<Json<LikePostRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload?;
    principal.authorize_ownership(&payload.user_id)?;

    state
        .repo
        .unlike_post(&principal.user_id, payload.post_id)
        .await?;
    tracing::debug!(post_id = payload.post_id, user_id = %principal.user_id, "post unliked");

    Ok(respond::<()>(StatusCode::OK, "Post unliked successfully", None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_requires_both_parameters() {
        assert!(matches!(page_from(None, Some("0"), 100), Err(AppError::Validation(_))));
        assert!(matches!(page_from(Some("10"), None, 100), Err(AppError::Validation(_))));

        let page = page_from(Some("10"), Some(" 5 "), 100).unwrap();
        assert_eq!((page.limit(), page.offset()), (10, 5));
    }

    #[test]
    fn page_rejects_non_numeric_and_out_of_range() {
        assert!(matches!(page_from(Some("abc"), Some("0"), 100), Err(AppError::Validation(_))));
        assert!(matches!(page_from(Some("0"), Some("0"), 100), Err(AppError::Validation(_))));
        assert!(matches!(page_from(Some("101"), Some("0"), 100), Err(AppError::Validation(_))));
        assert!(matches!(page_from(Some("10"), Some("-1"), 100), Err(AppError::Validation(_))));
    }

    #[test]
    fn required_parameters_are_reported_by_name() {
        match required_i64("post_id", None) {
            Err(AppError::Validation(msg)) => assert_eq!(msg, "post_id is required"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(required_str("user_id", Some("   ")), Err(AppError::Validation(_))));
    }

    #[test]
    fn blank_text_is_rejected() {
        assert!(require_text("  ").is_err());
        assert_eq!(require_text(" hi ").unwrap(), " hi ");
    }
}
