use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

// --- Core Schemas (Mapped to Database) ---

/// User
///
/// A row of the `users` table. Carries the password hash, so it is never
/// serialized to clients; handlers answer with `UserPayload` instead.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct User {
    // Opaque identity (UUIDv4 text). Immutable.
    pub id: String,
    pub username: String,
    pub email: String,
    // argon2 PHC string.
    pub password_hash: String,
}

/// NewUser
///
/// Insert payload for `users`; the id is assigned and the password already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// UserPayload
///
/// Public view of a user returned by the auth and user endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPayload {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl From<User> for UserPayload {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
        }
    }
}

/// Post
///
/// A row of the `posts` table. `like_count` is a denormalized copy of the number
/// of `post_likes` rows for this post and is only ever written inside the same
/// transaction as those rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Post {
    pub id: i64,
    // FK to users.id (Owner).
    pub user_id: String,
    pub text: String,
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Comment
///
/// A row of the `comments` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: i64,
    pub user_id: String,
    pub post_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// CommentWithUser
///
/// A comment enriched with its author's username (JOIN on `users`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CommentWithUser {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub comment: Comment,
    pub username: String,
}

/// PostLike
///
/// A row of the `post_likes` table; `(user_id, post_id)` is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PostLike {
    pub user_id: String,
    pub post_id: i64,
    pub created_at: DateTime<Utc>,
}

// --- Pagination ---

/// Page
///
/// A validated `LIMIT`/`OFFSET` pair. Only constructible through `Page::new`,
/// so the store never sees an unchecked window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    limit: i64,
    offset: i64,
}

impl Page {
    /// Accepts `1 <= limit <= max_limit` and `offset >= 0`.
    pub fn new(limit: i64, offset: i64, max_limit: i64) -> Result<Self, AppError> {
        if limit < 1 || limit > max_limit {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                max_limit
            )));
        }
        if offset < 0 {
            return Err(AppError::Validation("offset must not be negative".to_string()));
        }
        Ok(Self { limit, offset })
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

// --- Request Payloads (Input Schemas) ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// CreatePostRequest
///
/// `user_id` is the owner the caller claims to act for; it must equal the
/// authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePostRequest {
    pub user_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePostRequest {
    pub user_id: String,
    pub post_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePostRequest {
    pub user_id: String,
    pub post_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommentRequest {
    pub user_id: String,
    pub post_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCommentRequest {
    pub user_id: String,
    pub comment_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCommentRequest {
    pub user_id: String,
    pub comment_id: i64,
}

/// LikePostRequest
///
/// Shared by the like and unlike endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikePostRequest {
    pub user_id: String,
    pub post_id: i64,
}

/// ApiResponse
///
/// Envelope for every successful JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: Option<T>,
}
