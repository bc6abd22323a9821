use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session: the read side of posts, comments and
/// likes, plus the identity flow that hands out sessions in the first place.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for load balancers.
        .route("/health", get(|| async { "ok" }))
        // --- Identity ---
        .route("/auth/sign-up", post(handlers::sign_up))
        // Expires any current session before checking the password.
        .route("/auth/sign-in", post(handlers::sign_in))
        .route("/auth/sign-out", post(handlers::sign_out))
        // --- Posts ---
        // GET /posts/all?limit=..&offset=..
        .route("/posts/all", get(handlers::get_all_posts))
        // GET /posts/user?user_id=..&limit=..&offset=..
        .route("/posts/user", get(handlers::get_posts_by_user))
        .route("/posts/{id}", get(handlers::get_post))
        // --- Comments ---
        // GET /comments/post?post_id=..&limit=..&offset=..
        .route("/comments/post", get(handlers::get_comments_by_post))
        .route("/comments/{id}", get(handlers::get_comment))
        // --- Likes ---
        .route("/likes/count", get(handlers::get_like_count))
        .route("/likes/has_liked", get(handlers::has_liked))
        .route("/likes/user_likes", get(handlers::get_likes_by_user))
}
