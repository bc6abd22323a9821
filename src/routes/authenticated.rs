use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Authenticated Router Module
///
/// Every route here sits behind the session middleware installed in
/// `create_router`, so a request without a valid credential is answered with a
/// 401 before any handler runs.
///
/// The mutation handlers additionally compare the `user_id` in their payload
/// with the authenticated principal (`Principal::authorize_ownership`) before
/// touching the store, and the store scopes every update and delete by owner.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /user/{id}
        // Profile lookup, limited to the caller's own id.
        .route("/user/{id}", get(handlers::get_user))
        // --- Posts ---
        .route("/posts/create", post(handlers::create_post))
        .route("/posts/update", put(handlers::update_post))
        .route("/posts/delete", delete(handlers::delete_post))
        // --- Comments ---
        .route("/comments/create", post(handlers::create_comment))
        .route("/comments/update", put(handlers::update_comment))
        .route("/comments/delete", delete(handlers::delete_comment))
        // --- Likes ---
        // Like and unlike are transactional: the like row and the post's
        // like_count always change together.
        .route("/likes/like", post(handlers::like_post))
        .route("/likes/unlike", post(handlers::unlike_post))
}
