use crate::error::{AppError, Result};
use crate::models::{Comment, CommentWithUser, NewUser, Page, Post, PostLike, User};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;

/// Repository Trait
///
/// The handler-facing contract of the transactional content store. Handlers
/// interact with it without knowing whether Postgres or the in-memory engine
/// sits behind it.
///
/// Every mutating method is one atomic scope: either all of its writes become
/// durable or none do. Every method answers with a success value or one tagged
/// `AppError`; nothing is retried.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    async fn create_user(&self, user: NewUser) -> Result<User>;
    async fn user_exists(&self, email: &str, username: &str) -> Result<bool>;
    async fn get_user_by_id(&self, id: &str) -> Result<User>;
    async fn get_user_by_email(&self, email: &str) -> Result<User>;

    // --- Posts ---
    async fn create_post(&self, owner_id: &str, text: &str) -> Result<Post>;
    // Owner-only: zero matched rows is `NotFoundOrNotOwned`.
    async fn update_post(&self, post_id: i64, owner_id: &str, text: &str) -> Result<Post>;
    // Owner-only: zero affected rows is `NotFoundOrNotOwned`.
    async fn delete_post(&self, post_id: i64, owner_id: &str) -> Result<()>;
    async fn get_post_by_id(&self, post_id: i64) -> Result<Post>;
    // Newest first.
    async fn get_all_posts(&self, page: Page) -> Result<Vec<Post>>;
    async fn get_posts_by_user(&self, owner_id: &str, page: Page) -> Result<Vec<Post>>;

    // --- Comments ---
    async fn create_comment(&self, owner_id: &str, post_id: i64, text: &str) -> Result<Comment>;
    async fn update_comment(&self, comment_id: i64, owner_id: &str, text: &str) -> Result<Comment>;
    async fn delete_comment(&self, comment_id: i64, owner_id: &str) -> Result<()>;
    async fn get_comment_by_id(&self, comment_id: i64) -> Result<Comment>;
    async fn get_comments_by_post(&self, post_id: i64, page: Page) -> Result<Vec<CommentWithUser>>;

    // --- Likes ---
    /// NotLiked -> Liked. Inserts the like row and bumps `like_count` by one, together.
    async fn like_post(&self, user_id: &str, post_id: i64) -> Result<()>;
    /// Liked -> NotLiked. Deletes the like row and lowers `like_count` by one, together.
    async fn unlike_post(&self, user_id: &str, post_id: i64) -> Result<()>;
    async fn get_like_count(&self, post_id: i64) -> Result<i64>;
    async fn has_liked(&self, user_id: &str, post_id: i64) -> Result<bool>;
    async fn get_likes_by_user(&self, user_id: &str, page: Page) -> Result<Vec<PostLike>>;
}

/// RepositoryState
///
/// The concrete type used to share the store across the application state.
pub type RepositoryState = Arc<dyn Repository>;

const POST_COLUMNS: &str = "id, user_id, text, like_count, created_at, updated_at";
const COMMENT_COLUMNS: &str = "id, user_id, post_id, text, created_at, updated_at";

/// PostgresRepository
///
/// The `Repository` backed by PostgreSQL. Correctness under concurrency rests on
/// the schema in `migrations/`: the `(user_id, post_id)` primary key on
/// `post_likes`, the foreign keys, and `CHECK (like_count >= 0)`.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository over an initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// begin
    ///
    /// Opens an atomic scope. The returned `Transaction` is the rollback guard:
    /// unless `commit` is reached it rolls back when dropped, which covers early
    /// `?` returns, panics, and the request future being cancelled.
    async fn begin(&self, op: &'static str) -> Result<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| {
            tracing::error!("{} begin error: {:?}", op, e);
            AppError::Internal(format!("could not begin transaction: {}", e))
        })
    }
}

/// Maps an unexpected sqlx failure to `Internal`, logging the full detail.
fn internal(op: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        tracing::error!("{} error: {:?}", op, e);
        AppError::Internal(format!("{}: {}", op, e))
    }
}

/// Maps a lookup failure: `RowNotFound` is the read-path `NotFound`, anything else is `Internal`.
fn lookup(op: &'static str, what: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| match e {
        sqlx::Error::RowNotFound => AppError::NotFound(what),
        other => internal(op)(other),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Name of the foreign key a statement violated, if that is how it failed.
fn violated_foreign_key(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

async fn commit(tx: Transaction<'static, Postgres>, op: &'static str) -> Result<()> {
    tx.commit().await.map_err(|e| {
        tracing::error!("{} commit error: {:?}", op, e);
        AppError::Internal(format!("could not commit transaction: {}", e))
    })
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- USERS ---

    /// create_user
    ///
    /// Inserts a user. A unique violation on email or username is `UserExists`,
    /// which also settles a race between two concurrent sign-ups.
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut tx = self.begin("create_user").await?;

        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, password_hash
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::UserExists
            } else {
                internal("create_user")(e)
            }
        })?;

        commit(tx, "create_user").await?;
        Ok(created)
    }

    async fn user_exists(&self, email: &str, username: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 OR username = $2)",
        )
        .bind(email)
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(internal("user_exists"))
    }

    async fn get_user_by_id(&self, id: &str) -> Result<User> {
        sqlx::query_as::<_, User>("SELECT id, username, email, password_hash FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(lookup("get_user_by_id", "user"))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(lookup("get_user_by_email", "user"))
    }

    // --- POSTS ---

    /// create_post
    ///
    /// Inserts a post; id, `like_count` (0) and `created_at` come from column defaults.
    async fn create_post(&self, owner_id: &str, text: &str) -> Result<Post> {
        let mut tx = self.begin("create_post").await?;

        let query = format!(
            "INSERT INTO posts (user_id, text) VALUES ($1, $2) RETURNING {}",
            POST_COLUMNS
        );
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(owner_id)
            .bind(text)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    AppError::NotFound("user")
                } else {
                    internal("create_post")(e)
                }
            })?;

        commit(tx, "create_post").await?;
        Ok(post)
    }

    /// update_post
    ///
    /// Owner-scoped in the statement itself: `WHERE id = $1 AND user_id = $2`.
    async fn update_post(&self, post_id: i64, owner_id: &str, text: &str) -> Result<Post> {
        let mut tx = self.begin("update_post").await?;

        let query = format!(
            "UPDATE posts SET text = $3, updated_at = NOW() WHERE id = $1 AND user_id = $2 RETURNING {}",
            POST_COLUMNS
        );
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(post_id)
            .bind(owner_id)
            .bind(text)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("update_post"))?
            .ok_or(AppError::NotFoundOrNotOwned("post"))?;

        commit(tx, "update_post").await?;
        Ok(post)
    }

    /// delete_post
    ///
    /// One statement scoped by id and owner. Zero affected rows (missing post, or
    /// a post owned by someone else) is a single error kind. Comments and likes
    /// go with the post through `ON DELETE CASCADE`.
    async fn delete_post(&self, post_id: i64, owner_id: &str) -> Result<()> {
        let mut tx = self.begin("delete_post").await?;

        let result = sqlx::query("DELETE FROM posts WHERE id = $1 AND user_id = $2")
            .bind(post_id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("delete_post"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFoundOrNotOwned("post"));
        }

        commit(tx, "delete_post").await
    }

    async fn get_post_by_id(&self, post_id: i64) -> Result<Post> {
        let query = format!("SELECT {} FROM posts WHERE id = $1", POST_COLUMNS);
        sqlx::query_as::<_, Post>(&query)
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
            .map_err(lookup("get_post_by_id", "post"))
    }

    async fn get_all_posts(&self, page: Page) -> Result<Vec<Post>> {
        let query = format!(
            "SELECT {} FROM posts ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
            POST_COLUMNS
        );
        sqlx::query_as::<_, Post>(&query)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(internal("get_all_posts"))
    }

    async fn get_posts_by_user(&self, owner_id: &str, page: Page) -> Result<Vec<Post>> {
        let query = format!(
            "SELECT {} FROM posts WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            POST_COLUMNS
        );
        sqlx::query_as::<_, Post>(&query)
            .bind(owner_id)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(internal("get_posts_by_user"))
    }

    // --- COMMENTS ---

    /// create_comment
    ///
    /// A foreign-key violation means the post (or the author) is gone.
    async fn create_comment(&self, owner_id: &str, post_id: i64, text: &str) -> Result<Comment> {
        let mut tx = self.begin("create_comment").await?;

        let query = format!(
            "INSERT INTO comments (user_id, post_id, text) VALUES ($1, $2, $3) RETURNING {}",
            COMMENT_COLUMNS
        );
        let comment = sqlx::query_as::<_, Comment>(&query)
            .bind(owner_id)
            .bind(post_id)
            .bind(text)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match violated_foreign_key(&e).as_deref() {
                Some("comments_user_id_fkey") => AppError::NotFound("user"),
                Some(_) => AppError::NotFound("post"),
                None => internal("create_comment")(e),
            })?;

        commit(tx, "create_comment").await?;
        Ok(comment)
    }

    async fn update_comment(&self, comment_id: i64, owner_id: &str, text: &str) -> Result<Comment> {
        let mut tx = self.begin("update_comment").await?;

        let query = format!(
            "UPDATE comments SET text = $3, updated_at = NOW() WHERE id = $1 AND user_id = $2 RETURNING {}",
            COMMENT_COLUMNS
        );
        let comment = sqlx::query_as::<_, Comment>(&query)
            .bind(comment_id)
            .bind(owner_id)
            .bind(text)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal("update_comment"))?
            .ok_or(AppError::NotFoundOrNotOwned("comment"))?;

        commit(tx, "update_comment").await?;
        Ok(comment)
    }

    async fn delete_comment(&self, comment_id: i64, owner_id: &str) -> Result<()> {
        let mut tx = self.begin("delete_comment").await?;

        let result = sqlx::query("DELETE FROM comments WHERE id = $1 AND user_id = $2")
            .bind(comment_id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("delete_comment"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFoundOrNotOwned("comment"));
        }

        commit(tx, "delete_comment").await
    }

    async fn get_comment_by_id(&self, comment_id: i64) -> Result<Comment> {
        let query = format!("SELECT {} FROM comments WHERE id = $1", COMMENT_COLUMNS);
        sqlx::query_as::<_, Comment>(&query)
            .bind(comment_id)
            .fetch_one(&self.pool)
            .await
            .map_err(lookup("get_comment_by_id", "comment"))
    }

    /// get_comments_by_post
    ///
    /// Joins `users` to attach the author's username to every comment.
    async fn get_comments_by_post(&self, post_id: i64, page: Page) -> Result<Vec<CommentWithUser>> {
        sqlx::query_as::<_, CommentWithUser>(
            r#"
            SELECT c.id, c.user_id, c.post_id, c.text, c.created_at, c.updated_at, u.username
            FROM comments c
            JOIN users u ON c.user_id = u.id
            WHERE c.post_id = $1
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(post_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(internal("get_comments_by_post"))
    }

    // --- LIKES ---

    /// like_post
    ///
    /// Inside one transaction: check the current state, insert the like, bump the
    /// counter. The check gives the common case a clear answer; the primary key on
    /// `(user_id, post_id)` is what actually rules out a double like when two
    /// requests race past the check. Under READ COMMITTED the second insert waits
    /// for the first transaction and then hits `ON CONFLICT DO NOTHING`, so zero
    /// inserted rows is also `AlreadyLiked`. The counter is only touched after a
    /// row was really inserted.
    async fn like_post(&self, user_id: &str, post_id: i64) -> Result<()> {
        let mut tx = self.begin("like_post").await?;

        let liked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM post_likes WHERE user_id = $1 AND post_id = $2)",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(internal("like_post check"))?;

        if liked {
            return Err(AppError::AlreadyLiked);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO post_likes (user_id, post_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, post_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| match violated_foreign_key(&e).as_deref() {
            Some("post_likes_user_id_fkey") => AppError::NotFound("user"),
            Some(_) => AppError::NotFound("post"),
            None => internal("like_post insert")(e),
        })?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::AlreadyLiked);
        }

        let updated = sqlx::query("UPDATE posts SET like_count = like_count + 1 WHERE id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("like_post count"))?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound("post"));
        }

        commit(tx, "like_post").await
    }

    /// unlike_post
    ///
    /// Mirror of `like_post`: check, delete, decrement. Zero deleted rows (a
    /// concurrent unlike won) is `NotLiked`, and the counter is left alone.
    async fn unlike_post(&self, user_id: &str, post_id: i64) -> Result<()> {
        let mut tx = self.begin("unlike_post").await?;

        let liked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM post_likes WHERE user_id = $1 AND post_id = $2)",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(internal("unlike_post check"))?;

        if !liked {
            return Err(AppError::NotLiked);
        }

        let deleted = sqlx::query("DELETE FROM post_likes WHERE user_id = $1 AND post_id = $2")
            .bind(user_id)
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("unlike_post delete"))?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::NotLiked);
        }

        sqlx::query("UPDATE posts SET like_count = like_count - 1 WHERE id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .map_err(internal("unlike_post count"))?;

        commit(tx, "unlike_post").await
    }

    /// get_like_count
    ///
    /// Counts the source-of-truth rows rather than reading the cached column.
    async fn get_like_count(&self, post_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM post_likes WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal("get_like_count"))
    }

    async fn has_liked(&self, user_id: &str, post_id: i64) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM post_likes WHERE user_id = $1 AND post_id = $2)",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_one(&self.pool)
        .await
        .map_err(internal("has_liked"))
    }

    async fn get_likes_by_user(&self, user_id: &str, page: Page) -> Result<Vec<PostLike>> {
        sqlx::query_as::<_, PostLike>(
            r#"
            SELECT user_id, post_id, created_at
            FROM post_likes
            WHERE user_id = $1
            ORDER BY created_at DESC, post_id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .map_err(internal("get_likes_by_user"))
    }
}
