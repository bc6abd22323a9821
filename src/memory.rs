use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{Comment, CommentWithUser, NewUser, Page, Post, PostLike, User};
use crate::repository::Repository;

/// MemoryRepository
///
/// An in-process storage engine implementing the same contract as
/// `PostgresRepository`. Used by the test suites and for running the service
/// without a database.
///
/// Each operation holds the engine lock from its first read to its last write,
/// which makes every operation a serializable atomic scope. Writes happen only
/// after every precondition has been checked, so a failed operation leaves no
/// partial state behind. The `(user_id, post_id)` key of the likes map plays the
/// role of the primary key on `post_likes`.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    posts: BTreeMap<i64, Post>,
    comments: BTreeMap<i64, Comment>,
    likes: HashMap<(String, i64), PostLike>,
    next_post_id: i64,
    next_comment_id: i64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".to_string()))
    }
}

/// Newest first, ties broken by the larger id, then windowed.
fn paginate<T: Clone>(mut rows: Vec<T>, page: Page, key: impl Fn(&T) -> (chrono::DateTime<Utc>, i64)) -> Vec<T> {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows.into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect()
}

#[async_trait]
impl Repository for MemoryRepository {
    // --- USERS ---

    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut state = self.lock()?;

        let taken = state.users.contains_key(&user.id)
            || state
                .users
                .values()
                .any(|u| u.email == user.email || u.username == user.username);
        if taken {
            return Err(AppError::UserExists);
        }

        let created = User {
            id: user.id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
        };
        state.users.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn user_exists(&self, email: &str, username: &str) -> Result<bool> {
        let state = self.lock()?;
        Ok(state
            .users
            .values()
            .any(|u| u.email == email || u.username == username))
    }

    async fn get_user_by_id(&self, id: &str) -> Result<User> {
        let state = self.lock()?;
        state.users.get(id).cloned().ok_or(AppError::NotFound("user"))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User> {
        let state = self.lock()?;
        state
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(AppError::NotFound("user"))
    }

    // --- POSTS ---

    async fn create_post(&self, owner_id: &str, text: &str) -> Result<Post> {
        let mut state = self.lock()?;

        if !state.users.contains_key(owner_id) {
            return Err(AppError::NotFound("user"));
        }

        state.next_post_id += 1;
        let post = Post {
            id: state.next_post_id,
            user_id: owner_id.to_string(),
            text: text.to_string(),
            like_count: 0,
            created_at: Utc::now(),
            updated_at: None,
        };
        state.posts.insert(post.id, post.clone());
        Ok(post)
    }

    async fn update_post(&self, post_id: i64, owner_id: &str, text: &str) -> Result<Post> {
        let mut state = self.lock()?;

        let post = state
            .posts
            .get_mut(&post_id)
            .filter(|p| p.user_id == owner_id)
            .ok_or(AppError::NotFoundOrNotOwned("post"))?;
        post.text = text.to_string();
        post.updated_at = Some(Utc::now());
        Ok(post.clone())
    }

    async fn delete_post(&self, post_id: i64, owner_id: &str) -> Result<()> {
        let mut state = self.lock()?;

        let owned = state
            .posts
            .get(&post_id)
            .is_some_and(|p| p.user_id == owner_id);
        if !owned {
            return Err(AppError::NotFoundOrNotOwned("post"));
        }

        // Cascade, as the foreign keys do in Postgres.
        state.posts.remove(&post_id);
        state.comments.retain(|_, c| c.post_id != post_id);
        state.likes.retain(|(_, liked_post), _| *liked_post != post_id);
        Ok(())
    }

    async fn get_post_by_id(&self, post_id: i64) -> Result<Post> {
        let state = self.lock()?;
        state
            .posts
            .get(&post_id)
            .cloned()
            .ok_or(AppError::NotFound("post"))
    }

    async fn get_all_posts(&self, page: Page) -> Result<Vec<Post>> {
        let state = self.lock()?;
        let rows = state.posts.values().cloned().collect();
        Ok(paginate(rows, page, |p: &Post| (p.created_at, p.id)))
    }

    async fn get_posts_by_user(&self, owner_id: &str, page: Page) -> Result<Vec<Post>> {
        let state = self.lock()?;
        let rows = state
            .posts
            .values()
            .filter(|p| p.user_id == owner_id)
            .cloned()
            .collect();
        Ok(paginate(rows, page, |p: &Post| (p.created_at, p.id)))
    }

    // --- COMMENTS ---

    async fn create_comment(&self, owner_id: &str, post_id: i64, text: &str) -> Result<Comment> {
        let mut state = self.lock()?;

        if !state.posts.contains_key(&post_id) {
            return Err(AppError::NotFound("post"));
        }
        if !state.users.contains_key(owner_id) {
            return Err(AppError::NotFound("user"));
        }

        state.next_comment_id += 1;
        let comment = Comment {
            id: state.next_comment_id,
            user_id: owner_id.to_string(),
            post_id,
            text: text.to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        state.comments.insert(comment.id, comment.clone());
        Ok(comment)
    }

    async fn update_comment(&self, comment_id: i64, owner_id: &str, text: &str) -> Result<Comment> {
        let mut state = self.lock()?;

        let comment = state
            .comments
            .get_mut(&comment_id)
            .filter(|c| c.user_id == owner_id)
            .ok_or(AppError::NotFoundOrNotOwned("comment"))?;
        comment.text = text.to_string();
        comment.updated_at = Some(Utc::now());
        Ok(comment.clone())
    }

    async fn delete_comment(&self, comment_id: i64, owner_id: &str) -> Result<()> {
        let mut state = self.lock()?;

        let owned = state
            .comments
            .get(&comment_id)
            .is_some_and(|c| c.user_id == owner_id);
        if !owned {
            return Err(AppError::NotFoundOrNotOwned("comment"));
        }

        state.comments.remove(&comment_id);
        Ok(())
    }

    async fn get_comment_by_id(&self, comment_id: i64) -> Result<Comment> {
        let state = self.lock()?;
        state
            .comments
            .get(&comment_id)
            .cloned()
            .ok_or(AppError::NotFound("comment"))
    }

    async fn get_comments_by_post(&self, post_id: i64, page: Page) -> Result<Vec<CommentWithUser>> {
        let state = self.lock()?;
        // Inner join semantics: comments whose author vanished are skipped.
        let rows = state
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .filter_map(|c| {
                state.users.get(&c.user_id).map(|u| CommentWithUser {
                    comment: c.clone(),
                    username: u.username.clone(),
                })
            })
            .collect();
        Ok(paginate(rows, page, |c: &CommentWithUser| {
            (c.comment.created_at, c.comment.id)
        }))
    }

    // --- LIKES ---

    async fn like_post(&self, user_id: &str, post_id: i64) -> Result<()> {
        let mut state = self.lock()?;

        let key = (user_id.to_string(), post_id);
        if state.likes.contains_key(&key) {
            return Err(AppError::AlreadyLiked);
        }
        if !state.users.contains_key(user_id) {
            return Err(AppError::NotFound("user"));
        }

        let post = state
            .posts
            .get_mut(&post_id)
            .ok_or(AppError::NotFound("post"))?;
        post.like_count += 1;

        state.likes.insert(
            key,
            PostLike {
                user_id: user_id.to_string(),
                post_id,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn unlike_post(&self, user_id: &str, post_id: i64) -> Result<()> {
        let mut state = self.lock()?;

        let key = (user_id.to_string(), post_id);
        if !state.likes.contains_key(&key) {
            return Err(AppError::NotLiked);
        }

        let post = state
            .posts
            .get_mut(&post_id)
            .ok_or(AppError::NotFound("post"))?;
        post.like_count -= 1;

        state.likes.remove(&key);
        Ok(())
    }

    async fn get_like_count(&self, post_id: i64) -> Result<i64> {
        let state = self.lock()?;
        Ok(state.likes.keys().filter(|(_, p)| *p == post_id).count() as i64)
    }

    async fn has_liked(&self, user_id: &str, post_id: i64) -> Result<bool> {
        let state = self.lock()?;
        Ok(state.likes.contains_key(&(user_id.to_string(), post_id)))
    }

    async fn get_likes_by_user(&self, user_id: &str, page: Page) -> Result<Vec<PostLike>> {
        let state = self.lock()?;
        let rows = state
            .likes
            .values()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        Ok(paginate(rows, page, |l: &PostLike| (l.created_at, l.post_id)))
    }
}
