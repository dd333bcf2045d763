use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("record store failure: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Newest first.
    async fn list_posts(&self, limit: Option<usize>) -> RepoResult<Vec<Post>>;
    async fn list_posts_by_author(&self, author: &str) -> RepoResult<Vec<Post>>;
    /// Case-insensitive substring match on title or content, newest first.
    async fn search_posts(&self, query: &str) -> RepoResult<Vec<Post>>;
    /// Ids that do not resolve are skipped.
    async fn get_posts(&self, ids: &[RecordId]) -> RepoResult<Vec<Post>>;
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    async fn get_post(&self, id: &RecordId) -> RepoResult<Post>;
    async fn update_post(&self, id: &RecordId, upd: PostUpdate) -> RepoResult<Post>;
    async fn delete_post(&self, id: &RecordId) -> RepoResult<()>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    /// Comments of one post, newest first.
    async fn list_comments(&self, post_id: &RecordId) -> RepoResult<Vec<Comment>>;
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn get_comment(&self, id: &RecordId) -> RepoResult<Comment>;
    async fn delete_comment(&self, id: &RecordId) -> RepoResult<()>;
}

#[async_trait]
pub trait EdgeRepo: Send + Sync {
    /// Edges on `post_id`, optionally narrowed to one subject.
    async fn find_edges(&self, kind: EdgeKind, post_id: &RecordId, user_id: Option<&str>) -> RepoResult<Vec<Edge>>;
    async fn list_edges(&self, kind: EdgeKind) -> RepoResult<Vec<Edge>>;
    async fn list_user_edges(&self, kind: EdgeKind, user_id: &str) -> RepoResult<Vec<Edge>>;
    async fn create_edge(&self, kind: EdgeKind, post_id: &RecordId, user_id: &str) -> RepoResult<Edge>;
    async fn delete_edge(&self, kind: EdgeKind, id: &RecordId) -> RepoResult<()>;

    /// Read-then-write toggle. Two concurrent callers can both observe "no
    /// edge" and both create one; backends with an atomic primitive override
    /// this. Removal deletes every matching edge, so duplicates left behind by
    /// that race are cleaned up by the next toggle-off.
    async fn toggle_edge(&self, kind: EdgeKind, post_id: &RecordId, user_id: &str) -> RepoResult<EdgeToggle> {
        let existing = self.find_edges(kind, post_id, Some(user_id)).await?;
        let mut existing = existing.into_iter();
        match existing.next() {
            Some(first) => {
                self.delete_edge(kind, &first.id).await?;
                for dup in existing {
                    self.delete_edge(kind, &dup.id).await?;
                }
                Ok(EdgeToggle::Removed(first))
            }
            None => Ok(EdgeToggle::Added(self.create_edge(kind, post_id, user_id).await?)),
        }
    }
}

pub trait Repo: PostRepo + CommentRepo + EdgeRepo {}

impl<T> Repo for T where T: PostRepo + CommentRepo + EdgeRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_FILE: &str = "state.json";

    fn newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (chrono::DateTime<Utc>, String)) {
        items.sort_by(|a, b| key(b).cmp(&key(a)));
    }

    // Maps are keyed by the composite record key string.
    #[derive(Default, Serialize, Deserialize)]
    struct State {
        posts: HashMap<String, Post>,
        comments: HashMap<String, Comment>,
        likes: HashMap<String, Edge>,
        favorites: HashMap<String, Edge>,
    }

    impl State {
        fn edges(&self, kind: EdgeKind) -> &HashMap<String, Edge> {
            match kind {
                EdgeKind::Like => &self.likes,
                EdgeKind::Favorite => &self.favorites,
            }
        }

        fn edges_mut(&mut self, kind: EdgeKind) -> &mut HashMap<String, Edge> {
            match kind {
                EdgeKind::Like => &mut self.likes,
                EdgeKind::Favorite => &mut self.favorites,
            }
        }
    }

    /// In-process record store. State is lost on restart unless built with
    /// [`InMemRepo::with_snapshot`].
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        /// Loads `<dir>/state.json` if present and rewrites it after every
        /// mutation.
        pub fn with_snapshot(dir: impl AsRef<Path>) -> Self {
            let path = dir.as_ref().join(SNAPSHOT_FILE);
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("[inmem] loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!("[inmem] failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    log::info!("[inmem] no snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let Some(path) = self.snapshot_path.as_ref() else { return };
            let bytes = match self.read().map(|s| serde_json::to_vec_pretty(&*s)) {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => {
                    log::error!("[inmem] failed to serialise snapshot: {e}");
                    return;
                }
                Err(e) => {
                    log::error!("[inmem] {e}");
                    return;
                }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(path.as_path(), bytes) {
                log::error!("[inmem] failed to write snapshot '{}': {e}", path.display());
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn sorted_posts(posts: impl Iterator<Item = Post>) -> Vec<Post> {
            let mut v: Vec<Post> = posts.collect();
            newest_first(&mut v, |p| (p.created_at, p.id.to_string()));
            v
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(&self, limit: Option<usize>) -> RepoResult<Vec<Post>> {
            let s = self.read()?;
            let mut v = Self::sorted_posts(s.posts.values().cloned());
            if let Some(limit) = limit {
                v.truncate(limit);
            }
            Ok(v)
        }

        async fn list_posts_by_author(&self, author: &str) -> RepoResult<Vec<Post>> {
            let s = self.read()?;
            Ok(Self::sorted_posts(s.posts.values().filter(|p| p.author == author).cloned()))
        }

        async fn search_posts(&self, query: &str) -> RepoResult<Vec<Post>> {
            let needle = query.to_lowercase();
            let s = self.read()?;
            Ok(Self::sorted_posts(
                s.posts
                    .values()
                    .filter(|p| p.title.to_lowercase().contains(&needle) || p.content.to_lowercase().contains(&needle))
                    .cloned(),
            ))
        }

        async fn get_posts(&self, ids: &[RecordId]) -> RepoResult<Vec<Post>> {
            let s = self.read()?;
            Ok(ids.iter().filter_map(|id| s.posts.get(&id.to_string()).cloned()).collect())
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let post = Post {
                id: RecordId::generate(POSTS),
                title: new.title,
                content: new.content,
                author: new.author,
                created_at: Utc::now(),
                updated_at: None,
                image_url: new.image_url,
            };
            self.write()?.posts.insert(post.id.to_string(), post.clone());
            self.persist();
            Ok(post)
        }

        async fn get_post(&self, id: &RecordId) -> RepoResult<Post> {
            self.read()?.posts.get(&id.to_string()).cloned().ok_or(RepoError::NotFound)
        }

        async fn update_post(&self, id: &RecordId, upd: PostUpdate) -> RepoResult<Post> {
            let mut s = self.write()?;
            let post = s.posts.get_mut(&id.to_string()).ok_or(RepoError::NotFound)?;
            upd.apply(post);
            let updated = post.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_post(&self, id: &RecordId) -> RepoResult<()> {
            self.write()?.posts.remove(&id.to_string()).ok_or(RepoError::NotFound)?;
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(&self, post_id: &RecordId) -> RepoResult<Vec<Comment>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.comments.values().filter(|c| &c.post_id == post_id).cloned().collect();
            newest_first(&mut v, |c| (c.created_at, c.id.to_string()));
            Ok(v)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let comment = Comment {
                id: RecordId::generate(COMMENTS),
                post_id: new.post_id,
                content: new.content,
                author: new.author,
                created_at: Utc::now(),
                parent_id: new.parent_id,
            };
            self.write()?.comments.insert(comment.id.to_string(), comment.clone());
            self.persist();
            Ok(comment)
        }

        async fn get_comment(&self, id: &RecordId) -> RepoResult<Comment> {
            self.read()?.comments.get(&id.to_string()).cloned().ok_or(RepoError::NotFound)
        }

        async fn delete_comment(&self, id: &RecordId) -> RepoResult<()> {
            self.write()?.comments.remove(&id.to_string()).ok_or(RepoError::NotFound)?;
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl EdgeRepo for InMemRepo {
        async fn find_edges(&self, kind: EdgeKind, post_id: &RecordId, user_id: Option<&str>) -> RepoResult<Vec<Edge>> {
            let s = self.read()?;
            Ok(s.edges(kind)
                .values()
                .filter(|e| &e.post_id == post_id && user_id.map_or(true, |u| e.user_id == u))
                .cloned()
                .collect())
        }

        async fn list_edges(&self, kind: EdgeKind) -> RepoResult<Vec<Edge>> {
            Ok(self.read()?.edges(kind).values().cloned().collect())
        }

        async fn list_user_edges(&self, kind: EdgeKind, user_id: &str) -> RepoResult<Vec<Edge>> {
            let s = self.read()?;
            Ok(s.edges(kind).values().filter(|e| e.user_id == user_id).cloned().collect())
        }

        async fn create_edge(&self, kind: EdgeKind, post_id: &RecordId, user_id: &str) -> RepoResult<Edge> {
            let edge = Edge {
                id: RecordId::generate(kind.collection()),
                post_id: post_id.clone(),
                user_id: user_id.to_string(),
                created_at: Utc::now(),
            };
            self.write()?.edges_mut(kind).insert(edge.id.to_string(), edge.clone());
            self.persist();
            Ok(edge)
        }

        async fn delete_edge(&self, kind: EdgeKind, id: &RecordId) -> RepoResult<()> {
            self.write()?.edges_mut(kind).remove(&id.to_string()).ok_or(RepoError::NotFound)?;
            self.persist();
            Ok(())
        }

        // Lookup and mutation happen under one write lock.
        async fn toggle_edge(&self, kind: EdgeKind, post_id: &RecordId, user_id: &str) -> RepoResult<EdgeToggle> {
            let mut s = self.write()?;
            let edges = s.edges_mut(kind);
            let mut matching: Vec<String> = edges
                .iter()
                .filter(|(_, e)| &e.post_id == post_id && e.user_id == user_id)
                .map(|(k, _)| k.clone())
                .collect();
            matching.sort();
            let outcome = if let Some(first) = matching.first() {
                let removed = edges.get(first).cloned().ok_or(RepoError::NotFound)?;
                for key in &matching {
                    edges.remove(key);
                }
                EdgeToggle::Removed(removed)
            } else {
                let edge = Edge {
                    id: RecordId::generate(kind.collection()),
                    post_id: post_id.clone(),
                    user_id: user_id.to_string(),
                    created_at: Utc::now(),
                };
                edges.insert(edge.id.to_string(), edge.clone());
                EdgeToggle::Added(edge)
            };
            drop(s);
            self.persist();
            Ok(outcome)
        }
    }
}

#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use chrono::{DateTime, Utc};
    use sqlx::{FromRow, Pool, Postgres};

    impl From<sqlx::Error> for RepoError {
        fn from(e: sqlx::Error) -> Self {
            match e {
                sqlx::Error::RowNotFound => RepoError::NotFound,
                sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
                other => RepoError::Internal(other.to_string()),
            }
        }
    }

    fn parse_id(raw: &str) -> RepoResult<RecordId> {
        raw.parse().map_err(|e: RecordIdError| RepoError::Internal(format!("stored id `{raw}`: {e}")))
    }

    /// `%needle%` with LIKE metacharacters escaped.
    pub(crate) fn like_pattern(query: &str) -> String {
        let mut out = String::with_capacity(query.len() + 2);
        out.push('%');
        for c in query.chars() {
            if matches!(c, '\\' | '%' | '_') {
                out.push('\\');
            }
            out.push(c);
        }
        out.push('%');
        out
    }

    #[derive(FromRow)]
    struct PostRow {
        id: String,
        title: String,
        content: String,
        author: String,
        created_at: DateTime<Utc>,
        updated_at: Option<DateTime<Utc>>,
        image_url: Option<String>,
    }

    impl TryFrom<PostRow> for Post {
        type Error = RepoError;
        fn try_from(r: PostRow) -> RepoResult<Self> {
            Ok(Post {
                id: parse_id(&r.id)?,
                title: r.title,
                content: r.content,
                author: r.author,
                created_at: r.created_at,
                updated_at: r.updated_at,
                image_url: r.image_url,
            })
        }
    }

    #[derive(FromRow)]
    struct CommentRow {
        id: String,
        post_id: String,
        content: String,
        author: String,
        created_at: DateTime<Utc>,
        parent_id: Option<String>,
    }

    impl TryFrom<CommentRow> for Comment {
        type Error = RepoError;
        fn try_from(r: CommentRow) -> RepoResult<Self> {
            Ok(Comment {
                id: parse_id(&r.id)?,
                post_id: parse_id(&r.post_id)?,
                content: r.content,
                author: r.author,
                created_at: r.created_at,
                parent_id: r.parent_id.as_deref().map(parse_id).transpose()?,
            })
        }
    }

    #[derive(FromRow)]
    struct EdgeRow {
        id: String,
        post_id: String,
        user_id: String,
        created_at: DateTime<Utc>,
    }

    impl TryFrom<EdgeRow> for Edge {
        type Error = RepoError;
        fn try_from(r: EdgeRow) -> RepoResult<Self> {
            Ok(Edge {
                id: parse_id(&r.id)?,
                post_id: parse_id(&r.post_id)?,
                user_id: r.user_id,
                created_at: r.created_at,
            })
        }
    }

    #[derive(FromRow)]
    struct ToggleRow {
        #[sqlx(flatten)]
        edge: EdgeRow,
        active: bool,
    }

    fn convert<R, T: TryFrom<R, Error = RepoError>>(rows: Vec<R>) -> RepoResult<Vec<T>> {
        rows.into_iter().map(T::try_from).collect()
    }

    const POST_COLUMNS: &str = "id, title, content, author, created_at, updated_at, image_url";
    const COMMENT_COLUMNS: &str = "id, post_id, content, author, created_at, parent_id";
    const EDGE_COLUMNS: &str = "id, post_id, user_id, created_at";

    /// Postgres-backed record store. The pool is created by the caller at
    /// startup and shared by every request.
    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(&self, limit: Option<usize>) -> RepoResult<Vec<Post>> {
            let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
            let rows = sqlx::query_as::<_, PostRow>(&format!(
                "SELECT {POST_COLUMNS} FROM posts ORDER BY created_at DESC, id DESC LIMIT $1"
            ))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            convert(rows)
        }

        async fn list_posts_by_author(&self, author: &str) -> RepoResult<Vec<Post>> {
            let rows = sqlx::query_as::<_, PostRow>(&format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE author = $1 ORDER BY created_at DESC, id DESC"
            ))
            .bind(author)
            .fetch_all(&self.pool)
            .await?;
            convert(rows)
        }

        async fn search_posts(&self, query: &str) -> RepoResult<Vec<Post>> {
            let rows = sqlx::query_as::<_, PostRow>(&format!(
                "SELECT {POST_COLUMNS} FROM posts \
                 WHERE title ILIKE $1 ESCAPE '\\' OR content ILIKE $1 ESCAPE '\\' \
                 ORDER BY created_at DESC, id DESC"
            ))
            .bind(like_pattern(query))
            .fetch_all(&self.pool)
            .await?;
            convert(rows)
        }

        async fn get_posts(&self, ids: &[RecordId]) -> RepoResult<Vec<Post>> {
            let keys: Vec<String> = ids.iter().map(ToString::to_string).collect();
            let rows = sqlx::query_as::<_, PostRow>(&format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE id = ANY($1) ORDER BY created_at DESC, id DESC"
            ))
            .bind(&keys)
            .fetch_all(&self.pool)
            .await?;
            convert(rows)
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let row = sqlx::query_as::<_, PostRow>(&format!(
                "INSERT INTO posts (id, title, content, author, created_at, image_url) \
                 VALUES ($1, $2, $3, $4, now(), $5) RETURNING {POST_COLUMNS}"
            ))
            .bind(RecordId::generate(POSTS).to_string())
            .bind(&new.title)
            .bind(&new.content)
            .bind(&new.author)
            .bind(&new.image_url)
            .fetch_one(&self.pool)
            .await?;
            row.try_into()
        }

        async fn get_post(&self, id: &RecordId) -> RepoResult<Post> {
            let row = sqlx::query_as::<_, PostRow>(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1"))
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await?;
            row.try_into()
        }

        async fn update_post(&self, id: &RecordId, upd: PostUpdate) -> RepoResult<Post> {
            // $5 says whether $4 replaces the image (possibly with NULL).
            let (replace_image, image_url) = match upd.image_url {
                Some(url) => (true, url),
                None => (false, None),
            };
            let row = sqlx::query_as::<_, PostRow>(&format!(
                "UPDATE posts SET title = $2, content = $3, \
                 image_url = CASE WHEN $5 THEN $4 ELSE image_url END, updated_at = $6 \
                 WHERE id = $1 RETURNING {POST_COLUMNS}"
            ))
            .bind(id.to_string())
            .bind(&upd.title)
            .bind(&upd.content)
            .bind(image_url)
            .bind(replace_image)
            .bind(upd.updated_at)
            .fetch_one(&self.pool)
            .await?;
            row.try_into()
        }

        async fn delete_post(&self, id: &RecordId) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(&self, post_id: &RecordId) -> RepoResult<Vec<Comment>> {
            let rows = sqlx::query_as::<_, CommentRow>(&format!(
                "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1 ORDER BY created_at DESC, id DESC"
            ))
            .bind(post_id.to_string())
            .fetch_all(&self.pool)
            .await?;
            convert(rows)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let row = sqlx::query_as::<_, CommentRow>(&format!(
                "INSERT INTO comments (id, post_id, content, author, created_at, parent_id) \
                 VALUES ($1, $2, $3, $4, now(), $5) RETURNING {COMMENT_COLUMNS}"
            ))
            .bind(RecordId::generate(COMMENTS).to_string())
            .bind(new.post_id.to_string())
            .bind(&new.content)
            .bind(&new.author)
            .bind(new.parent_id.as_ref().map(ToString::to_string))
            .fetch_one(&self.pool)
            .await?;
            row.try_into()
        }

        async fn get_comment(&self, id: &RecordId) -> RepoResult<Comment> {
            let row = sqlx::query_as::<_, CommentRow>(&format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1"))
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await?;
            row.try_into()
        }

        async fn delete_comment(&self, id: &RecordId) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM comments WHERE id = $1")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }
    }

    // Table names come from EdgeKind::collection, never from request input.
    #[async_trait]
    impl EdgeRepo for PgRepo {
        async fn find_edges(&self, kind: EdgeKind, post_id: &RecordId, user_id: Option<&str>) -> RepoResult<Vec<Edge>> {
            let rows = sqlx::query_as::<_, EdgeRow>(&format!(
                "SELECT {EDGE_COLUMNS} FROM {} WHERE post_id = $1 AND ($2::TEXT IS NULL OR user_id = $2)",
                kind.collection()
            ))
            .bind(post_id.to_string())
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            convert(rows)
        }

        async fn list_edges(&self, kind: EdgeKind) -> RepoResult<Vec<Edge>> {
            let rows = sqlx::query_as::<_, EdgeRow>(&format!("SELECT {EDGE_COLUMNS} FROM {}", kind.collection()))
                .fetch_all(&self.pool)
                .await?;
            convert(rows)
        }

        async fn list_user_edges(&self, kind: EdgeKind, user_id: &str) -> RepoResult<Vec<Edge>> {
            let rows = sqlx::query_as::<_, EdgeRow>(&format!(
                "SELECT {EDGE_COLUMNS} FROM {} WHERE user_id = $1 ORDER BY created_at DESC",
                kind.collection()
            ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            convert(rows)
        }

        async fn create_edge(&self, kind: EdgeKind, post_id: &RecordId, user_id: &str) -> RepoResult<Edge> {
            let row = sqlx::query_as::<_, EdgeRow>(&format!(
                "INSERT INTO {} (id, post_id, user_id, created_at) VALUES ($1, $2, $3, now()) RETURNING {EDGE_COLUMNS}",
                kind.collection()
            ))
            .bind(RecordId::generate(kind.collection()).to_string())
            .bind(post_id.to_string())
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
            row.try_into()
        }

        async fn delete_edge(&self, kind: EdgeKind, id: &RecordId) -> RepoResult<()> {
            let res = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", kind.collection()))
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
            if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
            Ok(())
        }

        // Single statement: delete the edge if present, otherwise insert it.
        // The unique (post_id, user_id) index turns a concurrent double insert
        // into a no-op for the loser.
        async fn toggle_edge(&self, kind: EdgeKind, post_id: &RecordId, user_id: &str) -> RepoResult<EdgeToggle> {
            let table = kind.collection();
            let rows = sqlx::query_as::<_, ToggleRow>(&format!(
                "WITH removed AS ( \
                     DELETE FROM {table} WHERE post_id = $1 AND user_id = $2 RETURNING {EDGE_COLUMNS} \
                 ), added AS ( \
                     INSERT INTO {table} (id, post_id, user_id, created_at) \
                     SELECT $3, $1, $2, now() WHERE NOT EXISTS (SELECT 1 FROM removed) \
                     ON CONFLICT (post_id, user_id) DO NOTHING \
                     RETURNING {EDGE_COLUMNS} \
                 ) \
                 SELECT {EDGE_COLUMNS}, FALSE AS active FROM removed \
                 UNION ALL \
                 SELECT {EDGE_COLUMNS}, TRUE AS active FROM added"
            ))
            .bind(post_id.to_string())
            .bind(user_id)
            .bind(RecordId::generate(table).to_string())
            .fetch_all(&self.pool)
            .await?;

            match rows.into_iter().next() {
                Some(ToggleRow { edge, active: true }) => Ok(EdgeToggle::Added(edge.try_into()?)),
                Some(ToggleRow { edge, active: false }) => Ok(EdgeToggle::Removed(edge.try_into()?)),
                // Lost the insert race: a concurrent request created the edge.
                None => {
                    let existing = self.find_edges(kind, post_id, Some(user_id)).await?;
                    existing.into_iter().next().map(EdgeToggle::Added).ok_or(RepoError::Conflict)
                }
            }
        }
    }

}
