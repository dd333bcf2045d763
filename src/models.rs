use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

// Collection names double as the prefix of every record key.
pub const POSTS: &str = "posts";
pub const COMMENTS: &str = "comments";
pub const LIKES: &str = "likes";
pub const FAVORITES: &str = "favorites";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordIdError {
    #[error("record id is empty")]
    Empty,
    #[error("record id must look like `collection:identifier`, got `{0}`")]
    Malformed(String),
    #[error("expected a `{expected}` id, got one from `{found}`")]
    WrongCollection { expected: String, found: String },
}

/// Composite record key `collection:identifier`.
///
/// Path segments carry only the identifier half; [`RecordId::in_collection`]
/// re-attaches the prefix (and accepts an already-prefixed value).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    collection: String,
    key: String,
}

impl RecordId {
    pub fn new(collection: &str, key: &str) -> Result<Self, RecordIdError> {
        if key.is_empty() {
            return Err(RecordIdError::Empty);
        }
        if !is_valid_segment(collection) || !is_valid_segment(key) {
            return Err(RecordIdError::Malformed(format!("{collection}:{key}")));
        }
        Ok(Self { collection: collection.to_string(), key: key.to_string() })
    }

    /// Fresh store-generated key.
    pub fn generate(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            key: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    /// Accepts `abc` or `posts:abc` for `collection = "posts"`.
    pub fn in_collection(collection: &str, raw: &str) -> Result<Self, RecordIdError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RecordIdError::Empty);
        }
        match raw.split_once(':') {
            None => Self::new(collection, raw),
            Some((found, key)) if found == collection => Self::new(collection, key),
            Some((found, _)) => Err(RecordIdError::WrongCollection {
                expected: collection.to_string(),
                found: found.to_string(),
            }),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

fn is_valid_segment(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection, self.key)
    }
}

impl FromStr for RecordId {
    type Err = RecordIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(RecordIdError::Empty);
        }
        let (collection, key) = s
            .split_once(':')
            .ok_or_else(|| RecordIdError::Malformed(s.to_string()))?;
        Self::new(collection, key)
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Post {
    #[schema(value_type = String, example = "posts:8f14e45fceea167a5a36dedd4bea2543")]
    pub id: RecordId,
    pub title: String,
    pub content: String,
    /// Subject id of the author; never changes after creation.
    pub author: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub author: String,
    pub image_url: Option<String>,
}

/// Field merge applied by `PostRepo::update_post`.
#[derive(Debug, Clone)]
pub struct PostUpdate {
    pub title: String,
    pub content: String,
    /// `None` keeps the current image, `Some(None)` clears it.
    pub image_url: Option<Option<String>>,
    pub updated_at: DateTime<Utc>,
}

impl PostUpdate {
    pub fn apply(self, post: &mut Post) {
        post.title = self.title;
        post.content = self.content;
        if let Some(image_url) = self.image_url {
            post.image_url = image_url;
        }
        post.updated_at = Some(self.updated_at);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Comment {
    #[schema(value_type = String)]
    pub id: RecordId,
    #[serde(rename = "postId")]
    #[schema(value_type = String)]
    pub post_id: RecordId,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "parentId", default)]
    #[schema(value_type = Option<String>)]
    pub parent_id: Option<RecordId>,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: RecordId,
    pub content: String,
    pub author: String,
    pub parent_id: Option<RecordId>,
}

/// The two engagement collections share one record shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Like,
    Favorite,
}

impl EdgeKind {
    pub fn collection(self) -> &'static str {
        match self {
            EdgeKind::Like => LIKES,
            EdgeKind::Favorite => FAVORITES,
        }
    }
}

/// A Like or Favorite record linking one subject to one post.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Edge {
    #[schema(value_type = String)]
    pub id: RecordId,
    #[serde(rename = "postId")]
    #[schema(value_type = String)]
    pub post_id: RecordId,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum EdgeToggle {
    Added(Edge),
    Removed(Edge),
}

impl EdgeToggle {
    pub fn is_active(&self) -> bool {
        matches!(self, EdgeToggle::Added(_))
    }
}

/// Post as returned to clients: author display name plus optional
/// per-endpoint extras.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostView {
    #[schema(value_type = String)]
    pub id: RecordId,
    pub title: String,
    pub content: String,
    pub author: String,
    #[serde(rename = "authorName")]
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
    #[serde(rename = "likesCount", skip_serializing_if = "Option::is_none", default)]
    pub likes_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub favorited_at: Option<DateTime<Utc>>,
}

impl PostView {
    pub fn new(post: Post, author_name: String) -> Self {
        Self {
            id: post.id,
            title: post.title,
            content: post.content,
            author: post.author,
            author_name,
            created_at: post.created_at,
            updated_at: post.updated_at,
            image_url: post.image_url,
            likes_count: None,
            favorited_at: None,
        }
    }
}
