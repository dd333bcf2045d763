use std::collections::HashMap;
use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::Auth;
use crate::comments::{self, CommentNode};
use crate::engagement;
use crate::error::{ApiError, ApiErrorBody};
use crate::feed::{self, TOP_POSTS};
use crate::identity::{DisplayNames, IdentityGateway, UserProfileView};
use crate::media::MediaHost;
use crate::models::*;
use crate::repo::Repo;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .app_data(web::JsonConfig::default().error_handler(|err, _| ApiError::InvalidInput(err.to_string()).into()))
            .app_data(web::QueryConfig::default().error_handler(|err, _| ApiError::InvalidInput(err.to_string()).into()))
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            // literal segments first, `/posts/{id}` would swallow them
            .service(web::resource("/posts/search").route(web::get().to(search_posts)))
            .service(web::resource("/posts/top").route(web::get().to(top_posts)))
            .service(web::resource("/posts/by-author/{authorId}").route(web::get().to(posts_by_author)))
            .service(web::resource("/posts/{id}").route(web::get().to(get_post)))
            .service(web::resource("/posts/{id}/update").route(web::put().to(update_post)))
            .service(web::resource("/posts/{id}/delete").route(web::delete().to(delete_post)))
            .service(web::resource("/user-posts").route(web::get().to(user_posts)))
            .service(
                web::resource("/likes/{postId}")
                    .route(web::post().to(toggle_like))
                    .route(web::get().to(like_status)),
            )
            .service(web::resource("/favorites/user").route(web::get().to(user_favorites)))
            .service(
                web::resource("/favorites/{postId}")
                    .route(web::post().to(toggle_favorite))
                    .route(web::get().to(favorite_status)),
            )
            .service(web::resource("/comments").route(web::post().to(create_comment)))
            .service(web::resource("/comments/post/{postId}").route(web::get().to(list_comments)))
            .service(web::resource("/comments/{commentId}").route(web::delete().to(delete_comment)))
            .service(web::resource("/upload-image").route(web::post().to(upload_image)))
            .service(web::resource("/users/{userId}").route(web::get().to(get_user_profile))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub identity: Arc<dyn IdentityGateway>,
    pub media: Arc<dyn MediaHost>,
}

fn post_key(raw: &str) -> Result<RecordId, ApiError> {
    Ok(RecordId::in_collection(POSTS, raw)?)
}

fn required(field: Option<String>, name: &str) -> Result<String, ApiError> {
    field
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidInput(format!("{name} is required")))
}

// ---------------- Posts ----------------

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Maximum number of posts; `0` or absent means all.
    pub limit: Option<usize>,
}

#[utoipa::path(
    get,
    path = "/api/posts",
    params(ListQuery),
    responses((status = 200, description = "Posts, newest first", body = [PostView]))
)]
pub async fn list_posts(
    _auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = query.limit.filter(|&n| n > 0);
    let posts = data.repo.list_posts(limit).await?;
    Ok(HttpResponse::Ok().json(feed::with_author_names(data.identity.as_ref(), posts).await))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/posts/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Posts whose title or content contains `q`, newest first", body = [PostView]),
        (status = 401, description = "Not signed in", body = ApiErrorBody)
    )
)]
pub async fn search_posts(
    _auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.q.as_deref().map(str::trim).unwrap_or_default();
    if q.is_empty() {
        return Ok(HttpResponse::Ok().json(Vec::<PostView>::new()));
    }
    let posts = data.repo.search_posts(q).await?;
    Ok(HttpResponse::Ok().json(feed::with_author_names(data.identity.as_ref(), posts).await))
}

#[utoipa::path(
    get,
    path = "/api/posts/top",
    responses((status = 200, description = "Most liked posts with `likesCount`", body = [PostView]))
)]
pub async fn top_posts(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let top = feed::top_posts(data.repo.as_ref(), data.identity.as_ref(), TOP_POSTS).await?;
    Ok(HttpResponse::Ok().json(top))
}

#[utoipa::path(
    get,
    path = "/api/posts/by-author/{authorId}",
    params(("authorId" = String, Path, description = "Author subject id")),
    responses((status = 200, description = "The author's posts, newest first", body = [PostView]))
)]
pub async fn posts_by_author(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_posts_by_author(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(feed::with_author_names(data.identity.as_ref(), posts).await))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = CreatePostRequest,
    responses(
        (status = 201, description = "Post created", body = Post),
        (status = 400, description = "Missing title or content", body = ApiErrorBody),
        (status = 401, description = "Not signed in", body = ApiErrorBody)
    )
)]
pub async fn create_post(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CreatePostRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let new = NewPost {
        title: required(req.title, "title")?,
        content: required(req.content, "content")?,
        author: auth.0.subject,
        image_url: req.image_url.filter(|u| !u.trim().is_empty()),
    };
    let post = data.repo.create_post(new).await?;
    tracing::info!(post = %post.id, author = %post.author, "post created");
    Ok(HttpResponse::Created().json(post))
}

#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = String, Path, description = "Post id, bare or `posts:`-prefixed")),
    responses(
        (status = 200, description = "Post with author name", body = PostView),
        (status = 400, description = "Malformed id", body = ApiErrorBody),
        (status = 401, description = "Not signed in", body = ApiErrorBody),
        (status = 404, description = "No such post", body = ApiErrorBody)
    )
)]
pub async fn get_post(_auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post(&post_key(&path)?).await?;
    let names = DisplayNames::resolve(data.identity.as_ref(), [post.author.as_str()]).await;
    let name = names.name_for(&post.author);
    Ok(HttpResponse::Ok().json(PostView::new(post, name)))
}

fn nullable<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    /// Omit to keep the current image, `null` to remove it.
    #[serde(rename = "imageUrl", default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub image_url: Option<Option<String>>,
}

#[utoipa::path(
    put,
    path = "/api/posts/{id}/update",
    params(("id" = String, Path, description = "Post id")),
    request_body = UpdatePostRequest,
    responses(
        (status = 200, description = "Updated post", body = Post),
        (status = 400, description = "Missing title or content", body = ApiErrorBody),
        (status = 401, description = "Not signed in", body = ApiErrorBody),
        (status = 403, description = "Caller is not the author", body = ApiErrorBody),
        (status = 404, description = "No such post", body = ApiErrorBody)
    )
)]
pub async fn update_post(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdatePostRequest>,
) -> Result<HttpResponse, ApiError> {
    let id = post_key(&path)?;
    let req = payload.into_inner();
    let upd = PostUpdate {
        title: required(req.title, "title")?,
        content: required(req.content, "content")?,
        image_url: req.image_url,
        updated_at: Utc::now(),
    };
    let current = data.repo.get_post(&id).await?;
    // no admin override for edits
    if current.author != auth.0.subject {
        return Err(ApiError::Forbidden);
    }
    let post = data.repo.update_post(&id, upd).await?;
    Ok(HttpResponse::Ok().json(post))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Deleted {
    pub message: String,
    #[schema(value_type = String)]
    pub id: RecordId,
}

#[utoipa::path(
    delete,
    path = "/api/posts/{id}/delete",
    params(("id" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post deleted", body = Deleted),
        (status = 401, description = "Not signed in", body = ApiErrorBody),
        (status = 403, description = "Neither author nor admin", body = ApiErrorBody),
        (status = 404, description = "No such post", body = ApiErrorBody)
    )
)]
pub async fn delete_post(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let id = post_key(&path)?;
    let post = data.repo.get_post(&id).await?;
    if post.author != auth.0.subject && !auth.0.is_admin {
        return Err(ApiError::Forbidden);
    }
    data.repo.delete_post(&id).await?;
    tracing::info!(post = %id, by = %auth.0.subject, admin = auth.0.is_admin, "post deleted");
    Ok(HttpResponse::Ok().json(Deleted { message: "Post deleted".into(), id }))
}

#[utoipa::path(
    get,
    path = "/api/user-posts",
    responses(
        (status = 200, description = "The caller's posts, newest first", body = [PostView]),
        (status = 401, description = "Not signed in", body = ApiErrorBody)
    )
)]
pub async fn user_posts(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let posts = data.repo.list_posts_by_author(&auth.0.subject).await?;
    Ok(HttpResponse::Ok().json(feed::with_author_names(data.identity.as_ref(), posts).await))
}

// ---------------- Likes & favorites ----------------

#[derive(Debug, Serialize, ToSchema)]
pub struct LikeToggled {
    pub message: String,
    pub liked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like: Option<Edge>,
    #[serde(rename = "likesCount")]
    pub likes_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LikeStatus {
    #[serde(rename = "likesCount")]
    pub likes_count: usize,
    #[serde(rename = "userLiked")]
    pub user_liked: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FavoriteToggled {
    pub message: String,
    pub favorited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite: Option<Edge>,
    #[serde(rename = "favoritesCount")]
    pub favorites_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FavoriteStatus {
    #[serde(rename = "favoritesCount")]
    pub favorites_count: usize,
    #[serde(rename = "userFavorited")]
    pub user_favorited: bool,
}

#[utoipa::path(
    post,
    path = "/api/likes/{postId}",
    params(("postId" = String, Path, description = "Post id")),
    responses(
        (status = 201, description = "Like added", body = LikeToggled),
        (status = 200, description = "Like removed", body = LikeToggled),
        (status = 401, description = "Not signed in", body = ApiErrorBody)
    )
)]
pub async fn toggle_like(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let id = post_key(&path)?;
    let out = engagement::toggle(data.repo.as_ref(), EdgeKind::Like, &id, &auth.0.subject).await?;
    Ok(match out.toggle {
        EdgeToggle::Added(edge) => HttpResponse::Created().json(LikeToggled {
            message: "Like added".into(),
            liked: true,
            like: Some(edge),
            likes_count: out.count,
        }),
        EdgeToggle::Removed(_) => HttpResponse::Ok().json(LikeToggled {
            message: "Like removed".into(),
            liked: false,
            like: None,
            likes_count: out.count,
        }),
    })
}

#[utoipa::path(
    get,
    path = "/api/likes/{postId}",
    params(("postId" = String, Path, description = "Post id")),
    responses((status = 200, description = "Like count and whether the caller liked it", body = LikeStatus))
)]
pub async fn like_status(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = post_key(&path)?;
    let viewer = auth.as_ref().map(|a| a.0.subject.as_str());
    let status = engagement::status(data.repo.as_ref(), EdgeKind::Like, &id, viewer).await?;
    Ok(HttpResponse::Ok().json(LikeStatus { likes_count: status.count, user_liked: status.active }))
}

#[utoipa::path(
    post,
    path = "/api/favorites/{postId}",
    params(("postId" = String, Path, description = "Post id")),
    responses(
        (status = 201, description = "Added to favorites", body = FavoriteToggled),
        (status = 200, description = "Removed from favorites", body = FavoriteToggled),
        (status = 401, description = "Not signed in", body = ApiErrorBody)
    )
)]
pub async fn toggle_favorite(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = post_key(&path)?;
    let out = engagement::toggle(data.repo.as_ref(), EdgeKind::Favorite, &id, &auth.0.subject).await?;
    Ok(match out.toggle {
        EdgeToggle::Added(edge) => HttpResponse::Created().json(FavoriteToggled {
            message: "Added to favorites".into(),
            favorited: true,
            favorite: Some(edge),
            favorites_count: out.count,
        }),
        EdgeToggle::Removed(_) => HttpResponse::Ok().json(FavoriteToggled {
            message: "Removed from favorites".into(),
            favorited: false,
            favorite: None,
            favorites_count: out.count,
        }),
    })
}

#[utoipa::path(
    get,
    path = "/api/favorites/{postId}",
    params(("postId" = String, Path, description = "Post id")),
    responses((status = 200, description = "Favorite count and whether the caller favorited it", body = FavoriteStatus))
)]
pub async fn favorite_status(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = post_key(&path)?;
    let viewer = auth.as_ref().map(|a| a.0.subject.as_str());
    let status = engagement::status(data.repo.as_ref(), EdgeKind::Favorite, &id, viewer).await?;
    Ok(HttpResponse::Ok().json(FavoriteStatus { favorites_count: status.count, user_favorited: status.active }))
}

fn mentions(post: &Post, needle: &str) -> bool {
    post.title.to_lowercase().contains(needle) || post.content.to_lowercase().contains(needle)
}

#[utoipa::path(
    get,
    path = "/api/favorites/user",
    params(SearchQuery),
    responses(
        (status = 200, description = "Posts the caller favorited, most recent favorite first", body = [PostView]),
        (status = 401, description = "Not signed in", body = ApiErrorBody)
    )
)]
pub async fn user_favorites(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let edges = data.repo.list_user_edges(EdgeKind::Favorite, &auth.0.subject).await?;
    // earliest edge wins if a duplicate slipped in
    let mut favorited_at: HashMap<RecordId, DateTime<Utc>> = HashMap::new();
    for e in edges {
        favorited_at
            .entry(e.post_id)
            .and_modify(|t| *t = (*t).min(e.created_at))
            .or_insert(e.created_at);
    }
    if favorited_at.is_empty() {
        return Ok(HttpResponse::Ok().json(Vec::<PostView>::new()));
    }

    let ids: Vec<RecordId> = favorited_at.keys().cloned().collect();
    let mut posts = data.repo.get_posts(&ids).await?;
    let needle = query.q.as_deref().map(str::trim).unwrap_or_default().to_lowercase();
    if !needle.is_empty() {
        posts.retain(|p| mentions(p, &needle));
    }

    let mut views = feed::with_author_names(data.identity.as_ref(), posts).await;
    for v in &mut views {
        v.favorited_at = favorited_at.get(&v.id).copied();
    }
    views.sort_by(|a, b| b.favorited_at.cmp(&a.favorited_at));
    Ok(HttpResponse::Ok().json(views))
}

// ---------------- Comments ----------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCommentRequest {
    #[serde(rename = "postId")]
    pub post_id: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/comments",
    request_body = CreateCommentRequest,
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Missing postId or content", body = ApiErrorBody),
        (status = 401, description = "Not signed in", body = ApiErrorBody)
    )
)]
pub async fn create_comment(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<CreateCommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let post_id = post_key(&required(req.post_id, "postId")?)?;
    let content = required(req.content, "content")?;
    let parent_id = match req.parent_id.filter(|p| !p.trim().is_empty()) {
        Some(raw) => Some(RecordId::in_collection(COMMENTS, &raw)?),
        None => None,
    };
    let comment = data
        .repo
        .create_comment(NewComment { post_id, content, author: auth.0.subject, parent_id })
        .await?;
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    get,
    path = "/api/comments/post/{postId}",
    params(("postId" = String, Path, description = "Post id")),
    responses(
        (status = 200, description = "Root comments with nested replies", body = [CommentNode]),
        (status = 401, description = "Not signed in", body = ApiErrorBody)
    )
)]
pub async fn list_comments(_auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let id = post_key(&path)?;
    let forest = comments::load_forest(data.repo.as_ref(), data.identity.as_ref(), &id).await?;
    Ok(HttpResponse::Ok().json(forest))
}

#[utoipa::path(
    delete,
    path = "/api/comments/{commentId}",
    params(("commentId" = String, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment deleted", body = Deleted),
        (status = 401, description = "Not signed in", body = ApiErrorBody),
        (status = 403, description = "Caller is not the author", body = ApiErrorBody),
        (status = 404, description = "No such comment", body = ApiErrorBody)
    )
)]
pub async fn delete_comment(auth: Auth, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let id = RecordId::in_collection(COMMENTS, &path)?;
    let comment = data.repo.get_comment(&id).await?;
    // admins get no override here
    if comment.author != auth.0.subject {
        return Err(ApiError::Forbidden);
    }
    data.repo.delete_comment(&id).await?;
    Ok(HttpResponse::Ok().json(Deleted { message: "Comment deleted".into(), id }))
}

// ---------------- Media ----------------

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub url: String,
}

pub const IMAGE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MiB
const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];
const UPLOAD_FIELDS: &[&str] = &["image", "file"];

#[utoipa::path(
    post,
    path = "/api/upload-image",
    responses(
        (status = 200, description = "Image hosted", body = UploadResponse),
        (status = 400, description = "No file field in the form", body = ApiErrorBody),
        (status = 413, description = "Payload too large", body = ApiErrorBody),
        (status = 415, description = "Unsupported media type", body = ApiErrorBody)
    )
)]
pub async fn upload_image(data: web::Data<AppState>, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    while let Some(mut field) = payload.try_next().await.map_err(|e| ApiError::InvalidInput(e.to_string()))? {
        let wanted = field.content_disposition().get_name().map_or(false, |n| UPLOAD_FIELDS.contains(&n));
        if !wanted {
            continue;
        }
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| ApiError::InvalidInput(e.to_string()))? {
            if bytes.len() + chunk.len() > IMAGE_SIZE_LIMIT {
                return Err(ApiError::PayloadTooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(ApiError::InvalidInput("uploaded file is empty".into()));
        }
        let mime = infer::get(&bytes).map(|t| t.mime_type()).unwrap_or("application/octet-stream");
        if !ALLOWED_MIME.contains(&mime) {
            return Err(ApiError::UnsupportedMedia(mime.to_string()));
        }
        let url = data.media.upload(&bytes, mime).await?;
        tracing::info!(%url, size = bytes.len(), mime, "image uploaded");
        return Ok(HttpResponse::Ok().json(UploadResponse { url }));
    }
    Err(ApiError::InvalidInput("No file uploaded".into()))
}

// ---------------- Users ----------------

#[utoipa::path(
    get,
    path = "/api/users/{userId}",
    params(("userId" = String, Path, description = "Subject id")),
    responses(
        (status = 200, description = "Public profile", body = UserProfileView),
        (status = 404, description = "Unknown user", body = ApiErrorBody)
    )
)]
pub async fn get_user_profile(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let profile = data.identity.get_user(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(UserProfileView::from(profile)))
}
