use utoipa::OpenApi;

use crate::comments::CommentNode;
use crate::error::ApiErrorBody;
use crate::identity::UserProfileView;
use crate::models::{Comment, Edge, Post, PostView};
use crate::routes::{
    CreateCommentRequest, CreatePostRequest, Deleted, FavoriteStatus, FavoriteToggled, LikeStatus, LikeToggled,
    UpdatePostRequest, UploadResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_posts,
        crate::routes::search_posts,
        crate::routes::top_posts,
        crate::routes::posts_by_author,
        crate::routes::create_post,
        crate::routes::get_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::user_posts,
        crate::routes::toggle_like,
        crate::routes::like_status,
        crate::routes::toggle_favorite,
        crate::routes::favorite_status,
        crate::routes::user_favorites,
        crate::routes::create_comment,
        crate::routes::list_comments,
        crate::routes::delete_comment,
        crate::routes::upload_image,
        crate::routes::get_user_profile,
    ),
    components(schemas(
        Post, PostView, Comment, CommentNode, Edge, UserProfileView, ApiErrorBody,
        CreatePostRequest, UpdatePostRequest, CreateCommentRequest, Deleted,
        LikeToggled, LikeStatus, FavoriteToggled, FavoriteStatus, UploadResponse,
    )),
    tags(
        (name = "posts", description = "Posts, search and ranking"),
        (name = "engagement", description = "Likes and favorites"),
        (name = "comments", description = "Threaded comments"),
    )
)]
pub struct ApiDoc;
