//! Post listings: author-name enrichment and the "top posts" ranking.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::identity::{DisplayNames, IdentityGateway};
use crate::models::{Edge, Post, PostView, RecordId};
use crate::repo::{Repo, RepoResult};

pub const TOP_POSTS: usize = 3;

/// Attach author display names with one gateway round trip.
pub async fn with_author_names(gateway: &dyn IdentityGateway, posts: Vec<Post>) -> Vec<PostView> {
    let names = DisplayNames::resolve(gateway, posts.iter().map(|p| p.author.as_str())).await;
    posts
        .into_iter()
        .map(|p| {
            let name = names.name_for(&p.author);
            PostView::new(p, name)
        })
        .collect()
}

/// Likes per post, one per `(post, subject)` pair.
pub fn like_counts(likes: &[Edge]) -> HashMap<RecordId, usize> {
    let mut seen = HashSet::new();
    let mut counts = HashMap::new();
    for like in likes {
        if seen.insert((&like.post_id, like.user_id.as_str())) {
            *counts.entry(like.post_id.clone()).or_insert(0) += 1;
        }
    }
    counts
}

fn by_engagement(a: &(Post, usize), b: &(Post, usize)) -> Ordering {
    b.1.cmp(&a.1)
        .then_with(|| a.0.created_at.cmp(&b.0.created_at))
        .then_with(|| a.0.id.cmp(&b.0.id))
}

fn displayable(post: &Post) -> bool {
    !post.title.trim().is_empty() && !post.author.is_empty()
}

/// Most liked first; equal counts go to the older post. Truncation happens
/// before undisplayable posts are discarded, so fewer than `n` can come
/// back.
pub fn rank_top(posts: Vec<Post>, counts: &HashMap<RecordId, usize>, n: usize) -> Vec<(Post, usize)> {
    let mut scored: Vec<(Post, usize)> = posts
        .into_iter()
        .map(|p| {
            let likes = counts.get(&p.id).copied().unwrap_or(0);
            (p, likes)
        })
        .collect();
    scored.sort_by(by_engagement);
    scored.truncate(n);
    scored.retain(|(p, _)| displayable(p));
    scored
}

pub async fn top_posts(repo: &dyn Repo, gateway: &dyn IdentityGateway, n: usize) -> RepoResult<Vec<PostView>> {
    let counts = like_counts(&repo.list_edges(crate::models::EdgeKind::Like).await?);
    let posts = repo.list_posts(None).await?;
    let ranked = rank_top(posts, &counts, n);
    let names = DisplayNames::resolve(gateway, ranked.iter().map(|(p, _)| p.author.as_str())).await;
    Ok(ranked
        .into_iter()
        .map(|(p, likes)| {
            let name = names.name_for(&p.author);
            PostView { likes_count: Some(likes), ..PostView::new(p, name) }
        })
        .collect())
}
