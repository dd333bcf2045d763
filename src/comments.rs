//! Flat comment records → reply forest.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::identity::{DisplayNames, IdentityGateway};
use crate::models::{Comment, RecordId};
use crate::repo::{CommentRepo, RepoResult};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentNode {
    #[schema(value_type = String)]
    pub id: RecordId,
    #[serde(rename = "postId")]
    #[schema(value_type = String)]
    pub post_id: RecordId,
    pub content: String,
    pub author: String,
    #[serde(rename = "authorName")]
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "parentId")]
    #[schema(value_type = Option<String>)]
    pub parent_id: Option<RecordId>,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    fn new(c: Comment, author_name: String, replies: Vec<CommentNode>) -> Self {
        Self {
            id: c.id,
            post_id: c.post_id,
            content: c.content,
            author: c.author,
            author_name,
            created_at: c.created_at,
            parent_id: c.parent_id,
            replies,
        }
    }
}

/// Builds the reply forest for one post.
///
/// Comments without a parent become roots; every other comment is attached
/// to its parent's `replies`, keeping input order. A comment whose parent is
/// not in `comments` is dropped along with its whole subtree, and so is
/// anything caught in a parent cycle: neither is reachable from a root.
pub fn assemble(comments: Vec<Comment>, name_for: impl Fn(&str) -> String) -> Vec<CommentNode> {
    let index: HashMap<RecordId, usize> =
        comments.iter().enumerate().map(|(i, c)| (c.id.clone(), i)).collect();

    let mut roots = Vec::new();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); comments.len()];
    for (i, c) in comments.iter().enumerate() {
        match &c.parent_id {
            None => roots.push(i),
            Some(parent) => {
                if let Some(&p) = index.get(parent) {
                    children[p].push(i);
                }
            }
        }
    }

    // Pre-order walk from the roots; building in reverse guarantees every
    // child exists before its parent. No recursion, so deep reply chains are
    // fine.
    let mut order = Vec::with_capacity(comments.len());
    let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
    while let Some(i) = stack.pop() {
        order.push(i);
        stack.extend(children[i].iter().rev().copied());
    }

    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut built: Vec<Option<CommentNode>> = (0..slots.len()).map(|_| None).collect();
    for &i in order.iter().rev() {
        let Some(comment) = slots[i].take() else { continue };
        let replies = children[i].iter().filter_map(|&c| built[c].take()).collect();
        let name = name_for(&comment.author);
        built[i] = Some(CommentNode::new(comment, name, replies));
    }

    roots.into_iter().filter_map(|r| built[r].take()).collect()
}

/// Fetches, names and assembles the comments of `post_id`.
pub async fn load_forest<R: CommentRepo + ?Sized>(
    repo: &R,
    gateway: &dyn IdentityGateway,
    post_id: &RecordId,
) -> RepoResult<Vec<CommentNode>> {
    let comments = repo.list_comments(post_id).await?;
    let names = DisplayNames::resolve(gateway, comments.iter().map(|c| c.author.as_str())).await;
    Ok(assemble(comments, |subject| names.name_for(subject)))
}
