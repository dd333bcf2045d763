//! Like / Favorite toggles and their counts.

use std::collections::HashSet;

use crate::models::{Edge, EdgeKind, EdgeToggle, RecordId};
use crate::repo::{EdgeRepo, RepoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngagementStatus {
    pub count: usize,
    /// Always false for anonymous viewers.
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ToggleOutcome {
    pub toggle: EdgeToggle,
    pub count: usize,
}

impl ToggleOutcome {
    pub fn is_active(&self) -> bool {
        self.toggle.is_active()
    }
}

/// Edges counted once per subject, so a duplicate edge never inflates a
/// count.
pub fn distinct_subjects(edges: &[Edge]) -> usize {
    edges.iter().map(|e| e.user_id.as_str()).collect::<HashSet<_>>().len()
}

pub async fn toggle<R: EdgeRepo + ?Sized>(
    repo: &R,
    kind: EdgeKind,
    post_id: &RecordId,
    user_id: &str,
) -> RepoResult<ToggleOutcome> {
    let toggle = repo.toggle_edge(kind, post_id, user_id).await?;
    // Second round trip; concurrent toggles by others can land in between.
    let count = distinct_subjects(&repo.find_edges(kind, post_id, None).await?);
    tracing::debug!(?kind, post = %post_id, active = toggle.is_active(), count, "edge toggled");
    Ok(ToggleOutcome { toggle, count })
}

pub async fn status<R: EdgeRepo + ?Sized>(
    repo: &R,
    kind: EdgeKind,
    post_id: &RecordId,
    viewer: Option<&str>,
) -> RepoResult<EngagementStatus> {
    let edges = repo.find_edges(kind, post_id, None).await?;
    let active = viewer.map_or(false, |v| edges.iter().any(|e| e.user_id == v));
    Ok(EngagementStatus { count: distinct_subjects(&edges), active })
}
