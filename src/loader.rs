use std::sync::Arc;

use tracing::{debug, warn};

use crate::data::FeedStore;
use crate::error::FeedError;
use crate::model::{ActorId, Post, PostId, ThreadNode};
use crate::threads::{self, Threads};

/// Posts and their assembled threads, always produced together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub posts: Vec<Post>,
    pub threads: Threads,
}

impl FeedSnapshot {
    pub fn thread(&self, post_id: &PostId) -> &[ThreadNode] {
        self.threads.get(post_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn comment_count(&self) -> usize {
        self.threads
            .values()
            .flatten()
            .map(|node| 1 + node.replies.len())
            .sum()
    }
}

#[derive(Clone)]
pub struct FeedLoader {
    store: Arc<dyn FeedStore>,
}

impl FeedLoader {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    /// Two store round trips at most, however many posts there are.
    pub fn load(&self, viewer: Option<&ActorId>) -> Result<FeedSnapshot, FeedError> {
        let Some(viewer) = viewer else {
            return Err(FeedError::AuthRequired);
        };

        let posts = self.store.fetch_posts().map_err(|err| {
            warn!(%viewer, error = %err, "fetch posts failed");
            err
        })?;
        if posts.is_empty() {
            return Ok(FeedSnapshot::default());
        }

        let ids: Vec<PostId> = posts.iter().map(|post| post.id.clone()).collect();
        let comments = self.store.fetch_comments(&ids).map_err(|err| {
            warn!(%viewer, error = %err, "fetch comments failed");
            err
        })?;

        let assembly = threads::assemble(&posts, &comments);
        debug!(
            %viewer,
            posts = posts.len(),
            comments = comments.len(),
            dropped = assembly.dropped,
            "feed loaded"
        );
        Ok(FeedSnapshot {
            posts,
            threads: assembly.threads,
        })
    }
}
