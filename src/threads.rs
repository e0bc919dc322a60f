use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::model::{Comment, CommentId, Post, PostId, ThreadNode};

pub type Threads = BTreeMap<PostId, Vec<ThreadNode>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembly {
    pub threads: Threads,
    /// Replies whose parent is not a top-level comment on the same post.
    pub dropped: usize,
}

/// Builds the two-level thread for every post. Replies pointing at a parent
/// that is missing, on another post, or itself a reply are dropped.
pub fn assemble(posts: &[Post], comments: &[Comment]) -> Assembly {
    let known: HashSet<&PostId> = posts.iter().map(|post| &post.id).collect();

    let mut by_post: HashMap<&PostId, Vec<&Comment>> = HashMap::new();
    for comment in comments {
        if known.contains(&comment.post_id) {
            by_post.entry(&comment.post_id).or_default().push(comment);
        }
    }

    let mut threads = Threads::new();
    let mut dropped = 0;
    for post in posts {
        let list = by_post.remove(&post.id).unwrap_or_default();
        let (nodes, post_dropped) = assemble_post(list);
        if post_dropped > 0 {
            debug!(post = %post.id, dropped = post_dropped, "dropping dangling replies");
        }
        dropped += post_dropped;
        threads.insert(post.id.clone(), nodes);
    }

    Assembly { threads, dropped }
}

fn assemble_post(list: Vec<&Comment>) -> (Vec<ThreadNode>, usize) {
    let (mut top_level, replies): (Vec<&Comment>, Vec<&Comment>) =
        list.into_iter().partition(|comment| !comment.is_reply());
    top_level.sort_by(|a, b| chronological(a, b));

    let mut children: HashMap<&CommentId, Vec<Comment>> = top_level
        .iter()
        .copied()
        .map(|comment| (&comment.id, Vec::new()))
        .collect();

    let mut dropped = 0;
    for reply in replies {
        let slot = reply
            .parent_id
            .as_ref()
            .and_then(|parent| children.get_mut(parent));
        match slot {
            Some(slot) => slot.push(reply.clone()),
            None => dropped += 1,
        }
    }

    let nodes = top_level
        .into_iter()
        .map(|comment| {
            let mut replies = children.remove(&comment.id).unwrap_or_default();
            replies.sort_by(chronological);
            ThreadNode {
                comment: comment.clone(),
                replies,
            }
        })
        .collect();

    (nodes, dropped)
}

fn chronological(a: &Comment, b: &Comment) -> std::cmp::Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn post(id: &str) -> Post {
        Post {
            id: id.into(),
            author_id: "author".into(),
            body: format!("post {id}"),
            image_url: None,
            created_at: at(0),
            author: None,
        }
    }

    fn comment(id: &str, post: &str, parent: Option<&str>, secs: i64) -> Comment {
        Comment {
            id: id.into(),
            post_id: post.into(),
            author_id: "author".into(),
            body: format!("comment {id}"),
            created_at: at(secs),
            parent_id: parent.map(CommentId::from),
        }
    }

    fn ids(nodes: &[ThreadNode]) -> Vec<(&str, Vec<&str>)> {
        nodes
            .iter()
            .map(|node| {
                (
                    node.comment.id.as_str(),
                    node.replies.iter().map(|r| r.id.as_str()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn reply_nests_under_its_comment() {
        let posts = vec![post("p1")];
        let comments = vec![
            comment("c1", "p1", None, 0),
            comment("r1", "p1", Some("c1"), 5),
        ];
        let assembly = assemble(&posts, &comments);
        assert_eq!(ids(&assembly.threads[&PostId::from("p1")]), vec![("c1", vec!["r1"])]);
        assert_eq!(assembly.dropped, 0);
    }

    #[test]
    fn orders_comments_and_replies_oldest_first() {
        let posts = vec![post("p1")];
        let comments = vec![
            comment("c2", "p1", None, 20),
            comment("r2", "p1", Some("c1"), 15),
            comment("c1", "p1", None, 10),
            comment("r1", "p1", Some("c1"), 11),
            comment("r3", "p1", Some("c1"), 11),
        ];
        let assembly = assemble(&posts, &comments);
        assert_eq!(
            ids(&assembly.threads[&PostId::from("p1")]),
            vec![("c1", vec!["r1", "r3", "r2"]), ("c2", vec![])]
        );
    }

    #[test]
    fn drops_cross_post_missing_and_nested_replies() {
        let posts = vec![post("p1"), post("p2")];
        let comments = vec![
            comment("c1", "p1", None, 0),
            comment("c2", "p2", None, 0),
            comment("cross", "p2", Some("c1"), 1),
            comment("ghost", "p1", Some("nope"), 2),
            comment("r1", "p1", Some("c1"), 3),
            comment("deep", "p1", Some("r1"), 4),
        ];
        let assembly = assemble(&posts, &comments);
        assert_eq!(assembly.dropped, 3);
        assert_eq!(ids(&assembly.threads[&PostId::from("p1")]), vec![("c1", vec!["r1"])]);
        assert_eq!(ids(&assembly.threads[&PostId::from("p2")]), vec![("c2", vec![])]);
    }

    #[test]
    fn every_post_gets_an_entry_and_unknown_posts_are_ignored() {
        let posts = vec![post("p1"), post("p2")];
        let comments = vec![comment("c9", "p9", None, 0)];
        let assembly = assemble(&posts, &comments);
        assert_eq!(assembly.threads.len(), 2);
        assert!(assembly.threads.values().all(Vec::is_empty));
        assert_eq!(assembly.dropped, 0);
    }

    #[test]
    fn assembly_is_deterministic() {
        let posts = vec![post("p1"), post("p2")];
        let mut comments = vec![
            comment("a", "p1", None, 3),
            comment("b", "p1", None, 3),
            comment("c", "p2", None, 1),
            comment("d", "p1", Some("a"), 4),
            comment("e", "p1", Some("b"), 4),
            comment("f", "p2", Some("c"), 2),
        ];
        let first = assemble(&posts, &comments);
        comments.reverse();
        let second = assemble(&posts, &comments);
        assert_eq!(first, second);
        assert_eq!(first, assemble(&posts, &comments));
    }
}
