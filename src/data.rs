use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, CODE_CHECK, CODE_FOREIGN_KEY};
use crate::model::{ActorId, AuthorProfile, Comment, NewComment, NewPost, Post, PostId};

/// Relational backend for posts and comments. `fetch_comments` is a single
/// batched call for every id passed in.
pub trait FeedStore: Send + Sync {
    /// All posts, newest first, with author attributes joined in.
    fn fetch_posts(&self) -> Result<Vec<Post>, StoreError>;
    fn fetch_comments(&self, post_ids: &[PostId]) -> Result<Vec<Comment>, StoreError>;
    fn insert_post(&self, post: NewPost) -> Result<Post, StoreError>;
    fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError>;
}

pub trait AuthProvider: Send + Sync {
    fn current_actor(&self) -> Option<ActorId>;
}

/// Identity fixed at startup (from config) or switched by the caller.
#[derive(Debug, Default)]
pub struct StaticAuth {
    actor: RwLock<Option<ActorId>>,
}

impl StaticAuth {
    pub fn new(actor: Option<ActorId>) -> Self {
        Self {
            actor: RwLock::new(actor),
        }
    }

    pub fn signed_in(actor: impl Into<String>) -> Self {
        Self::new(Some(ActorId::new(actor)))
    }

    pub fn sign_in(&self, actor: ActorId) {
        *self.actor.write() = Some(actor);
    }

    pub fn sign_out(&self) {
        *self.actor.write() = None;
    }
}

impl AuthProvider for StaticAuth {
    fn current_actor(&self) -> Option<ActorId> {
        self.actor.read().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FetchPosts,
    FetchComments,
    InsertPost,
    InsertComment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch_posts: usize,
    pub fetch_comments: usize,
    pub insert_post: usize,
    pub insert_comment: usize,
}

impl CallCounts {
    pub fn inserts(&self) -> usize {
        self.insert_post + self.insert_comment
    }
}

/// Holds one store call open until released. The store signals `entered`
/// when the call reaches the gate.
pub struct Gate {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl Gate {
    pub fn wait_entered(&self, timeout: std::time::Duration) -> bool {
        self.entered.recv_timeout(timeout).is_ok()
    }

    pub fn release(self) {
        let _ = self.release.send(());
    }
}

struct GateSide {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl GateSide {
    fn pass(self) {
        let _ = self.entered.send(());
        let _ = self.release.recv();
    }
}

#[derive(Default)]
struct Counters {
    fetch_posts: AtomicUsize,
    fetch_comments: AtomicUsize,
    insert_post: AtomicUsize,
    insert_comment: AtomicUsize,
}

#[derive(Default)]
struct Tables {
    profiles: HashMap<ActorId, AuthorProfile>,
    posts: Vec<Post>,
    comments: Vec<Comment>,
    next_id: u64,
}

/// In-process store used offline and by tests: counts calls, and can fail or
/// hold open the next call of a given kind.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    tables: Mutex<Tables>,
    counters: Counters,
    failures: Mutex<HashMap<StoreOp, StoreError>>,
    gates: Mutex<HashMap<StoreOp, GateSide>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: Mutex::new(Tables::default()),
            counters: Counters::default(),
            failures: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_profile(&self, actor: ActorId, profile: AuthorProfile) {
        self.tables.lock().profiles.insert(actor, profile);
    }

    /// Inserts directly, bypassing counters, failures and gates.
    pub fn seed_post(&self, post: NewPost) -> Post {
        self.write_post(post)
    }

    pub fn seed_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        self.write_comment(comment)
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            fetch_posts: self.counters.fetch_posts.load(Ordering::SeqCst),
            fetch_comments: self.counters.fetch_comments.load(Ordering::SeqCst),
            insert_post: self.counters.insert_post.load(Ordering::SeqCst),
            insert_comment: self.counters.insert_comment.load(Ordering::SeqCst),
        }
    }

    pub fn post_count(&self) -> usize {
        self.tables.lock().posts.len()
    }

    pub fn comment_count(&self) -> usize {
        self.tables.lock().comments.len()
    }

    /// The next call of `op` fails with `err`.
    pub fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.failures.lock().insert(op, err);
    }

    /// The next call of `op` blocks until the returned gate is released.
    /// Fetches block after reading their snapshot, inserts before writing.
    pub fn gate_next(&self, op: StoreOp) -> Gate {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        self.gates.lock().insert(
            op,
            GateSide {
                entered: entered_tx,
                release: release_rx,
            },
        );
        Gate {
            entered: entered_rx,
            release: release_tx,
        }
    }

    fn begin(&self, op: StoreOp) -> Result<Option<GateSide>, StoreError> {
        let counter = match op {
            StoreOp::FetchPosts => &self.counters.fetch_posts,
            StoreOp::FetchComments => &self.counters.fetch_comments,
            StoreOp::InsertPost => &self.counters.insert_post,
            StoreOp::InsertComment => &self.counters.insert_comment,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().remove(&op);
        if let Some(err) = self.failures.lock().remove(&op) {
            if let Some(gate) = gate {
                gate.pass();
            }
            return Err(err);
        }
        Ok(gate)
    }

    fn next_id(tables: &mut Tables, prefix: &str) -> String {
        tables.next_id += 1;
        format!("{prefix}-{}", tables.next_id)
    }

    fn write_post(&self, post: NewPost) -> Post {
        let created_at = self.clock.now();
        let mut tables = self.tables.lock();
        let id = Self::next_id(&mut tables, "post");
        let author = tables.profiles.get(&post.author_id).cloned();
        let row = Post {
            id: PostId::new(id),
            author_id: post.author_id,
            body: post.body,
            image_url: post.image_url,
            created_at,
            author,
        };
        tables.posts.push(row.clone());
        row
    }

    fn write_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let created_at = self.clock.now();
        let mut tables = self.tables.lock();
        if !tables.posts.iter().any(|post| post.id == comment.post_id) {
            return Err(StoreError::with_code(
                CODE_FOREIGN_KEY,
                format!("post {} does not exist", comment.post_id),
            ));
        }
        if let Some(parent_id) = &comment.parent_id {
            let Some(parent) = tables.comments.iter().find(|c| &c.id == parent_id) else {
                return Err(StoreError::with_code(
                    CODE_FOREIGN_KEY,
                    format!("comment {parent_id} does not exist"),
                ));
            };
            if !parent.can_parent(&comment.post_id) {
                return Err(StoreError::with_code(
                    CODE_CHECK,
                    format!(
                        "comment {parent_id} cannot take replies on post {}",
                        comment.post_id
                    ),
                ));
            }
        }
        let id = Self::next_id(&mut tables, "comment");
        let row = Comment {
            id: id.as_str().into(),
            post_id: comment.post_id,
            author_id: comment.author_id,
            body: comment.body,
            created_at,
            parent_id: comment.parent_id,
        };
        tables.comments.push(row.clone());
        Ok(row)
    }
}

impl FeedStore for MemoryStore {
    fn fetch_posts(&self) -> Result<Vec<Post>, StoreError> {
        let gate = self.begin(StoreOp::FetchPosts)?;
        let mut posts = {
            let tables = self.tables.lock();
            tables
                .posts
                .iter()
                .map(|post| Post {
                    author: tables.profiles.get(&post.author_id).cloned(),
                    ..post.clone()
                })
                .collect::<Vec<_>>()
        };
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(gate) = gate {
            gate.pass();
        }
        Ok(posts)
    }

    fn fetch_comments(&self, post_ids: &[PostId]) -> Result<Vec<Comment>, StoreError> {
        let gate = self.begin(StoreOp::FetchComments)?;
        let comments = self
            .tables
            .lock()
            .comments
            .iter()
            .filter(|comment| post_ids.contains(&comment.post_id))
            .cloned()
            .collect();
        if let Some(gate) = gate {
            gate.pass();
        }
        Ok(comments)
    }

    fn insert_post(&self, post: NewPost) -> Result<Post, StoreError> {
        if let Some(gate) = self.begin(StoreOp::InsertPost)? {
            gate.pass();
        }
        Ok(self.write_post(post))
    }

    fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        if let Some(gate) = self.begin(StoreOp::InsertComment)? {
            gate.pass();
        }
        self.write_comment(comment)
    }
}
