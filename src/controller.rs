use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

use crate::data::AuthProvider;
use crate::error::FeedError;
use crate::loader::{FeedLoader, FeedSnapshot};
use crate::model::{ActorId, CommentId, Post, PostId, TargetKey};
use crate::submit::{Created, Submission, SubmissionCoordinator};
use crate::threads::Threads;

const LOAD_FAILED_MESSAGE: &str = "Couldn't load the Glow feed.";

/// What the user is writing: a new post, a comment on a post, or a reply to
/// a top-level comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Post {
        image_url: Option<String>,
    },
    Comment {
        post_id: PostId,
    },
    Reply {
        post_id: PostId,
        parent_id: CommentId,
    },
}

impl Action {
    pub fn key(&self) -> TargetKey {
        match self {
            Action::Post { .. } => TargetKey::Post,
            Action::Comment { post_id } => TargetKey::Comment(post_id.clone()),
            Action::Reply { parent_id, .. } => TargetKey::Reply(parent_id.clone()),
        }
    }
}

/// An entry shown before the store confirms it. Confirmed entries are
/// dropped by the next applied reload, failed ones immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: u64,
    pub action: Action,
    pub author_id: ActorId,
    pub body: String,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FeedView {
    pub posts: Vec<Post>,
    pub threads: Threads,
    pub pending: Vec<PendingEntry>,
    pub loaded: bool,
}

impl FeedView {
    pub fn pending_for(&self, key: &TargetKey) -> impl Iterator<Item = &PendingEntry> + '_ {
        let key = key.clone();
        self.pending
            .iter()
            .filter(move |entry| entry.action.key() == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    /// A submission for the same target is already in flight.
    Ignored,
}

enum AsyncResponse {
    Feed {
        request_id: u64,
        result: Result<FeedSnapshot, FeedError>,
    },
    Submitted {
        pending_id: u64,
        key: TargetKey,
        result: Result<Submission, FeedError>,
    },
}

struct PendingLoad {
    request_id: u64,
}

pub struct Controller {
    loader: FeedLoader,
    coordinator: Arc<SubmissionCoordinator>,
    auth: Arc<dyn AuthProvider>,
    view: FeedView,
    drafts: HashMap<TargetKey, String>,
    submitting: HashSet<TargetKey>,
    status_message: Option<String>,
    error_message: Option<String>,
    sign_in_required: bool,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    next_pending_id: u64,
    pending_load: Option<PendingLoad>,
}

impl Controller {
    pub fn new(
        loader: FeedLoader,
        coordinator: Arc<SubmissionCoordinator>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            loader,
            coordinator,
            auth,
            view: FeedView::default(),
            drafts: HashMap::new(),
            submitting: HashSet::new(),
            status_message: None,
            error_message: None,
            sign_in_required: false,
            response_tx,
            response_rx,
            next_request_id: 1,
            next_pending_id: 1,
            pending_load: None,
        }
    }

    pub fn view(&self) -> &FeedView {
        &self.view
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Set when an operation needed a signed-in actor. The caller should
    /// send the user to sign in rather than show an inline error.
    pub fn sign_in_required(&self) -> bool {
        self.sign_in_required
    }

    pub fn is_loading(&self) -> bool {
        self.pending_load.is_some()
    }

    pub fn is_submitting(&self, key: &TargetKey) -> bool {
        self.submitting.contains(key)
    }

    pub fn draft(&self, key: &TargetKey) -> &str {
        self.drafts.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn set_draft(&mut self, key: TargetKey, text: impl Into<String>) {
        self.drafts.insert(key, text.into());
    }

    /// Starts a reload. A newer reload supersedes any still in flight.
    pub fn reload(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending_load = Some(PendingLoad { request_id });

        let viewer = self.auth.current_actor();
        let loader = self.loader.clone();
        let tx = self.response_tx.clone();
        debug!(request_id, "reload queued");
        thread::spawn(move || {
            let result = loader.load(viewer.as_ref());
            let _ = tx.send(AsyncResponse::Feed { request_id, result });
        });
        request_id
    }

    /// Validates locally, shows an optimistic entry and sends the write to a
    /// worker. Local failures come back immediately and never reach the
    /// store.
    pub fn submit(&mut self, action: Action) -> Result<Dispatch, FeedError> {
        let key = action.key();
        if self.submitting.contains(&key) {
            return Ok(Dispatch::Ignored);
        }

        let draft = self.draft(&key).to_string();
        let body = match self.coordinator.precheck(&key, &draft) {
            Ok(body) => body,
            Err(err) => return Err(self.fail(err)),
        };
        let Some(actor) = self.auth.current_actor() else {
            return Err(self.fail(FeedError::AuthRequired));
        };

        let pending_id = self.next_pending_id;
        self.next_pending_id += 1;
        self.view.pending.push(PendingEntry {
            id: pending_id,
            action: action.clone(),
            author_id: actor,
            body: body.clone(),
            confirmed: false,
        });
        self.submitting.insert(key.clone());
        self.error_message = None;
        self.status_message = Some("Posting…".to_string());

        let coordinator = self.coordinator.clone();
        let tx = self.response_tx.clone();
        thread::spawn(move || {
            let result = match &action {
                Action::Post { image_url } => {
                    coordinator.submit_post_with_image(&body, image_url.as_deref())
                }
                Action::Comment { post_id } => coordinator.submit_comment(post_id, &body),
                Action::Reply { post_id, parent_id } => {
                    coordinator.submit_reply(parent_id, post_id, &body)
                }
            };
            let _ = tx.send(AsyncResponse::Submitted {
                pending_id,
                key,
                result,
            });
        });
        Ok(Dispatch::Sent)
    }

    /// Applies every response that has arrived. Returns whether anything
    /// changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(message) = self.response_rx.try_recv() {
            self.handle_async_response(message);
            changed = true;
        }
        changed
    }

    /// Blocks until no reload or submission is outstanding, or `timeout`
    /// passes. Returns false on timeout.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending_load.is_some() || !self.submitting.is_empty() {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            match self.response_rx.recv_timeout(remaining) {
                Ok(message) => self.handle_async_response(message),
                Err(_) => return false,
            }
        }
        true
    }

    fn fail(&mut self, err: FeedError) -> FeedError {
        if matches!(err, FeedError::AuthRequired) {
            self.sign_in_required = true;
        } else {
            self.error_message = Some(err.user_message());
        }
        self.status_message = None;
        err
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Feed { request_id, result } => {
                let Some(pending) = &self.pending_load else {
                    debug!(request_id, "discarding feed response, no load pending");
                    return;
                };
                if pending.request_id != request_id {
                    debug!(
                        request_id,
                        latest = pending.request_id,
                        "discarding stale feed response"
                    );
                    return;
                }
                self.pending_load = None;

                match result {
                    Ok(snapshot) => {
                        self.view.posts = snapshot.posts;
                        self.view.threads = snapshot.threads;
                        self.view.pending.retain(|entry| !entry.confirmed);
                        self.view.loaded = true;
                        self.error_message = None;
                        self.sign_in_required = false;
                    }
                    Err(FeedError::AuthRequired) => {
                        self.sign_in_required = true;
                    }
                    // Keep whatever is already on screen.
                    Err(_) => {
                        self.error_message = Some(LOAD_FAILED_MESSAGE.to_string());
                    }
                }
            }
            AsyncResponse::Submitted {
                pending_id,
                key,
                result,
            } => {
                self.submitting.remove(&key);
                match result {
                    Ok(Submission::Created(created)) => {
                        if let Some(entry) = self
                            .view
                            .pending
                            .iter_mut()
                            .find(|entry| entry.id == pending_id)
                        {
                            entry.confirmed = true;
                        }
                        self.drafts.remove(&key);
                        self.sign_in_required = false;
                        self.status_message = Some(match created {
                            Created::Post(_) => "Posted.".to_string(),
                            Created::Comment(_) => "Comment added.".to_string(),
                        });
                        self.reload();
                    }
                    Ok(Submission::Ignored) => {
                        self.view.pending.retain(|entry| entry.id != pending_id);
                    }
                    Err(err) => {
                        self.view.pending.retain(|entry| entry.id != pending_id);
                        self.fail(err);
                    }
                }
            }
        }
    }
}
