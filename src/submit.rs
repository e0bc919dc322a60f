use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::cooldown::{Decision, RateLimiter};
use crate::data::{AuthProvider, FeedStore};
use crate::error::{FeedError, StoreError, ValidationError};
use crate::model::{
    ActorId, Comment, CommentId, NewComment, NewPost, Post, PostId, TargetKey, MAX_BODY_CHARS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldowns {
    pub comment: Duration,
    pub reply: Duration,
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self {
            comment: Duration::from_secs(8),
            reply: Duration::from_secs(5),
        }
    }
}

impl Cooldowns {
    pub fn for_key(&self, key: &TargetKey) -> Option<Duration> {
        match key {
            TargetKey::Post => None,
            TargetKey::Comment(_) => Some(self.comment),
            TargetKey::Reply(_) => Some(self.reply),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created {
    Post(Post),
    Comment(Comment),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Created(Created),
    /// Another submission for the same target was still in flight.
    Ignored,
}

/// Trims `body` and enforces the length limits.
pub fn validate_body(body: &str) -> Result<String, ValidationError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = trimmed.chars().count();
    if len > MAX_BODY_CHARS {
        return Err(ValidationError::TooLong {
            len,
            max: MAX_BODY_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Releases the in-flight slot for a target on drop.
struct InFlight<'a> {
    slots: &'a Mutex<HashSet<TargetKey>>,
    key: TargetKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slots.lock().remove(&self.key);
    }
}

/// Validates, rate-limits and writes new posts, comments and replies.
/// Cooldowns are only recorded once the store has accepted a write.
pub struct SubmissionCoordinator {
    store: Arc<dyn FeedStore>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    cooldowns: Cooldowns,
    in_flight: Mutex<HashSet<TargetKey>>,
}

impl SubmissionCoordinator {
    pub fn new(
        store: Arc<dyn FeedStore>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
        cooldowns: Cooldowns,
    ) -> Self {
        Self {
            store,
            auth,
            clock,
            limiter: RateLimiter::new(),
            cooldowns,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cooldowns(&self) -> Cooldowns {
        self.cooldowns
    }

    pub fn is_in_flight(&self, key: &TargetKey) -> bool {
        self.in_flight.lock().contains(key)
    }

    /// Local checks only: body validation and the cooldown for `key`.
    pub fn precheck(&self, key: &TargetKey, body: &str) -> Result<String, FeedError> {
        let body = validate_body(body)?;
        self.check_cooldown(key)?;
        Ok(body)
    }

    pub fn submit_post(&self, body: &str) -> Result<Submission, FeedError> {
        self.submit_post_with_image(body, None)
    }

    pub fn submit_post_with_image(
        &self,
        body: &str,
        image_url: Option<&str>,
    ) -> Result<Submission, FeedError> {
        let body = validate_body(body)?;
        let image_url = image_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        self.run(TargetKey::Post, |actor| {
            self.store
                .insert_post(NewPost {
                    author_id: actor,
                    body,
                    image_url,
                })
                .map(Created::Post)
        })
    }

    pub fn submit_comment(&self, post_id: &PostId, body: &str) -> Result<Submission, FeedError> {
        let body = validate_body(body)?;
        self.run(TargetKey::Comment(post_id.clone()), |actor| {
            self.store
                .insert_comment(NewComment {
                    post_id: post_id.clone(),
                    author_id: actor,
                    body,
                    parent_id: None,
                })
                .map(Created::Comment)
        })
    }

    pub fn submit_reply(
        &self,
        parent_id: &CommentId,
        post_id: &PostId,
        body: &str,
    ) -> Result<Submission, FeedError> {
        let body = validate_body(body)?;
        self.run(TargetKey::Reply(parent_id.clone()), |actor| {
            self.store
                .insert_comment(NewComment {
                    post_id: post_id.clone(),
                    author_id: actor,
                    body,
                    parent_id: Some(parent_id.clone()),
                })
                .map(Created::Comment)
        })
    }

    fn check_cooldown(&self, key: &TargetKey) -> Result<(), FeedError> {
        let Some(cooldown) = self.cooldowns.for_key(key) else {
            return Ok(());
        };
        match self.limiter.check(key, self.clock.now(), cooldown) {
            Decision::Allowed => Ok(()),
            Decision::Denied { remaining } => {
                debug!(%key, remaining_ms = remaining.as_millis() as u64, "cooldown active");
                Err(FeedError::CooldownActive { remaining })
            }
        }
    }

    fn acquire(&self, key: &TargetKey) -> Option<InFlight<'_>> {
        if !self.in_flight.lock().insert(key.clone()) {
            return None;
        }
        Some(InFlight {
            slots: &self.in_flight,
            key: key.clone(),
        })
    }

    // The slot is held across the cooldown check and the write so two
    // submissions for one key can never both pass the check.
    fn run<F>(&self, key: TargetKey, write: F) -> Result<Submission, FeedError>
    where
        F: FnOnce(ActorId) -> Result<Created, StoreError>,
    {
        let Some(_slot) = self.acquire(&key) else {
            debug!(%key, "submission already in flight, ignoring");
            return Ok(Submission::Ignored);
        };
        self.check_cooldown(&key)?;

        let Some(actor) = self.auth.current_actor() else {
            return Err(FeedError::AuthRequired);
        };

        match write(actor.clone()) {
            Ok(created) => {
                if self.cooldowns.for_key(&key).is_some() {
                    self.limiter.record_success(key.clone(), self.clock.now());
                }
                info!(%key, %actor, "submission stored");
                Ok(Submission::Created(created))
            }
            Err(err) => {
                warn!(%key, %actor, error = %err, "submission rejected by store");
                Err(FeedError::Store(err))
            }
        }
    }
}
