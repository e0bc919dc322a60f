use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum body length, counted in characters after trimming.
pub const MAX_BODY_CHARS: usize = 500;

pub const DEFAULT_PLACEHOLDER_NAME: &str = "GlowSpaceUser";

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(PostId);
string_id!(CommentId);
string_id!(ActorId);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl AuthorProfile {
    /// Display name, then handle, then `placeholder`.
    pub fn label<'a>(&'a self, placeholder: &'a str) -> &'a str {
        non_blank(self.display_name.as_deref())
            .or_else(|| non_blank(self.username.as_deref()))
            .unwrap_or(placeholder)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Author attributes as they come back from a relational join: a single
/// object, a one-element array, or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProfileShape {
    // Arrays first: a derived struct also accepts a (possibly empty) sequence.
    Many(Vec<AuthorProfile>),
    One(AuthorProfile),
    #[default]
    Missing,
}

impl ProfileShape {
    pub fn normalize(self) -> Option<AuthorProfile> {
        match self {
            ProfileShape::One(profile) => Some(profile),
            ProfileShape::Many(profiles) => profiles.into_iter().next(),
            ProfileShape::Missing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: ActorId,
    pub body: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub author: Option<AuthorProfile>,
}

impl Post {
    pub fn author_label<'a>(&'a self, placeholder: &'a str) -> &'a str {
        match &self.author {
            Some(profile) => profile.label(placeholder),
            None => placeholder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub author_id: ActorId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<CommentId>,
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Threads are two levels deep: only a top-level comment on the same
    /// post may take replies.
    pub fn can_parent(&self, post_id: &PostId) -> bool {
        !self.is_reply() && &self.post_id == post_id
    }
}

/// A top-level comment and its replies, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadNode {
    pub comment: Comment,
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub author_id: ActorId,
    pub body: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub post_id: PostId,
    pub author_id: ActorId,
    pub body: String,
    pub parent_id: Option<CommentId>,
}

/// What a cooldown or in-flight flag is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKey {
    /// The feed composer. Posts have no cooldown, only the in-flight guard.
    Post,
    Comment(PostId),
    Reply(CommentId),
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKey::Post => f.write_str("post"),
            TargetKey::Comment(post_id) => write!(f, "comment:{post_id}"),
            TargetKey::Reply(parent_id) => write!(f, "reply:{parent_id}"),
        }
    }
}
