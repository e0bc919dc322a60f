use std::time::Duration;

/// Failure reported by a `FeedStore`. `code` carries the backend's own error
/// code when it provides one (Postgres SQLSTATE, `timeout`, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("store error{}: {message}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
pub struct StoreError {
    pub code: Option<String>,
    pub message: String,
}

pub const CODE_TIMEOUT: &str = "timeout";
pub const CODE_PERMISSION: &str = "42501";
pub const CODE_FOREIGN_KEY: &str = "23503";
/// Check violation. Used for replies that would break the two-level thread
/// shape: a parent on another post, or a parent that is itself a reply.
pub const CODE_CHECK: &str = "23514";

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_code(CODE_TIMEOUT, message)
    }

    pub fn is_timeout(&self) -> bool {
        self.code.as_deref() == Some(CODE_TIMEOUT)
    }

    /// Safe to show to an end user. The raw message stays in `Display`.
    pub fn user_message(&self) -> &'static str {
        match self.code.as_deref() {
            Some(CODE_PERMISSION) => "You don't have permission to do that.",
            Some(CODE_FOREIGN_KEY) => "That post or comment no longer exists.",
            Some(CODE_CHECK) => "You can only reply to a top-level comment on the same post.",
            Some(CODE_TIMEOUT) => "The server took too long to respond. Try again.",
            _ => "Something went wrong. Try again in a moment.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("body is empty")]
    Empty,
    #[error("body is {len} characters, limit is {max}")]
    TooLong { len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("sign in required")]
    AuthRequired,
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("cooldown active, {}ms remaining", .remaining.as_millis())]
    CooldownActive { remaining: Duration },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FeedError {
    pub fn user_message(&self) -> String {
        match self {
            FeedError::AuthRequired => "Sign in to continue.".to_string(),
            FeedError::Validation(ValidationError::Empty) => "Write something first.".to_string(),
            FeedError::Validation(ValidationError::TooLong { len, max }) => {
                format!("That's {len} characters; the limit is {max}.")
            }
            FeedError::CooldownActive { remaining } => {
                let secs = ceil_secs(*remaining);
                let unit = if secs == 1 { "second" } else { "seconds" };
                format!("Please wait {secs} {unit} before commenting again.")
            }
            FeedError::Store(err) => err.user_message().to_string(),
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    millis.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_store_codes_get_friendly_messages() {
        let denied = StoreError::with_code("42501", "new row violates row-level security policy");
        assert_eq!(denied.user_message(), "You don't have permission to do that.");
        let unknown = StoreError::with_code("XX000", "internal");
        assert_eq!(
            unknown.user_message(),
            "Something went wrong. Try again in a moment."
        );
        assert!(denied.to_string().contains("row-level security"));
        let nested = FeedError::from(StoreError::with_code(CODE_CHECK, "reply parent is a reply"));
        assert_eq!(
            nested.user_message(),
            "You can only reply to a top-level comment on the same post."
        );
    }

    #[test]
    fn cooldown_message_rounds_seconds_up() {
        let err = FeedError::CooldownActive {
            remaining: Duration::from_millis(4_200),
        };
        assert_eq!(
            err.user_message(),
            "Please wait 5 seconds before commenting again."
        );
        let err = FeedError::CooldownActive {
            remaining: Duration::from_millis(300),
        };
        assert_eq!(
            err.user_message(),
            "Please wait 1 second before commenting again."
        );
    }

    #[test]
    fn validation_messages_are_specific() {
        assert_ne!(
            FeedError::from(ValidationError::Empty).user_message(),
            FeedError::from(ValidationError::TooLong { len: 501, max: 500 }).user_message()
        );
    }
}
