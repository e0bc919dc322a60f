#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod clock;
pub mod config;
pub mod controller;
pub mod cooldown;
pub mod data;
pub mod error;
pub mod loader;
pub mod model;
pub mod remote;
pub mod storage;
pub mod submit;
pub mod threads;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use controller::{Action, Controller, Dispatch, FeedView, PendingEntry};
pub use error::{FeedError, StoreError, ValidationError};
pub use loader::{FeedLoader, FeedSnapshot};
pub use submit::{Cooldowns, Created, Submission, SubmissionCoordinator};
