//! Notification requests accepted from the comment backend.

mod types;

pub use types::{
    Comment, CommentEvent, Locator, NotificationRequest, User, VerificationEvent,
};
