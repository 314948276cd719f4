use serde::{Deserialize, Serialize};

/// Comment author
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user identifier, used to detect self-replies
    #[serde(default)]
    pub id: String,
    /// Display name shown in the notification
    #[serde(default)]
    pub name: String,
}

/// Site and post a comment belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    #[serde(default)]
    pub site_id: String,
    /// Post URL, the base of the comment anchor link
    #[serde(default)]
    pub url: String,
}

/// A stored comment, as handed over by the comment backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub user: User,
    /// Original (unrendered) comment text
    #[serde(default)]
    pub orig: String,
    #[serde(default)]
    pub locator: Locator,
    #[serde(default)]
    pub post_title: String,
}

/// A reply was posted to someone's comment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEvent {
    /// The new reply
    pub comment: Comment,
    /// The comment being replied to
    #[serde(default)]
    pub parent: Option<Comment>,
    /// Address of the parent comment author, empty when unknown
    #[serde(default)]
    pub email: String,
}

/// A user asked to confirm an email address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEvent {
    pub email: String,
    #[serde(default)]
    pub site_id: String,
    pub user: String,
    pub token: String,
}

/// Notification request produced by the comment backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationRequest {
    Comment(CommentEvent),
    Verification(VerificationEvent),
}

impl NotificationRequest {
    /// Destination address, if the request carries one
    pub fn destination(&self) -> Option<&str> {
        let email = match self {
            NotificationRequest::Comment(event) => &event.email,
            NotificationRequest::Verification(event) => &event.email,
        };

        if email.is_empty() {
            None
        } else {
            Some(email)
        }
    }

    /// Short request kind, used in logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationRequest::Comment(_) => "comment",
            NotificationRequest::Verification(_) => "verification",
        }
    }
}

impl From<CommentEvent> for NotificationRequest {
    fn from(event: CommentEvent) -> Self {
        NotificationRequest::Comment(event)
    }
}

impl From<VerificationEvent> for NotificationRequest {
    fn from(event: VerificationEvent) -> Self {
        NotificationRequest::Verification(event)
    }
}
