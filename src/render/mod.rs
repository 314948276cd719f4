//! Turns notification requests into transport-ready messages.

use serde::Serialize;

use crate::error::NotifyError;
use crate::notification::{CommentEvent, NotificationRequest, VerificationEvent};
use crate::template::Template;

/// Built-in template for comment reply notifications
pub const DEFAULT_MESSAGE_TEMPLATE: &str = concat!(
    "From: {{from}}\n",
    "To: {{to}}\n",
    "Subject: New comment{{#if post_title}} for \"{{post_title}}\"{{/if}}\n",
    "MIME-version: 1.0;\n",
    "Content-Type: text/html; charset=\"UTF-8\";\n",
    "\n",
    "{{user_name}}{{#if parent_user_name}} → {{parent_user_name}}{{/if}}\n",
    "\n",
    "{{comment_orig}}\n",
    "\n",
    "↦ <a href=\"{{post_url}}#remark42__comment-{{comment_id}}\">",
    "{{#if post_title}}{{post_title}}{{else}}original comment{{/if}}</a>\n",
);

/// Built-in template for address verification messages
pub const DEFAULT_VERIFICATION_TEMPLATE: &str = concat!(
    "From: {{from}}\n",
    "To: {{to}}\n",
    "Subject: Email verification\n",
    "MIME-version: 1.0;\n",
    "Content-Type: text/html; charset=\"UTF-8\";\n",
    "\n",
    "Confirmation for {{user}} {{to}}, site {{site}}\n",
    "\n",
    "Token: {{token}}\n",
);

/// A message ready to be handed to a mail session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Full message: headers, blank line, body
    pub body: String,
    pub destination: String,
}

/// Fields available to the comment reply template
#[derive(Debug, Serialize)]
pub struct MessageView<'a> {
    pub from: &'a str,
    pub to: &'a str,
    /// Display name of the replying user
    pub user_name: &'a str,
    /// Display name of the parent comment author
    pub parent_user_name: &'a str,
    pub comment_orig: &'a str,
    pub post_title: &'a str,
    pub post_url: &'a str,
    pub comment_id: &'a str,
}

/// Fields available to the verification template
#[derive(Debug, Serialize)]
pub struct VerificationView<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub user: &'a str,
    pub site: &'a str,
    pub token: &'a str,
}

/// Renders requests with the configured templates
#[derive(Debug, Clone)]
pub struct Renderer {
    from: String,
    message: Option<Template>,
    verification: Option<Template>,
}

impl Renderer {
    /// Parse both template sources.
    ///
    /// A broken source leaves that template unavailable instead of failing
    /// construction; the parse errors are returned alongside.
    pub fn new(
        from: impl Into<String>,
        message_source: &str,
        verification_source: &str,
    ) -> (Self, Vec<NotifyError>) {
        let mut errors = Vec::new();

        let message = Template::parse("message", message_source)
            .map_err(|e| errors.push(NotifyError::MessageTemplate(e)))
            .ok();
        let verification = Template::parse("verification", verification_source)
            .map_err(|e| errors.push(NotifyError::VerificationTemplate(e)))
            .ok();

        let renderer = Self {
            from: from.into(),
            message,
            verification,
        };
        (renderer, errors)
    }

    /// Create a renderer from already parsed templates
    pub fn with_templates(from: impl Into<String>, message: Template, verification: Template) -> Self {
        Self {
            from: from.into(),
            message: Some(message),
            verification: Some(verification),
        }
    }

    pub fn has_message_template(&self) -> bool {
        self.message.is_some()
    }

    pub fn has_verification_template(&self) -> bool {
        self.verification.is_some()
    }

    /// Render a request.
    ///
    /// `Ok(None)` means the request is skipped: there is nobody to send it to,
    /// or the user replied to their own comment.
    pub fn render(&self, request: &NotificationRequest) -> Result<Option<RenderedMessage>, NotifyError> {
        let Some(destination) = request.destination() else {
            return Ok(None);
        };

        let body = match request {
            NotificationRequest::Comment(event) => {
                if is_self_reply(event) {
                    return Ok(None);
                }
                self.render_comment(event, destination)?
            }
            NotificationRequest::Verification(event) => {
                self.render_verification(event, destination)?
            }
        };

        Ok(Some(RenderedMessage {
            body,
            destination: destination.to_string(),
        }))
    }

    fn render_comment(&self, event: &CommentEvent, to: &str) -> Result<String, NotifyError> {
        let template = self
            .message
            .as_ref()
            .ok_or(NotifyError::TemplateUnavailable("message"))?;

        let parent_user_name = event
            .parent
            .as_ref()
            .map(|parent| parent.user.name.as_str())
            .unwrap_or_default();

        let view = MessageView {
            from: &self.from,
            to,
            user_name: &event.comment.user.name,
            parent_user_name,
            comment_orig: &event.comment.orig,
            post_title: &event.comment.post_title,
            post_url: &event.comment.locator.url,
            comment_id: &event.comment.id,
        };

        template.render(&view).map_err(NotifyError::RenderMessage)
    }

    fn render_verification(&self, event: &VerificationEvent, to: &str) -> Result<String, NotifyError> {
        let template = self
            .verification
            .as_ref()
            .ok_or(NotifyError::TemplateUnavailable("verification"))?;

        let view = VerificationView {
            from: &self.from,
            to,
            user: &event.user,
            site: &event.site_id,
            token: &event.token,
        };

        template.render(&view).map_err(NotifyError::RenderVerification)
    }
}

/// A reply without a parent, or to the author's own comment, notifies nobody
fn is_self_reply(event: &CommentEvent) -> bool {
    match &event.parent {
        Some(parent) => parent.user.id == event.comment.user.id,
        None => true,
    }
}
