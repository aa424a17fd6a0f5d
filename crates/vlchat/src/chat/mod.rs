use serde::{Deserialize, Serialize};

pub mod media;

pub use media::{Attachment, MediaKind};

/// Role of a participant in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The user/human participant in the conversation
    User,
    /// The model answering
    Assistant,
}

/// One item of a turn. Serialized as `{"type": "text"|"image", "pairs": ...}`,
/// where an image payload is a base64 encoded picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "pairs", rename_all = "lowercase")]
pub enum Content {
    Text(String),
    Image(String),
}

impl Content {
    pub fn is_image(&self) -> bool {
        matches!(self, Content::Image(_))
    }
}

/// A single turn of the conversation that is sent back to the model as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ChatRole,
    #[serde(alias = "content")]
    pub contents: Vec<Content>,
}

impl ConversationTurn {
    /// Create a new builder for a user turn
    pub fn user() -> ConversationTurnBuilder {
        ConversationTurnBuilder::new(ChatRole::User)
    }

    /// Create a new builder for an assistant turn
    pub fn assistant() -> ConversationTurnBuilder {
        ConversationTurnBuilder::new(ChatRole::Assistant)
    }

    /// Concatenated text items, images skipped.
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|c| match c {
                Content::Text(t) => Some(t.as_str()),
                Content::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn image_count(&self) -> usize {
        self.contents.iter().filter(|c| c.is_image()).count()
    }
}

/// Builder for ConversationTurn
#[derive(Debug)]
pub struct ConversationTurnBuilder {
    role: ChatRole,
    contents: Vec<Content>,
}

impl ConversationTurnBuilder {
    pub fn new(role: ChatRole) -> Self {
        Self {
            role,
            contents: Vec::new(),
        }
    }

    /// Append a text item
    pub fn text<S: Into<String>>(mut self, text: S) -> Self {
        self.contents.push(Content::Text(text.into()));
        self
    }

    /// Append an already base64 encoded image
    pub fn image<S: Into<String>>(mut self, b64: S) -> Self {
        self.contents.push(Content::Image(b64.into()));
        self
    }

    /// Append a batch of items
    pub fn contents(mut self, contents: impl IntoIterator<Item = Content>) -> Self {
        self.contents.extend(contents);
        self
    }

    pub fn build(self) -> ConversationTurn {
        ConversationTurn {
            role: self.role,
            contents: self.contents,
        }
    }
}

/// What the user submitted for one turn: text (with `[mm_media]n[/mm_media]`
/// placeholders in chat mode) plus the attached files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInput {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl UserInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// `(images, videos)` attached to this input.
    pub fn media_counts(&self) -> (usize, usize) {
        self.attachments
            .iter()
            .fold((0, 0), |(images, videos), a| match a.kind {
                MediaKind::Image => (images + 1, videos),
                MediaKind::Video => (images, videos + 1),
            })
    }
}
