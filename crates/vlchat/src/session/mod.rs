//! Per-user chat state. A [`Session`] is a plain value owned by the caller and
//! passed by `&mut` into every controller operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::chat::ConversationTurn;
use crate::error::DemoError;
use crate::stream::CancelFlag;

pub mod transcript;

pub use transcript::{GREETING, TranscriptEntry};

pub const VIDEO_LIMIT_MSG: &str = "Only supports single video file input right now!";
pub const NO_MEDIA_MSG: &str = "Please chat with at least one image or video.";

/// Opaque id sent with every request: 16 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn random() -> Self {
        let mut hex = Uuid::new_v4().simple().to_string();
        hex.truncate(16);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Free conversation with placeholders for media.
    #[default]
    Chat,
    /// Demonstrations followed by one image + text query.
    FewShot,
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatMode::Chat => write!(f, "Chat"),
            ChatMode::FewShot => write!(f, "Few Shot"),
        }
    }
}

impl FromStr for ChatMode {
    type Err = DemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-', '_'], "").as_str() {
            "chat" => Ok(ChatMode::Chat),
            "fewshot" => Ok(ChatMode::FewShot),
            other => Err(DemoError::Config(format!("unknown chat mode: {}", other))),
        }
    }
}

/// How the last generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed { output_tokens: Option<u64> },
    Cancelled,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub mode: ChatMode,
    /// Turns sent back to the model as context.
    pub history: Vec<ConversationTurn>,
    /// Media sent with questions. Few-shot demonstrations are not counted.
    pub image_count: usize,
    pub video_count: usize,
    /// A streaming generation is in flight.
    pub streaming: bool,
    pub cancel: CancelFlag,
    pub last_status: Option<TurnStatus>,
    pub transcript: Vec<TranscriptEntry>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ChatMode::default())
    }
}

impl Session {
    pub fn new(mode: ChatMode) -> Self {
        let session = Self {
            id: SessionId::random(),
            mode,
            history: Vec::new(),
            image_count: 0,
            video_count: 0,
            streaming: false,
            cancel: CancelFlag::new(),
            last_status: None,
            transcript: vec![TranscriptEntry::greeting()],
        };
        log::debug!("new session {} in {} mode", session.id, mode);
        session
    }

    /// Back to a fresh session in the same mode, with a new id.
    ///
    /// The cancel flag is raised before being replaced so a generation still
    /// holding the old one stops.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        *self = Self::new(self.mode);
    }

    pub fn set_mode(&mut self, mode: ChatMode) {
        self.mode = mode;
        self.reset();
    }

    /// Rejects a turn that would exceed what the model accepts. Counts are the
    /// media of the new turn; the session's own counters are added.
    pub fn check_media(
        &self,
        images: usize,
        videos: usize,
        require_media: bool,
    ) -> Result<(), DemoError> {
        let videos = videos + self.video_count;
        let images = images + self.image_count;
        if videos > 1 || (videos == 1 && images > 0) {
            return Err(DemoError::Validation(VIDEO_LIMIT_MSG.to_string()));
        }
        if require_media && images + videos == 0 {
            return Err(DemoError::Validation(NO_MEDIA_MSG.to_string()));
        }
        Ok(())
    }

    pub fn has_video(&self) -> bool {
        self.video_count > 0
    }

    pub fn last_entry_mut(&mut self) -> Option<&mut TranscriptEntry> {
        self.transcript.last_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_sixteen_hex_chars() {
        let id = SessionId::random();
        assert_eq!(id.as_str().len(), 16);
        assert!(
            id.as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
        assert_ne!(id, SessionId::random());
    }

    #[test]
    fn new_session_starts_with_greeting() {
        let session = Session::new(ChatMode::Chat);
        assert_eq!(session.transcript.len(), 1);
        assert!(session.history.is_empty());
        assert!(!session.streaming);
    }

    #[test]
    fn reset_clears_state_and_rotates_id() {
        let mut session = Session::new(ChatMode::FewShot);
        let old_cancel = session.cancel.clone();
        let old_id = session.id.clone();
        session.image_count = 2;
        session.streaming = true;
        session.history.push(ConversationTurn::user().text("x").build());

        session.reset();
        assert_eq!(session.mode, ChatMode::FewShot);
        assert_ne!(session.id, old_id);
        assert_eq!(session.image_count, 0);
        assert!(!session.streaming);
        assert!(session.history.is_empty());
        assert!(old_cancel.is_cancelled());
        assert!(!session.cancel.is_cancelled());
    }

    #[test]
    fn mode_switch_resets() {
        let mut session = Session::new(ChatMode::Chat);
        session.video_count = 1;
        session.set_mode(ChatMode::FewShot);
        assert_eq!(session.mode, ChatMode::FewShot);
        assert_eq!(session.video_count, 0);
    }

    #[test]
    fn media_limits() {
        let mut session = Session::new(ChatMode::Chat);
        assert!(session.check_media(0, 0, true).is_err());
        assert!(session.check_media(0, 0, false).is_ok());
        assert!(session.check_media(3, 0, true).is_ok());
        assert!(session.check_media(1, 1, true).is_err());
        assert!(session.check_media(0, 2, true).is_err());

        session.video_count = 1;
        assert!(session.check_media(0, 0, true).is_ok());
        let err = session.check_media(0, 1, true).unwrap_err();
        assert_eq!(err.to_string(), VIDEO_LIMIT_MSG);

        session.video_count = 0;
        session.image_count = 1;
        assert!(session.check_media(0, 1, true).is_err());
    }

    #[test]
    fn chat_mode_parses() {
        assert_eq!("few-shot".parse::<ChatMode>().unwrap(), ChatMode::FewShot);
        assert_eq!("Few Shot".parse::<ChatMode>().unwrap(), ChatMode::FewShot);
        assert_eq!("chat".parse::<ChatMode>().unwrap(), ChatMode::Chat);
        assert!("other".parse::<ChatMode>().is_err());
    }
}
