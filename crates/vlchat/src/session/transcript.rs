use crate::chat::UserInput;
use crate::text::DisplayPayload;

pub const GREETING: &str = "You can talk to me now";

/// One exchange as the user sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    /// `None` for the greeting.
    pub question: Option<UserInput>,
    /// Plain text shown so far. Grows character by character while streaming.
    pub answer: String,
    /// Structured view that replaces `answer` once the reply is complete.
    pub display: Option<DisplayPayload>,
}

impl TranscriptEntry {
    pub fn greeting() -> Self {
        Self {
            question: None,
            answer: GREETING.to_string(),
            display: Some(DisplayPayload::plain(GREETING)),
        }
    }

    /// An entry whose answer is still being streamed.
    pub fn pending(question: UserInput) -> Self {
        Self {
            question: Some(question),
            answer: String::new(),
            display: None,
        }
    }

    pub fn complete(question: UserInput, answer: impl Into<String>, display: DisplayPayload) -> Self {
        Self {
            question: Some(question),
            answer: answer.into(),
            display: Some(display),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.display.is_none()
    }

    /// Whether this exchange can be asked again.
    pub fn is_regenerable(&self) -> bool {
        self.question.is_some() && !self.is_pending()
    }

    pub fn finish(&mut self, display: DisplayPayload) {
        self.display = Some(display);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_is_not_regenerable() {
        let entry = TranscriptEntry::greeting();
        assert!(!entry.is_pending());
        assert!(!entry.is_regenerable());
        assert_eq!(entry.display.unwrap().answer, GREETING);
    }

    #[test]
    fn pending_entry_becomes_regenerable_when_finished() {
        let mut entry = TranscriptEntry::pending(UserInput::new("q"));
        assert!(entry.is_pending());
        assert!(!entry.is_regenerable());
        entry.finish(DisplayPayload::plain("a"));
        assert!(entry.is_regenerable());
    }
}
