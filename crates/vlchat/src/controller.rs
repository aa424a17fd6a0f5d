//! Chat session controller: validates a turn, calls the endpoint, and commits
//! the result into the [`Session`].
//!
//! A turn either commits both its user and assistant turns to history or
//! leaves the session untouched. Rejections ([`DemoError::is_rejection`])
//! happen before any network call.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::chat::media::{encode_message, encode_plain};
use crate::chat::{ConversationTurn, MediaKind, UserInput};
use crate::endpoint::{EndpointRequest, InferenceEndpoint};
use crate::error::{DemoError, ERROR_MSG, PROCESSING_ERROR_MSG};
use crate::params::{DecodeMode, GenerationParams};
use crate::session::{ChatMode, Session, SessionId, TranscriptEntry, TurnStatus};
use crate::stream::{CharStream, StreamState};
use crate::text::{DisplayPayload, render};

pub const NO_REGEN_MSG: &str = "No question for regeneration.";
pub const FEWSHOT_IMAGES_ONLY_MSG: &str = "Few-shot inputs accept images only.";

/// Per-turn user toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOptions {
    pub decode: DecodeMode,
    pub thinking: bool,
    pub stream: bool,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            decode: DecodeMode::Sampling,
            thinking: false,
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Reject turns when neither the session nor the turn carries media.
    pub disable_text_only: bool,
    /// Longest wait for the next stream event.
    pub idle_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            disable_text_only: true,
            idle_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Final outcome of a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub display: DisplayPayload,
    pub status: TurnStatus,
}

pub enum Reply {
    Complete(TurnReport),
    Streaming(StreamingTurn),
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Complete(report) => f.debug_tuple("Complete").field(report).finish(),
            Reply::Streaming(turn) => f.debug_tuple("Streaming").field(&turn.chars).finish(),
        }
    }
}

/// A generation in flight. Pull characters with [`StreamingTurn::next`], then
/// hand it back to [`ChatController::finish_stream`].
pub struct StreamingTurn {
    chars: CharStream,
    session_id: SessionId,
    user_turn: ConversationTurn,
    images: usize,
    videos: usize,
}

impl StreamingTurn {
    /// Next character, also appended to the session's pending transcript entry.
    pub async fn next(&mut self, session: &mut Session) -> Option<char> {
        let c = self.chars.next().await?;
        if session.id == self.session_id {
            if let Some(entry) = session.last_entry_mut() {
                entry.answer.push(c);
            }
        }
        Some(c)
    }

    pub fn chars(&self) -> &CharStream {
        &self.chars
    }
}

/// Prepared user turn, not yet committed.
struct PreparedTurn {
    user_turn: ConversationTurn,
    params: GenerationParams,
    images: usize,
    videos: usize,
}

pub struct ChatController {
    endpoint: Arc<dyn InferenceEndpoint>,
    config: ControllerConfig,
}

impl ChatController {
    pub fn new(endpoint: Arc<dyn InferenceEndpoint>, config: ControllerConfig) -> Self {
        Self { endpoint, config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Sends one user turn. In chat mode the text carries one placeholder per
    /// attachment; in few-shot mode attachments must be images.
    #[instrument(name = "controller.submit", skip_all, fields(session_id = %session.id, mode = %session.mode))]
    pub async fn submit(
        &self,
        session: &mut Session,
        input: UserInput,
        options: TurnOptions,
    ) -> Result<Reply, DemoError> {
        if session.streaming {
            return Err(DemoError::Busy(format!(
                "session {} is still generating",
                session.id
            )));
        }
        let prepared = self.prepare(session, &input, options)?;

        let mut conversation = session.history.clone();
        conversation.push(prepared.user_turn.clone());
        let request =
            EndpointRequest::new(&conversation, &prepared.params, Some(session.id.as_str()))?;

        if prepared.params.is_streaming() {
            Ok(Reply::Streaming(self.start_stream(session, input, prepared, request).await))
        } else {
            Ok(Reply::Complete(self.complete(session, input, prepared, request).await))
        }
    }

    fn prepare(
        &self,
        session: &Session,
        input: &UserInput,
        options: TurnOptions,
    ) -> Result<PreparedTurn, DemoError> {
        let (images, videos) = input.media_counts();
        let contents = match session.mode {
            ChatMode::Chat => {
                session.check_media(images, videos, self.config.disable_text_only)?;
                encode_message(&input.text, &input.attachments)?
            }
            ChatMode::FewShot => {
                if videos > 0 {
                    return Err(DemoError::Validation(FEWSHOT_IMAGES_ONLY_MSG.to_string()));
                }
                session.check_media(images, 0, self.config.disable_text_only)?;
                let contents = encode_plain(&input.text, &input.attachments);
                if contents.is_empty() {
                    return Err(DemoError::Validation("Nothing to send.".to_string()));
                }
                contents
            }
        };

        let has_video = videos + session.video_count > 0;
        let params =
            GenerationParams::for_turn(options.decode, options.thinking, options.stream, has_video);
        Ok(PreparedTurn {
            user_turn: ConversationTurn::user().contents(contents).build(),
            params,
            images,
            videos,
        })
    }

    async fn start_stream(
        &self,
        session: &mut Session,
        input: UserInput,
        prepared: PreparedTurn,
        request: EndpointRequest,
    ) -> StreamingTurn {
        session.cancel.reset();
        session.streaming = true;
        session.transcript.push(TranscriptEntry::pending(input));
        let cancel = session.cancel.clone();

        let chars = match self.endpoint.chat_stream(&request).await {
            Ok(events) => CharStream::new(events, cancel, self.config.idle_timeout),
            Err(e) => {
                log::warn!("streaming request failed, retrying without streaming: {}", e);
                let fallback = match request.without_streaming() {
                    Ok(request) => self.endpoint.chat(&request).await,
                    Err(e) => Err(e),
                };
                match fallback {
                    Ok(completion) => CharStream::from_text(completion.result, cancel),
                    Err(e) => CharStream::failed(e, cancel),
                }
            }
        };

        StreamingTurn {
            chars,
            session_id: session.id.clone(),
            user_turn: prepared.user_turn,
            images: prepared.images,
            videos: prepared.videos,
        }
    }

    async fn complete(
        &self,
        session: &mut Session,
        input: UserInput,
        prepared: PreparedTurn,
        request: EndpointRequest,
    ) -> TurnReport {
        let (history_text, display, status) = match self.endpoint.chat(&request).await {
            Ok(completion) => {
                let rendered = render(&completion.result);
                let status = TurnStatus::Completed {
                    output_tokens: completion.output_tokens,
                };
                (rendered.history_text, rendered.display, status)
            }
            Err(e) => {
                log::error!("generation failed for session {}: {}", session.id, e);
                (
                    PROCESSING_ERROR_MSG.to_string(),
                    DisplayPayload::plain(PROCESSING_ERROR_MSG),
                    TurnStatus::Failed,
                )
            }
        };

        session.history.push(prepared.user_turn);
        session
            .history
            .push(ConversationTurn::assistant().text(history_text).build());
        session.image_count += prepared.images;
        session.video_count += prepared.videos;
        session.last_status = Some(status);
        session.transcript.push(TranscriptEntry::complete(
            input,
            display.answer.clone(),
            display.clone(),
        ));
        TurnReport { display, status }
    }

    /// Commits a streamed turn once [`StreamingTurn::next`] returned `None`, or
    /// after the caller gave up on it.
    ///
    /// Every outcome is rendered from the latest raw snapshot, so markup split
    /// across snapshots is stripped as a whole. A failed stream keeps the
    /// error message after whatever partial answer arrived.
    pub fn finish_stream(&self, session: &mut Session, turn: StreamingTurn) -> TurnReport {
        let StreamingTurn {
            chars,
            session_id,
            user_turn,
            images,
            videos,
        } = turn;

        let (source, status) = match chars.state() {
            StreamState::Done => (
                Cow::Borrowed(chars.raw_text()),
                TurnStatus::Completed {
                    output_tokens: None,
                },
            ),
            StreamState::Errored => (
                format!("{}{}", chars.raw_text(), ERROR_MSG).into(),
                TurnStatus::Failed,
            ),
            _ => (chars.raw_text().into(), TurnStatus::Cancelled),
        };
        let rendered = render(&source);
        let report = TurnReport {
            display: rendered.display.clone(),
            status,
        };

        if session.id != session_id {
            log::debug!("session was reset during streaming, dropping turn");
            return report;
        }

        session.history.push(user_turn);
        session
            .history
            .push(ConversationTurn::assistant().text(rendered.history_text).build());
        session.image_count += images;
        session.video_count += videos;
        session.streaming = false;
        session.last_status = Some(status);
        if let Some(entry) = session.last_entry_mut() {
            entry.answer = chars.shown_text().to_string();
            entry.finish(rendered.display);
        }
        log::debug!("stream finished with {:?}", status);
        report
    }

    /// Appends a demonstration exchange to a few-shot session.
    pub fn add_demonstration(
        &self,
        session: &mut Session,
        input: UserInput,
        answer: &str,
    ) -> Result<(), DemoError> {
        if session.streaming {
            return Err(DemoError::Busy(format!(
                "session {} is still generating",
                session.id
            )));
        }
        if session.mode != ChatMode::FewShot {
            return Err(DemoError::Validation(
                "Demonstrations are only available in few-shot mode.".to_string(),
            ));
        }
        if input
            .attachments
            .iter()
            .any(|a| a.kind != MediaKind::Image)
        {
            return Err(DemoError::Validation(FEWSHOT_IMAGES_ONLY_MSG.to_string()));
        }
        let contents = encode_plain(&input.text, &input.attachments);
        let answer = answer.trim();
        if contents.is_empty() || answer.is_empty() {
            return Err(DemoError::Validation(
                "A demonstration needs an input and an answer.".to_string(),
            ));
        }

        session
            .history
            .push(ConversationTurn::user().contents(contents).build());
        session
            .history
            .push(ConversationTurn::assistant().text(answer).build());
        session.transcript.push(TranscriptEntry::complete(
            input,
            answer,
            DisplayPayload::plain(answer),
        ));
        Ok(())
    }

    /// Drops the last exchange and asks the same question again.
    pub async fn regenerate(
        &self,
        session: &mut Session,
        options: TurnOptions,
    ) -> Result<Reply, DemoError> {
        if session.streaming {
            return Err(DemoError::Busy(format!(
                "session {} is still generating",
                session.id
            )));
        }
        let regenerable = session.transcript.len() > 1
            && session
                .transcript
                .last()
                .is_some_and(TranscriptEntry::is_regenerable);
        if !regenerable {
            return Err(DemoError::Validation(NO_REGEN_MSG.to_string()));
        }

        let saved = session.clone();
        let entry = session
            .transcript
            .pop()
            .ok_or_else(|| DemoError::Validation(NO_REGEN_MSG.to_string()))?;
        let question = entry
            .question
            .ok_or_else(|| DemoError::Validation(NO_REGEN_MSG.to_string()))?;
        let keep = session.history.len().saturating_sub(2);
        session.history.truncate(keep);
        let (images, videos) = question.media_counts();
        session.image_count = session.image_count.saturating_sub(images);
        session.video_count = session.video_count.saturating_sub(videos);

        match self.submit(session, question, options).await {
            Err(e) if e.is_rejection() => {
                *session = saved;
                Err(e)
            }
            other => other,
        }
    }

    /// Raises the cancel flag of the in-flight generation.
    pub fn stop(&self, session: &mut Session) {
        session.cancel.cancel();
        session.streaming = false;
    }

    pub fn clear(&self, session: &mut Session) {
        session.reset();
    }

    pub fn select_mode(&self, session: &mut Session, mode: ChatMode) {
        session.set_mode(mode);
    }
}
