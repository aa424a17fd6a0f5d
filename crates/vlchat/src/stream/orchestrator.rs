use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::event::EventStream;
use crate::error::{DemoError, ERROR_MSG};
use crate::text::sanitize;

/// Shared stop signal. The stop control only stores `true`; the in-flight
/// [`CharStream`] observes it between events and between characters.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where a [`CharStream`] is in its life. It is created once the endpoint has
/// answered, so it starts in `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Streaming,
    /// The final snapshot arrived; only queued characters remain.
    Draining,
    Done,
    Cancelled,
    Errored,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Done | StreamState::Cancelled | StreamState::Errored
        )
    }
}

/// Turns a stream of cumulative snapshots into a feed of characters.
///
/// Each grown snapshot contributes its unseen suffix, sanitized, one character
/// per call to [`CharStream::next`]. Nothing runs in the background: the event
/// stream is only polled when the queue is empty and the caller asks for more.
pub struct CharStream {
    events: Option<EventStream>,
    pending: VecDeque<char>,
    /// Length, in chars, of the longest raw snapshot seen.
    seen_len: usize,
    raw: String,
    shown: String,
    state: StreamState,
    cancel: CancelFlag,
    idle_timeout: Option<Duration>,
    failure: Option<DemoError>,
}

impl CharStream {
    pub fn new(events: EventStream, cancel: CancelFlag, idle_timeout: Option<Duration>) -> Self {
        Self {
            events: Some(events),
            pending: VecDeque::new(),
            seen_len: 0,
            raw: String::new(),
            shown: String::new(),
            state: StreamState::Streaming,
            cancel,
            idle_timeout,
            failure: None,
        }
    }

    /// Feeds an already complete answer through the same character pipeline.
    pub fn from_text(text: impl Into<String>, cancel: CancelFlag) -> Self {
        let raw = text.into();
        Self {
            events: None,
            pending: sanitize(&raw).chars().collect(),
            seen_len: raw.chars().count(),
            raw,
            shown: String::new(),
            state: StreamState::Draining,
            cancel,
            idle_timeout: None,
            failure: None,
        }
    }

    /// A stream that only emits the fixed error message.
    pub fn failed(err: DemoError, cancel: CancelFlag) -> Self {
        let mut stream = Self::from_text(String::new(), cancel);
        stream.fail(err);
        stream
    }

    /// Next character to show, or `None` once finished, failed or cancelled.
    pub async fn next(&mut self) -> Option<char> {
        loop {
            if self.cancel.is_cancelled() {
                self.stop();
                return None;
            }

            if let Some(c) = self.pending.pop_front() {
                self.shown.push(c);
                return Some(c);
            }

            match self.state {
                StreamState::Streaming => {}
                StreamState::Draining => {
                    self.state = StreamState::Done;
                    return None;
                }
                _ => return None,
            }

            let item = self.read_event().await;

            if self.cancel.is_cancelled() {
                self.stop();
                return None;
            }

            match item {
                None => {
                    log::warn!(
                        "event stream ended without a finished event after {} chars",
                        self.seen_len
                    );
                    self.events = None;
                    self.state = StreamState::Done;
                }
                Some(Err(e)) => self.fail(e),
                Some(Ok(event)) => {
                    if let Some(message) = event.error {
                        self.fail(DemoError::Endpoint(message));
                    } else if event.finished {
                        self.absorb(&event.full_response);
                        self.raw = event.full_response;
                        self.events = None;
                        self.state = StreamState::Draining;
                    } else {
                        self.absorb(&event.full_response);
                    }
                }
            }
        }
    }

    async fn read_event(&mut self) -> Option<Result<super::StreamEvent, DemoError>> {
        let events = self.events.as_mut()?;
        match self.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, events.next()).await {
                Ok(item) => item,
                Err(_) => Some(Err(DemoError::Transport(format!(
                    "no event received for {}s",
                    limit.as_secs_f32()
                )))),
            },
            None => events.next().await,
        }
    }

    fn absorb(&mut self, full: &str) {
        let total = full.chars().count();
        if total <= self.seen_len {
            return;
        }
        let suffix = full.chars().skip(self.seen_len).collect::<String>();
        self.pending.extend(sanitize(&suffix).chars());
        self.seen_len = total;
        self.raw = full.to_string();
    }

    fn fail(&mut self, err: DemoError) {
        log::error!("streaming generation failed: {}", err);
        self.events = None;
        self.pending.clear();
        self.pending.extend(ERROR_MSG.chars());
        self.failure = Some(err);
        self.state = StreamState::Errored;
    }

    fn stop(&mut self) {
        if self.state != StreamState::Cancelled {
            log::debug!("stream cancelled after {} chars", self.shown.chars().count());
        }
        self.events = None;
        self.pending.clear();
        self.state = StreamState::Cancelled;
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// The latest raw snapshot, before sanitization.
    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    /// Everything handed out by [`CharStream::next`] so far.
    pub fn shown_text(&self) -> &str {
        &self.shown
    }

    pub fn failure(&self) -> Option<&DemoError> {
        self.failure.as_ref()
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Adapts the feed into a `Stream` of characters.
    pub fn into_stream(self) -> impl futures::Stream<Item = char> + Send {
        futures::stream::unfold(self, |mut chars| async move {
            chars.next().await.map(|c| (c, chars))
        })
    }
}

impl std::fmt::Debug for CharStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharStream")
            .field("state", &self.state)
            .field("seen_len", &self.seen_len)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamEvent;
    use futures::stream;

    fn events(items: Vec<Result<StreamEvent, DemoError>>) -> EventStream {
        Box::pin(stream::iter(items))
    }

    async fn collect(chars: &mut CharStream) -> String {
        let mut out = String::new();
        while let Some(c) = chars.next().await {
            out.push(c);
        }
        out
    }

    #[tokio::test]
    async fn snapshots_concatenate_to_final_text() {
        let mut chars = CharStream::new(
            events(vec![
                Ok(StreamEvent::snapshot("Hi")),
                Ok(StreamEvent::snapshot("Hi there")),
                Ok(StreamEvent::finished("Hi there!")),
            ]),
            CancelFlag::new(),
            None,
        );
        assert_eq!(collect(&mut chars).await, "Hi there!");
        assert_eq!(chars.state(), StreamState::Done);
        assert_eq!(chars.raw_text(), "Hi there!");
    }

    #[tokio::test]
    async fn suffixes_are_sanitized_but_length_is_raw() {
        let mut chars = CharStream::new(
            events(vec![
                Ok(StreamEvent::snapshot("a <ref>cat</ref>")),
                Ok(StreamEvent::finished("a <ref>cat</ref> sat")),
            ]),
            CancelFlag::new(),
            None,
        );
        assert_eq!(collect(&mut chars).await, "a cat sat");
        assert_eq!(chars.raw_text(), "a <ref>cat</ref> sat");
    }

    #[tokio::test]
    async fn multibyte_text_is_tracked_by_chars() {
        let mut chars = CharStream::new(
            events(vec![
                Ok(StreamEvent::snapshot("猫")),
                Ok(StreamEvent::finished("猫が好き")),
            ]),
            CancelFlag::new(),
            None,
        );
        assert_eq!(collect(&mut chars).await, "猫が好き");
    }

    #[tokio::test]
    async fn cancel_stops_emission_immediately() {
        let cancel = CancelFlag::new();
        let mut chars = CharStream::new(
            events(vec![
                Ok(StreamEvent::snapshot("Hello")),
                Ok(StreamEvent::finished("Hello world")),
            ]),
            cancel.clone(),
            None,
        );
        assert_eq!(chars.next().await, Some('H'));
        assert_eq!(chars.next().await, Some('e'));
        cancel.cancel();
        assert_eq!(chars.next().await, None);
        assert_eq!(chars.next().await, None);
        assert_eq!(chars.state(), StreamState::Cancelled);
        assert_eq!(chars.shown_text(), "He");
    }

    #[tokio::test]
    async fn cancel_is_seen_while_waiting_for_events() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut chars = CharStream::new(
            Box::pin(stream::pending::<Result<StreamEvent, DemoError>>()),
            cancel,
            Some(Duration::from_secs(3600)),
        );
        assert_eq!(chars.next().await, None);
        assert_eq!(chars.state(), StreamState::Cancelled);
    }

    #[tokio::test]
    async fn endpoint_error_emits_fixed_message() {
        let mut chars = CharStream::new(
            events(vec![
                Ok(StreamEvent::snapshot("partial")),
                Ok(StreamEvent::failure("CUDA out of memory")),
            ]),
            CancelFlag::new(),
            None,
        );
        assert_eq!(collect(&mut chars).await, format!("partial{}", ERROR_MSG));
        assert_eq!(chars.state(), StreamState::Errored);
        assert!(matches!(chars.failure(), Some(DemoError::Endpoint(_))));
    }

    #[tokio::test]
    async fn transport_error_mid_stream_is_not_retried() {
        let mut chars = CharStream::new(
            events(vec![
                Ok(StreamEvent::snapshot("ab")),
                Err(DemoError::Transport("connection reset".into())),
                Ok(StreamEvent::finished("abc")),
            ]),
            CancelFlag::new(),
            None,
        );
        assert_eq!(collect(&mut chars).await, format!("ab{}", ERROR_MSG));
        assert!(matches!(chars.failure(), Some(DemoError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_times_out() {
        let mut chars = CharStream::new(
            Box::pin(stream::pending::<Result<StreamEvent, DemoError>>()),
            CancelFlag::new(),
            Some(Duration::from_secs(120)),
        );
        assert_eq!(collect(&mut chars).await, ERROR_MSG);
        assert!(matches!(chars.failure(), Some(DemoError::Transport(_))));
    }

    #[tokio::test]
    async fn complete_text_feeds_same_pipeline() {
        let mut chars = CharStream::from_text("<box>1 1 2 2</box>ok", CancelFlag::new());
        assert_eq!(collect(&mut chars).await, "ok");
        assert_eq!(chars.state(), StreamState::Done);
    }

    #[tokio::test]
    async fn stream_adapter_yields_chars() {
        let chars = CharStream::from_text("abc", CancelFlag::new());
        let out = chars.into_stream().collect::<String>().await;
        assert_eq!(out, "abc");
    }
}
