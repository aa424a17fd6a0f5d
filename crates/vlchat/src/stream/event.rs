use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::DemoError;

/// One server-sent event of the streaming endpoint. `full_response` is the
/// whole answer so far, never a delta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub full_response: String,
    #[serde(default)]
    pub finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamEvent {
    pub fn snapshot(full_response: impl Into<String>) -> Self {
        Self {
            full_response: full_response.into(),
            ..Self::default()
        }
    }

    pub fn finished(full_response: impl Into<String>) -> Self {
        Self {
            full_response: full_response.into(),
            finished: true,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Decodes the payload of a `data:` line.
    pub fn from_data(data: &str) -> Result<Self, DemoError> {
        serde_json::from_str(data).map_err(|e| DemoError::Protocol {
            message: e.to_string(),
            raw_line: data.to_string(),
        })
    }

    /// The payload for a `data:` line.
    pub fn to_data(&self) -> Result<String, DemoError> {
        Ok(serde_json::to_string(self)?)
    }
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, DemoError>> + Send>>;

/// Returns the payload of an SSE `data:` line. Blank lines, comments and other
/// fields yield `None`.
pub fn parse_sse_line(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?;
    Some(data.strip_prefix(' ').unwrap_or(data))
}

/// Splits a byte stream into SSE `data:` payloads. Chunks may break lines
/// anywhere; a trailing line without a newline is flushed at the end.
pub fn data_lines<S, E>(bytes: S) -> impl Stream<Item = Result<String, DemoError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<DemoError> + 'static,
{
    bytes
        .map(|res: Result<Bytes, E>| -> Result<Bytes, DemoError> { res.map_err(Into::into) })
        .chain(futures::stream::once(futures::future::ready(Ok(
            Bytes::from_static(b"\n"),
        ))))
        .scan(Vec::new(), |buffer: &mut Vec<u8>, res: Result<Bytes, DemoError>| {
            let res = match res {
                Ok(bytes) => {
                    if !bytes.is_empty() {
                        log::trace!("Received chunk: {} bytes", bytes.len());
                    }
                    buffer.extend_from_slice(&bytes);
                    let mut payloads = Vec::new();
                    let mut start = 0;
                    for i in 0..buffer.len() {
                        if buffer[i] == b'\n' {
                            let line = &buffer[start..i + 1];
                            match std::str::from_utf8(line) {
                                Ok(line) => {
                                    if let Some(data) = parse_sse_line(line) {
                                        payloads.push(data.to_string());
                                    }
                                }
                                Err(e) => {
                                    log::debug!(
                                        "Skipping non UTF-8 SSE line: {:?}, error: {}",
                                        String::from_utf8_lossy(line),
                                        e
                                    );
                                }
                            }
                            start = i + 1;
                        }
                    }
                    buffer.drain(..start);
                    Ok(payloads)
                }
                Err(e) => Err(e),
            };
            futures::future::ready(Some(res))
        })
        .flat_map(|res: Result<Vec<String>, DemoError>| {
            let v: Vec<Result<String, DemoError>> = match res {
                Ok(payloads) => payloads.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(v)
        })
}

/// Decodes a byte stream of `data: {StreamEvent}` lines. Lines that fail to
/// decode are logged and skipped.
pub fn decode_events<S, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<DemoError> + 'static,
{
    let events = data_lines(bytes).filter_map(|res| {
        let item = match res {
            Ok(data) => match StreamEvent::from_data(&data) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    log::debug!("Failed to parse SSE line: {}", e);
                    None
                }
            },
            Err(e) => Some(Err(e)),
        };
        futures::future::ready(item)
    });
    Box::pin(events)
}
