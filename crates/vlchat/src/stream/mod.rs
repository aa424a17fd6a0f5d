//! Server-sent event framing of cumulative snapshots and the character feed
//! built on top of it.

pub mod event;
pub mod orchestrator;

pub use event::{EventStream, StreamEvent, data_lines, decode_events, parse_sse_line};
pub use orchestrator::{CancelFlag, CharStream, StreamState};
