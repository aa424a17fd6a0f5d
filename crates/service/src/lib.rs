//! HTTP inference endpoint for vlchat clients.
//!
//! `POST /api` answers with `{"data": {"result": ...}}`, `POST /api/stream`
//! with server-sent cumulative snapshots. Generation runs on an
//! OpenAI-compatible model server.

pub mod normalize;
pub mod routes;
pub mod upstream;

pub use routes::{AppState, router};
pub use upstream::{Upstream, UpstreamConfig};
