//! The inference endpoint seam: request/response wire types, the
//! [`InferenceEndpoint`] trait and its HTTP implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat::ConversationTurn;
use crate::error::DemoError;
use crate::params::GenerationParams;
use crate::stream::EventStream;

pub const MODEL_HEADER: &str = "X-Model-Best-Model";
pub const TRACE_HEADER: &str = "X-Model-Best-Trace-ID";

/// Body of both the single-shot and the streaming call. `question` and
/// `params` are JSON documents encoded as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub question: String,
    #[serde(default)]
    pub params: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl EndpointRequest {
    pub fn new(
        conversation: &[ConversationTurn],
        params: &GenerationParams,
        session_id: Option<&str>,
    ) -> Result<Self, DemoError> {
        Ok(Self {
            image: None,
            question: serde_json::to_string(conversation)?,
            params: serde_json::to_string(params)?,
            session_id: session_id.map(str::to_string),
        })
    }

    pub fn conversation(&self) -> Result<Vec<ConversationTurn>, DemoError> {
        Ok(serde_json::from_str(&self.question)?)
    }

    /// Decoded parameters. An empty string means no parameters.
    pub fn generation_params(&self) -> Result<GenerationParams, DemoError> {
        if self.params.trim().is_empty() {
            return Ok(GenerationParams::default());
        }
        Ok(serde_json::from_str(&self.params)?)
    }

    pub fn is_streaming(&self) -> bool {
        self.generation_params()
            .map(|p| p.is_streaming())
            .unwrap_or(false)
    }

    /// The same request with `stream` turned off.
    pub fn without_streaming(&self) -> Result<Self, DemoError> {
        let mut params = self.generation_params()?;
        params.stream = Some(false);
        Ok(Self {
            params: serde_json::to_string(&params)?,
            ..self.clone()
        })
    }
}

/// A complete answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// `{"data": {...}}` envelope of the single-shot response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEnvelope {
    pub data: Completion,
}

/// Something that can run a generation for a conversation.
#[async_trait]
pub trait InferenceEndpoint: Send + Sync {
    /// One complete answer.
    async fn chat(&self, request: &EndpointRequest) -> Result<Completion, DemoError>;

    /// Cumulative snapshots, the last one marked finished. An error here means
    /// the stream could not be opened at all.
    async fn chat_stream(&self, request: &EndpointRequest) -> Result<EventStream, DemoError>;
}

#[cfg(feature = "http-client")]
pub use http::HttpEndpoint;

#[cfg(feature = "http-client")]
mod http {
    use super::*;
    use crate::stream::decode_events;
    use std::time::Duration;
    use tracing::instrument;
    use url::Url;

    /// Talks to the endpoint over HTTP: `POST <url>` and `POST <url>/stream`.
    #[derive(Debug, Clone)]
    pub struct HttpEndpoint {
        client: reqwest::Client,
        url: Url,
        stream_url: Url,
        model: String,
        trace_id: String,
    }

    impl HttpEndpoint {
        pub fn new(
            url: &str,
            model: impl Into<String>,
            trace_id: impl Into<String>,
            connect_timeout: Duration,
        ) -> Result<Self, DemoError> {
            let url = Url::parse(url)?;
            let stream_url = Url::parse(&format!("{}/stream", url.as_str().trim_end_matches('/')))?;
            let client = reqwest::Client::builder()
                .connect_timeout(connect_timeout)
                .build()?;
            Ok(Self {
                client,
                url,
                stream_url,
                model: model.into(),
                trace_id: trace_id.into(),
            })
        }

        pub fn url(&self) -> &Url {
            &self.url
        }

        pub fn stream_url(&self) -> &Url {
            &self.stream_url
        }

        fn post(&self, url: &Url, request: &EndpointRequest) -> reqwest::RequestBuilder {
            self.client
                .post(url.clone())
                .header(MODEL_HEADER, &self.model)
                .header(TRACE_HEADER, &self.trace_id)
                .json(request)
        }

        async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DemoError> {
            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }
            let body = resp.text().await.unwrap_or_default();
            Err(DemoError::Transport(format!(
                "endpoint returned {}: {}",
                status,
                body.chars().take(512).collect::<String>()
            )))
        }
    }

    #[async_trait]
    impl InferenceEndpoint for HttpEndpoint {
        #[instrument(name = "endpoint.chat", skip_all, fields(session_id = ?request.session_id))]
        async fn chat(&self, request: &EndpointRequest) -> Result<Completion, DemoError> {
            let resp = self.post(&self.url, request).send().await?;
            let resp = Self::check_status(resp).await?;
            let body = resp.text().await?;
            log::trace!("endpoint response: {} bytes", body.len());
            let envelope: CompletionEnvelope =
                serde_json::from_str(&body).map_err(|e| DemoError::Protocol {
                    message: e.to_string(),
                    raw_line: body.chars().take(512).collect(),
                })?;
            Ok(envelope.data)
        }

        #[instrument(name = "endpoint.chat_stream", skip_all, fields(session_id = ?request.session_id))]
        async fn chat_stream(&self, request: &EndpointRequest) -> Result<EventStream, DemoError> {
            let resp = self
                .post(&self.stream_url, request)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .header(reqwest::header::CACHE_CONTROL, "no-cache")
                .send()
                .await?;
            let resp = Self::check_status(resp).await?;
            log::debug!("stream opened at {}", self.stream_url);
            Ok(decode_events(resp.bytes_stream()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DecodeMode;

    #[test]
    fn request_encodes_nested_json_strings() {
        let turns = vec![ConversationTurn::user().text("hi").build()];
        let params = GenerationParams::for_turn(DecodeMode::Sampling, false, true, false);
        let request = EndpointRequest::new(&turns, &params, Some("abc")).unwrap();

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("image").is_none());
        assert_eq!(value["session_id"], "abc");
        assert!(value["question"].is_string());
        assert_eq!(request.conversation().unwrap(), turns);
        assert!(request.is_streaming());
        assert!(!request.without_streaming().unwrap().is_streaming());
    }

    #[test]
    fn empty_params_decode_to_defaults() {
        let request = EndpointRequest {
            question: "[]".into(),
            ..Default::default()
        };
        assert_eq!(request.generation_params().unwrap(), GenerationParams::default());
        assert!(request.conversation().unwrap().is_empty());
    }

    #[cfg(feature = "http-client")]
    mod http {
        use super::*;
        use crate::stream::StreamEvent;
        use futures::StreamExt;
        use serde_json::json;
        use std::time::Duration;
        use wiremock::matchers::{header, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn endpoint(server: &MockServer) -> HttpEndpoint {
            HttpEndpoint::new(
                &format!("{}/api", server.uri()),
                "luca-v-online",
                "web_demo",
                Duration::from_secs(5),
            )
            .unwrap()
        }

        fn request() -> EndpointRequest {
            let turns = vec![ConversationTurn::user().text("hi").build()];
            EndpointRequest::new(&turns, &GenerationParams::default(), Some("s1")).unwrap()
        }

        #[tokio::test]
        async fn chat_returns_result_and_sends_headers() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api"))
                .and(header(MODEL_HEADER, "luca-v-online"))
                .and(header(TRACE_HEADER, "web_demo"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "data": {"result": "A cat.", "output_tokens": 3}
                })))
                .expect(1)
                .mount(&server)
                .await;

            let completion = endpoint(&server).chat(&request()).await.unwrap();
            assert_eq!(completion.result, "A cat.");
            assert_eq!(completion.output_tokens, Some(3));
        }

        #[tokio::test]
        async fn chat_maps_status_to_transport_error() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api"))
                .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
                .mount(&server)
                .await;

            let err = endpoint(&server).chat(&request()).await.unwrap_err();
            assert!(matches!(err, DemoError::Transport(_)));
        }

        #[tokio::test]
        async fn chat_rejects_malformed_body() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
                .mount(&server)
                .await;

            let err = endpoint(&server).chat(&request()).await.unwrap_err();
            assert!(matches!(err, DemoError::Protocol { .. }));
        }

        #[tokio::test]
        async fn chat_stream_decodes_events() {
            let server = MockServer::start().await;
            let body = "data: {\"full_response\":\"Hi\",\"finished\":false}\n\n\
                        data: {\"full_response\":\"Hi!\",\"finished\":true}\n\n";
            Mock::given(method("POST"))
                .and(path("/api/stream"))
                .and(header("accept", "text/event-stream"))
                .and(header("cache-control", "no-cache"))
                .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
                .expect(1)
                .mount(&server)
                .await;

            let events = endpoint(&server)
                .chat_stream(&request())
                .await
                .unwrap()
                .collect::<Vec<_>>()
                .await;
            let events = events.into_iter().map(Result::unwrap).collect::<Vec<_>>();
            assert_eq!(
                events,
                vec![StreamEvent::snapshot("Hi"), StreamEvent::finished("Hi!")]
            );
        }

        #[tokio::test]
        async fn chat_stream_fails_on_bad_status() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/api/stream"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server)
                .await;

            let result = endpoint(&server).chat_stream(&request()).await;
            assert!(matches!(result, Err(DemoError::Transport(_))));
        }
    }
}
