//! Client for the OpenAI-compatible server that actually runs the model.

use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};
use vlchat::stream::data_lines;
use vlchat::{ChatRole, Completion, Content, ConversationTurn, DemoError, StreamEvent};

use crate::normalize::ModelParams;

/// Generation keys forwarded under the same name.
const FORWARDED: &[&str] = &["temperature", "top_p", "top_k", "repetition_penalty"];
/// Keys consumed by the service or meaningless upstream.
const CONSUMED: &[&str] = &[
    "max_new_tokens",
    "max_inp_length",
    "do_sample",
    "num_beams",
    "use_image_id",
    "max_slice_nums",
    "suppress_tokens",
];

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL, e.g. `http://127.0.0.1:8000/v1`
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub struct Upstream {
    client: reqwest::Client,
    config: UpstreamConfig,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    completion_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Accumulates upstream deltas into one text, reasoning wrapped in
/// `<think>…</think>`.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    text: String,
    in_think: bool,
}

impl SnapshotBuilder {
    /// Adds a delta. Returns whether the text grew.
    pub fn push(&mut self, reasoning: Option<&str>, content: Option<&str>) -> bool {
        let mut grew = false;
        if let Some(r) = reasoning.filter(|r| !r.is_empty()) {
            if !self.in_think {
                self.text.push_str("<think>");
                self.in_think = true;
            }
            self.text.push_str(r);
            grew = true;
        }
        if let Some(c) = content.filter(|c| !c.is_empty()) {
            self.close_think();
            self.text.push_str(c);
            grew = true;
        }
        grew
    }

    fn close_think(&mut self) {
        if self.in_think {
            self.text.push_str("</think>");
            self.in_think = false;
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn finish(mut self) -> String {
        self.close_think();
        self.text
    }
}

impl Upstream {
    pub fn new(config: UpstreamConfig) -> Result<Self, DemoError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Request body for `/chat/completions`.
    pub fn body(&self, image: Option<&str>, turns: &[ConversationTurn], params: &ModelParams) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.config.model));
        body.insert("messages".into(), Value::Array(messages(image, turns)));
        body.insert("stream".into(), json!(params.stream));

        if let Some(max) = params.get_u64("max_new_tokens") {
            body.insert("max_tokens".into(), json!(max));
        }
        for key in FORWARDED {
            if let Some(v) = params.options.get(*key) {
                body.insert((*key).into(), v.clone());
            }
        }
        if params.get_bool("do_sample") == Some(false) {
            body.insert("temperature".into(), json!(0.0));
        }
        body.insert(
            "chat_template_kwargs".into(),
            json!({"enable_thinking": params.enable_thinking}),
        );
        for (key, value) in &params.options {
            if !FORWARDED.contains(&key.as_str()) && !CONSUMED.contains(&key.as_str()) {
                body.insert(key.clone(), value.clone());
            }
        }
        Value::Object(body)
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let rb = self.client.post(self.completions_url()).json(body);
        match &self.config.api_key {
            Some(key) => rb.bearer_auth(key),
            None => rb,
        }
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, DemoError> {
        let resp = self.post(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DemoError::Endpoint(format!("upstream returned {}: {}", status, text)));
        }
        Ok(resp)
    }

    #[instrument(name = "upstream.chat", skip_all)]
    pub async fn chat(
        &self,
        image: Option<&str>,
        turns: &[ConversationTurn],
        params: &ModelParams,
    ) -> Result<Completion, DemoError> {
        let body = self.body(image, turns, params);
        let resp = self.send(&body).await?;
        let completion: ChatCompletion = resp.json().await?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DemoError::Endpoint("upstream returned no choices".into()))?;

        let mut snapshot = SnapshotBuilder::default();
        snapshot.push(
            choice.message.reasoning_content.as_deref(),
            choice.message.content.as_deref(),
        );
        Ok(Completion {
            result: snapshot.finish(),
            output_tokens: completion.usage.and_then(|u| u.completion_tokens),
        })
    }

    /// Cumulative snapshots ending with a finished event, or with an error
    /// event when the upstream fails mid-way.
    #[instrument(name = "upstream.chat_stream", skip_all)]
    pub async fn chat_stream(
        &self,
        image: Option<&str>,
        turns: &[ConversationTurn],
        params: &ModelParams,
    ) -> Result<impl Stream<Item = StreamEvent> + Send + 'static, DemoError> {
        let body = self.body(image, turns, params);
        let resp = self.send(&body).await?;
        Ok(snapshots(data_lines(resp.bytes_stream())))
    }
}

/// Folds upstream `data:` payloads into snapshot events.
pub fn snapshots<S>(lines: S) -> impl Stream<Item = StreamEvent> + Send + 'static
where
    S: Stream<Item = Result<String, DemoError>> + Send + 'static,
{
    lines
        .chain(futures::stream::once(futures::future::ready(Ok(
            "[DONE]".to_string(),
        ))))
        .scan(Some(SnapshotBuilder::default()), |state, line| {
            let Some(builder) = state.as_mut() else {
                return futures::future::ready(None);
            };
            let event = match line {
                Ok(data) if data.trim() == "[DONE]" => {
                    let text = state.take().map(SnapshotBuilder::finish).unwrap_or_default();
                    Some(StreamEvent::finished(text))
                }
                Ok(data) => match serde_json::from_str::<ChunkEnvelope>(&data) {
                    Ok(chunk) => {
                        if let Some(err) = chunk.error {
                            error!(error = %err, "upstream stream error");
                            *state = None;
                            Some(StreamEvent::failure(err.to_string()))
                        } else {
                            let mut grew = false;
                            for choice in chunk.choices {
                                grew |= builder.push(
                                    choice.delta.reasoning_content.as_deref(),
                                    choice.delta.content.as_deref(),
                                );
                            }
                            grew.then(|| StreamEvent::snapshot(builder.text()))
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, line = %data, "skipping malformed upstream line");
                        None
                    }
                },
                Err(e) => {
                    warn!(error = %e, "upstream stream broke");
                    *state = None;
                    Some(StreamEvent::failure(e.to_string()))
                }
            };
            futures::future::ready(Some(event))
        })
        .filter_map(futures::future::ready)
}

/// Converts turns to chat messages; a top-level image longer than 10 chars is
/// prepended to the first user turn.
fn messages(image: Option<&str>, turns: &[ConversationTurn]) -> Vec<Value> {
    let mut image = image.filter(|i| i.len() > 10);
    turns
        .iter()
        .map(|turn| {
            let mut parts = Vec::new();
            if turn.role == ChatRole::User {
                if let Some(img) = image.take() {
                    parts.push(image_part(img));
                }
            }
            for content in &turn.contents {
                parts.push(match content {
                    Content::Text(text) => json!({"type": "text", "text": text}),
                    Content::Image(b64) => image_part(b64),
                });
            }
            let role = match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            json!({"role": role, "content": parts})
        })
        .collect()
}

fn image_part(b64: &str) -> Value {
    json!({
        "type": "image_url",
        "image_url": {"url": format!("data:image/png;base64,{}", b64)}
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use vlchat::{DecodeMode, GenerationParams};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upstream(base_url: String) -> Upstream {
        Upstream::new(UpstreamConfig {
            base_url,
            model: "MiniCPM-V".into(),
            api_key: Some("secret".into()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn turns() -> Vec<ConversationTurn> {
        vec![ConversationTurn::user().image("aW1hZ2U=").text("describe").build()]
    }

    #[test]
    fn builder_wraps_reasoning() {
        let mut builder = SnapshotBuilder::default();
        assert!(builder.push(Some("look"), None));
        assert!(builder.push(Some("ing"), None));
        assert_eq!(builder.text(), "<think>looking");
        assert!(builder.push(None, Some("A cat")));
        assert!(!builder.push(None, Some("")));
        assert_eq!(builder.finish(), "<think>looking</think>A cat");

        let mut builder = SnapshotBuilder::default();
        builder.push(Some("unfinished"), None);
        assert_eq!(builder.finish(), "<think>unfinished</think>");
    }

    #[test]
    fn body_maps_params_and_images() {
        let upstream = upstream("http://localhost/v1".into());
        let params = normalize(
            &GenerationParams::for_turn(DecodeMode::BeamSearch, false, false, false),
            false,
        );
        let body = upstream.body(Some("short"), &turns(), &params);

        assert_eq!(body["model"], "MiniCPM-V");
        assert_eq!(body["stream"], false);
        assert_eq!(body["max_tokens"], 16284);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["chat_template_kwargs"]["enable_thinking"], false);
        assert!(body.get("num_beams").is_none());
        assert!(body.get("suppress_tokens").is_none());

        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(
            content[0]["image_url"]["url"],
            "data:image/png;base64,aW1hZ2U="
        );
        assert_eq!(content[1], json!({"type": "text", "text": "describe"}));
    }

    #[test]
    fn long_top_level_image_goes_first() {
        let msgs = messages(Some("0123456789ab"), &turns());
        let content = msgs[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(
            content[0]["image_url"]["url"],
            "data:image/png;base64,0123456789ab"
        );
    }

    #[tokio::test]
    async fn snapshots_are_cumulative() {
        let lines = futures::stream::iter(vec![
            Ok(r#"{"choices":[{"delta":{"reasoning_content":"hm"}}]}"#.to_string()),
            Ok(r#"{"choices":[{"delta":{"content":"A"}}]}"#.to_string()),
            Ok("garbage".to_string()),
            Ok(r#"{"choices":[{"delta":{"content":" cat"}}]}"#.to_string()),
            Ok("[DONE]".to_string()),
        ]);
        let events = snapshots(lines).collect::<Vec<_>>().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::snapshot("<think>hm"),
                StreamEvent::snapshot("<think>hm</think>A"),
                StreamEvent::snapshot("<think>hm</think>A cat"),
                StreamEvent::finished("<think>hm</think>A cat"),
            ]
        );
    }

    #[tokio::test]
    async fn broken_stream_ends_with_error_event() {
        let lines = futures::stream::iter(vec![
            Ok(r#"{"choices":[{"delta":{"content":"A"}}]}"#.to_string()),
            Err(DemoError::Transport("reset".into())),
            Ok(r#"{"choices":[{"delta":{"content":"B"}}]}"#.to_string()),
        ]);
        let events = snapshots(lines).collect::<Vec<_>>().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].error.is_some());
    }

    #[tokio::test]
    async fn chat_joins_reasoning_and_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "A cat.", "reasoning_content": "whiskers"}}],
                "usage": {"completion_tokens": 4}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let upstream = upstream(format!("{}/v1", server.uri()));
        let params = normalize(&GenerationParams::default(), false);
        let completion = upstream.chat(None, &turns(), &params).await.unwrap();
        assert_eq!(completion.result, "<think>whiskers</think>A cat.");
        assert_eq!(completion.output_tokens, Some(4));
    }

    #[tokio::test]
    async fn chat_surfaces_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oom"))
            .mount(&server)
            .await;

        let upstream = upstream(format!("{}/v1", server.uri()));
        let params = normalize(&GenerationParams::default(), false);
        let err = upstream.chat(None, &turns(), &params).await.unwrap_err();
        assert!(matches!(err, DemoError::Endpoint(_)));
    }
}
