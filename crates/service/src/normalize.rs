use serde_json::{Map, Value, json};
use tracing::info;
use vlchat::GenerationParams;

pub const MAX_NEW_TOKENS_CAP: u64 = 16384;
pub const MAX_INP_LENGTH_CAP: u64 = 20480;
/// Token id of `<think>` in the model vocabulary.
pub const THINK_TOKEN_ID: u64 = 151667;

/// Parameters after the service's own rules have been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub enable_thinking: bool,
    pub stream: bool,
    /// Everything else handed to generation, keyed as the model expects
    /// (`do_sample`, `num_beams`, `suppress_tokens`, ...).
    pub options: Map<String, Value>,
}

impl ModelParams {
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.options.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(Value::as_u64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(Value::as_bool)
    }
}

/// Applies the service rules. `stream` is decided by the route, not by the
/// request's own `stream` key.
pub fn normalize(params: &GenerationParams, stream: bool) -> ModelParams {
    let mut options = match serde_json::to_value(params) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    clamp(&mut options, "max_new_tokens", MAX_NEW_TOKENS_CAP);
    clamp(&mut options, "max_inp_length", MAX_INP_LENGTH_CAP);

    let enable_thinking = options
        .remove("enable_thinking")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    options.remove("stream");

    if let Some(sampling) = options.remove("sampling") {
        options.insert("do_sample".to_string(), sampling);
    }

    if stream {
        options.insert("num_beams".to_string(), json!(1));
        options.insert("do_sample".to_string(), json!(true));
    }

    if !enable_thinking {
        options.insert("suppress_tokens".to_string(), json!([THINK_TOKEN_ID]));
    }

    ModelParams {
        enable_thinking,
        stream,
        options,
    }
}

fn clamp(options: &mut Map<String, Value>, key: &str, cap: u64) {
    if let Some(value) = options.get(key).and_then(Value::as_u64) {
        if value > cap {
            info!(key, value, cap, "clamping generation parameter");
            options.insert(key.to_string(), json!(cap));
        }
    }
}
