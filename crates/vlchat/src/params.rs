//! Generation parameters sent with every request.
//!
//! The endpoint receives these as a JSON-encoded string. Keys it does not know
//! about are carried in [`GenerationParams::custom`] and passed through.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::DemoError;

/// Token budget used by both decode presets.
pub const DEFAULT_MAX_NEW_TOKENS: u32 = 16284;
/// Input length allowed when the session carries a video.
pub const VIDEO_MAX_INP_LENGTH: u32 = 20480;

/// Decoding strategy chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    BeamSearch,
    #[default]
    Sampling,
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeMode::BeamSearch => write!(f, "Beam Search"),
            DecodeMode::Sampling => write!(f, "Sampling"),
        }
    }
}

impl FromStr for DecodeMode {
    type Err = DemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "beam" | "beam_search" => Ok(DecodeMode::BeamSearch),
            "sampling" | "sample" => Ok(DecodeMode::Sampling),
            other => Err(DemoError::Config(format!("unknown decode mode: {}", other))),
        }
    }
}

/// Parameters forwarded to the model's generate call.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationParams {
    /// Sample instead of searching. The service renames this to `do_sample`.
    #[serde(skip_serializing_if = "Option::is_none", alias = "do_sample")]
    pub sampling: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_beams: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_inp_length: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_image_id: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_slice_nums: Option<u32>,

    /// Let the model emit a `<think>` block before answering
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Any other key, forwarded untouched
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl GenerationParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// The preset for a decode mode. Beam search never streams.
    pub fn preset(mode: DecodeMode) -> Self {
        match mode {
            DecodeMode::BeamSearch => Self {
                sampling: Some(false),
                num_beams: Some(3),
                repetition_penalty: Some(1.2),
                max_new_tokens: Some(DEFAULT_MAX_NEW_TOKENS),
                stream: Some(false),
                ..Self::default()
            },
            DecodeMode::Sampling => Self {
                sampling: Some(true),
                top_p: Some(0.8),
                top_k: Some(100),
                temperature: Some(0.7),
                repetition_penalty: Some(1.03),
                max_new_tokens: Some(DEFAULT_MAX_NEW_TOKENS),
                ..Self::default()
            },
        }
    }

    /// Parameters for one turn, combining the preset with the user's toggles.
    pub fn for_turn(mode: DecodeMode, enable_thinking: bool, stream: bool, has_video: bool) -> Self {
        let mut params = Self::preset(mode);
        params.enable_thinking = Some(enable_thinking);
        params.stream = Some(stream && mode != DecodeMode::BeamSearch);
        if has_video {
            params.max_inp_length = Some(VIDEO_MAX_INP_LENGTH);
            params.use_image_id = Some(false);
            params.max_slice_nums = Some(1);
        }
        params
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn beam_search_never_streams() {
        let params = GenerationParams::for_turn(DecodeMode::BeamSearch, true, true, false);
        assert!(!params.is_streaming());
        assert_eq!(params.num_beams, Some(3));
        assert_eq!(params.sampling, Some(false));
    }

    #[test]
    fn sampling_preset_values() {
        let params = GenerationParams::for_turn(DecodeMode::Sampling, false, true, false);
        assert!(params.is_streaming());
        assert_eq!(params.top_p, Some(0.8));
        assert_eq!(params.top_k, Some(100));
        assert_eq!(params.max_new_tokens, Some(DEFAULT_MAX_NEW_TOKENS));
        assert_eq!(params.enable_thinking, Some(false));
        assert_eq!(params.max_inp_length, None);
    }

    #[test]
    fn video_adds_input_limits() {
        let params = GenerationParams::for_turn(DecodeMode::Sampling, false, false, true);
        assert_eq!(params.max_inp_length, Some(VIDEO_MAX_INP_LENGTH));
        assert_eq!(params.use_image_id, Some(false));
        assert_eq!(params.max_slice_nums, Some(1));
    }

    #[test]
    fn unknown_keys_pass_through() {
        let params: GenerationParams = serde_json::from_value(json!({
            "do_sample": true,
            "top_k": 5,
            "length_penalty": 0.5
        }))
        .unwrap();
        assert_eq!(params.sampling, Some(true));
        assert_eq!(params.custom.get("length_penalty"), Some(&json!(0.5)));

        let back = serde_json::to_value(&params).unwrap();
        assert_eq!(back["length_penalty"], json!(0.5));
        assert_eq!(back["sampling"], json!(true));
        assert!(back.get("num_beams").is_none());
    }

    #[test]
    fn decode_mode_parses_user_spellings() {
        assert_eq!("Beam Search".parse::<DecodeMode>().unwrap(), DecodeMode::BeamSearch);
        assert_eq!("beam".parse::<DecodeMode>().unwrap(), DecodeMode::BeamSearch);
        assert_eq!("sampling".parse::<DecodeMode>().unwrap(), DecodeMode::Sampling);
        assert!("greedy".parse::<DecodeMode>().is_err());
    }
}
