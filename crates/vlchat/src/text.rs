//! Post-processing of raw model text: markup stripping, thinking/answer
//! splitting, whitespace normalization and the final display layout.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static BOX_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(<box>.*</box>)").expect("valid box regex"));

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid think regex"));

const MARKERS: [&str; 4] = ["<ref>", "</ref>", "<box>", "</box>"];

const INVISIBLE: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{FEFF}'];

/// Removes spatial-reference markup.
///
/// The greedy `<box>…</box>` span on each line goes first, then the bare
/// markers. Marker removal runs to a fixpoint so `"<bo<box>x>"` cannot leave a
/// new `<box>` behind.
pub fn sanitize(text: &str) -> String {
    let mut out = BOX_SPAN.replace_all(text, "").into_owned();
    while MARKERS.iter().any(|m| out.contains(m)) {
        for marker in MARKERS {
            out = out.replace(marker, "");
        }
    }
    out
}

/// Thinking and answer parts of a model response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub thinking: String,
    pub answer: String,
}

/// Splits `<think>` blocks from the answer. Multiple blocks are joined with a
/// blank line.
pub fn split_thinking(text: &str) -> ParsedResponse {
    let blocks = THINK_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect::<Vec<_>>();

    if blocks.is_empty() {
        return ParsedResponse {
            thinking: String::new(),
            answer: text.trim().to_string(),
        };
    }

    ParsedResponse {
        thinking: blocks.join("\n\n").trim().to_string(),
        answer: THINK_BLOCK.replace_all(text, "").trim().to_string(),
    }
}

/// Drops zero-width characters and trims every line and the whole text.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let cleaned = text.replace(INVISIBLE, "");
    cleaned
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// One block of the final rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section<'a> {
    Thinking(&'a str),
    Answer { text: &'a str, with_header: bool },
}

/// The structured view that replaces the plain streamed text once a reply is
/// complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPayload {
    pub thinking: String,
    pub answer: String,
}

impl DisplayPayload {
    pub fn new(thinking: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            thinking: thinking.into(),
            answer: answer.into(),
        }
    }

    /// A payload with only a formal answer, used for fixed messages.
    pub fn plain(answer: impl Into<String>) -> Self {
        Self::new(String::new(), answer)
    }

    pub fn sections(&self) -> Vec<Section<'_>> {
        if self.thinking.is_empty() {
            vec![Section::Answer {
                text: &self.answer,
                with_header: false,
            }]
        } else {
            vec![
                Section::Thinking(&self.thinking),
                Section::Answer {
                    text: &self.answer,
                    with_header: true,
                },
            ]
        }
    }

    /// HTML markup for web front ends, wrapped in one leading and one trailing
    /// newline. Text is inserted as is.
    pub fn to_html(&self) -> String {
        let body = if self.thinking.is_empty() {
            format!(
                "<div class=\"response-container\">\n\
                 <div class=\"formal-section\">\n\
                 <div class=\"formal-content\">{}</div>\n\
                 </div>\n\
                 </div>",
                self.answer
            )
        } else {
            format!(
                "<div class=\"response-container\">\n\
                 <div class=\"thinking-section\">\n\
                 <div class=\"thinking-header\">think</div>\n\
                 <div class=\"thinking-content\">{}</div>\n\
                 </div>\n\
                 <div class=\"formal-section\">\n\
                 <div class=\"formal-header\">answer</div>\n\
                 <div class=\"formal-content\">{}</div>\n\
                 </div>\n\
                 </div>",
                self.thinking, self.answer
            )
        };
        format!("\n{}\n", body.trim())
    }
}

/// Result of running the whole pipeline over a raw reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub display: DisplayPayload,
    /// What goes into history: the answer, or the whole cleaned text when the
    /// model produced no answer outside its thinking.
    pub history_text: String,
}

/// sanitize, split, normalize, format.
pub fn render(raw: &str) -> Rendered {
    let cleaned = sanitize(raw);
    let parsed = split_thinking(&cleaned);
    let display = DisplayPayload::new(normalize(&parsed.thinking), normalize(&parsed.answer));
    let history_text = if parsed.answer.is_empty() {
        cleaned.trim().to_string()
    } else {
        parsed.answer
    };
    Rendered {
        display,
        history_text,
    }
}
