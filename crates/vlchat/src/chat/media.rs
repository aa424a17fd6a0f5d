use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use super::Content;
use crate::error::DemoError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "flv", "wmv", "webm", "m4v"];

/// Upper bound on frames sent for one video.
pub const MAX_NUM_FRAMES: usize = 64;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[mm_media\]\d+\[/mm_media\]").expect("valid placeholder regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classifies a file by its extension, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// A file attached to a user turn. Images carry one frame, videos carry their
/// already extracted frames. Frames are base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub kind: MediaKind,
    pub frames: Vec<String>,
}

impl Attachment {
    pub fn image(name: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            name: name.into(),
            kind: MediaKind::Image,
            frames: vec![BASE64.encode(raw)],
        }
    }

    pub fn video(name: impl Into<String>, frames: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            kind: MediaKind::Video,
            frames: frames.iter().map(|f| BASE64.encode(f)).collect(),
        }
    }

    /// Loads an attachment from disk.
    ///
    /// A regular file must be an image. A directory is read as a video whose
    /// frames are the image files inside it, in name order, capped at
    /// [`MAX_NUM_FRAMES`] by uniform sampling.
    pub fn load(path: &Path) -> Result<Self, DemoError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        if path.is_dir() {
            let mut frame_paths = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .and_then(MediaKind::from_name)
                        == Some(MediaKind::Image)
                })
                .collect::<Vec<_>>();
            frame_paths.sort();
            if frame_paths.is_empty() {
                return Err(DemoError::Validation(format!(
                    "No frames found in video directory {}",
                    path.display()
                )));
            }
            let frame_paths = uniform_sample(frame_paths, MAX_NUM_FRAMES);
            let frames = frame_paths
                .iter()
                .map(std::fs::read)
                .collect::<Result<Vec<_>, _>>()?;
            log::debug!("loaded {} frames for video {}", frames.len(), name);
            return Ok(Attachment::video(name, frames));
        }

        match MediaKind::from_name(&name) {
            Some(MediaKind::Image) => Ok(Attachment::image(name, &std::fs::read(path)?)),
            Some(MediaKind::Video) => Err(DemoError::Validation(format!(
                "Video {} must be given as a directory of extracted frames",
                name
            ))),
            None => Err(DemoError::Validation(format!(
                "Unsupported file type: {}",
                name
            ))),
        }
    }

    pub fn contents(&self) -> impl Iterator<Item = Content> + '_ {
        self.frames.iter().cloned().map(Content::Image)
    }
}

/// Picks `n` items spread evenly over `items`, taking the middle of each gap.
fn uniform_sample<T>(items: Vec<T>, n: usize) -> Vec<T> {
    if items.len() <= n {
        return items;
    }
    let gap = items.len() as f64 / n as f64;
    let wanted = (0..n)
        .map(|i| (i as f64 * gap + gap / 2.0) as usize)
        .collect::<Vec<_>>();
    items
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| wanted.contains(idx))
        .map(|(_, item)| item)
        .collect()
}

/// Number of `[mm_media]n[/mm_media]` placeholders in `text`.
pub fn count_placeholders(text: &str) -> usize {
    PLACEHOLDER.find_iter(text).count()
}

/// Builds the contents of a chat-mode user turn by replacing each
/// `[mm_media]n[/mm_media]` placeholder with the next attachment's frames.
///
/// The number of placeholders must equal the number of attachments.
pub fn encode_message(text: &str, attachments: &[Attachment]) -> Result<Vec<Content>, DemoError> {
    let parts = PLACEHOLDER.split(text).collect::<Vec<_>>();
    if parts.len() != attachments.len() + 1 {
        return Err(DemoError::Validation(format!(
            "Number of media files ({}) does not match the placeholders in the text ({})",
            attachments.len(),
            parts.len() - 1
        )));
    }

    let mut contents = Vec::new();
    push_text(&mut contents, parts[0]);
    for (attachment, text) in attachments.iter().zip(&parts[1..]) {
        contents.extend(attachment.contents());
        push_text(&mut contents, text);
    }
    Ok(contents)
}

/// Builds the contents of a few-shot user turn: attachments first, then text.
pub fn encode_plain(text: &str, attachments: &[Attachment]) -> Vec<Content> {
    let mut contents = attachments
        .iter()
        .flat_map(Attachment::contents)
        .collect::<Vec<_>>();
    push_text(&mut contents, text);
    contents
}

fn push_text(contents: &mut Vec<Content>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        contents.push(Content::Text(text.to_string()));
    }
}
