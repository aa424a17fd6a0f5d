use anyhow::{Result, anyhow, bail};
use std::path::PathBuf;
use vlchat::chat::media::count_placeholders;
use vlchat::{ChatMode, DecodeMode};

pub mod completer;

/// Name, usage and description of every slash command, for `/help` and
/// completion.
pub const COMMANDS: &[(&str, &str, &str)] = &[
    ("image", "/image <path>", "attach an image to the next question"),
    ("video", "/video <frames-dir>", "attach a video given as a directory of frames"),
    ("drop", "/drop", "forget pending attachments"),
    ("demo", "/demo <input> => <answer>", "add a few-shot demonstration"),
    ("regen", "/regen", "ask the last question again"),
    ("mode", "/mode <chat|fewshot>", "switch chat mode (clears the session)"),
    ("decode", "/decode <beam|sampling>", "choose the decode preset"),
    ("thinking", "/thinking [on|off]", "toggle thinking output"),
    ("stream", "/stream [on|off]", "toggle streaming"),
    ("history", "/history", "show the conversation so far"),
    ("clear", "/clear", "start a new session"),
    ("help", "/help", "list commands"),
    ("quit", "/quit", "leave"),
];

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Image(PathBuf),
    Video(PathBuf),
    Drop,
    Demo { input: String, answer: String },
    Regen,
    Mode(ChatMode),
    Decode(DecodeMode),
    Thinking(Option<bool>),
    Stream(Option<bool>),
    History,
    Clear,
    Help,
    Quit,
}

/// Split a command line into command name and the raw rest.
pub fn parse_command_line(input: &str) -> Option<(&str, &str)> {
    let without_slash = input.trim().strip_prefix('/')?;
    let mut parts = without_slash.splitn(2, char::is_whitespace);
    let name = parts.next().filter(|n| !n.is_empty())?;
    Some((name, parts.next().unwrap_or("").trim()))
}

fn parse_switch(arg: &str) -> Result<Option<bool>> {
    match arg.to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "on" | "true" | "yes" => Ok(Some(true)),
        "off" | "false" | "no" => Ok(Some(false)),
        other => bail!("expected on or off, got '{}'", other),
    }
}

fn required<'a>(arg: &'a str, usage: &str) -> Result<&'a str> {
    if arg.is_empty() {
        bail!("usage: {}", usage);
    }
    Ok(arg)
}

impl SlashCommand {
    /// `Ok(None)` when the line is not a command at all.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let Some((name, arg)) = parse_command_line(line) else {
            return Ok(None);
        };
        let cmd = match name {
            "image" | "img" => SlashCommand::Image(PathBuf::from(required(arg, "/image <path>")?)),
            "video" => SlashCommand::Video(PathBuf::from(required(arg, "/video <frames-dir>")?)),
            "drop" => SlashCommand::Drop,
            "demo" => {
                let (input, answer) = arg
                    .split_once("=>")
                    .ok_or_else(|| anyhow!("usage: /demo <input> => <answer>"))?;
                SlashCommand::Demo {
                    input: input.trim().to_string(),
                    answer: answer.trim().to_string(),
                }
            }
            "regen" | "regenerate" => SlashCommand::Regen,
            "mode" => SlashCommand::Mode(required(arg, "/mode <chat|fewshot>")?.parse()?),
            "decode" => SlashCommand::Decode(required(arg, "/decode <beam|sampling>")?.parse()?),
            "thinking" | "think" => SlashCommand::Thinking(parse_switch(arg)?),
            "stream" => SlashCommand::Stream(parse_switch(arg)?),
            "history" => SlashCommand::History,
            "clear" | "reset" => SlashCommand::Clear,
            "help" | "?" => SlashCommand::Help,
            "quit" | "exit" | "q" => SlashCommand::Quit,
            other => bail!("unknown command: /{}", other),
        };
        Ok(Some(cmd))
    }
}

/// Prefixes one placeholder per attachment when the user wrote none, so a
/// plain question about attached media still lines up.
pub fn with_placeholders(text: &str, attachments: usize) -> String {
    if attachments == 0 || count_placeholders(text) > 0 {
        return text.to_string();
    }
    let mut out = (1..=attachments)
        .map(|i| format!("[mm_media]{}[/mm_media]", i))
        .collect::<String>();
    out.push_str(text);
    out
}
