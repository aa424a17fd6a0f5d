use rustyline::Context;
use rustyline::completion::{Completer, FilenameCompleter, Pair};
use rustyline::error::ReadlineError;

use super::{COMMANDS, parse_command_line};

/// Completes slash command names, and file paths after `/image` and `/video`.
pub struct SlashCompleter {
    files: FilenameCompleter,
}

impl SlashCompleter {
    pub fn new() -> Self {
        Self {
            files: FilenameCompleter::new(),
        }
    }

    /// Command names starting with `prefix`.
    fn complete_command(&self, prefix: &str) -> Vec<Pair> {
        let prefix = prefix.to_lowercase();
        COMMANDS
            .iter()
            .filter(|(name, _, _)| name.starts_with(&prefix))
            .map(|(name, usage, _)| Pair {
                display: usage.to_string(),
                replacement: name.to_string(),
            })
            .collect()
    }
}

impl Default for SlashCompleter {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for SlashCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        ctx: &Context<'_>,
    ) -> Result<(usize, Vec<Pair>), ReadlineError> {
        let head = &line[..pos];
        if !head.trim_start().starts_with('/') {
            return Ok((pos, Vec::new()));
        }

        let Some((name, _)) = parse_command_line(head) else {
            // just "/"
            let start = head.find('/').map(|i| i + 1).unwrap_or(pos);
            return Ok((start, self.complete_command("")));
        };

        if head.trim_start().len() == name.len() + 1 {
            let start = head.find('/').map(|i| i + 1).unwrap_or(pos);
            return Ok((start, self.complete_command(name)));
        }

        match name {
            "image" | "img" | "video" => self.files.complete(line, pos, ctx),
            _ => Ok((pos, Vec::new())),
        }
    }
}
