use colored::*;
use std::io::{Write, stdout};
use vlchat::{DisplayPayload, Section, TranscriptEntry, TurnStatus};

/// Prints a separator line
pub fn print_separator() {
    println!("{}", "─".repeat(50).bright_black());
}

/// Prints the final layout of an answer: a dimmed thinking block followed by
/// the answer, headed only when thinking is present.
pub fn print_display(display: &DisplayPayload) {
    for section in display.sections() {
        match section {
            Section::Thinking(text) => {
                println!("{}", "think".bright_magenta().bold());
                for line in text.lines() {
                    println!("{} {}", "│".bright_black(), line.dimmed().italic());
                }
            }
            Section::Answer { text, with_header } => {
                if with_header {
                    println!("{}", "answer".bright_green().bold());
                }
                println!("{}", text);
            }
        }
    }
}

/// Whether the final layout of a streamed answer says something the
/// character stream did not.
pub fn needs_final_view(display: &DisplayPayload, shown: &str) -> bool {
    !display.thinking.is_empty() || vlchat::text::normalize(shown) != display.answer
}

pub fn print_status(status: TurnStatus) {
    match status {
        TurnStatus::Completed {
            output_tokens: Some(n),
        } => log::info!("output tokens: {}", n),
        TurnStatus::Completed { output_tokens: None } => {}
        TurnStatus::Cancelled => println!("{}", "Interrupted.".bright_yellow()),
        TurnStatus::Failed => println!("{}", "Generation failed.".bright_red()),
    }
}

/// One transcript entry as shown by `/history`.
pub fn print_entry(entry: &TranscriptEntry) {
    if let Some(question) = &entry.question {
        let media = question
            .attachments
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>();
        if media.is_empty() {
            println!("{} {}", "> You:".bright_blue(), question.text);
        } else {
            println!(
                "{} {} {}",
                "> You:".bright_blue(),
                question.text,
                format!("[{}]", media.join(", ")).bright_black()
            );
        }
    }
    print!("{} ", "> Assistant:".bright_green());
    match &entry.display {
        Some(display) => {
            println!();
            print_display(display);
        }
        None => println!("{}", entry.answer),
    }
}

pub fn flush() {
    let _ = stdout().flush();
}
