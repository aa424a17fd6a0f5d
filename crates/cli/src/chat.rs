use crate::commands::completer::SlashCompleter;
use crate::commands::{COMMANDS, SlashCommand, with_placeholders};
use crate::utils::{
    flush, needs_final_view, print_display, print_entry, print_separator, print_status,
};
use colored::*;
use rustyline::{
    Cmd, Config, Editor, EventHandler, KeyCode, KeyEvent, Modifiers,
    error::ReadlineError,
    highlight::{CmdKind, Highlighter, MatchingBracketHighlighter},
    hint::HistoryHinter,
};
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use spinners::{Spinner, Spinners};
use std::borrow::Cow;
use std::future::Future;
use std::path::Path;
use vlchat::{
    Attachment, ChatController, ChatMode, ClientConfig, DemoError, MediaKind, Reply, Session,
    TurnOptions, TurnStatus, UserInput,
};

#[derive(Helper, Completer, Hinter, Validator)]
struct VlHelper {
    #[rustyline(Completer)]
    completer: SlashCompleter,
    highlighter: MatchingBracketHighlighter,
    #[rustyline(Hinter)]
    hinter: HistoryHinter,
    colored_prompt: String,
}

impl Highlighter for VlHelper {
    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        default: bool,
    ) -> Cow<'b, str> {
        if default {
            Cow::Borrowed(&self.colored_prompt)
        } else {
            Cow::Borrowed(prompt)
        }
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned("\x1b[1m".to_owned() + hint + "\x1b[m")
    }

    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        self.highlighter.highlight(line, pos)
    }

    fn highlight_char(&self, line: &str, pos: usize, kind: CmdKind) -> bool {
        self.highlighter.highlight_char(line, pos, kind)
    }
}

/// Terminal front end over one session.
pub struct ChatApp {
    controller: ChatController,
    session: Session,
    options: TurnOptions,
    /// Attachments waiting for the next question or demonstration.
    pending: Vec<Attachment>,
}

impl ChatApp {
    pub fn new(controller: ChatController, config: &ClientConfig) -> Self {
        Self {
            controller,
            session: Session::new(config.chat_mode),
            options: config.turn_options(),
            pending: Vec::new(),
        }
    }

    pub fn attach(&mut self, path: &Path) -> Result<(), DemoError> {
        let attachment = Attachment::load(path)?;
        let what = match attachment.kind {
            MediaKind::Image => "image".to_string(),
            MediaKind::Video => format!("video, {} frames", attachment.frames.len()),
        };
        println!(
            "{} {} ({})",
            "+".bright_green(),
            attachment.name.bold(),
            what
        );
        self.pending.push(attachment);
        Ok(())
    }

    fn take_input(&mut self, text: &str) -> UserInput {
        let attachments = std::mem::take(&mut self.pending);
        let text = match self.session.mode {
            ChatMode::Chat => with_placeholders(text, attachments.len()),
            ChatMode::FewShot => text.to_string(),
        };
        UserInput {
            text,
            attachments,
        }
    }

    /// Sends one question and prints the answer. Ctrl-C while waiting leaves
    /// the session as it was before the question.
    pub async fn ask(&mut self, text: &str) {
        let input = self.take_input(text);
        let saved = self.session.clone();
        let mut sp = Spinner::new(Spinners::Dots12, "Thinking...".bright_magenta().to_string());
        let reply = interruptible(self.controller.submit(
            &mut self.session,
            input,
            self.options,
        ))
        .await;
        sp.stop();
        print!("\r\x1B[K");
        self.settle(reply, saved).await;
    }

    async fn regenerate(&mut self) {
        let saved = self.session.clone();
        let mut sp = Spinner::new(Spinners::Dots12, "Thinking...".bright_magenta().to_string());
        let reply =
            interruptible(self.controller.regenerate(&mut self.session, self.options)).await;
        sp.stop();
        print!("\r\x1B[K");
        self.settle(reply, saved).await;
    }

    async fn settle(&mut self, reply: Option<Result<Reply, DemoError>>, saved: Session) {
        match reply {
            Some(reply) => self.show(reply).await,
            None => {
                self.session = saved;
                print_status(TurnStatus::Cancelled);
                print_separator();
            }
        }
    }

    async fn show(&mut self, reply: Result<Reply, DemoError>) {
        match reply {
            Ok(Reply::Complete(report)) => {
                println!("{}", "> Assistant:".bright_green());
                print_display(&report.display);
                print_status(report.status);
            }
            Ok(Reply::Streaming(mut turn)) => {
                print!("{} ", "> Assistant:".bright_green());
                flush();
                let cancel = turn.chars().cancel_flag().clone();
                loop {
                    tokio::select! {
                        c = turn.next(&mut self.session) => {
                            let Some(c) = c else { break };
                            print!("{}", c);
                            flush();
                        }
                        _ = tokio::signal::ctrl_c() => {
                            cancel.cancel();
                        }
                    }
                }
                println!();
                let shown = turn.chars().shown_text().to_string();
                let report = self.controller.finish_stream(&mut self.session, turn);
                if needs_final_view(&report.display, &shown) {
                    print_separator();
                    print_display(&report.display);
                }
                print_status(report.status);
            }
            Err(e) if e.is_rejection() => {
                println!("{} {}", "!".bright_yellow(), e);
            }
            Err(e) => {
                eprintln!("{} {}", "Error:".bright_red(), e);
            }
        }
        print_separator();
    }

    /// Runs a slash command. Returns `false` when the user wants to leave.
    pub async fn handle(&mut self, cmd: SlashCommand) -> bool {
        match cmd {
            SlashCommand::Image(path) | SlashCommand::Video(path) => {
                if let Err(e) = self.attach(&path) {
                    println!("{} {}", "!".bright_yellow(), e);
                }
            }
            SlashCommand::Drop => {
                self.pending.clear();
                println!("Pending attachments dropped.");
            }
            SlashCommand::Demo { input, answer } => {
                let input = self.take_input(&input);
                match self
                    .controller
                    .add_demonstration(&mut self.session, input, &answer)
                {
                    Ok(()) => println!("{} demonstration added", "✓".bright_green()),
                    Err(e) => println!("{} {}", "!".bright_yellow(), e),
                }
            }
            SlashCommand::Regen => self.regenerate().await,
            SlashCommand::Mode(mode) => {
                self.controller.select_mode(&mut self.session, mode);
                self.pending.clear();
                println!("Mode: {}", mode.to_string().bright_green());
            }
            SlashCommand::Decode(decode) => {
                self.options.decode = decode;
                println!("Decode: {}", decode.to_string().bright_green());
            }
            SlashCommand::Thinking(on) => {
                self.options.thinking = on.unwrap_or(!self.options.thinking);
                println!("Thinking: {}", on_off(self.options.thinking));
            }
            SlashCommand::Stream(on) => {
                self.options.stream = on.unwrap_or(!self.options.stream);
                println!("Streaming: {}", on_off(self.options.stream));
            }
            SlashCommand::History => {
                for entry in &self.session.transcript {
                    print_entry(entry);
                }
                print_separator();
            }
            SlashCommand::Clear => {
                self.controller.clear(&mut self.session);
                self.pending.clear();
                println!("{}", "Session cleared.".bright_blue());
            }
            SlashCommand::Help => {
                for (_, usage, description) in COMMANDS {
                    println!("  {} {}", format!("{:<28}", usage).bright_cyan(), description);
                }
            }
            SlashCommand::Quit => return false,
        }
        true
    }

    fn banner(&self) {
        println!("{}", "vlchat - Interactive Chat".bright_blue());
        println!(
            "Mode: {}  Decode: {}  Thinking: {}  Streaming: {}",
            self.session.mode.to_string().bright_green(),
            self.options.decode.to_string().bright_green(),
            on_off(self.options.thinking),
            on_off(self.options.stream),
        );
        println!("{}", "Type /help for commands, /quit to leave".bright_black());
        print_separator();
        if let Some(greeting) = self.session.transcript.first() {
            println!("{} {}", "> Assistant:".bright_green(), greeting.answer);
        }
    }
}

/// Runs `request` until it finishes or the user hits Ctrl-C.
///
/// Once a stream has listened for Ctrl-C the default handler is gone for the
/// rest of the process, so every wait on the model has to listen too.
async fn interruptible<T>(request: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        out = request => Some(out),
        _ = tokio::signal::ctrl_c() => None,
    }
}

fn on_off(flag: bool) -> ColoredString {
    if flag { "on".bright_green() } else { "off".bright_black() }
}

/// Interactive REPL loop
pub async fn interactive_loop(mut app: ChatApp) -> anyhow::Result<()> {
    app.banner();

    let prompt_prefix = ":: ".bold().red().to_string();
    let helper = VlHelper {
        completer: SlashCompleter::new(),
        highlighter: MatchingBracketHighlighter::new(),
        hinter: HistoryHinter::new(),
        colored_prompt: prompt_prefix.clone(),
    };

    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(rustyline::CompletionType::List)
        .build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(helper));
    rl.bind_sequence(
        KeyEvent(KeyCode::Enter, Modifiers::ALT),
        EventHandler::Simple(Cmd::Newline),
    );

    loop {
        flush();
        match rl.readline(&prompt_prefix) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                match SlashCommand::parse(trimmed) {
                    Ok(Some(cmd)) => {
                        if !app.handle(cmd).await {
                            break;
                        }
                    }
                    Ok(None) => app.ask(trimmed).await,
                    Err(e) => println!("{} {}", "!".bright_yellow(), e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("{} {:?}", "Error:".bright_red(), err);
                break;
            }
        }
    }
    println!("{}", "Goodbye!".bright_blue());
    Ok(())
}
