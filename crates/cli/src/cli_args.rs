use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vlchat::{ChatMode, ClientConfig, DecodeMode};

/// Command line arguments for the vlchat client
#[derive(Parser, Debug)]
#[clap(
    name = "vlchat",
    about = "Chat with a vision-language model about images and video",
    args_conflicts_with_subcommands = true
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Question to ask. If not provided, will enter interactive mode.
    #[arg()]
    pub prompt: Option<String>,

    /// Config file, defaults to ~/.vlchat/client.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Single-shot endpoint URL; streaming uses `<url>/stream`
    #[arg(long)]
    pub server_url: Option<String>,

    /// Value of the model routing header
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<ChatMode>,

    /// beam or sampling
    #[arg(long, value_parser = parse_decode)]
    pub decode: Option<DecodeMode>,

    /// Ask the model to think before answering
    #[arg(long)]
    pub thinking: bool,

    /// Wait for the whole answer instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Image to attach to the question (repeatable)
    #[arg(short, long, action = clap::ArgAction::Append)]
    pub image: Vec<PathBuf>,

    /// Directory of video frames to attach to the question
    #[arg(short, long)]
    pub video: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration as TOML
    Config,
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn parse_mode(s: &str) -> Result<ChatMode, String> {
    s.parse().map_err(|e: vlchat::DemoError| e.to_string())
}

fn parse_decode(s: &str) -> Result<DecodeMode, String> {
    s.parse().map_err(|e: vlchat::DemoError| e.to_string())
}

impl CliArgs {
    /// Command line flags override the file.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(url) = &self.server_url {
            config.server_url = url.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(mode) = self.mode {
            config.chat_mode = mode;
        }
        if let Some(decode) = self.decode {
            config.decode = decode;
        }
        if self.thinking {
            config.thinking = true;
        }
        if self.no_stream {
            config.stream = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let args = CliArgs::parse_from([
            "vlchat",
            "--server-url",
            "http://gpu:9999/api",
            "--decode",
            "beam",
            "--thinking",
            "--no-stream",
            "-i",
            "a.png",
            "-i",
            "b.png",
            "what differs?",
        ]);
        let mut config = ClientConfig::default();
        args.apply(&mut config);
        assert_eq!(config.server_url, "http://gpu:9999/api");
        assert_eq!(config.decode, DecodeMode::BeamSearch);
        assert!(config.thinking);
        assert!(!config.stream);
        assert_eq!(args.image.len(), 2);
        assert_eq!(args.prompt.as_deref(), Some("what differs?"));
    }

    #[test]
    fn untouched_flags_keep_config() {
        let args = CliArgs::parse_from(["vlchat"]);
        let mut config = ClientConfig {
            thinking: true,
            ..ClientConfig::default()
        };
        args.apply(&mut config);
        assert!(config.thinking);
        assert!(config.stream);
        assert_eq!(config.chat_mode, ChatMode::Chat);
    }
}
