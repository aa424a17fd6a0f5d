use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::io;
use std::sync::Arc;
use vlchat::{ChatController, ClientConfig, HttpEndpoint};

mod chat;
mod cli_args;
mod commands;
mod logging;
mod utils;

use chat::{ChatApp, interactive_loop};
use cli_args::{CliArgs, Commands};
use logging::setup_logging;

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging()?;
    let args = CliArgs::parse();

    // Handle completion generation and exit early.
    if let Some(Commands::Completion { shell }) = &args.command {
        let mut cmd = CliArgs::command();
        clap_complete::generate(*shell, &mut cmd, "vlchat", &mut io::stdout());
        return Ok(());
    }

    let mut config = ClientConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    if let Some(Commands::Config) = &args.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    log::debug!("using endpoint {}", config.server_url);
    let endpoint = HttpEndpoint::new(
        &config.server_url,
        config.model.clone(),
        config.trace_id.clone(),
        config.connect_timeout(),
    )
    .with_context(|| format!("cannot use endpoint {}", config.server_url))?;
    let controller = ChatController::new(Arc::new(endpoint), config.controller_config());
    let mut app = ChatApp::new(controller, &config);

    for path in &args.image {
        app.attach(path)
            .with_context(|| format!("cannot attach {}", path.display()))?;
    }
    if let Some(path) = &args.video {
        app.attach(path)
            .with_context(|| format!("cannot attach {}", path.display()))?;
    }

    if let Some(prompt) = &args.prompt {
        app.ask(prompt).await;
        return Ok(());
    }

    interactive_loop(app).await
}
