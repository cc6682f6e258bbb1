use std::io::Write;

use anyhow::Result;
use clap::Parser;
use clawmini_kernel::{AssistantKernel, KernelBuilder, SettingsArgs};
use clawmini_protocol::{SessionId, TurnEvent};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const DIM: &str = "\x1b[90m";
const RESET: &str = "\x1b[0m";
const EXIT_WORDS: [&str; 3] = ["exit", "quit", "q"];

#[derive(Debug, Parser)]
#[command(name = "clawmini")]
#[command(about = "Chat with the clawmini assistant from the terminal")]
struct Cli {
    #[arg(long, env = "CLAWMINI_SESSION", default_value = "cli_session")]
    session: String,
    /// Run a single turn with this message and exit.
    message: Option<String>,
    #[command(flatten)]
    settings: SettingsArgs,
}

/// Terminal text for one event. Thoughts get their own dimmed line.
fn render(event: &TurnEvent) -> String {
    match event {
        TurnEvent::TokenDelta(text) => text.clone(),
        TurnEvent::ToolInvoked(_) | TurnEvent::ToolCompleted(_) => {
            format!("\n   {DIM}{}{RESET}\n", event.wire_text())
        }
        TurnEvent::TurnError(_) => format!("\n{}\n", event.wire_text()),
    }
}

fn is_exit(input: &str) -> bool {
    EXIT_WORDS.contains(&input.to_lowercase().as_str())
}

async fn run_turn(kernel: &AssistantKernel, session: &SessionId, message: &str) -> Result<()> {
    let mut events = kernel.chat(session.clone(), message)?;
    let mut stdout = std::io::stdout();
    write!(stdout, "[Agent]: ")?;
    stdout.flush()?;
    while let Some(event) = events.next().await {
        write!(stdout, "{}", render(&event))?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .compact()
        .init();
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded environment file"),
        Err(error) if error.not_found() => {}
        Err(error) => warn!(%error, "failed to load .env, using process environment"),
    }

    let cli = Cli::parse();
    let kernel = KernelBuilder::new(cli.settings.into_settings()).build()?;
    kernel.ensure_layout().await?;
    let session = SessionId::from_string(cli.session);

    if let Some(message) = cli.message {
        return run_turn(&kernel, &session, &message).await;
    }

    println!("====================================");
    println!("Welcome to the clawmini CLI");
    println!("Type 'exit' or 'quit' to terminate.");
    println!("====================================");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n[User]: ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if is_exit(input) {
            break;
        }
        if input.is_empty() {
            continue;
        }
        if let Err(error) = run_turn(&kernel, &session, input).await {
            eprintln!("Error: {error:#}");
        }
    }
    Ok(())
}
