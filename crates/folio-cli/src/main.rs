//! folio - terminal client for the folio conversation engine

mod config;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;

use folio_client::{
    ChatSession, Connection, ConnectionState, ConversationApi, ConversationStore, ReconnectConfig,
    SessionConfig,
};
use folio_text::{Segment, TextStyle, annotate};
use folio_wire::ServerEvent;

use crate::config::Config;

/// folio - chat with your documents from the terminal
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Conversation to join
    #[arg(short, long)]
    conversation: String,

    /// Message to send
    #[arg(short, long)]
    message: String,

    /// Websocket endpoint (default: ws://localhost:8000/ws)
    #[arg(long)]
    server: Option<String>,

    /// CRUD API base URL (default: http://localhost:8000/api)
    #[arg(long)]
    api: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();
    let server_url = args
        .server
        .or(config.server_url)
        .unwrap_or_else(|| "ws://localhost:8000/ws".to_string());
    let api_url = args
        .api
        .or(config.api_url)
        .unwrap_or_else(|| "http://localhost:8000/api".to_string());
    let session_config = SessionConfig {
        generation_timeout: config
            .generation_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| SessionConfig::default().generation_timeout),
    };

    let connection = Connection::connect(&server_url, ReconnectConfig::default());
    wait_for_connection(&connection)
        .await
        .with_context(|| format!("could not connect to {server_url}"))?;

    let store = Arc::new(ConversationStore::new());
    let session = ChatSession::new(connection, store, session_config);
    let mut events = session.subscribe();

    // Seed committed history from the CRUD API before joining.
    let api = ConversationApi::new(&api_url);
    match api.fetch(&args.conversation).await {
        Ok(fetched) => {
            session
                .store()
                .set_messages(&args.conversation, fetched.messages);
        }
        Err(e) => {
            tracing::debug!("no seed history available: {e}");
        }
    }

    session.join(&args.conversation)?;
    wait_for(&mut events, |e| {
        matches!(e, ServerEvent::JoinedConversation { .. })
    })
    .await?;

    session.send_message(&args.conversation, &args.message)?;

    let mut stdout = std::io::stdout();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(300), events.recv())
            .await
            .context("timed out waiting for the backend")??;
        match event {
            ServerEvent::LoadingStage { message, .. } if !message.is_empty() => {
                eprintln!("… {message}");
            }
            ServerEvent::MessageToken { token, .. } => {
                print!("{token}");
                stdout.flush()?;
            }
            ServerEvent::MessageEnd { message, .. } => {
                println!();
                println!("---");
                let sources = message.sources.as_deref().unwrap_or(&[]);
                print_segments(&annotate(&message.content, sources));
                break;
            }
            ServerEvent::Error { message, .. } => {
                bail!("generation failed: {message}");
            }
            _ => {}
        }
    }

    session.leave(&args.conversation)?;
    session.close();
    Ok(())
}

async fn wait_for_connection(connection: &Connection) -> anyhow::Result<()> {
    let mut state_rx = connection.state_changes();
    loop {
        match *state_rx.borrow() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Failed => bail!("connection failed after retries"),
            _ => {}
        }
        state_rx.changed().await?;
    }
}

async fn wait_for<F: FnMut(&ServerEvent) -> bool>(
    events: &mut tokio::sync::broadcast::Receiver<ServerEvent>,
    mut predicate: F,
) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await?;
            if predicate(&event) {
                return anyhow::Ok(());
            }
        }
    })
    .await
    .context("timed out waiting for join acknowledgment")?
}

fn print_segments(segments: &[Segment]) {
    for segment in segments {
        match segment {
            Segment::Text { content, style } => match style {
                TextStyle::Plain => print!("{content}"),
                TextStyle::Strong => print!("\x1b[1m{content}\x1b[0m"),
                TextStyle::Heading(level) => {
                    print!("\x1b[1;4m{} {content}\x1b[0m", "#".repeat(*level as usize));
                }
            },
            Segment::Citation { number, source } => {
                print!("\x1b[36m[{number}]\x1b[0m(\x1b[2m{}\x1b[0m)", source.name);
            }
            Segment::Math { source, display } => {
                if *display {
                    print!("\n    {source}\n");
                } else {
                    print!("{source}");
                }
            }
        }
    }
    println!();
}
