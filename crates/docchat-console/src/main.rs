//! Interactive terminal chat against the docchat streaming endpoint.
//!
//! Type a question and press enter. `/new` starts a new conversation,
//! `/session` prints the current session id, `/quit` exits.

mod view;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use docchat_stream::prelude::*;
use docchat_stream::{LogSettings, init_logging};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::view::ConsoleView;

#[derive(Debug, Parser)]
#[command(name = "docchat-console")]
#[command(about = "Chat with your documents from the terminal", long_about = None)]
struct Cli {
    /// Backend origin, e.g. ws://localhost:8000 (overrides DOCCHAT_WS_URL)
    #[arg(long)]
    url: Option<String>,
    /// Access token sent on the handshake (overrides DOCCHAT_ACCESS_TOKEN)
    #[arg(long)]
    token: Option<String>,
    /// Continue an existing conversation
    #[arg(long)]
    session: Option<String>,
    /// Automatic reconnect attempts after a dropped connection
    #[arg(long)]
    reconnect_retries: Option<u32>,
    /// Seconds without a response before a question is failed, 0 disables
    #[arg(long)]
    completion_timeout_secs: Option<u64>,
    /// Write logs as JSON lines to PATH (default ./docchat.logs.jsonl) instead of stderr
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,
}

impl Cli {
    fn apply(&self, mut config: ClientConfig) -> ClientConfig {
        if let Some(url) = &self.url {
            config = config.base_url(url.as_str());
        }
        if let Some(token) = &self.token {
            config = config.access_token(token.as_str());
        }
        if let Some(retries) = self.reconnect_retries {
            config = config.reconnect(if retries == 0 {
                ReconnectPolicy::none()
            } else {
                ReconnectPolicy::exponential(
                    retries,
                    ReconnectPolicy::DEFAULT_INITIAL_DELAY,
                    ReconnectPolicy::DEFAULT_MAX_DELAY,
                )
            });
        }
        if let Some(secs) = self.completion_timeout_secs {
            config = config.completion_timeout((secs > 0).then(|| Duration::from_secs(secs)));
        }
        config
    }

    fn log_settings(&self, env: LogSettings) -> LogSettings {
        match &self.log_file {
            Some(path) => env.file_only(path.clone()),
            None => env,
        }
    }
}

enum Command<'a> {
    Ask(&'a str),
    NewConversation,
    ShowSession,
    Quit,
    Unknown(&'a str),
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    match line {
        "" => Command::Empty,
        "/new" => Command::NewConversation,
        "/session" => Command::ShowSession,
        "/quit" | "/exit" => Command::Quit,
        other if other.starts_with('/') => Command::Unknown(other),
        question => Command::Ask(question),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(&cli.log_settings(LogSettings::from_env()));

    let config = cli.apply(ClientConfig::from_env().context("reading DOCCHAT_* environment")?);
    let client = StreamClient::builder()
        .config(config)
        .build()
        .context("building stream client")?;
    let handle = client.handle();
    if let Some(session) = cli.session.as_deref() {
        handle.set_session_id(session);
    }

    let (events_tx, mut events) = mpsc::unbounded_channel::<ClientEvent>();
    let subscriptions: Vec<Subscription> = EventKind::ALL
        .into_iter()
        .map(|kind| {
            let tx = events_tx.clone();
            handle.on(kind, move |event| {
                let _ = tx.send(event.clone());
            })
        })
        .collect();
    drop(events_tx);

    let url = handle.config().stream_url()?;
    println!("Connecting to {url} ...");
    handle.connect_default()?;

    let mut view = ConsoleView::new();
    let mut stdout = std::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                match parse_command(&line) {
                    Command::Empty => {}
                    Command::Quit => break,
                    Command::NewConversation => {
                        view.clear();
                        handle.reset_session();
                        println!("[new conversation]");
                    }
                    Command::ShowSession => match handle.session_id() {
                        Some(id) => println!("[session {id}]"),
                        None => println!("[no session yet]"),
                    },
                    Command::Unknown(cmd) => println!("[unknown command {cmd}; try /new, /session or /quit]"),
                    Command::Ask(question) => ask(&handle, &mut view, question)?,
                }
            }
            Some(event) = events.recv() => view.apply(&event, &mut stdout)?,
        }
    }

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    client.shutdown().await;
    info!("console closed");
    Ok(())
}

fn ask(handle: &ClientHandle, view: &mut ConsoleView, question: &str) -> anyhow::Result<()> {
    match handle.state() {
        ConnectionState::Open => {}
        ConnectionState::Closed | ConnectionState::Idle => {
            println!("[not connected; reconnecting, ask again once connected]");
            handle.connect_default()?;
            return Ok(());
        }
        state => {
            println!("[not connected yet ({state}); ask again once connected]");
            return Ok(());
        }
    }
    if view.conversation().is_awaiting_reply() {
        debug!("question sent while a previous answer is still streaming");
    }
    let request_id = handle.send_message(question, None);
    if request_id.is_some() {
        view.record_user(question, request_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_recognised() {
        assert!(matches!(parse_command("  "), Command::Empty));
        assert!(matches!(parse_command("/new"), Command::NewConversation));
        assert!(matches!(parse_command("/session "), Command::ShowSession));
        assert!(matches!(parse_command("/quit"), Command::Quit));
        assert!(matches!(parse_command("/help"), Command::Unknown("/help")));
        assert!(matches!(parse_command(" what is a.pdf? "), Command::Ask("what is a.pdf?")));
    }

    #[test]
    fn flags_override_environment_config() {
        let cli = Cli::parse_from([
            "docchat-console",
            "--url",
            "wss://chat.example.com",
            "--reconnect-retries",
            "3",
            "--completion-timeout-secs",
            "0",
        ]);
        let config = cli.apply(ClientConfig::new());
        assert_eq!(
            config.stream_url().expect("url").as_str(),
            "wss://chat.example.com/ws"
        );
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.completion_timeout, None);
    }

    #[test]
    fn log_file_flag_keeps_logs_off_the_terminal() {
        let bare = Cli::parse_from(["docchat-console", "--log-file"]);
        assert!(matches!(
            bare.log_settings(LogSettings::default()).sink,
            docchat_stream::LogSink::JsonFile(_)
        ));

        let explicit = Cli::parse_from(["docchat-console", "--log-file", "/tmp/chat.jsonl"]);
        assert_eq!(
            explicit.log_settings(LogSettings::default()).sink,
            docchat_stream::LogSink::JsonFile("/tmp/chat.jsonl".into())
        );

        let none = Cli::parse_from(["docchat-console"]);
        assert_eq!(none.log_settings(LogSettings::default()), LogSettings::default());
    }
}
