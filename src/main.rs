use chatwire::{settings, ChatClient, ChatEvent, ClientEvent, ClientSettings, SendOutcome};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

#[derive(Debug, Parser)]
#[command(name = "chatwire", version, about = "Terminal client for the realtime chat backend")]
struct Args {
    /// User id the socket is opened for.
    #[arg(long, env = "CHATWIRE_IDENTITY")]
    identity: String,

    /// Access token, sent as a query parameter and as the upload bearer.
    #[arg(long, env = "CHATWIRE_TOKEN", hide_env_values = true)]
    token: String,

    /// Overrides the configured API base, e.g. https://chat.example.com/api/v1
    #[arg(long)]
    server_url: Option<String>,

    /// Settings file to use instead of the default location.
    #[arg(long)]
    settings: Option<PathBuf>,
}

enum Command<'a> {
    Say(&'a str),
    Voice(&'a str),
    Typing(bool),
    Clear,
    Status,
    Quit,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line);
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match (name, arg) {
        ("voice", path) if !path.is_empty() => Command::Voice(path),
        ("typing", "on") => Command::Typing(true),
        ("typing", "off") => Command::Typing(false),
        ("clear", _) => Command::Clear,
        ("status", _) => Command::Status,
        ("quit" | "exit", _) => Command::Quit,
        _ => Command::Unknown(line),
    }
}

fn load_settings(args: &Args) -> ClientSettings {
    let mut resolved = match &args.settings {
        Some(path) => match settings::load_from(path) {
            Ok(mut s) => {
                s.apply_overrides(|key| std::env::var(key).ok());
                s
            }
            Err(e) => {
                eprintln!("[chatwire] cannot read {}: {}", path.display(), e);
                settings::load()
            }
        },
        None => settings::load(),
    };
    if let Some(url) = &args.server_url {
        resolved.server_url = url.clone();
    }
    resolved
}

fn render(event: &ChatEvent) -> String {
    match event {
        ChatEvent::TextMessage { content, .. } => format!("you> {}", content),
        ChatEvent::AiMessage { content, .. } => format!("ai> {}", content),
        ChatEvent::SessionCreated { session_id, .. } => format!("-- session {}", session_id),
        ChatEvent::VoiceTranscription {
            transcription,
            confidence,
            ..
        } => match confidence {
            Some(c) => format!("voice> {} ({:.0}%)", transcription, c * 100.0),
            None => format!("voice> {}", transcription),
        },
        ChatEvent::Error { error, details, .. } => match details {
            Some(details) => format!("!! {}: {}", error, details),
            None => format!("!! {}", error),
        },
    }
}

async fn print_updates(mut updates: broadcast::Receiver<ClientEvent>) {
    loop {
        match updates.recv().await {
            Ok(ClientEvent::Appended(event)) => println!("{}", render(&event)),
            Ok(ClientEvent::Connection(true)) => println!("[chatwire] connected"),
            Ok(ClientEvent::Connection(false)) => println!("[chatwire] disconnected"),
            Ok(ClientEvent::Cleared) => println!("[chatwire] conversation cleared"),
            Ok(ClientEvent::Diagnostic(d)) => eprintln!("[chatwire] {:?}", d),
            Ok(ClientEvent::Phase(_)) | Ok(ClientEvent::Session(_)) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                eprintln!("[chatwire] skipped {} updates", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let client = match ChatClient::new(load_settings(&args)) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("[chatwire] {}", e);
            std::process::exit(2);
        }
    };
    let printer = tokio::spawn(print_updates(client.subscribe()));
    client.connect(&args.identity, &args.token);
    println!("[chatwire] type a message, or /voice <file>, /typing on|off, /clear, /status, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("[chatwire] stdin error: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_command(line) {
            Command::Say(text) => {
                if client.send(text) == SendOutcome::NotConnected {
                    eprintln!("[chatwire] not connected; message kept locally");
                }
            }
            Command::Voice(path) => match tokio::fs::read(path).await {
                Ok(audio) => {
                    let client = client.clone();
                    tokio::spawn(async move { client.upload_voice(audio).await });
                }
                Err(e) => eprintln!("[chatwire] cannot read {}: {}", path, e),
            },
            Command::Typing(active) => {
                client.send_typing(active);
            }
            Command::Clear => client.clear_messages(),
            Command::Status => println!(
                "[chatwire] phase={:?} session={} messages={} diagnostics={}",
                client.phase(),
                client.session_id().as_deref().unwrap_or("-"),
                client.messages().len(),
                client.diagnostics().len()
            ),
            Command::Quit => break,
            Command::Unknown(line) => eprintln!("[chatwire] unknown command: {}", line),
        }
    }

    client.close().await;
    printer.abort();
}
