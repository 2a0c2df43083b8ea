//! `chatsync`: line-oriented chat client.
//!
//! Logs in, opens one conversation, sends every stdin line as a message and
//! prints what happens to it. Configuration via CLI flags, environment
//! variables, or config file (`~/.config/chatsync/config.toml`).
//!
//! ```bash
//! cargo run --bin chatsync -- --api-url http://127.0.0.1:3000 \
//!     --socket-url ws://127.0.0.1:3000/ws --token alice-token \
//!     --user-id alice --other-user bob
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use chatsync::chat::{ChatEvent, Notice, SendError, SendOutcome};
use chatsync::client::{ClientSession, LoginOptions, SessionError};
use chatsync::config::{CliArgs, ClientConfig};
use chatsync_proto::message::{Message, UserId};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    // Logs go to a file so stdout stays readable.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("chatsync starting");

    let result = run(&config).await;
    tracing::info!("chatsync exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("chatsync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(config: &ClientConfig) -> Result<(), SessionError> {
    let settings = config.session_settings()?;
    let me = UserId::new(settings.user_id.clone());
    let session = ClientSession::login_with(&settings, LoginOptions::from(config))?;
    let (conversation, mut events) = session
        .open_conversation(UserId::new(settings.other_user.clone()))
        .await;

    println!(
        "chatting with {} as {me} (type /quit to exit)",
        settings.other_user
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim() == "/quit" => break,
                Ok(Some(line)) => {
                    // Sends run in the background so a slow fallback never blocks input.
                    let conversation = Arc::clone(&conversation);
                    tokio::spawn(async move {
                        match conversation.send(&line).await {
                            Ok(SendOutcome::AlreadyPending(_)) => println!("  (already sending)"),
                            Ok(_) | Err(SendError::EmptyMessage) => {}
                            Err(SendError::Rejected { draft, reason }) => {
                                println!("! not sent ({reason}), edit and retry: {draft}");
                            }
                        }
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            },
            Some(event) = events.recv() => print_event(&event, &me),
        }
    }

    conversation.close();
    session.logout();
    Ok(())
}

fn print_event(event: &ChatEvent, me: &UserId) {
    match event {
        ChatEvent::MessagePending(m) => println!("{} (sending)", format_message(m, me)),
        ChatEvent::MessageReceived(m) => println!("{}", format_message(m, me)),
        ChatEvent::MessageConfirmed { message, .. } => {
            println!("{} (sent)", format_message(message, me));
        }
        ChatEvent::MessageRemoved(_) => {}
        ChatEvent::StatusChanged {
            message_ids,
            status,
        } => println!("  {} message(s) now {status}", message_ids.len()),
        ChatEvent::HistoryLoaded { count, other_user } => {
            let name = other_user.as_ref().map_or_else(String::new, |u| {
                format!(" with {} {}", u.first_name, u.last_name)
                    .trim_end()
                    .to_string()
            });
            println!("-- {count} earlier message(s){name} --");
        }
        ChatEvent::Notice(Notice::QueuedForRetry { content }) => {
            println!("  offline, will resend when reconnected: {content}");
        }
        ChatEvent::Notice(Notice::SendRejected { content, reason }) => {
            println!("! rejected ({reason}): {content}");
        }
        ChatEvent::ConnectionChanged(true) => println!("-- connected --"),
        ChatEvent::ConnectionChanged(false) => println!("-- connection lost --"),
    }
}

fn format_message(message: &Message, me: &UserId) -> String {
    let who = if message.sender_id == *me {
        "you".to_string()
    } else {
        message
            .sender
            .as_ref()
            .map(chatsync_proto::message::SenderProfile::display_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| message.sender_id.to_string())
    };
    format!(
        "[{}] {who}: {}",
        message.created_at.format("%H:%M"),
        message.content
    )
}
