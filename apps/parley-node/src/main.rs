use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use parley_client::{ChatSession, ClientConfig, ClientEvent};
use parley_presence::{PresenceConfig, PresenceServer, SessionPolicy};
use parley_protocol::{MessageId, UserId};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the presence server
    Serve(ServeArgs),
    /// Sign in as a user and chat from the terminal
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(short, long, env = "PARLEY_LISTEN", default_value = "0.0.0.0:5001")]
    listen: SocketAddr,

    /// Keep only the newest socket per user instead of all of them
    #[arg(long)]
    single_session: bool,

    /// Largest accepted websocket frame, in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    max_frame_bytes: usize,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Local user id
    #[arg(short, long)]
    user: String,

    /// Peer to open a conversation with
    #[arg(short, long)]
    peer: Option<String>,

    /// REST API base URL
    #[arg(long, env = "PARLEY_API", default_value = "http://localhost:5001/api/")]
    api: String,

    /// Presence socket URL
    #[arg(long, env = "PARLEY_SOCKET", default_value = "ws://localhost:5001/")]
    socket: String,

    /// Session token sent as the jwt cookie
    #[arg(long, env = "PARLEY_TOKEN")]
    token: Option<String>,

    /// Seconds between reconciliation passes
    #[arg(long, default_value = "5")]
    reconcile_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Watch(args) => watch_chat(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = PresenceConfig {
        listen_addr: args.listen,
        session_policy: if args.single_session {
            SessionPolicy::LastWriterWins
        } else {
            SessionPolicy::MultiSession
        },
        max_frame_bytes: args.max_frame_bytes,
    };
    let server = PresenceServer::bind(config)
        .await
        .context("Failed to start presence server")?;
    println!("Presence server listening on {}", server.local_addr()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await?;
    println!("Presence server stopped");
    Ok(())
}

async fn watch_chat(args: WatchArgs) -> Result<()> {
    let config = ClientConfig {
        api_base_url: args.api,
        socket_url: args.socket,
        auth_token: args.token,
        reconcile_interval: Duration::from_secs(args.reconcile_secs),
        ..Default::default()
    };
    let connected = ChatSession::connect(config, UserId::new(args.user))
        .await
        .context("Failed to connect")?;
    let session = connected.session;
    let mut events = connected.events;
    // Keep the background tasks alive for the whole run
    let _event_loop = connected.event_loop;
    let _reconciliation = connected.reconciliation;

    println!("Signed in as {}", session.local_user());
    for contact in session.contacts() {
        println!(
            "  {} {}",
            contact.id,
            contact.full_name.as_deref().unwrap_or_default()
        );
    }

    if let Some(peer) = args.peer {
        open(&session, &peer).await;
    }
    print_help();

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = String::new();
    prompt();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        print_event(&session, &event);
                        prompt();
                    }
                    None => break,
                }
            }
            read = stdin.read_line(&mut line) => {
                match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let input = line.trim().to_string();
                        line.clear();
                        if let Some(command) = input.strip_prefix('/') {
                            if !handle_command(&session, command).await {
                                break;
                            }
                        } else if !input.is_empty() {
                            if let Err(e) = session.send_text(&input).await {
                                eprintln!("Failed to send: {}", e);
                            }
                        }
                        prompt();
                    }
                    Err(e) => {
                        eprintln!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close_conversation();
    println!("Bye");
    Ok(())
}

async fn open(session: &ChatSession, peer: &str) {
    match session.open_conversation(&UserId::new(peer)).await {
        Ok(()) => {
            for message in session.messages() {
                let marker = if message.sender_id == *session.local_user() {
                    if message.is_read { "✓✓" } else { "✓" }
                } else {
                    ""
                };
                println!(
                    "[{}] {}: {} {}",
                    message.id,
                    message.sender_id,
                    message.preview(),
                    marker
                );
            }
        }
        Err(e) => eprintln!("Failed to open conversation with {}: {}", peer, e),
    }
}

/// Returns `false` when the user asked to quit
async fn handle_command(session: &ChatSession, command: &str) -> bool {
    let mut parts = command.splitn(2, ' ');
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match name {
        "open" if !arg.is_empty() => open(session, arg).await,
        "close" => session.close_conversation(),
        "typing" => session.note_local_input(),
        "read" => {
            if let Err(e) = session.mark_read().await {
                eprintln!("Failed to mark read: {}", e);
            }
        }
        "online" => {
            for user in session.online_users() {
                println!("  {}", user);
            }
        }
        "unread" => {
            for state in session.conversations() {
                println!(
                    "  {}: {} unread, last: {}",
                    state.peer_id,
                    state.unread_count,
                    state.last_message_preview.as_deref().unwrap_or("-")
                );
            }
        }
        "search" if !arg.is_empty() => match session.search_messages(arg).await {
            Ok(found) => {
                for message in found {
                    println!("  [{}] {}: {}", message.id, message.sender_id, message.preview());
                }
            }
            Err(e) => eprintln!("Search failed: {}", e),
        },
        "forward" => {
            let mut args = arg.split_whitespace();
            match (args.next(), args.next()) {
                (Some(id), Some(to)) => {
                    if let Err(e) = session
                        .forward_message(&MessageId::new(id), &UserId::new(to))
                        .await
                    {
                        eprintln!("Failed to forward: {}", e);
                    }
                }
                _ => println!("Usage: /forward <message-id> <user>"),
            }
        }
        "edit" => match arg.split_once(' ') {
            Some((id, text)) => {
                if let Err(e) = session.edit_message(&MessageId::new(id), text).await {
                    eprintln!("Failed to edit: {}", e);
                }
            }
            None => println!("Usage: /edit <message-id> <text>"),
        },
        "delete" if !arg.is_empty() => {
            if let Err(e) = session.delete_message(&MessageId::new(arg)).await {
                eprintln!("Failed to delete: {}", e);
            }
        }
        "image" if !arg.is_empty() => match session.download_image(&MessageId::new(arg)).await {
            Ok(url) => println!("  {}", url),
            Err(e) => eprintln!("Failed to fetch image: {}", e),
        },
        "quit" | "exit" => return false,
        _ => print_help(),
    }
    true
}

fn print_event(session: &ChatSession, event: &ClientEvent) {
    match event {
        ClientEvent::PresenceChanged { online } => println!("\nOnline: {} user(s)", online.len()),
        ClientEvent::TypingStarted { peer } => println!("\n{} is typing...", peer),
        ClientEvent::TypingStopped { peer } => println!("\n{} stopped typing", peer),
        ClientEvent::HistoryLoaded { peer, count } => {
            println!("\nLoaded {} message(s) with {}", count, peer)
        }
        ClientEvent::MessageAppended { message } => {
            if message.sender_id != *session.local_user() {
                println!("\n{}: {}", message.sender_id, message.preview());
            }
        }
        ClientEvent::MessageUpdated { message } => {
            println!("\nEdited [{}]: {}", message.id, message.preview())
        }
        ClientEvent::MessageRemoved { id } => println!("\nDeleted [{}]", id),
        ClientEvent::UnreadChanged { peer, unread_count } => {
            if *unread_count > 0 {
                println!("\n{} unread from {}", unread_count, peer);
            }
        }
        ClientEvent::ReadByPeer { peer } => println!("\n✓✓ {} read your messages", peer),
        ClientEvent::Notification { message } => eprintln!("\n✗ {}", message),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /open <user>               Open a conversation");
    println!("  /close                     Close the conversation");
    println!("  /typing                    Announce typing");
    println!("  /read                      Mark the conversation read");
    println!("  /online                    List online users");
    println!("  /unread                    Show unread counts");
    println!("  /search <text>             Search the conversation");
    println!("  /forward <id> <user>       Forward a message");
    println!("  /edit <id> <text>          Edit a message");
    println!("  /delete <id>               Delete a message");
    println!("  /image <id>                Show an image URL");
    println!("  /quit                      Exit");
    println!("Any other line is sent to the open conversation.");
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}
