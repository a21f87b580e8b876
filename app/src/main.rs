use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use sportlink_core::telemetry;
use sportlink_core::{
    Backend, ChannelFactory, FileCredentialStore, FriendStore, HttpBackend, HttpTokenRefresher,
    MessageStore, PushEvent, RuntimeSettings, SessionManager, WebSocketChannelFactory,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;
use url::Url;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "SportLink", version, about = "SportLink client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and persist the credential pair.
    Login { email: String },
    /// Discard the persisted credential pair.
    Logout,
    /// Show whether a valid session is present.
    Session,
    /// List conversations, most recently updated first.
    Conversations,
    /// Show the messages of one conversation.
    Messages { conversation_id: Uuid },
    /// Send a message to a conversation.
    Send {
        conversation_id: Uuid,
        text: String,
        #[arg(long)]
        media_url: Option<String>,
    },
    /// Follow a conversation, printing messages as they arrive.
    Watch { conversation_id: Uuid },
    /// List friends.
    Friends,
    /// Show the friendship status for a user.
    Status { user_id: Uuid },
    /// Show the unread message count.
    Unread,
}

struct Services {
    session: SessionManager,
    backend: Arc<dyn Backend>,
    channels: Arc<dyn ChannelFactory>,
}

fn build_services(settings: &RuntimeSettings) -> Result<Services> {
    let http = reqwest::Client::new();
    let store = Arc::new(FileCredentialStore::new(settings.credential_dir.clone()));
    let refresher = Arc::new(HttpTokenRefresher::new(http.clone(), settings.api_url.clone()));
    let session = SessionManager::new(store, refresher);
    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(
        http,
        settings.api_url.clone(),
        session.clone(),
    ));
    let realtime_url = Url::parse(&settings.realtime_url)
        .map_err(|err| anyhow!("invalid realtime url: {err}"))?;
    let channels: Arc<dyn ChannelFactory> = Arc::new(WebSocketChannelFactory::new(realtime_url));
    Ok(Services {
        session,
        backend,
        channels,
    })
}

async fn message_store(services: &Services) -> Result<MessageStore> {
    let viewer = services.backend.current_user().await?;
    Ok(MessageStore::new(
        services.backend.clone(),
        services.channels.clone(),
        viewer.id,
    ))
}

fn prompt_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end().to_string())
}

async fn run(cli: Cli) -> Result<()> {
    let settings = RuntimeSettings::load().map_err(|err| anyhow!(err.user_message()))?;
    let services = build_services(&settings)?;

    match cli.command {
        Command::Login { email } => {
            let password = prompt_password()?;
            let credential = services.backend.sign_in(&email, &password).await?;
            services.session.store(credential).await?;
            println!("Signed in as {email}");
        }
        Command::Logout => {
            services.session.clear().await?;
            println!("Signed out");
        }
        Command::Session => {
            if services.session.is_valid().await {
                if let Some(credential) = services.session.retrieve().await? {
                    println!("Session valid until {}", credential.expires_at);
                }
            } else {
                println!("No valid session; run `sportlink login`");
            }
        }
        Command::Conversations => {
            let store = message_store(&services).await?;
            store.fetch_conversations().await?;
            for conversation in store.conversations() {
                let marker = conversation
                    .last_message
                    .as_ref()
                    .map(|m| {
                        if !m.read && m.sender_id != store.viewer_id() {
                            "*"
                        } else {
                            " "
                        }
                    })
                    .unwrap_or(" ");
                println!(
                    "{marker} {}  {}  {}",
                    conversation.id,
                    conversation.updated_at.format("%Y-%m-%d %H:%M"),
                    conversation.display_name(store.viewer_id())
                );
            }
        }
        Command::Messages { conversation_id } => {
            let store = message_store(&services).await?;
            store.fetch_conversations().await?;
            store.set_current_conversation(conversation_id).await?;
            for message in store.messages() {
                println!(
                    "[{}] {}: {}",
                    message.created_at.format("%H:%M"),
                    message.sender_id,
                    message.content
                );
            }
        }
        Command::Send {
            conversation_id,
            text,
            media_url,
        } => {
            let store = message_store(&services).await?;
            store.fetch_conversations().await?;
            let message = store
                .send_message(conversation_id, &text, media_url.as_deref())
                .await?;
            println!("Sent {}", message.id);
        }
        Command::Watch { conversation_id } => {
            for message in services.backend.list_messages(conversation_id).await? {
                println!(
                    "[{}] {}: {}",
                    message.created_at.format("%H:%M"),
                    message.sender_id,
                    message.content
                );
            }
            let mut subscription = services.channels.subscribe(conversation_id).await?;
            println!("Watching {conversation_id} (Ctrl-C to stop)");
            while let Some(event) = subscription.recv().await {
                match event {
                    PushEvent::Message(message) => {
                        println!(
                            "[{}] {}: {}",
                            message.created_at.format("%H:%M"),
                            message.sender_id,
                            message.content
                        );
                    }
                    PushEvent::Error(detail) => eprintln!("channel error: {detail}"),
                }
            }
        }
        Command::Friends => {
            let friends = FriendStore::new(services.backend.clone());
            for friend in friends.load_friends().await? {
                println!("{}  {}", friend.id, friend.name);
            }
        }
        Command::Status { user_id } => {
            let friends = FriendStore::new(services.backend.clone());
            println!("{:?}", friends.friendship_status(user_id).await?);
        }
        Command::Unread => {
            let store = message_store(&services).await?;
            store.fetch_conversations().await?;
            println!("{}", store.unread_messages_count().await);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::from_default_env())?;
    let cli = Cli::parse();
    let runtime = Runtime::new()?;
    runtime.block_on(run(cli))
}
