use anyhow::Result;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use sportlink_core::telemetry;
use sportlink_core::{
    Backend, Conversation, Credential, InMemoryBackend, InProcessChannelFactory,
    MemoryCredentialStore,
    MessageStore, Participant, PushEvent, SessionManager, TokenRefresher,
};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for SportLink")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a lightweight smoke test that exercises the client core.
    Smoke,
}

struct SmokeRefresher;

#[async_trait::async_trait]
impl TokenRefresher for SmokeRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, sportlink_core::ApiError> {
        Ok(Credential::bearer(
            format!("smoke-{refresh_token}"),
            Some(refresh_token.to_string()),
            Utc::now() + Duration::hours(1),
        ))
    }
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    runtime.block_on(async {
        let viewer = Participant {
            id: Uuid::new_v4(),
            name: "Smoke".to_string(),
        };
        let backend = Arc::new(InMemoryBackend::new(viewer.clone()));
        let conversation = Conversation {
            id: Uuid::new_v4(),
            name: Some("Smoke kickabout".to_string()),
            is_group: true,
            participants: vec![viewer.clone()],
            last_message: None,
            updated_at: Utc::now(),
        };
        backend.seed_conversation(conversation.clone(), Vec::new());

        let session = SessionManager::new(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(SmokeRefresher),
        );
        let credential = backend.sign_in("smoke@example.com", "pw").await?;
        session.store(credential).await?;
        anyhow::ensure!(session.is_valid().await, "smoke session invalid");

        let factory = InProcessChannelFactory::new();
        let store = MessageStore::new(backend, Arc::new(factory.clone()), viewer.id);
        store.fetch_conversations().await?;
        store.set_current_conversation(conversation.id).await?;
        let sent = store.send_message(conversation.id, "ping from xtask", None).await?;

        // The push channel replays the same event; the store must keep one copy.
        factory.push(conversation.id, PushEvent::Message(sent.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        anyhow::ensure!(
            store.messages().iter().filter(|m| m.id == sent.id).count() == 1,
            "duplicate message retained"
        );

        info!(
            conversations = store.conversations().len(),
            messages = store.messages().len(),
            "smoke test core state verified"
        );
        Ok(())
    })
}
