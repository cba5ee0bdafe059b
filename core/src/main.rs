/// Inbox sync client - headless entry point
use inbox_core::media;
use inbox_core::messenger_types::InboxEvent;
use inbox_core::transport::{PushClient, RestClient};
use inbox_core::{AuthContext, Config, CredentialStore, InboxSession};
use std::env;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let creds = CredentialStore::load(&config.credentials_path())?;
    let auth = AuthContext::resolve(config.role, &creds)
        .map_err(|e| anyhow::anyhow!("{} (credentials in {})", e, config.credentials_path().display()))?;

    info!("📥 Starting inbox as {}", config.role);
    info!("   API: {}", config.api_base);

    let api = RestClient::new(&config, &auth)?;
    let session = InboxSession::new(api, config.clone(), auth.actor.clone());
    let mut events = session.subscribe();

    if let Some(addr) = config.push_addr.clone() {
        let socket = Some(auth.socket.clone());
        let (handle, updates) = PushClient::new(addr, config.push_retry_interval).spawn(socket.clone());
        session.attach_push(handle, updates, socket).await;
    }

    session.start().await
        .map_err(|e| anyhow::anyhow!("Inbox error: {}", e))?;

    let store = session.store();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(InboxEvent::ConversationsUpdated) => {
                    let store = store.read().await;
                    let rows = store.visible_conversations("");
                    let unread = rows.iter().filter(|r| r.has_unread()).count();
                    info!("{} conversation(s), {} unread", rows.len(), unread);
                }
                Ok(InboxEvent::ThreadUpdated { conversation_id }) => {
                    let store = store.read().await;
                    if let Some(last) = store.thread(&conversation_id).last() {
                        let title = store.thread_title(&conversation_id);
                        let body = media::parse(&last.text, &config.api_base);
                        info!(
                            "[{}] {}: {}",
                            title,
                            last.sender_label(&title, store.actor().role),
                            body.text
                        );
                        for item in &body.items {
                            info!("   {:?} {}", item.kind, item.url);
                        }
                    }
                }
                Ok(InboxEvent::LoginRequired { login_path }) => {
                    warn!("Login required: {}", login_path);
                    break;
                }
                Ok(other) => info!("{:?}", other),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} inbox events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    info!("Shutting down...");
    session.shutdown().await;
    Ok(())
}
