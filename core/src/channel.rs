use crate::error::ApiError;
use crate::models::Message;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Server-initiated event delivered over a conversation subscription.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Message(Message),
    Error(String),
}

/// Wire framing of the realtime channel.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    Message(Message),
    Error { message: String },
}

/// Open subscription keyed by conversation id. Dropping the handle (or
/// calling [`close`](Self::close)) tears the transport down.
pub struct ChannelSubscription {
    conversation_id: Uuid,
    events: UnboundedReceiver<PushEvent>,
    pump: Option<JoinHandle<()>>,
}

impl ChannelSubscription {
    pub fn new(
        conversation_id: Uuid,
        events: UnboundedReceiver<PushEvent>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            conversation_id,
            events,
            pump,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }

    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.events.close();
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens push subscriptions. The message store holds at most one live
/// subscription at a time; the factory does not enforce that itself.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn subscribe(&self, conversation_id: Uuid) -> Result<ChannelSubscription, ApiError>;
}

/// WebSocket transport for the push channel.
///
/// Transport errors are forwarded as [`PushEvent::Error`] and logged;
/// they never touch store state beyond the subscription itself.
pub struct WebSocketChannelFactory {
    realtime_url: Url,
}

impl WebSocketChannelFactory {
    pub fn new(realtime_url: Url) -> Self {
        Self { realtime_url }
    }
}

#[async_trait]
impl ChannelFactory for WebSocketChannelFactory {
    async fn subscribe(&self, conversation_id: Uuid) -> Result<ChannelSubscription, ApiError> {
        let (socket, _) = connect_async(self.realtime_url.as_str())
            .await
            .map_err(|err| ApiError::Channel(err.to_string()))?;
        let (mut sink, mut stream) = socket.split();
        let frame = json!({ "topic": format!("conversation:{conversation_id}") });
        sink.send(WsMessage::Text(frame.to_string()))
            .await
            .map_err(|err| ApiError::Channel(err.to_string()))?;
        debug!(conversation = %conversation_id, "realtime subscription opened");

        let (tx, rx) = unbounded_channel();
        let pump = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<WireFrame>(&text) {
                        Ok(WireFrame::Message(message)) => {
                            if tx.send(PushEvent::Message(message)).is_err() {
                                break;
                            }
                        }
                        Ok(WireFrame::Error { message }) => {
                            warn!(%message, "realtime channel reported an error");
                            tx.send(PushEvent::Error(message)).ok();
                        }
                        Err(err) => warn!(error = %err, "ignoring malformed realtime frame"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "realtime transport error");
                        tx.send(PushEvent::Error(err.to_string())).ok();
                        break;
                    }
                }
            }
        });

        Ok(ChannelSubscription::new(conversation_id, rx, Some(pump)))
    }
}

/// Test/smoke transport delivering events pushed through the factory
/// handle itself.
#[derive(Clone, Default)]
pub struct InProcessChannelFactory {
    senders: Arc<Mutex<HashMap<Uuid, UnboundedSender<PushEvent>>>>,
}

impl InProcessChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to the open subscription for a conversation, if
    /// any. Returns whether the event was accepted.
    pub fn push(&self, conversation_id: Uuid, event: PushEvent) -> bool {
        match self.senders.lock().get(&conversation_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self, conversation_id: Uuid) -> bool {
        self.senders
            .lock()
            .get(&conversation_id)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ChannelFactory for InProcessChannelFactory {
    async fn subscribe(&self, conversation_id: Uuid) -> Result<ChannelSubscription, ApiError> {
        let (tx, rx) = unbounded_channel();
        self.senders.lock().insert(conversation_id, tx);
        Ok(ChannelSubscription::new(conversation_id, rx, None))
    }
}
