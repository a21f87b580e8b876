pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod friends;
pub mod messages;
pub mod models;
pub mod session;
pub mod telemetry;

pub use api::{Backend, HttpBackend, HttpTokenRefresher, InMemoryBackend};
pub use channel::{
    ChannelFactory, ChannelSubscription, InProcessChannelFactory, PushEvent,
    WebSocketChannelFactory,
};
pub use config::{ConfigError, RuntimeSettings};
pub use error::ApiError;
pub use friends::FriendStore;
pub use messages::{MessageStore, SubscriptionState};
pub use models::{
    ApiEnvelope, Conversation, Credential, FriendshipStatus, Message, Participant,
};
pub use session::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, SessionManager, TokenRefresher,
};
