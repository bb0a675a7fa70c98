use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use traffic_live_types::{ClientMessage, ServerMessage, Setup};

/// What the session actor hears from the remote side.
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// The service accepted the setup; media may flow.
    Open,
    Message(Box<ServerMessage>),
    Close { reason: Option<String> },
    Error(String),
}

/// The sending half of one open duplex session.
#[async_trait]
pub trait RealtimeSession: Send + Sync {
    async fn send(&self, message: ClientMessage) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A connected session and its inbound event stream.
pub struct RemoteSession {
    pub session: Box<dyn RealtimeSession>,
    pub events: mpsc::Receiver<RemoteEvent>,
}

/// Opens duplex sessions against a realtime provider.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Connects and sends `setup`. `RemoteEvent::Open` follows on the
    /// event stream once the provider acknowledges it.
    async fn connect(&self, setup: Setup) -> Result<RemoteSession>;
}
