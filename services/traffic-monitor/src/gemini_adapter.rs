use anyhow::{Context, Result};
use async_trait::async_trait;
use gemini_live::{Client, Config, ServerRx};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use traffic_core::realtime_api::{RealtimeConnector, RealtimeSession, RemoteEvent, RemoteSession};
use traffic_live_types::{ClientMessage, ServerEvent, Setup};

const EVENT_CAPACITY: usize = 128;

/// Opens Gemini Live sessions for the session manager.
pub struct GeminiConnector {
    config: Config,
    capacity: usize,
}

impl GeminiConnector {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            capacity: 1024,
        }
    }
}

#[async_trait]
impl RealtimeConnector for GeminiConnector {
    async fn connect(&self, setup: Setup) -> Result<RemoteSession> {
        let client = gemini_live::connect_with_config(self.capacity, self.config.clone())
            .await
            .context("Failed to connect to Gemini Live")?;
        // Subscribe first so SetupComplete cannot be missed.
        let server_rx = client.server_events()?;
        client
            .send_setup(setup)
            .await
            .context("Failed to send session setup")?;

        let (tx, events) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(pump_events(server_rx, tx));
        Ok(RemoteSession {
            session: Box::new(GeminiSession {
                client: Arc::new(client),
            }),
            events,
        })
    }
}

/// A connected Gemini Live client behind the `RealtimeSession` seam.
pub struct GeminiSession {
    client: Arc<Client>,
}

#[async_trait]
impl RealtimeSession for GeminiSession {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        self.client.send(message).await
    }

    async fn close(&self) -> Result<()> {
        if let Ok(stats) = self.client.stats() {
            tracing::info!("closing Gemini session: {:?}", stats);
        }
        self.client.close().await
    }
}

pub fn translate(event: ServerEvent) -> RemoteEvent {
    match event {
        ServerEvent::SetupComplete => RemoteEvent::Open,
        ServerEvent::Message(message) => RemoteEvent::Message(message),
        ServerEvent::Close { reason } => RemoteEvent::Close { reason },
        ServerEvent::Error { message } => RemoteEvent::Error(message),
    }
}

/// Forwards client events until the socket closes or the receiver is dropped.
async fn pump_events(mut server_rx: ServerRx, tx: mpsc::Sender<RemoteEvent>) {
    loop {
        match server_rx.recv().await {
            Ok(event) => {
                let event = translate(event);
                let last = matches!(event, RemoteEvent::Close { .. } | RemoteEvent::Error(_));
                if tx.send(event).await.is_err() || last {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => {
                tracing::warn!("Gemini event stream lagged by {} messages.", n);
            }
            Err(RecvError::Closed) => {
                tracing::info!("Gemini event channel closed.");
                let _ = tx.send(RemoteEvent::Close { reason: None }).await;
                break;
            }
        }
    }
    tracing::debug!("Gemini event pump stopped.");
}
