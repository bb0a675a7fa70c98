use crate::types;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use types::audio::Base64EncodedBytes;
use types::{ClientMessage, FunctionResponse, ServerEvent, ServerMessage, Setup};

mod config;
mod consts;
mod stats;
mod utils;

pub use config::{Config, ConfigBuilder};
pub use stats::Stats;

pub type ClientTx = tokio::sync::mpsc::Sender<Outbound>;
type ServerTx = tokio::sync::broadcast::Sender<ServerEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<ServerEvent>;

/// What the writer task puts on the socket.
#[derive(Debug)]
pub enum Outbound {
    Message(Box<ClientMessage>),
    Close,
}

// Holds the channel capacity, the client/server transmitters, the
// configuration, and usage stats guarded by a Mutex.
pub struct Client {
    capacity: usize,
    config: Config,
    c_tx: Option<ClientTx>,
    s_tx: Option<ServerTx>,
    stats: Arc<Mutex<Stats>>,
}

impl Client {
    fn new(capacity: usize, config: Config) -> Self {
        Self {
            capacity,
            config,
            c_tx: None,
            s_tx: None,
            stats: Arc::new(Mutex::new(Stats::new())),
        }
    }

    async fn connect(&mut self) -> Result<()> {
        if self.c_tx.is_some() {
            return Err(anyhow::anyhow!("already connected"));
        }

        let request = utils::build_request(&self.config)?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        tracing::info!(model = %self.config.model(), "connected to Gemini Live");

        let (mut write, mut read) = ws_stream.split();

        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<Outbound>(self.capacity);
        let (s_tx, _) = tokio::sync::broadcast::channel(self.capacity);

        self.c_tx = Some(c_tx);
        self.s_tx = Some(s_tx.clone());

        // Writer: serialize each outbound message onto the socket.
        tokio::spawn(async move {
            while let Some(outbound) = c_rx.recv().await {
                match outbound {
                    Outbound::Message(message) => match serde_json::to_string(&message) {
                        Ok(text) => {
                            tracing::trace!("sending {}", message.kind());
                            if let Err(e) = write.send(Message::Text(text)).await {
                                tracing::error!("failed to send message: {}", e);
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("failed to serialize message: {}", e);
                        }
                    },
                    Outbound::Close => {
                        if let Err(e) = write.send(Message::Close(None)).await {
                            tracing::debug!("failed to send close frame: {}", e);
                        }
                        break;
                    }
                }
            }
        });

        let stats = self.stats.clone();
        // Reader: Gemini sends JSON in both text and binary frames.
        tokio::spawn(async move {
            let mut closed = false;
            while let Some(message) = read.next().await {
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        let _ = s_tx.send(ServerEvent::Error {
                            message: e.to_string(),
                        });
                        closed = true;
                        break;
                    }
                    Ok(message) => message,
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Binary(bin) => match String::from_utf8(bin) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("binary frame is not UTF-8 JSON: {}", e);
                            continue;
                        }
                    },
                    Message::Close(frame) => {
                        let reason = frame.map(|f| format!("{} {}", f.code, f.reason));
                        tracing::info!("connection closed: {:?}", reason);
                        let _ = s_tx.send(ServerEvent::Close { reason });
                        closed = true;
                        break;
                    }
                    _ => continue,
                };

                match decode_server_message(&text) {
                    Ok(server_message) => {
                        tracing::debug!("received message: {}", server_message.kind());
                        if let Ok(mut stats_guard) = stats.lock() {
                            stats_guard.record_message();
                            if let Some(usage) = &server_message.usage_metadata {
                                stats_guard.update_usage(usage);
                            }
                        } else {
                            tracing::error!("failed to update stats");
                        }
                        if let Err(e) = s_tx.send(into_event(server_message)) {
                            tracing::debug!("no subscriber for server event: {}", e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to deserialize message: {}, text=> {:?}", e, text);
                    }
                }
            }
            if !closed {
                let _ = s_tx.send(ServerEvent::Close { reason: None });
            }
        });
        Ok(())
    }

    // Get a receiver for server events. Subscribe before sending `setup`
    // so that `SetupComplete` is not missed.
    pub fn server_events(&self) -> Result<ServerRx> {
        match self.s_tx {
            Some(ref tx) => Ok(tx.subscribe()),
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    pub fn stats(&self) -> Result<Stats> {
        if let Ok(stats_guard) = self.stats.lock() {
            Ok(stats_guard.clone())
        } else {
            Err(anyhow::anyhow!("failed to get stats"))
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Queue a client message for the writer task.
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(Outbound::Message(Box::new(message))).await?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }

    pub async fn send_setup(&self, setup: Setup) -> Result<()> {
        self.send(ClientMessage::Setup(setup)).await
    }

    pub async fn send_audio(&self, audio: Base64EncodedBytes, sample_rate: u32) -> Result<()> {
        self.send(ClientMessage::audio(audio, sample_rate)).await
    }

    pub async fn send_video(&self, jpeg: Base64EncodedBytes) -> Result<()> {
        self.send(ClientMessage::video(jpeg)).await
    }

    pub async fn send_tool_response(&self, responses: Vec<FunctionResponse>) -> Result<()> {
        self.send(ClientMessage::tool_response(responses)).await
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(ClientMessage::text(text)).await
    }

    /// Send a close frame. Further sends fail once the writer has stopped.
    pub async fn close(&self) -> Result<()> {
        match self.c_tx {
            Some(ref tx) => {
                tx.send(Outbound::Close).await?;
                Ok(())
            }
            None => Err(anyhow::anyhow!("not connected yet")),
        }
    }
}

fn decode_server_message(text: &str) -> serde_json::Result<ServerMessage> {
    serde_json::from_str::<ServerMessage>(text)
}

fn into_event(message: ServerMessage) -> ServerEvent {
    if message.is_setup_complete() {
        ServerEvent::SetupComplete
    } else {
        ServerEvent::Message(Box::new(message))
    }
}

// Create a client with a specific config and connect.
pub async fn connect_with_config(capacity: usize, config: Config) -> Result<Client> {
    let mut client = Client::new(capacity, config);
    client.connect().await?;
    Ok(client)
}

// Connect with default settings (API key from `GEMINI_API_KEY`).
pub async fn connect() -> Result<Client> {
    let config = Config::new();
    connect_with_config(1024, config).await
}
