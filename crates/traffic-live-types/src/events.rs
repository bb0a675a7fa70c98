use crate::server::ServerMessage;

/// What the WebSocket client broadcasts to its subscribers.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The service accepted the `setup` message; media may now flow.
    SetupComplete,
    Message(Box<ServerMessage>),
    Close {
        reason: Option<String>,
    },
    Error {
        message: String,
    },
}
