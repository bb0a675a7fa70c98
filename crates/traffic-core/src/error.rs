use crate::media::MediaError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("API key is missing or still a placeholder")]
    CredentialMissing,
    #[error("media access failed: {0}")]
    MediaAccess(#[from] MediaError),
    #[error("failed to open session: {0}")]
    SessionOpen(String),
    #[error("session error: {0}")]
    SessionRuntime(String),
    #[error("a session is already running")]
    AlreadyRunning,
    #[error("session manager has shut down")]
    Closed,
}
