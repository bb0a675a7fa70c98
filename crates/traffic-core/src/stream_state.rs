//! Lifecycle of the live stream as seen by the dashboard.
//!
//! ```text
//! Idle/Error --Start--> Connecting --Opened--> Active --Closed--> Idle
//!     any    --Failed-> Error
//!     any    --Stop---> Idle
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    #[default]
    Idle,
    Connecting,
    Active,
    Error,
}

impl StreamState {
    /// Connecting or Active: a session attempt holds resources.
    pub fn is_running(&self) -> bool {
        matches!(self, StreamState::Connecting | StreamState::Active)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Idle => "idle",
            StreamState::Connecting => "connecting",
            StreamState::Active => "active",
            StreamState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Start,
    /// The remote session reported open.
    Opened,
    /// Start failure or remote error.
    Failed,
    Stop,
    /// The remote side closed an open session.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {event:?} while {state}")]
pub struct TransitionError {
    pub state: StreamState,
    pub event: StreamEvent,
}

#[derive(Debug, Default)]
pub struct StreamStateMachine {
    state: StreamState,
}

impl StreamStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Applies `event`, leaving the state untouched on an illegal pair.
    pub fn apply(&mut self, event: StreamEvent) -> Result<StreamState, TransitionError> {
        let next = next_state(self.state, event)?;
        if next != self.state {
            tracing::debug!("stream state {} -> {}", self.state, next);
        }
        self.state = next;
        Ok(next)
    }
}

pub fn next_state(state: StreamState, event: StreamEvent) -> Result<StreamState, TransitionError> {
    use StreamEvent::*;
    use StreamState::*;
    match (state, event) {
        (Idle | Error, Start) => Ok(Connecting),
        (Connecting, Opened) => Ok(Active),
        (Active, Closed) => Ok(Idle),
        (_, Failed) => Ok(Error),
        (_, Stop) => Ok(Idle),
        (state, event) => Err(TransitionError { state, event }),
    }
}
