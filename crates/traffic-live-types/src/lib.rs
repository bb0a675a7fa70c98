//! Wire types for the Gemini Live `BidiGenerateContent` protocol.
//!
//! Every client frame is a JSON object with exactly one top-level key
//! (`setup`, `realtimeInput`, `toolResponse`, `clientContent`); server frames
//! carry one or more optional sections and are modelled as [`ServerMessage`].

pub mod audio;
pub mod client;
pub mod content;
pub mod events;
pub mod server;
pub mod session;
pub mod tools;

pub use client::{ClientMessage, FunctionResponse, RealtimeInput, ToolResponse};
pub use content::{Blob, Content, Part};
pub use events::ServerEvent;
pub use server::{FunctionCall, ServerContent, ServerMessage, ToolCall};
pub use session::{Setup, SetupConfigurator};
pub use tools::{FunctionDeclaration, Tool};
