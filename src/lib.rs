pub use gemini_live::{connect, connect_with_config, Client, Config, ServerRx};
pub use traffic_core as pipeline;
pub use traffic_live_types as types;

#[cfg(feature = "utils")]
pub use traffic_native_utils as utils;
