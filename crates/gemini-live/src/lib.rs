mod client;

pub use client::{
    connect, connect_with_config, Client, ClientTx, Config, ConfigBuilder, Outbound, ServerRx,
    Stats,
};
pub use traffic_live_types as types;
