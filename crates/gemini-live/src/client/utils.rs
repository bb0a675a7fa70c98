use crate::client::config::Config;
use crate::client::consts::{API_KEY_QUERY, BIDI_SERVICE_PATH};
use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

pub fn endpoint_url(config: &Config) -> String {
    format!(
        "{}/{}?{}={}",
        config.base_url(),
        BIDI_SERVICE_PATH,
        API_KEY_QUERY,
        config.api_key().expose_secret()
    )
}

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    endpoint_url(config).into_client_request()
}
