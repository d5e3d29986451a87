//! Voice-AI provider client (spec.md §4.8, §6): signed-URL issuance plus a
//! thin wrapper opening the per-call conversation WebSocket. Grounded on the
//! project's own `AgentWebSocket`/`ElevenLabsClient::hit` pattern — a
//! reqwest-based signed-URL fetch, then `tokio_tungstenite::connect_async`.

pub mod messages;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const API_BASE: &str = "https://api.elevenlabs.io/v1";

#[derive(thiserror::Error, Debug)]
pub enum VoiceAiError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Clone)]
pub struct VoiceAiClient {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

impl VoiceAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        VoiceAiClient {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Issues a short-lived signed URL authorizing one WebSocket session
    /// against `agent_id` (spec.md GLOSSARY: Signed URL).
    pub async fn signed_url(&self, agent_id: &str) -> Result<String, VoiceAiError> {
        let resp = self
            .http
            .get(format!("{API_BASE}/convai/conversation/get_signed_url"))
            .header("xi-api-key", &self.api_key)
            .query(&[("agent_id", agent_id)])
            .send()
            .await?
            .error_for_status()?;
        let parsed: SignedUrlResponse = resp.json().await?;
        Ok(parsed.signed_url)
    }

    pub async fn open(&self, signed_url: &str) -> Result<(WsWriter, WsReader), VoiceAiError> {
        let (socket, _) = connect_async(signed_url).await?;
        Ok(socket.split())
    }
}
