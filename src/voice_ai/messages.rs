//! Voice-AI WebSocket wire messages (spec.md §4.8). Shaped the same way as
//! the project's own ElevenLabs conversational-AI message set — an untagged
//! enum of `{r#type, ..._event}` structs with `is_x()`/`as_x()` helpers —
//! narrowed to the events this bridge actually reacts to, plus the
//! `function_call`/`function_call_response` pair that forms the
//! appointment-booking tool contract.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Audio(Audio),
    Interruption(Interruption),
    Ping(Ping),
    ConversationInitiationMetadata(ConversationInitiationMetadata),
    FunctionCall(FunctionCall),
    Other(serde_json::Value),
}

impl ServerMessage {
    pub fn as_audio(&self) -> Option<&Audio> {
        match self {
            ServerMessage::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_interruption(&self) -> bool {
        matches!(self, ServerMessage::Interruption(_))
    }

    pub fn as_ping(&self) -> Option<&Ping> {
        match self {
            ServerMessage::Ping(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_init_metadata(&self) -> Option<&ConversationInitiationMetadata> {
        match self {
            ServerMessage::ConversationInitiationMetadata(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            ServerMessage::FunctionCall(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Audio {
    pub r#type: String,
    pub audio_event: AudioEvent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AudioEvent {
    pub audio_base_64: String,
    pub event_id: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Interruption {
    pub r#type: String,
    pub interruption_event: InterruptionEvent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InterruptionEvent {
    pub event_id: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Ping {
    pub r#type: String,
    pub ping_event: PingEvent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PingEvent {
    pub event_id: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConversationInitiationMetadata {
    pub r#type: String,
    pub conversation_initiation_metadata_event: ConversationInitiationMetadataEvent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConversationInitiationMetadataEvent {
    pub conversation_id: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FunctionCall {
    pub r#type: String,
    pub function_call: FunctionCallEvent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FunctionCallEvent {
    pub tool_call_id: String,
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct Pong {
    r#type: String,
    pub event_id: u32,
}

impl Pong {
    pub fn new(event_id: u32) -> Self {
        Pong {
            r#type: "pong".to_string(),
            event_id,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct UserAudioChunk {
    user_audio_chunk: String,
}

impl UserAudioChunk {
    pub fn new(payload_base64: impl Into<String>) -> Self {
        UserAudioChunk {
            user_audio_chunk: payload_base64.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FunctionCallResponse {
    r#type: String,
    function_call_response: FunctionCallResponseBody,
}

#[derive(Clone, Debug, Serialize)]
struct FunctionCallResponseBody {
    tool_call_id: String,
    result: String,
    is_error: bool,
}

impl FunctionCallResponse {
    pub fn success(tool_call_id: impl Into<String>, result: impl Into<String>) -> Self {
        FunctionCallResponse {
            r#type: "function_call_response".to_string(),
            function_call_response: FunctionCallResponseBody {
                tool_call_id: tool_call_id.into(),
                result: result.into(),
                is_error: false,
            },
        }
    }

    pub fn failure(tool_call_id: impl Into<String>, result: impl Into<String>) -> Self {
        FunctionCallResponse {
            r#type: "function_call_response".to_string(),
            function_call_response: FunctionCallResponseBody {
                tool_call_id: tool_call_id.into(),
                result: result.into(),
                is_error: true,
            },
        }
    }
}

/// First client->server message, carrying dynamic-variable context into the
/// agent (spec.md §4.8 step 4).
#[derive(Clone, Debug, Serialize)]
pub struct ConversationInitiationClientData {
    r#type: String,
    pub dynamic_variables: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_config_override: Option<ConversationConfigOverride>,
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct ConversationConfigOverride {
    pub agent: AgentOverride,
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct AgentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
}

impl ConversationInitiationClientData {
    pub fn new(dynamic_variables: HashMap<String, String>) -> Self {
        ConversationInitiationClientData {
            r#type: "conversation_initiation_client_data".to_string(),
            dynamic_variables,
            conversation_config_override: None,
        }
    }

    /// Used for abrupt-ending retries: overrides the agent's opening line
    /// with the Italian "line dropped" reconnection prompt (spec.md §4.8
    /// step 4).
    pub fn with_first_message_override(mut self, first_message: impl Into<String>) -> Self {
        self.conversation_config_override = Some(ConversationConfigOverride {
            agent: AgentOverride {
                first_message: Some(first_message.into()),
            },
        });
        self
    }
}
