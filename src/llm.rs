//! LLM fallback used for (a) province extraction (§4.1 strategy c) and
//! (b) missed-action analysis after a call (§4.10). Modeled as a narrow
//! trait so the rest of the system depends on behavior, not on a specific
//! provider's request/response shape — the same `ElevenLabsClient`/
//! `AgentWebSocket` pattern of hiding the wire format behind a small client
//! struct.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpDelay {
    #[serde(rename = "24h")]
    Hours24,
    #[serde(rename = "48h")]
    Hours48,
    #[serde(rename = "1week")]
    OneWeek,
}

impl FollowUpDelay {
    pub fn as_hours(&self) -> i64 {
        match self {
            FollowUpDelay::Hours24 => 24,
            FollowUpDelay::Hours48 => 48,
            FollowUpDelay::OneWeek => 168,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppointmentDetails {
    pub date: Option<String>,
    pub time: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FollowUpDetails {
    pub suggested_delay: FollowUpDelay,
    pub reasoning: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContactUpdateDetails {
    pub new_address: Option<String>,
    pub additional_notes: Option<String>,
    pub service_details: Option<String>,
}

/// Strict-schema output of the post-call "missed action" analysis (§4.10).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MissedActionAnalysis {
    pub needs_appointment: bool,
    #[serde(default)]
    pub appointment_details: AppointmentDetails,
    pub needs_follow_up: bool,
    pub follow_up_details: Option<FollowUpDetails>,
    pub needs_contact_update: bool,
    #[serde(default)]
    pub contact_update_details: ContactUpdateDetails,
    pub overall_assessment: String,
}

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("malformed LLM response: {0}")]
    Malformed(String),
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Asks a text model for a single 2-letter Italian province code at low
    /// temperature, short output (§4.1 strategy c).
    async fn suggest_province_code(&self, address: &str) -> Option<String>;

    /// Runs missed-action analysis over a call transcript (§4.10). Up to
    /// 3 retries with exponential backoff are the caller's responsibility
    /// (see `postcall::run_missed_action_analysis`); this trait method is a
    /// single attempt.
    async fn missed_action_analysis(
        &self,
        transcript: &str,
        already_used_tools: &[String],
        contact_context: &str,
    ) -> Result<MissedActionAnalysis, LlmError>;
}

/// Real HTTP-backed client against a `generateContent`-style endpoint.
pub struct HttpLlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpLlmClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        HttpLlmClient {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
        }
    }

    /// Points the client at a different `generateContent`-style endpoint —
    /// used by integration tests to target a mock server instead of Google's
    /// real API.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        HttpLlmClient {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: String,
}

impl HttpLlmClient {
    async fn generate(&self, prompt: String, temperature: f32, max_tokens: u32) -> Result<String, LlmError> {
        let url = format!(
            "{}/gemini-1.5-flash:generateContent?key={}",
            self.base_url, self.api_key
        );
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: max_tokens,
            },
        };

        let resp = self
            .http
            .post(url)
            .timeout(Duration::from_secs(15))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: GenerateContentResponse = resp.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| LlmError::Malformed("no candidates in response".to_string()))?;
        Ok(text)
    }
}

#[async_trait::async_trait]
impl LlmClient for HttpLlmClient {
    async fn suggest_province_code(&self, address: &str) -> Option<String> {
        let prompt = format!(
            "Reply with ONLY the 2-letter Italian province code (e.g. RM, MI) for this address. \
             No other text.\n\nAddress: {address}"
        );
        self.generate(prompt, 0.1, 10).await.ok()
    }

    async fn missed_action_analysis(
        &self,
        transcript: &str,
        already_used_tools: &[String],
        contact_context: &str,
    ) -> Result<MissedActionAnalysis, LlmError> {
        let prompt = format!(
            "Analyze this sales call transcript for missed actions. Tools already invoked \
             during the call: {:?}. Contact context: {contact_context}.\n\nTranscript:\n{transcript}\n\n\
             Respond with strict JSON matching the MissedActionAnalysis schema.",
            already_used_tools
        );
        let text = self.generate(prompt, 0.2, 800).await?;
        serde_json::from_str(&text).map_err(|e| LlmError::Malformed(e.to_string()))
    }
}

/// Used when `ENABLE_POST_CALL_ANALYSIS`/`LLM_API_KEY` is not configured.
/// A distinct, opt-in degradation rather than a silent one (§9 design note).
pub struct MockLlmClient;

#[async_trait::async_trait]
impl LlmClient for MockLlmClient {
    async fn suggest_province_code(&self, _address: &str) -> Option<String> {
        None
    }

    async fn missed_action_analysis(
        &self,
        _transcript: &str,
        _already_used_tools: &[String],
        _contact_context: &str,
    ) -> Result<MissedActionAnalysis, LlmError> {
        Ok(MissedActionAnalysis {
            needs_appointment: false,
            appointment_details: AppointmentDetails::default(),
            needs_follow_up: false,
            follow_up_details: None,
            needs_contact_update: false,
            contact_update_details: ContactUpdateDetails::default(),
            overall_assessment: "mock analysis: LLM_API_KEY not configured".to_string(),
        })
    }
}
