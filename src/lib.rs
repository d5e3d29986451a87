//! Outbound voice-call orchestrator: bridges a lead platform, a telephony
//! provider and a conversational voice-AI agent into a single
//! queue-retry-bridge-booking pipeline.

pub mod booking;
pub mod bridge;
pub mod config;
pub mod crm;
pub mod db;
pub mod domain;
pub mod followup;
pub mod inbound;
pub mod intake;
pub mod llm;
pub mod notifier;
pub mod postcall;
pub mod province;
pub mod retry;
pub mod routing;
pub mod server;
pub mod slots;
pub mod telephony;
pub mod time;
pub mod twiml;
pub mod voice_ai;
pub mod worker;

use config::Config;
use crm::CrmClient;
use dashmap::DashMap;
use llm::LlmClient;
use notifier::Notifier;
use province::{ProvinceCache, ZipProvinceSource};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use telephony::TelephonyClient;
use voice_ai::VoiceAiClient;

/// A call currently owned by a live Media Bridge task, tracked in-memory
/// alongside (not instead of) the durable `calls` row (spec.md §5: the
/// `calls`/`call_queue` tables remain the only shared *durable* state; this
/// registry is a process-local index into the live tasks).
#[derive(Clone, Debug)]
pub struct LiveCall {
    pub call_sid: String,
    pub stream_sid: Option<String>,
}

/// Composition root: every collaborator the handlers need, constructed once
/// at startup and cloned (cheaply, via `Arc`) into each request/task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub crm: Arc<CrmClient>,
    pub telephony: Arc<TelephonyClient>,
    pub voice_ai: Arc<VoiceAiClient>,
    pub notifier: Arc<dyn Notifier>,
    pub llm: Arc<dyn LlmClient>,
    pub province_cache: Arc<ProvinceCache>,
    pub zip_sheet: Arc<dyn ZipProvinceSource>,
    pub live_calls: Arc<DashMap<String, LiveCall>>,
    /// Plain HTTP client used only for the Follow-Up Scheduler's internal
    /// resubmission call to the Intake Endpoint (spec.md §4.11 step 4) — kept
    /// separate from `crm`/`telephony`/`voice_ai`'s clients since it talks to
    /// this process itself, not an upstream provider.
    pub internal_http: reqwest::Client,
}
