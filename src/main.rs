//! Composition root: reads configuration, constructs every collaborator
//! once, and spawns the Queue Worker and Follow-Up Scheduler alongside the
//! HTTP server (spec.md §4, §6).

use lead_call_orchestrator::config::Config;
use lead_call_orchestrator::crm::CrmClient;
use lead_call_orchestrator::db;
use lead_call_orchestrator::llm::{HttpLlmClient, LlmClient, MockLlmClient};
use lead_call_orchestrator::notifier::ChatNotifier;
use lead_call_orchestrator::province::{GoogleSheetZipProvinceSource, ProvinceCache};
use lead_call_orchestrator::server;
use lead_call_orchestrator::telephony::TelephonyClient;
use lead_call_orchestrator::voice_ai::VoiceAiClient;
use lead_call_orchestrator::{followup, worker, AppState};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    info!("tracing initialized, loading configuration");

    let config = Config::from_env()?;
    let pool = db::connect(&config.database_path).await?;

    let llm: Arc<dyn LlmClient> = match &config.llm_api_key {
        Some(key) => Arc::new(HttpLlmClient::new(key.clone())),
        None => {
            info!("LLM_API_KEY not set, missed-action analysis and LLM province fallback are disabled");
            Arc::new(MockLlmClient)
        }
    };

    let state = AppState {
        config: Arc::new(config.clone()),
        crm: Arc::new(CrmClient::new(
            pool.clone(),
            config.crm_client_id.clone(),
            config.crm_client_secret.clone(),
            config.crm_redirect_uri.clone(),
            config.crm_location_id.clone(),
            config.crm_calendar_id.clone(),
        )),
        telephony: Arc::new(TelephonyClient::new(
            config.telephony_account_sid.clone(),
            config.telephony_auth_token.clone(),
        )),
        voice_ai: Arc::new(VoiceAiClient::new(config.voice_ai_api_key.clone())),
        notifier: Arc::new(ChatNotifier::new(config.notifier_webhook_url.clone())),
        llm,
        province_cache: Arc::new(ProvinceCache::new()),
        zip_sheet: Arc::new(GoogleSheetZipProvinceSource::new(
            config.province_sheet_id.clone(),
            config.province_sheet_range.clone(),
            config.province_sheet_api_key.clone(),
        )),
        live_calls: Arc::new(DashMap::new()),
        internal_http: reqwest::Client::new(),
        pool,
    };

    tokio::spawn(worker::run(state.clone()));
    tokio::spawn(followup::run(state.clone()));

    let addr = format!("0.0.0.0:{}", std::env::var("PORT").unwrap_or_else(|_| "3000".to_string()));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(
        listener,
        server::router(state).into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
