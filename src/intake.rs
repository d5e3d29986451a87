//! Intake Endpoint (spec.md §4.5): `POST /outgoing/outbound-call`. Validates
//! the lead payload, resolves province, routes to a rep, fetches slots, and
//! either enqueues a call attempt or rejects.

use crate::crm::SlotsOutcome;
use crate::db::queue::{self, NewQueueEntry};
use crate::domain::Service;
use crate::notifier::{Notification, Severity};
use crate::province;
use crate::routing;
use crate::slots::{self, SlotQueryResult};
use crate::time::italian_to_utc;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;

#[derive(Clone, Debug, Deserialize)]
pub struct CustomData {
    #[serde(default, rename = "isAbruptEndingRetry")]
    pub is_abrupt_ending_retry: bool,
    #[serde(default)]
    pub original_conversation_id: Option<String>,
    #[serde(default)]
    pub past_call_summary: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OutboundCallRequest {
    pub phone: Option<String>,
    pub contact_id: Option<String>,
    pub first_name: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "Service")]
    pub service: Option<String>,
    pub full_address: Option<String>,
    #[serde(default)]
    pub custom_data: Option<CustomData>,
}

pub enum IntakeOutcome {
    Enqueued { queue_id: i64 },
    Validation(String),
    NoSalesRep,
    Critical(String),
}

impl IntoResponse for IntakeOutcome {
    fn into_response(self) -> Response {
        match self {
            IntakeOutcome::Enqueued { queue_id } => {
                (StatusCode::ACCEPTED, Json(json!({ "queueId": queue_id }))).into_response()
            }
            IntakeOutcome::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            IntakeOutcome::NoSalesRep => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "no sales representative available for this service/province" })),
            )
                .into_response(),
            IntakeOutcome::Critical(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": msg, "critical": true })),
            )
                .into_response(),
        }
    }
}

pub async fn outbound_call(
    State(state): State<AppState>,
    Json(req): Json<OutboundCallRequest>,
) -> IntakeOutcome {
    handle(&state, req).await
}

pub async fn handle(state: &AppState, req: OutboundCallRequest) -> IntakeOutcome {
    let abrupt = req
        .custom_data
        .as_ref()
        .map(|c| c.is_abrupt_ending_retry)
        .unwrap_or(false);

    // 1. Service
    let service = match req.service.as_deref().and_then(Service::parse) {
        Some(s) => s,
        None => {
            notify(
                state,
                Severity::Warning,
                "intake: missing or invalid Service",
                &req,
            )
            .await;
            return IntakeOutcome::Validation(
                "Service is required and must be one of Infissi, Vetrate, Pergole".to_string(),
            );
        }
    };

    // 2. full_address (unless abrupt retry)
    if req.full_address.is_none() && !abrupt {
        notify(state, Severity::Warning, "intake: missing full_address", &req).await;
        return IntakeOutcome::Validation("full_address is required".to_string());
    }

    // 3. phone + contact_id
    let (phone, contact_id) = match (req.phone.clone(), req.contact_id.clone()) {
        (Some(p), Some(c)) if !p.is_empty() && !c.is_empty() => (p, c),
        _ => {
            notify(state, Severity::Warning, "intake: missing phone or contact_id", &req).await;
            return IntakeOutcome::Validation("phone and contact_id are required".to_string());
        }
    };

    // 4. CRM token obtainable
    if let Err(e) = state.crm.bearer().await {
        tracing::error!(error = %e, "intake: CRM token unavailable");
        notify(state, Severity::Fatal, "intake: CRM token unavailable", &req).await;
        return IntakeOutcome::Critical("CRM token unavailable".to_string());
    }

    let province = match req.full_address.as_deref() {
        Some(addr) => {
            province::extract_province(addr, &state.province_cache, state.zip_sheet.as_ref(), Some(state.llm.as_ref()))
                .await
        }
        None => None,
    };

    let reps = match &province {
        Some(p) => routing::reps_for(&state.pool, service, p).await.unwrap_or_default(),
        None => Vec::new(),
    };

    if reps.is_empty() && !abrupt {
        let _ = state.crm.add_to_workflow(&contact_id, "no-sales-rep").await;
        notify(state, Severity::Normal, "intake: no sales rep for service/province", &req).await;
        return IntakeOutcome::NoSalesRep;
    }

    let rep_ids: Vec<String> = reps.iter().map(|r| r.id.clone()).collect();

    let window_start = italian_to_utc(
        (Utc::now() + Duration::days(1)).date_naive(),
        NaiveTime::from_hms_opt(8, 30, 0).expect("valid time"),
    );
    let window_end = italian_to_utc(
        (Utc::now() + Duration::days(15)).date_naive(),
        NaiveTime::from_hms_opt(21, 30, 0).expect("valid time"),
    );

    let slot_result = slots::query_slots(&state.crm, &rep_ids, window_start, window_end, 15).await;

    let queried_slots = match slot_result {
        Ok(SlotQueryResult::Slots(s)) => s,
        Ok(SlotQueryResult::Empty) if !reps.is_empty() => {
            notify(state, Severity::Fatal, "intake: reps exist but no slots available", &req).await;
            return IntakeOutcome::Critical("no availability for this service/province".to_string());
        }
        Ok(SlotQueryResult::ApiError(e)) if !reps.is_empty() => {
            notify(state, Severity::Fatal, &format!("intake: slot fetch failed: {e}"), &req).await;
            return IntakeOutcome::Critical("slot lookup failed".to_string());
        }
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::error!(error = %e, "intake: slot query failed");
            notify(state, Severity::Fatal, "intake: slot fetch failed", &req).await;
            return IntakeOutcome::Critical("slot lookup failed".to_string());
        }
    };

    let rendered = slots::render_slots(&queried_slots);

    let signed_url = match state.voice_ai.signed_url(&state.config.voice_ai_agent_id_outbound).await {
        Ok(u) => u,
        Err(e) => {
            tracing::error!(error = %e, "intake: failed to obtain signed URL");
            notify(state, Severity::Fatal, "intake: voice-AI signed URL unavailable", &req).await;
            return IntakeOutcome::Critical("voice-AI unavailable".to_string());
        }
    };

    let now = Utc::now();
    let new_entry = NewQueueEntry {
        contact_id: contact_id.clone(),
        phone_number: phone,
        first_name: req.first_name,
        full_name: req.full_name,
        email: req.email,
        service: service.as_str().to_string(),
        province: province.clone(),
        retry_stage: 0,
        scheduled_at: now,
        call_options_blob: req.custom_data.as_ref().and_then(|c| {
            serde_json::to_string(&json!({
                "isAbruptEndingRetry": c.is_abrupt_ending_retry,
                "originalConversationId": c.original_conversation_id,
                "pastCallSummary": c.past_call_summary,
            }))
            .ok()
        }),
        available_slots_text: Some(rendered.text),
        initial_signed_url: Some(signed_url),
        first_attempt_timestamp: now,
    };

    let queue_id = match queue::insert(&state.pool, new_entry).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "intake: failed to persist queue row");
            notify(state, Severity::Fatal, "intake: failed to enqueue", &req).await;
            return IntakeOutcome::Critical("failed to enqueue call".to_string());
        }
    };

    let _ = state.crm.add_to_workflow(&contact_id, "call-scheduled").await;

    IntakeOutcome::Enqueued { queue_id }
}

async fn notify(state: &AppState, severity: Severity, message: &str, req: &OutboundCallRequest) {
    state
        .notifier
        .notify(
            severity,
            message,
            Notification {
                contact_id: req.contact_id.clone(),
                phone: req.phone.clone(),
                service: req.service.clone(),
                ..Default::default()
            },
        )
        .await;
}

