//! Post-Call Pipeline (spec.md §4.10): verifies the voice-AI post-call
//! webhook signature, records the outcome, and asynchronously runs
//! Missed-Action Analysis.

use crate::booking::{self, BookingResult};
use crate::db::calls;
use crate::db::follow_ups;
use crate::domain::Service;
use crate::llm::{LlmClient, MissedActionAnalysis};
use crate::notifier::{Notification, Severity};
use crate::slots::{self, SlotQueryResult};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{error, info, warn};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "elevenlabs-signature";
const SIGNATURE_WINDOW: i64 = 30 * 60;

#[derive(Deserialize)]
struct PostCallWebhook {
    r#type: String,
    data: PostCallData,
}

#[derive(Deserialize)]
struct PostCallData {
    conversation_id: String,
    #[serde(default)]
    transcript: Vec<TranscriptTurn>,
    analysis: Option<Analysis>,
    conversation_initiation_client_data: Option<InitClientData>,
}

#[derive(Deserialize)]
struct TranscriptTurn {
    #[serde(default)]
    role: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct ToolCall {
    tool_name: String,
}

#[derive(Deserialize)]
struct Analysis {
    call_successful: Option<String>,
    transcript_summary: Option<String>,
}

#[derive(Deserialize)]
struct InitClientData {
    #[serde(default)]
    dynamic_variables: HashMap<String, serde_json::Value>,
}

/// Validates `t=<unix_seconds>,v0=<hex>` against `HMAC-SHA256(secret,
/// "<t>.<raw_body>")`, rejecting stale signatures (spec.md §4.10).
fn verify_signature(secret: &str, header: &str, raw_body: &[u8], now: i64) -> bool {
    let mut t = None;
    let mut v0 = None;
    for part in header.split(',') {
        if let Some(v) = part.strip_prefix("t=") {
            t = v.parse::<i64>().ok();
        } else if let Some(v) = part.strip_prefix("v0=") {
            v0 = Some(v);
        }
    }
    let (Some(t), Some(v0)) = (t, v0) else { return false };
    if (now - t).abs() > SIGNATURE_WINDOW {
        return false;
    }

    let Ok(provided) = hex::decode(v0) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else { return false };
    mac.update(format!("{t}.").as_bytes());
    mac.update(raw_body);
    mac.verify_slice(&provided).is_ok()
}

async fn notify_signature_failure(state: &AppState, reason: &str, source_ip: SocketAddr, user_agent: Option<&str>) {
    warn!(reason, %source_ip, user_agent, "post-call pipeline: webhook signature check failed");
    state
        .notifier
        .notify(
            Severity::Fatal,
            "post-call pipeline: webhook signature check failed",
            Notification {
                source_ip: Some(source_ip.to_string()),
                user_agent: user_agent.map(str::to_string),
                error: Some(reason.to_string()),
                ..Default::default()
            },
        )
        .await;
}

pub async fn webhook(
    State(state): State<AppState>,
    ConnectInfo(source_ip): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let user_agent = headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok());

    match state.config.voice_ai_webhook_secret.as_deref() {
        Some(secret) => {
            let Some(sig_header) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
                notify_signature_failure(&state, "missing signature header", source_ip, user_agent).await;
                return StatusCode::UNAUTHORIZED;
            };

            if !verify_signature(secret, sig_header, &body, Utc::now().timestamp()) {
                notify_signature_failure(&state, "signature verification failed", source_ip, user_agent).await;
                return StatusCode::UNAUTHORIZED;
            }
        }
        None => {
            warn!("post-call pipeline: no signing secret configured, skipping signature validation");
        }
    }

    let payload: PostCallWebhook = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "post-call pipeline: malformed webhook body");
            return StatusCode::BAD_REQUEST;
        }
    };

    if payload.r#type != "post_call_transcription" {
        return StatusCode::OK;
    }

    if let Err(e) = handle(&state, payload.data).await {
        error!(error = %e, "post-call pipeline: processing failed");
    }
    StatusCode::OK
}

async fn handle(state: &AppState, data: PostCallData) -> Result<(), sqlx::Error> {
    let vars = data
        .conversation_initiation_client_data
        .map(|c| c.dynamic_variables)
        .unwrap_or_default();
    let string_var = |key: &str| vars.get(key).and_then(|v| v.as_str()).map(str::to_string);

    let contact_id = string_var("contactId");
    let phone = string_var("phone");

    let transcript_text = data
        .transcript
        .iter()
        .filter_map(|t| t.message.as_deref().map(|m| format!("{}: {m}", t.role)))
        .collect::<Vec<_>>()
        .join("\n");

    let already_used_tools: Vec<String> = data
        .transcript
        .iter()
        .flat_map(|t| t.tool_calls.iter().map(|c| c.tool_name.clone()))
        .collect();
    let already_booked = already_used_tools.iter().any(|t| t == "book_appointment");

    let outcome = data
        .analysis
        .as_ref()
        .and_then(|a| a.call_successful.as_deref())
        .unwrap_or("failure");

    let summary = data
        .analysis
        .as_ref()
        .and_then(|a| a.transcript_summary.clone())
        .unwrap_or_else(|| {
            format!(
                "{} turns exchanged, no model-provided summary.",
                data.transcript.len()
            )
        });

    // A real tracked contact means contactId differs from the conversation id
    // itself (spec.md §4.10).
    if let Some(contact_id) = &contact_id {
        if contact_id != &data.conversation_id {
            let note = format!(
                "Esito chiamata: {outcome}.\nRiepilogo: {summary}",
            );
            if let Err(e) = state.crm.add_note(contact_id, &note).await {
                warn!(error = %e, contact_id, "post-call pipeline: failed to post CRM note");
            }
        }
    }

    let calls_by_conversation = find_call_by_conversation(state, &data.conversation_id).await?;
    if let Some(record) = &calls_by_conversation {
        calls::set_status(&state.pool, &record.call_sid, outcome).await?;
        calls::set_transcript_summary(&state.pool, &record.call_sid, &summary).await?;
    }

    state
        .notifier
        .notify(
            Severity::Normal,
            &format!("post-call pipeline: call finished ({outcome})"),
            Notification {
                contact_id: contact_id.clone(),
                phone: phone.clone(),
                error: None,
                ..Default::default()
            },
        )
        .await;

    if !state.config.enable_post_call_analysis {
        return Ok(());
    }
    if !matches!(outcome, "success" | "partial") {
        return Ok(());
    }
    let Some(contact_id) = contact_id else { return Ok(()) };
    if transcript_text.trim().is_empty() {
        return Ok(());
    }

    let state = state.clone();
    let record = calls_by_conversation.clone();
    tokio::spawn(async move {
        run_missed_action_analysis(&state, &contact_id, &transcript_text, &already_used_tools, already_booked, record).await;
    });

    Ok(())
}

async fn find_call_by_conversation(
    state: &AppState,
    conversation_id: &str,
) -> Result<Option<calls::CallRecord>, sqlx::Error> {
    sqlx::query_as::<_, calls::CallRecord>("SELECT * FROM calls WHERE conversation_id = ?")
        .bind(conversation_id)
        .fetch_optional(&state.pool)
        .await
}

/// Up to 3 attempts with exponential backoff (1s, 2s, 4s) per spec.md §4.10.
async fn run_missed_action_analysis(
    state: &AppState,
    contact_id: &str,
    transcript: &str,
    already_used_tools: &[String],
    already_booked: bool,
    record: Option<calls::CallRecord>,
) {
    let contact_context = record
        .as_ref()
        .map(|r| format!("service={:?} province={:?}", r.service, r.province))
        .unwrap_or_default();

    let mut attempt = 0;
    let analysis = loop {
        match state
            .llm
            .missed_action_analysis(transcript, already_used_tools, &contact_context)
            .await
        {
            Ok(a) => break Some(a),
            Err(e) => {
                attempt += 1;
                warn!(error = %e, attempt, "post-call pipeline: missed-action analysis attempt failed");
                if attempt >= 3 {
                    break None;
                }
                tokio::time::sleep(std::time::Duration::from_secs(1 << (attempt - 1))).await;
            }
        }
    };

    let Some(analysis) = analysis else {
        error!(contact_id, "post-call pipeline: missed-action analysis exhausted retries");
        return;
    };

    if let Err(e) = act_on_missed_action_analysis(state, contact_id, already_booked, record, analysis).await {
        error!(error = %e, contact_id, "post-call pipeline: failed to act on missed-action analysis");
    }
}

async fn act_on_missed_action_analysis(
    state: &AppState,
    contact_id: &str,
    already_booked: bool,
    record: Option<calls::CallRecord>,
    analysis: MissedActionAnalysis,
) -> Result<(), sqlx::Error> {
    let service = record.as_ref().and_then(|r| r.service.as_deref()).and_then(Service::parse);
    let province = record.as_ref().and_then(|r| r.province.clone());

    let mut appointment_booked = false;

    if analysis.needs_appointment && !already_booked {
        appointment_booked = book_earliest_slot(state, contact_id, service, province.as_deref()).await?;
    }

    if !appointment_booked {
        if let Some(details) = &analysis.follow_up_details {
            if analysis.needs_follow_up {
                let at = Utc::now() + Duration::hours(details.suggested_delay.as_hours());
                follow_ups::insert(
                    &state.pool,
                    contact_id,
                    at,
                    province.as_deref(),
                    service.map(|s| s.as_str()),
                )
                .await?;
                info!(contact_id, "post-call pipeline: follow-up scheduled");
            }
        }
    }

    if analysis.needs_contact_update {
        if let Some(new_address) = &analysis.contact_update_details.new_address {
            if let Err(e) = state.crm.update_contact_address(contact_id, new_address).await {
                warn!(error = %e, contact_id, "post-call pipeline: failed to update contact address");
            }
        }
        if let Some(notes) = &analysis.contact_update_details.additional_notes {
            let _ = state.crm.add_note(contact_id, notes).await;
        }
    }

    Ok(())
}

/// Books the earliest available slot for the contact's (service, province).
/// Returns `true` iff an appointment was actually booked; on no availability
/// the caller falls back to a 24h follow-up.
async fn book_earliest_slot(
    state: &AppState,
    contact_id: &str,
    service: Option<Service>,
    province: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let (Some(service), Some(province)) = (service, province) else {
        follow_ups::insert(&state.pool, contact_id, Utc::now() + Duration::hours(24), province, service.map(|s| s.as_str())).await?;
        return Ok(false);
    };

    let reps = crate::routing::reps_for(&state.pool, service, province).await.unwrap_or_default();
    if reps.is_empty() {
        follow_ups::insert(&state.pool, contact_id, Utc::now() + Duration::hours(24), Some(province), Some(service.as_str())).await?;
        return Ok(false);
    }
    let rep_ids: Vec<String> = reps.iter().map(|r| r.id.clone()).collect();

    let now = Utc::now();
    let window_end = now + Duration::days(15);
    let queried = slots::query_slots(&state.crm, &rep_ids, now, window_end, 1).await;

    let earliest = match queried {
        Ok(SlotQueryResult::Slots(s)) => s.into_iter().next(),
        _ => None,
    };

    let Some(slot) = earliest else {
        follow_ups::insert(&state.pool, contact_id, now + Duration::hours(24), Some(province), Some(service.as_str())).await?;
        return Ok(false);
    };

    let address = state.config.default_appointment_address.clone();
    match booking::book(&state.crm, contact_id, slot.datetime_utc, &address, Some(&slot.rep_id)).await {
        Ok(BookingResult::Booked(_)) => Ok(true),
        _ => {
            follow_ups::insert(&state.pool, contact_id, now + Duration::hours(24), Some(province), Some(service.as_str())).await?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_well_formed_signature() {
        let secret = "test-secret";
        let now = 1_700_000_000i64;
        let body = b"{\"type\":\"post_call_transcription\"}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{now}.").as_bytes());
        mac.update(body);
        let tag = hex::encode(mac.finalize().into_bytes());
        let header = format!("t={now},v0={tag}");
        assert!(verify_signature(secret, &header, body, now));
    }

    #[test]
    fn rejects_stale_signature() {
        let secret = "test-secret";
        let signed_at = 1_700_000_000i64;
        let now = signed_at + 31 * 60;
        let body = b"{}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{signed_at}.").as_bytes());
        mac.update(body);
        let tag = hex::encode(mac.finalize().into_bytes());
        let header = format!("t={signed_at},v0={tag}");
        assert!(!verify_signature(secret, &header, body, now));
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = "test-secret";
        let now = 1_700_000_000i64;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{now}.").as_bytes());
        mac.update(b"{\"original\":true}");
        let tag = hex::encode(mac.finalize().into_bytes());
        let header = format!("t={now},v0={tag}");
        assert!(!verify_signature(secret, &header, b"{\"tampered\":true}", now));
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(!verify_signature("secret", "not-the-right-format", b"{}", 0));
    }
}
