//! Queue Worker (spec.md §4.6): ticks on an interval, admits up to the
//! active-call headroom, claims due rows, places calls, and persists the
//! `CallRecord` before any status callback can observe it.

use crate::db::calls::{self, NewCallRecord};
use crate::db::queue;
use crate::notifier::{Notification, Severity};
use crate::telephony::CreateCallBody;
use crate::AppState;
use std::time::Duration;
use tracing::{error, info, warn};

pub async fn run(state: AppState) {
    let tick = Duration::from_secs(state.config.queue_tick_interval_secs);
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        if let Err(e) = tick_once(&state).await {
            error!(error = %e, "queue worker: tick failed");
        }
    }
}

async fn tick_once(state: &AppState) -> Result<(), sqlx::Error> {
    // 1. Active-call count; fail-closed on error.
    let active = match state.telephony.active_call_count().await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "queue worker: failed to read active call count, assuming saturated");
            return Ok(());
        }
    };

    // 2. Headroom.
    let max_active = state.config.max_active_calls;
    if active >= max_active {
        return Ok(());
    }
    let available = max_active - active;

    // 3. Claim due rows.
    let claimed = queue::claim_due(&state.pool, available, chrono::Utc::now()).await?;
    for entry in claimed {
        place_call(state, entry).await?;
    }
    Ok(())
}

/// The TwiML webhook (`/outbound-call-twiml`) has no DB row to read from at
/// fetch time that's guaranteed race-free with this entry's lifecycle, so
/// everything the Media Bridge needs from `customParameters` rides along as
/// query parameters on the URL itself instead.
fn build_twiml_url(state: &AppState, entry: &queue::CallQueueEntry) -> Result<String, String> {
    let mut url = reqwest::Url::parse(&format!(
        "{}{}/outbound-call-twiml",
        state.config.public_base_url, state.config.outgoing_route_prefix
    ))
    .map_err(|e| e.to_string())?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("contactId", &entry.contact_id);
        pairs.append_pair("phone", &entry.phone_number);
        pairs.append_pair("service", &entry.service);
        if let Some(v) = &entry.first_name {
            pairs.append_pair("firstName", v);
        }
        if let Some(v) = &entry.full_name {
            pairs.append_pair("fullName", v);
        }
        if let Some(v) = &entry.email {
            pairs.append_pair("email", v);
        }
        if let Some(blob) = &entry.call_options_blob {
            if let Ok(options) = serde_json::from_str::<serde_json::Value>(blob) {
                if options.get("isAbruptEndingRetry").and_then(|v| v.as_bool()) == Some(true) {
                    pairs.append_pair("isAbruptEndingRetry", "true");
                }
                if let Some(id) = options.get("originalConversationId").and_then(|v| v.as_str()) {
                    pairs.append_pair("originalConversationId", id);
                }
                if let Some(summary) = options.get("pastCallSummary").and_then(|v| v.as_str()) {
                    pairs.append_pair("pastCallSummary", summary);
                }
            }
        }
    }
    Ok(url.to_string())
}

async fn place_call(state: &AppState, entry: queue::CallQueueEntry) -> Result<(), sqlx::Error> {
    if let Err(e) = state.crm.bearer().await {
        warn!(error = %e, contact_id = %entry.contact_id, "queue worker: CRM token unavailable, marking failed");
        queue::mark_failed(&state.pool, entry.id, "CRM token unavailable").await?;
        return Ok(());
    }

    let twiml_url = match build_twiml_url(state, &entry) {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, contact_id = %entry.contact_id, "queue worker: malformed public base url");
            queue::mark_failed(&state.pool, entry.id, "malformed public base url").await?;
            return Ok(());
        }
    };
    let status_callback_url = format!(
        "{}{}/call-status",
        state.config.public_base_url, state.config.outgoing_route_prefix
    );
    let from_number = match entry.service.as_str() {
        "Infissi" => &state.config.telephony_number_infissi,
        _ => &state.config.telephony_number_glazing,
    };

    let body = CreateCallBody::new(&entry.phone_number, from_number, twiml_url)
        .with_status_callback(status_callback_url)
        .with_machine_detection();

    let call = match state.telephony.create_call(body).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, contact_id = %entry.contact_id, "queue worker: failed to place call");
            queue::mark_failed(&state.pool, entry.id, &e.to_string()).await?;
            state
                .notifier
                .notify(
                    Severity::Normal,
                    "queue worker: failed to place outbound call",
                    Notification {
                        contact_id: Some(entry.contact_id.clone()),
                        phone: Some(entry.phone_number.clone()),
                        service: Some(entry.service.clone()),
                        province: entry.province.clone(),
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                )
                .await;
            return Ok(());
        }
    };

    // Ordering invariant: this row must exist before the first status
    // callback for this sid is processed.
    let record = NewCallRecord {
        call_sid: call.sid.clone(),
        to: entry.phone_number.clone(),
        contact_id: Some(entry.contact_id.clone()),
        retry_count: entry.retry_stage,
        status: call.status.unwrap_or_else(|| "queued".to_string()),
        signed_url: entry.initial_signed_url.clone(),
        full_name: entry.full_name.clone(),
        first_name: entry.first_name.clone(),
        email: entry.email.clone(),
        available_slots: entry.available_slots_text.clone(),
        first_attempt_timestamp: Some(entry.first_attempt_timestamp),
        service: Some(entry.service.clone()),
        province: entry.province.clone(),
    };
    calls::insert(&state.pool, record).await?;

    let note = format!(
        "Outbound call attempt in progress (sid {}), retry stage {}.",
        call.sid, entry.retry_stage
    );
    if let Err(e) = state.crm.add_note(&entry.contact_id, &note).await {
        warn!(error = %e, contact_id = %entry.contact_id, "queue worker: failed to post CRM note");
    }

    queue::delete(&state.pool, entry.id).await?;
    info!(call_sid = %call.sid, contact_id = %entry.contact_id, "queue worker: call placed");
    Ok(())
}
