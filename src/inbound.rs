//! Inbound Handler (spec.md §4.12): answers an incoming telephony call with
//! a snapshot of near-term availability, then bridges it to the inbound
//! voice-AI agent. The media bridge itself is shared with the outbound leg
//! (`bridge::run` with `Direction::Inbound`) — only the handshake here and
//! the smaller dynamic-variable set differ.

use crate::db::incoming_calls;
use crate::slots::{self, SlotQueryResult};
use crate::twiml;
use crate::AppState;
use axum::extract::{Form, State};
use axum::response::Response;
use chrono::{Duration, TimeZone, Utc};
use chrono_tz::Europe::Rome;
use serde::Deserialize;
use tracing::{error, warn};

const SLOT_QUERY_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct IncomingCallWebhook {
    #[serde(rename = "CallSid")]
    call_sid: String,
    #[serde(rename = "From")]
    from: String,
}

/// Answers the incoming-call webhook. Availability lookup and signed-url
/// acquisition are best-effort: if either fails, the call is still bridged
/// so the agent can fall back to an empty slot list / its own retry.
pub async fn incoming_call(State(state): State<AppState>, Form(webhook): Form<IncomingCallWebhook>) -> Response {
    let available_slots = fetch_available_slots(&state).await;

    let signed_url = match state.voice_ai.signed_url(&state.config.voice_ai_agent_id_inbound).await {
        Ok(url) => Some(url),
        Err(e) => {
            warn!(error = %e, call_sid = %webhook.call_sid, "inbound handler: failed to obtain signed url, bridge will retry");
            None
        }
    };

    if let Err(e) = incoming_calls::insert(
        &state.pool,
        &webhook.call_sid,
        &webhook.from,
        signed_url.as_deref(),
        available_slots.as_deref(),
    )
    .await
    {
        error!(error = %e, call_sid = %webhook.call_sid, "inbound handler: failed to persist incoming call");
        return twiml::reject();
    }

    let ws_url = twiml::websocket_url(
        &state.config.public_base_url,
        &format!("{}/inbound-media-stream", state.config.incoming_route_prefix),
    );

    twiml::connect_stream(&ws_url, &[("callSid", &webhook.call_sid), ("callerNumber", &webhook.from)])
}

/// Europe/Rome "today through the end of tomorrow" window (spec.md §4.12).
/// No rep filter — an inbound caller isn't routed to a specific rep yet, so
/// this mirrors `booking::find_alternatives`'s unfiltered query.
async fn fetch_available_slots(state: &AppState) -> Option<String> {
    let today = Utc::now().with_timezone(&Rome).date_naive();
    let window_start = Rome
        .from_local_datetime(&today.and_hms_opt(0, 0, 0).expect("valid hour"))
        .single()?
        .with_timezone(&Utc);
    let window_end = window_start + Duration::days(2);

    match slots::query_slots(&state.crm, &[], window_start, window_end, SLOT_QUERY_LIMIT).await {
        Ok(SlotQueryResult::Slots(slots)) => Some(slots::render_slots(&slots).text),
        Ok(SlotQueryResult::Empty) => None,
        Ok(SlotQueryResult::ApiError(e)) => {
            warn!(error = %e, "inbound handler: slot query returned an api error");
            None
        }
        Err(e) => {
            warn!(error = %e, "inbound handler: slot query failed");
            None
        }
    }
}
