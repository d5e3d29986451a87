//! HTTP surface (spec.md §6): wires every external route to its handler.
//! Most handlers here are thin — the real logic lives in the module named
//! in each route's comment; this file's job is request parsing and status
//! mapping only.

use crate::booking::{self, BookingResult};
use crate::bridge::{self, Direction};
use crate::db::follow_ups;
use crate::domain::Service;
use crate::intake;
use crate::postcall;
use crate::retry::{self, StatusCallback};
use crate::slots::{self, SlotQueryResult};
use crate::time;
use crate::twiml;
use crate::{inbound, AppState};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Europe::Rome;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub fn router(state: AppState) -> Router {
    // Every route here is an external webhook/tool-call target (Twilio, the
    // voice-AI agent, the CRM) rather than a browser frontend, so CORS is
    // left wide open rather than allowlisted.
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/outgoing/outbound-call", post(intake::outbound_call))
        .route("/outgoing/call-status", post(call_status))
        .route("/outgoing/outbound-call-twiml", post(outbound_call_twiml).get(outbound_call_twiml))
        .route("/outgoing/outbound-media-stream", get(outbound_media_stream))
        .route("/incoming/incoming-call", post(inbound::incoming_call))
        .route("/incoming/inbound-media-stream", get(inbound_media_stream))
        .route("/incoming/inbound-call-status", post(call_status))
        .route("/availableSlotsOutbound", get(available_slots_outbound))
        .route("/availableSlotsInbound", get(available_slots_inbound))
        .route("/bookAppointment", post(book_appointment))
        .route("/updateContactAddress", post(update_contact_address))
        .route("/followup", post(create_followup))
        .route("/followup/trigger", post(trigger_followup))
        .route("/elevenlabs/webhook", post(postcall::webhook))
        .route("/gohighlevel/auth", get(gohighlevel_auth))
        .route("/hl/callback", get(hl_callback))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct OutboundTwimlParams {
    #[serde(rename = "contactId")]
    contact_id: Option<String>,
    phone: Option<String>,
    service: Option<String>,
    #[serde(rename = "firstName")]
    first_name: Option<String>,
    #[serde(rename = "fullName")]
    full_name: Option<String>,
    email: Option<String>,
    #[serde(rename = "isAbruptEndingRetry")]
    is_abrupt_ending_retry: Option<String>,
    #[serde(rename = "originalConversationId")]
    original_conversation_id: Option<String>,
    #[serde(rename = "pastCallSummary")]
    past_call_summary: Option<String>,
}

/// Answers the telephony provider's TwiML fetch (spec.md §4.6), forwarding
/// the query parameters `worker::build_twiml_url` attached at call-placement
/// time straight through as `<Parameter>` entries on the media stream —
/// `bridge::run`'s custom-params reader expects exactly these names.
async fn outbound_call_twiml(State(state): State<AppState>, Query(params): Query<OutboundTwimlParams>) -> Response {
    let ws_url = twiml::websocket_url(
        &state.config.public_base_url,
        &format!("{}/outbound-media-stream", state.config.outgoing_route_prefix),
    );

    twiml::connect_stream(
        &ws_url,
        &[
            ("contactId", params.contact_id.as_deref().unwrap_or_default()),
            ("phone", params.phone.as_deref().unwrap_or_default()),
            ("service", params.service.as_deref().unwrap_or_default()),
            ("firstName", params.first_name.as_deref().unwrap_or_default()),
            ("fullName", params.full_name.as_deref().unwrap_or_default()),
            ("email", params.email.as_deref().unwrap_or_default()),
            ("isAbruptEndingRetry", params.is_abrupt_ending_retry.as_deref().unwrap_or_default()),
            ("originalConversationId", params.original_conversation_id.as_deref().unwrap_or_default()),
            ("pastCallSummary", params.past_call_summary.as_deref().unwrap_or_default()),
        ],
    )
}

async fn outbound_media_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move { bridge::handle(state, socket, Direction::Outbound).await })
}

async fn inbound_media_stream(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move { bridge::handle(state, socket, Direction::Inbound).await })
}

async fn call_status(State(state): State<AppState>, Form(cb): Form<StatusCallback>) -> StatusCode {
    if let Err(e) = retry::handle_status_callback(&state, cb).await {
        error!(error = %e, "server: status callback processing failed");
    }
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct AvailableSlotsOutboundParams {
    #[serde(rename = "Timeframe")]
    timeframe: Option<String>,
    #[serde(rename = "AppointmentDate")]
    appointment_date: Option<String>,
    service: Option<String>,
    province: Option<String>,
}

fn parse_italian_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%d-%m-%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

/// Up to 15 chronological slots over a 7-day window anchored on
/// `AppointmentDate` (defaulting to today) (spec.md §6).
async fn available_slots_outbound(
    State(state): State<AppState>,
    Query(params): Query<AvailableSlotsOutboundParams>,
) -> Response {
    let service = match params.service.as_deref().and_then(Service::parse) {
        Some(s) => s,
        None => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "service is required" }))).into_response();
        }
    };
    let Some(province) = params.province.as_deref() else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "province is required" }))).into_response();
    };

    let anchor = params
        .appointment_date
        .as_deref()
        .and_then(parse_italian_date)
        .unwrap_or_else(|| Utc::now().with_timezone(&Rome).date_naive());

    let anchor_time = params
        .timeframe
        .as_deref()
        .and_then(|t| chrono::NaiveTime::parse_from_str(t, "%H:%M").ok())
        .unwrap_or_else(|| chrono::NaiveTime::from_hms_opt(0, 0, 0).expect("valid time"));

    let window_start = time::italian_to_utc(anchor, anchor_time);
    let window_end = window_start + Duration::days(7);

    let reps = crate::routing::reps_for(&state.pool, service, province).await.unwrap_or_default();
    let rep_ids: Vec<String> = reps.iter().map(|r| r.id.clone()).collect();

    match slots::query_slots(&state.crm, &rep_ids, window_start, window_end, 15).await {
        Ok(SlotQueryResult::Slots(s)) => {
            let rendered = slots::render_slots(&s);
            (StatusCode::OK, Json(json!({ "availableSlots": rendered.text }))).into_response()
        }
        Ok(SlotQueryResult::Empty) => (StatusCode::OK, Json(json!({ "availableSlots": "" }))).into_response(),
        Ok(SlotQueryResult::ApiError(e)) => {
            warn!(error = %e, "server: available-slots-outbound api error");
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": e }))).into_response()
        }
        Err(e) => {
            error!(error = %e, "server: available-slots-outbound query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

const SLOT_QUERY_LIMIT_INBOUND: usize = 20;

/// Next-48h slot snapshot, same unfiltered query as the Inbound Handler
/// itself; restricted to Europe/Rome operating hours (spec.md §6).
async fn available_slots_inbound(State(state): State<AppState>) -> Response {
    if !time::is_operating_hours(Utc::now()) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let window_start = Utc::now();
    let window_end = window_start + Duration::hours(48);

    match slots::query_slots(&state.crm, &[], window_start, window_end, SLOT_QUERY_LIMIT_INBOUND).await {
        Ok(SlotQueryResult::Slots(s)) => {
            let rendered = slots::render_slots(&s);
            (StatusCode::OK, Json(json!({ "availableSlots": rendered.text }))).into_response()
        }
        Ok(SlotQueryResult::Empty) => (StatusCode::OK, Json(json!({ "availableSlots": "" }))).into_response(),
        Ok(SlotQueryResult::ApiError(e)) => {
            warn!(error = %e, "server: available-slots-inbound api error");
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": e }))).into_response()
        }
        Err(e) => {
            error!(error = %e, "server: available-slots-inbound query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct BookAppointmentRequest {
    #[serde(rename = "appointmentDate")]
    appointment_date: String,
    #[serde(rename = "contactId")]
    contact_id: String,
    address: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

async fn book_appointment(State(state): State<AppState>, Json(req): Json<BookAppointmentRequest>) -> Response {
    let start_time = match booking::parse_appointment_date(&req.appointment_date) {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    };

    let address = req.address.as_deref().unwrap_or(&state.config.default_appointment_address);

    match booking::book(&state.crm, &req.contact_id, start_time, address, req.user_id.as_deref()).await {
        Ok(BookingResult::Booked(body)) => (StatusCode::CREATED, Json(body)).into_response(),
        Ok(BookingResult::FailedWithAlternatives(alts)) => {
            (StatusCode::OK, Json(json!({ "status": "booking_failed_alternatives_available", "slots": alts }))).into_response()
        }
        Ok(BookingResult::FailedNoAlternatives) => {
            (StatusCode::CONFLICT, Json(json!({ "status": "booking_failed_no_alternatives" }))).into_response()
        }
        Err(e) => {
            error!(error = %e, contact_id = %req.contact_id, "server: book-appointment failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateContactAddressRequest {
    #[serde(rename = "contactId")]
    contact_id: String,
    #[serde(rename = "fullAddress")]
    full_address: String,
}

async fn update_contact_address(State(state): State<AppState>, Json(req): Json<UpdateContactAddressRequest>) -> StatusCode {
    match state.crm.update_contact_address(&req.contact_id, &req.full_address).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(error = %e, contact_id = %req.contact_id, "server: update-contact-address failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Deserialize)]
struct FollowUpRequest {
    #[serde(rename = "contactId")]
    contact_id: String,
    #[serde(rename = "followUpDateTime")]
    follow_up_date_time: String,
}

async fn create_followup(State(state): State<AppState>, Json(req): Json<FollowUpRequest>) -> Response {
    let at = match booking::parse_appointment_date(&req.follow_up_date_time) {
        Ok(t) => t,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    };

    match follow_ups::insert(&state.pool, &req.contact_id, at, None, None).await {
        Ok(_) => (StatusCode::CREATED, Json(json!({ "followUpAtUtc": at }))).into_response(),
        Err(e) => {
            error!(error = %e, contact_id = %req.contact_id, "server: follow-up insert failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn trigger_followup(State(state): State<AppState>) -> StatusCode {
    match crate::followup::sweep_once(&state).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(error = %e, "server: follow-up trigger sweep failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn gohighlevel_auth(State(state): State<AppState>) -> Redirect {
    Redirect::to(&state.crm.authorize_url())
}

#[derive(Debug, Deserialize)]
struct HlCallbackParams {
    code: String,
}

async fn hl_callback(State(state): State<AppState>, Query(params): Query<HlCallbackParams>) -> StatusCode {
    match state.crm.exchange_code(&params.code).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            error!(error = %e, "server: hl callback token exchange failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_supported_appointment_date_query_formats() {
        assert_eq!(parse_italian_date("17-03-2025"), NaiveDate::from_ymd_opt(2025, 3, 17));
        assert_eq!(parse_italian_date("2025-03-17"), NaiveDate::from_ymd_opt(2025, 3, 17));
        assert_eq!(parse_italian_date("not a date"), None);
    }
}
