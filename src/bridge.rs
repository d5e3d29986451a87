//! Media Bridge (spec.md §4.8): per live call, a bidirectional pump between
//! the telephony media WebSocket and the voice-AI WebSocket. Owns dynamic
//! variable injection, interruption/clear propagation, ping/pong, and
//! `book_appointment` function-call handling.
//!
//! Modeled on the project's own `TelephonyAgent::handle_websockets`: read
//! the telephony `connected`/`start` handshake synchronously, then split
//! both sockets and drive two `tokio::spawn`'d pump tasks joined by
//! unbounded channels.

use crate::booking::{self, BookingResult};
use crate::db::calls;
use crate::domain::Service;
use crate::notifier::{Notification, Severity};
use crate::time::utc_to_italian;
use crate::voice_ai::messages::{
    ConversationInitiationClientData, FunctionCallResponse, Pong, ServerMessage as AiMessage, UserAudioChunk,
};
use crate::{AppState, LiveCall};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum TelephonyMessage {
    Connected,
    Start { start: StartPayload },
    Media { media: MediaPayload },
    Stop {},
    Mark {},
}

#[derive(Clone, Debug, Deserialize)]
struct StartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: String,
    #[serde(rename = "callSid")]
    call_sid: String,
    #[serde(default, rename = "customParameters")]
    custom_parameters: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
struct MediaPayload {
    payload: String,
}

#[derive(Clone, Debug, Serialize)]
struct MediaMessage<'a> {
    event: &'static str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
    media: MediaOut<'a>,
}

#[derive(Clone, Debug, Serialize)]
struct MediaOut<'a> {
    payload: &'a str,
}

#[derive(Clone, Debug, Serialize)]
struct ClearMessage<'a> {
    event: &'static str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
}

const RECONNECT_FIRST_MESSAGE: &str = "Pronto? Era caduta la linea, mi senti?";

/// Which leg of the system a media bridge session belongs to (spec.md §4.8
/// vs §4.12). Both legs share the same pump; only persistence target, the
/// voice-AI agent, and the dynamic-variable set differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Entry point called from the axum handler after the upgrade. Mirrors the
/// teacher's `handle_phone_call` shape: upgrade already happened, we own the
/// raw `WebSocket` from here on.
pub async fn handle(state: AppState, socket: WebSocket, direction: Direction) {
    if let Err(e) = run(state, socket, direction).await {
        error!(error = %e, "media bridge: session ended with error");
    }
}

#[derive(thiserror::Error, Debug)]
enum BridgeError {
    #[error("telephony socket closed before start message")]
    NoStartMessage,
    #[error(transparent)]
    Axum(#[from] axum::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    VoiceAi(#[from] crate::voice_ai::VoiceAiError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Everything downstream of the handshake needs from persistence, collapsed
/// into one shape regardless of which table it came from.
struct CallContext {
    signed_url: Option<String>,
    available_slots: Option<String>,
    service: Option<String>,
    province: Option<String>,
}

async fn run(state: AppState, mut telephony_socket: WebSocket, direction: Direction) -> Result<(), BridgeError> {
    // Read the connected/start handshake before splitting the socket.
    let mut stream_sid = None;
    let mut call_sid = None;
    let mut custom_params = HashMap::new();

    while let Some(msg) = telephony_socket.next().await {
        let msg = msg?;
        let Ok(text) = msg.to_text() else { continue };
        let Ok(parsed) = serde_json::from_str::<TelephonyMessage>(text) else { continue };
        match parsed {
            TelephonyMessage::Connected => continue,
            TelephonyMessage::Start { start } => {
                stream_sid = Some(start.stream_sid);
                call_sid = Some(start.call_sid);
                custom_params = start.custom_parameters;
                break;
            }
            _ => continue,
        }
    }

    let stream_sid = stream_sid.ok_or(BridgeError::NoStartMessage)?;
    let call_sid = call_sid.ok_or(BridgeError::NoStartMessage)?;

    state.live_calls.insert(
        call_sid.clone(),
        LiveCall {
            call_sid: call_sid.clone(),
            stream_sid: Some(stream_sid.clone()),
        },
    );

    let (context, agent_id) = match direction {
        Direction::Outbound => {
            calls::set_stream_sid(&state.pool, &call_sid, &stream_sid).await?;
            let record = calls::find(&state.pool, &call_sid).await?;
            let context = CallContext {
                signed_url: record.as_ref().and_then(|r| r.signed_url.clone()),
                available_slots: record.as_ref().and_then(|r| r.available_slots.clone()),
                service: record.as_ref().and_then(|r| r.service.clone()),
                province: record.as_ref().and_then(|r| r.province.clone()),
            };
            (context, &state.config.voice_ai_agent_id_outbound)
        }
        Direction::Inbound => {
            crate::db::incoming_calls::set_stream_sid(&state.pool, &call_sid, &stream_sid).await?;
            let record = crate::db::incoming_calls::find(&state.pool, &call_sid).await?;
            let context = CallContext {
                signed_url: record.as_ref().and_then(|r| r.signed_url.clone()),
                available_slots: record.as_ref().and_then(|r| r.available_slots.clone()),
                service: None,
                province: None,
            };
            (context, &state.config.voice_ai_agent_id_inbound)
        }
    };

    let is_abrupt_retry = custom_params
        .get("isAbruptEndingRetry")
        .map(|v| v == "true")
        .unwrap_or(false);

    let signed_url = match context.signed_url.clone() {
        Some(url) => url,
        None => state.voice_ai.signed_url(agent_id).await?,
    };

    let (mut ai_writer, mut ai_reader) = state.voice_ai.open(&signed_url).await?;

    let init_data = match direction {
        Direction::Outbound => build_init_data(&custom_params, &context, is_abrupt_retry),
        Direction::Inbound => build_inbound_init_data(&custom_params, &context),
    };
    ai_writer
        .send(tokio_tungstenite::tungstenite::Message::Text(
            serde_json::to_string(&init_data)?,
        ))
        .await
        .map_err(crate::voice_ai::VoiceAiError::from)?;

    let (mut tel_sink, mut tel_stream) = telephony_socket.split();

    let pool = state.pool.clone();
    let state_for_tel = state.clone();
    let call_sid_for_tel = call_sid.clone();
    let ai_writer = Arc::new(Mutex::new(ai_writer));
    let ai_writer_for_tel = Arc::clone(&ai_writer);

    let telephony_to_ai = tokio::spawn(async move {
        while let Some(msg) = tel_stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(_) => break,
            };
            let Ok(text) = msg.to_text() else { continue };
            let Ok(parsed) = serde_json::from_str::<TelephonyMessage>(text) else { continue };
            match parsed {
                TelephonyMessage::Media { media } => {
                    let chunk = UserAudioChunk::new(media.payload);
                    if let Ok(json) = serde_json::to_string(&chunk) {
                        let _ = ai_writer_for_tel
                            .lock()
                            .await
                            .send(tokio_tungstenite::tungstenite::Message::Text(json.into()))
                            .await;
                    }
                }
                TelephonyMessage::Stop {} => {
                    let _ = ai_writer_for_tel
                        .lock()
                        .await
                        .send(tokio_tungstenite::tungstenite::Message::Close(None))
                        .await;
                    let _ = match direction {
                        Direction::Outbound => calls::set_status(&pool, &call_sid_for_tel, "completed").await,
                        Direction::Inbound => {
                            crate::db::incoming_calls::set_status(&pool, &call_sid_for_tel, "completed").await
                        }
                    };
                    break;
                }
                _ => {}
            }
        }
        state_for_tel.live_calls.remove(&call_sid_for_tel);
    });

    let call_sid_for_ai = call_sid.clone();
    let state_for_ai = state.clone();
    let available_slots_text = context.available_slots.clone();
    let contact_id_for_ai = custom_params.get("contactId").cloned();
    let phone_for_ai = custom_params.get("phone").cloned();
    let service_for_ai = context.service.clone();
    let province_for_ai = context.province.clone();

    let ai_to_telephony = tokio::spawn(async move {
        loop {
            match ai_reader.next().await {
                Some(Ok(raw)) => {
                    if let tokio_tungstenite::tungstenite::Message::Close(frame) = &raw {
                        let close_code = frame.as_ref().map(|f| u16::from(f.code));
                        let reason = frame.as_ref().map(|f| f.reason.to_string()).unwrap_or_default();
                        if !matches!(close_code, Some(1000) | Some(1005) | None) {
                            notify_abnormal_close(
                                &state_for_ai,
                                &call_sid_for_ai,
                                close_code,
                                &reason,
                                AbnormalCloseContext {
                                    contact_id: contact_id_for_ai.as_deref(),
                                    phone: phone_for_ai.as_deref(),
                                    service: service_for_ai.as_deref(),
                                    province: province_for_ai.as_deref(),
                                },
                            )
                            .await;
                        }
                        break;
                    }

                    let Ok(text) = raw.to_text() else { continue };
                    let Ok(parsed) = serde_json::from_str::<AiMessage>(text) else { continue };

                    if let Some(audio) = parsed.as_audio() {
                        let out = MediaMessage {
                            event: "media",
                            stream_sid: &stream_sid,
                            media: MediaOut { payload: &audio.audio_event.audio_base_64 },
                        };
                        if let Ok(json) = serde_json::to_string(&out) {
                            let _ = tel_sink.send(WsMessage::Text(json.into())).await;
                        }
                    } else if parsed.is_interruption() {
                        let out = ClearMessage { event: "clear", stream_sid: &stream_sid };
                        if let Ok(json) = serde_json::to_string(&out) {
                            let _ = tel_sink.send(WsMessage::Text(json.into())).await;
                        }
                    } else if let Some(ping) = parsed.as_ping() {
                        let pong = Pong::new(ping.ping_event.event_id);
                        if let Ok(json) = serde_json::to_string(&pong) {
                            let _ = ai_writer
                                .lock()
                                .await
                                .send(tokio_tungstenite::tungstenite::Message::Text(json.into()))
                                .await;
                        }
                    } else if let Some(meta) = parsed.as_init_metadata() {
                        let conversation_id = &meta.conversation_initiation_metadata_event.conversation_id;
                        let _ = match direction {
                            Direction::Outbound => {
                                calls::set_conversation_id(&state_for_ai.pool, &call_sid_for_ai, conversation_id).await
                            }
                            Direction::Inbound => {
                                crate::db::incoming_calls::set_conversation_id(&state_for_ai.pool, &call_sid_for_ai, conversation_id)
                                    .await
                            }
                        };
                    } else if let Some(call) = parsed.as_function_call() {
                        if call.function_call.tool_name == "book_appointment" {
                            let response = handle_book_appointment(
                                &state_for_ai,
                                &call_sid_for_ai,
                                direction,
                                &call.function_call.tool_call_id,
                                &call.function_call.parameters,
                                available_slots_text.as_deref(),
                            )
                            .await;
                            if let Ok(json) = serde_json::to_string(&response) {
                                let _ = ai_writer
                                    .lock()
                                    .await
                                    .send(tokio_tungstenite::tungstenite::Message::Text(json.into()))
                                    .await;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    notify_abnormal_close(
                        &state_for_ai,
                        &call_sid_for_ai,
                        None,
                        &e.to_string(),
                        AbnormalCloseContext {
                            contact_id: contact_id_for_ai.as_deref(),
                            phone: phone_for_ai.as_deref(),
                            service: service_for_ai.as_deref(),
                            province: province_for_ai.as_deref(),
                        },
                    )
                    .await;
                    break;
                }
                None => break,
            }
        }
    });

    let _ = tokio::join!(telephony_to_ai, ai_to_telephony);
    Ok(())
}

fn build_init_data(
    custom_params: &HashMap<String, String>,
    context: &CallContext,
    is_abrupt_retry: bool,
) -> ConversationInitiationClientData {
    let mut vars = HashMap::new();
    for key in ["firstName", "fullName", "email", "phone", "contactId", "service"] {
        if let Some(v) = custom_params.get(key) {
            vars.insert(key.to_string(), v.clone());
        }
    }

    let service = custom_params
        .get("service")
        .and_then(|s| Service::parse(s))
        .or_else(|| context.service.as_deref().and_then(Service::parse));
    if let Some(service) = service {
        vars.insert("businessName".to_string(), service.business_name().to_string());
    }

    let (date, time) = utc_to_italian(chrono::Utc::now());
    vars.insert("nowDate".to_string(), format!("{date} {time}"));
    vars.insert("availableSlots".to_string(), context.available_slots.clone().unwrap_or_default());
    vars.insert(
        "province".to_string(),
        context.province.clone().unwrap_or_else(|| "unknown".to_string()),
    );

    let mut data = ConversationInitiationClientData::new(vars);

    if is_abrupt_retry {
        if let Some(summary) = custom_params.get("pastCallSummary") {
            data.dynamic_variables.insert("pastCallSummary".to_string(), summary.clone());
        }
        if let Some(id) = custom_params.get("originalConversationId") {
            data.dynamic_variables.insert("originalConversationId".to_string(), id.clone());
        }
        data = data.with_first_message_override(RECONNECT_FIRST_MESSAGE);
    }

    data
}

/// Inbound variable set is deliberately smaller (spec.md §4.12): no lead
/// identity is known ahead of the call, only who's calling and what's open.
fn build_inbound_init_data(custom_params: &HashMap<String, String>, context: &CallContext) -> ConversationInitiationClientData {
    let mut vars = HashMap::new();

    let caller_identifier = custom_params
        .get("callerNumber")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    vars.insert("callerIdentifier".to_string(), caller_identifier);

    let (date, time) = utc_to_italian(chrono::Utc::now());
    vars.insert("nowDate".to_string(), format!("{date} {time}"));
    vars.insert("availableSlots".to_string(), context.available_slots.clone().unwrap_or_default());

    ConversationInitiationClientData::new(vars)
}

/// Recovers the rep id a chosen slot belongs to by re-deriving the layout
/// from the rendered text itself: a trailing `"Sales Rep: X"` line means
/// `SingleRep` (or the last matched section header in `GroupedByRep`); a
/// `"Legend: A=X, B=Y"` line means `Abbreviated`, resolved via the chosen
/// time's trailing letter. Mirrors `slots::resolve_rep_for_chosen_time`,
/// operating on the persisted text directly since the typed `DisplayLayout`
/// itself isn't carried on the `calls` row (spec.md §9 redesign note).
fn rep_id_from_rendered_slots(text: &str, chosen_time_text: &str) -> Option<String> {
    let letter = chosen_time_text
        .trim()
        .strip_suffix(')')
        .and_then(|s| s.rsplit_once('('))
        .and_then(|(_, l)| l.trim().chars().next());

    if let Some(letter) = letter {
        if let Some(legend_line) = text.lines().find(|l| l.starts_with("Legend: ")) {
            return legend_line
                .trim_start_matches("Legend: ")
                .split(", ")
                .find_map(|entry| entry.split_once('=').filter(|(l, _)| l.chars().next() == Some(letter)))
                .map(|(_, rep)| rep.to_string());
        }
    }

    let mut current_rep: Option<&str> = None;
    for line in text.lines() {
        if let Some(rep) = line.strip_prefix("Sales Rep: ") {
            current_rep = Some(rep);
        }
        if line.contains(chosen_time_text.trim()) {
            return current_rep.map(|s| s.to_string());
        }
    }
    current_rep.map(|s| s.to_string())
}

/// Splits a function-call `appointmentDate` argument into the part the
/// Booking Coordinator can parse and the trailing time fragment (with an
/// optional `(X)` legend suffix) used for rep-id resolution (spec.md §4.8
/// step 9: "if arg time is suffixed `(X)`...").
fn split_appointment_arg(raw: &str) -> (String, String) {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.len() >= 3 && tokens.last().map(|t| t.ends_with(')')).unwrap_or(false) {
        let time_fragment = format!("{} {}", tokens[tokens.len() - 2], tokens[tokens.len() - 1]);
        let clean_date = tokens[..tokens.len() - 1].join(" ");
        (clean_date, time_fragment)
    } else {
        let time_fragment = tokens.last().copied().unwrap_or(raw).to_string();
        (raw.to_string(), time_fragment)
    }
}

async fn handle_book_appointment(
    state: &AppState,
    call_sid: &str,
    direction: Direction,
    tool_call_id: &str,
    parameters: &serde_json::Value,
    available_slots_text: Option<&str>,
) -> FunctionCallResponse {
    let appointment_date = match parameters.get("appointmentDate").and_then(|v| v.as_str()) {
        Some(d) => d,
        None => return FunctionCallResponse::failure(tool_call_id, "missing appointmentDate"),
    };
    let contact_id = match parameters.get("contactId").and_then(|v| v.as_str()) {
        Some(c) => c,
        None => return FunctionCallResponse::failure(tool_call_id, "missing contactId"),
    };

    let (clean_date, chosen_time_text) = split_appointment_arg(appointment_date);
    let start_time = match booking::parse_appointment_date(&clean_date) {
        Ok(t) => t,
        Err(_) => return FunctionCallResponse::failure(tool_call_id, "could not parse appointmentDate"),
    };

    let rep_id = available_slots_text.and_then(|text| rep_id_from_rendered_slots(text, &chosen_time_text));

    let address = state.config.default_appointment_address.clone();
    match booking::book(&state.crm, contact_id, start_time, &address, rep_id.as_deref()).await {
        Ok(BookingResult::Booked(_)) => {
            let _ = match direction {
                Direction::Outbound => calls::set_status(&state.pool, call_sid, "booked").await,
                Direction::Inbound => crate::db::incoming_calls::set_status(&state.pool, call_sid, "booked").await,
            };
            FunctionCallResponse::success(tool_call_id, "Appuntamento fissato con successo.")
        }
        Ok(BookingResult::FailedWithAlternatives(alts)) => {
            let text = alts
                .iter()
                .map(|t| t.with_timezone(&chrono_tz::Europe::Rome).format("%d-%m-%Y %H:%M").to_string())
                .collect::<Vec<_>>()
                .join(", ");
            FunctionCallResponse::failure(tool_call_id, format!("Slot non disponibile. Alternative: {text}"))
        }
        Ok(BookingResult::FailedNoAlternatives) => {
            FunctionCallResponse::failure(tool_call_id, "Slot non disponibile e nessuna alternativa trovata.")
        }
        Err(e) => {
            warn!(error = %e, call_sid, "media bridge: booking failed");
            FunctionCallResponse::failure(tool_call_id, "Errore durante la prenotazione.")
        }
    }
}

/// Call fields still available once the ai_to_telephony task owns the rest
/// of `CallContext` — captured by value before the task is spawned.
struct AbnormalCloseContext<'a> {
    contact_id: Option<&'a str>,
    phone: Option<&'a str>,
    service: Option<&'a str>,
    province: Option<&'a str>,
}

/// `close_code` is `None` both for a stream-level error (no close frame was
/// ever received) and for a close frame with no code at all; both are
/// treated as abnormal since neither is the graceful 1000/1005 case.
async fn notify_abnormal_close(
    state: &AppState,
    call_sid: &str,
    close_code: Option<u16>,
    reason: &str,
    ctx: AbnormalCloseContext<'_>,
) {
    let ready_state = if close_code.is_some() { "closed" } else { "errored" };
    warn!(
        call_sid,
        close_code = ?close_code,
        reason,
        ready_state,
        "media bridge: abnormal voice-AI socket close"
    );
    state
        .notifier
        .notify(
            Severity::Normal,
            "media bridge: abnormal voice-AI websocket close",
            Notification {
                contact_id: ctx.contact_id.map(str::to_string),
                phone: ctx.phone.map(str::to_string),
                service: ctx.service.map(str::to_string),
                province: ctx.province.map(str::to_string),
                error: Some(format!("close_code={close_code:?} ready_state={ready_state} reason={reason}")),
                ..Default::default()
            },
        )
        .await;
}
