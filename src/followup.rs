//! Follow-Up Scheduler (spec.md §4.11): an hourly sweep that resubmits due
//! `follow_ups` rows through the Intake Endpoint, as though the original
//! lead had been submitted again.

use crate::db::calls;
use crate::db::follow_ups::{self, FollowUp};
use crate::domain::Service;
use crate::notifier::{Notification, Severity};
use crate::province;
use crate::AppState;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{error, info, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Sentinel substrings of a 4xx intake response that mean "this will never
/// succeed, stop retrying" rather than "try again later" (spec.md §4.11
/// step 5) — lifted verbatim from `intake::IntakeOutcome`'s own rejection
/// messages so a resubmission that hits one of these is recognized as
/// permanent rather than spun through `record_failure` until it goes stale.
const PERMANENT_FAILURE_MARKERS: [&str; 3] = [
    "no sales representative available for this service/province",
    "Service is required and must be one of Infissi, Vetrate, Pergole",
    "full_address is required",
];

pub async fn run(state: AppState) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = sweep_once(&state).await {
            error!(error = %e, "follow-up scheduler: sweep failed");
        }
    }
}

pub(crate) async fn sweep_once(state: &AppState) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now();

    for entry in follow_ups::stuck(&state.pool, now).await? {
        warn!(contact_id = %entry.contact_id, follow_up_id = entry.id, "follow-up scheduler: dropping stuck entry");
        state
            .notifier
            .notify(
                Severity::Normal,
                "follow-up scheduler: dropped a stuck follow-up",
                Notification {
                    contact_id: Some(entry.contact_id.clone()),
                    service: entry.service.clone(),
                    province: entry.province.clone(),
                    ..Default::default()
                },
            )
            .await;
        follow_ups::delete(&state.pool, entry.id).await?;
    }

    for entry in follow_ups::due(&state.pool, now).await? {
        process_entry(state, entry, now).await?;
    }

    Ok(())
}

async fn process_entry(state: &AppState, entry: FollowUp, now: chrono::DateTime<chrono::Utc>) -> Result<(), sqlx::Error> {
    let contact = match state.crm.get_contact(&entry.contact_id).await {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, contact_id = %entry.contact_id, "follow-up scheduler: failed to load contact, will retry");
            follow_ups::record_failure(&state.pool, entry.id, now).await?;
            return Ok(());
        }
    };

    let service = entry
        .service
        .as_deref()
        .and_then(Service::parse)
        .or_else(|| {
            contact
                .custom_fields
                .get("service")
                .and_then(|v| v.as_str())
                .and_then(Service::parse)
        })
        .or_else(|| contact.tags.iter().find_map(|t| Service::from_tag(t)));

    let province = match &entry.province {
        Some(p) => Some(p.clone()),
        None => match calls::most_recent_province_for_contact(&state.pool, &entry.contact_id).await? {
            Some(p) => Some(p),
            None => match &contact.address1 {
                Some(addr) => {
                    province::extract_province(addr, &state.province_cache, state.zip_sheet.as_ref(), Some(state.llm.as_ref())).await
                }
                None => None,
            },
        },
    };

    let body = serde_json::json!({
        "phone": contact.phone,
        "contactId": contact.id,
        "first_name": contact.first_name,
        "full_name": contact.full_name,
        "email": contact.email,
        "Service": service.map(|s| s.as_str()),
        "full_address": contact.address1,
        "customData": { "isFollowUp": true, "province": province },
    });

    let url = format!("{}{}/outbound-call", state.config.public_base_url, state.config.outgoing_route_prefix);
    let resp = state.internal_http.post(&url).json(&body).send().await;

    match resp {
        Ok(r) if r.status().is_success() => {
            follow_ups::delete(&state.pool, entry.id).await?;
            info!(contact_id = %entry.contact_id, "follow-up scheduler: resubmitted successfully");
        }
        Ok(r) if r.status() == StatusCode::BAD_REQUEST => {
            let text = r.text().await.unwrap_or_default();
            if PERMANENT_FAILURE_MARKERS.iter().any(|m| text.contains(m)) {
                warn!(contact_id = %entry.contact_id, "follow-up scheduler: permanent failure, dropping");
                state
                    .notifier
                    .notify(
                        Severity::Normal,
                        "follow-up scheduler: resubmission permanently rejected",
                        Notification {
                            contact_id: Some(entry.contact_id.clone()),
                            error: Some(text),
                            ..Default::default()
                        },
                    )
                    .await;
                follow_ups::delete(&state.pool, entry.id).await?;
            } else {
                follow_ups::record_failure(&state.pool, entry.id, now).await?;
            }
        }
        Ok(r) => {
            warn!(status = %r.status(), contact_id = %entry.contact_id, "follow-up scheduler: resubmission failed, will retry");
            follow_ups::record_failure(&state.pool, entry.id, now).await?;
        }
        Err(e) => {
            warn!(error = %e, contact_id = %entry.contact_id, "follow-up scheduler: resubmission request failed, will retry");
            follow_ups::record_failure(&state.pool, entry.id, now).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::PERMANENT_FAILURE_MARKERS;

    #[test]
    fn recognizes_permanent_failure_markers() {
        assert!(PERMANENT_FAILURE_MARKERS.iter().any(|m| "No sales representatives available for this area".contains(m)));
        assert!(!PERMANENT_FAILURE_MARKERS.iter().any(|m| "temporarily unavailable".contains(m)));
    }
}
