//! CRM HTTP client (spec.md §4.2 CRMToken, §4.4 Slot Service, §4.5, §4.9,
//! §4.11). Specified only at the "obtain valid bearer" / "give me free
//! slots" / "book this" level — this module owns the OAuth refresh dance
//! and the several response shapes the free-slots endpoint may return.

use crate::db::crm_tokens;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;

const API_BASE: &str = "https://services.leadconnectorhq.com";
const TOKEN_URL: &str = "https://services.leadconnectorhq.com/oauth/token";
const AUTHORIZE_URL: &str = "https://marketplace.gohighlevel.com/oauth/chooselocation";

#[derive(thiserror::Error, Debug)]
pub enum CrmError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("no CRM token on record for location {0}")]
    NoToken(String),
    #[error("CRM returned {0}")]
    Status(reqwest::StatusCode),
    #[error("unrecognized free-slots response shape")]
    UnrecognizedSlotsShape,
}

/// Tagged outcome of a free-slots query (§9 design note: replaces
/// "null means error / null means no data" with an explicit third state).
pub enum SlotsOutcome {
    Slots(Vec<RawSlot>),
    Empty,
    ApiError(String),
}

#[derive(Clone, Debug)]
pub struct RawSlot {
    pub datetime_utc: DateTime<Utc>,
    pub rep_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactDetails {
    pub id: String,
    pub first_name: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address1: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: HashMap<String, Value>,
}

#[derive(Clone)]
pub struct CrmClient {
    http: reqwest::Client,
    pool: SqlitePool,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    location_id: String,
    calendar_id: String,
}

impl CrmClient {
    pub fn new(
        pool: SqlitePool,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        location_id: impl Into<String>,
        calendar_id: impl Into<String>,
    ) -> Self {
        CrmClient {
            http: reqwest::Client::new(),
            pool,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            location_id: location_id.into(),
            calendar_id: calendar_id.into(),
        }
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    /// Builds the authorization-code request URL for the OAuth dance
    /// (spec.md §6 `/gohighlevel/auth`).
    pub fn authorize_url(&self) -> String {
        let mut url = reqwest::Url::parse(AUTHORIZE_URL).expect("valid url literal");
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri);
        url.to_string()
    }

    /// Exchanges an OAuth `code` for tokens and stores them keyed by
    /// location (spec.md §6 `/hl/callback`).
    pub async fn exchange_code(&self, code: &str) -> Result<(), CrmError> {
        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("client_id", &self.client_id);
        params.insert("client_secret", &self.client_secret);
        params.insert("code", code);
        params.insert("redirect_uri", &self.redirect_uri);
        self.store_token_response(params).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<(), CrmError> {
        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("client_id", &self.client_id);
        params.insert("client_secret", &self.client_secret);
        params.insert("refresh_token", refresh_token);
        self.store_token_response(params).await
    }

    async fn store_token_response(&self, params: HashMap<&str, &str>) -> Result<(), CrmError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            refresh_token: String,
            expires_in: i64,
        }

        let resp = self.http.post(TOKEN_URL).form(&params).send().await?;
        if !resp.status().is_success() {
            return Err(CrmError::Status(resp.status()));
        }
        let parsed: TokenResponse = resp.json().await?;
        let expires_at = Utc::now() + chrono::Duration::seconds(parsed.expires_in);
        crm_tokens::upsert(
            &self.pool,
            &self.location_id,
            &parsed.access_token,
            &parsed.refresh_token,
            expires_at,
        )
        .await?;
        Ok(())
    }

    /// Obtains a valid bearer token for the configured location, refreshing
    /// if expired. Everything beyond "give me a valid bearer" is opaque to
    /// the rest of the system (spec.md §3 CRMToken).
    pub async fn bearer(&self) -> Result<String, CrmError> {
        let token = crm_tokens::find(&self.pool, &self.location_id)
            .await?
            .ok_or_else(|| CrmError::NoToken(self.location_id.clone()))?;

        if token.expires_at > Utc::now() + chrono::Duration::seconds(30) {
            return Ok(token.access_token);
        }

        self.refresh(&token.refresh_token).await?;
        let refreshed = crm_tokens::find(&self.pool, &self.location_id)
            .await?
            .ok_or_else(|| CrmError::NoToken(self.location_id.clone()))?;
        Ok(refreshed.access_token)
    }

    fn auth_headers(&self, bearer: &str) -> [(&'static str, String); 2] {
        [
            ("Authorization", format!("Bearer {bearer}")),
            ("Version", "2021-07-28".to_string()),
        ]
    }

    /// Queries free slots for the given rep set inside `[window_start,
    /// window_end)` (spec.md §4.4). Normalizes the several shapes the CRM
    /// may answer with.
    pub async fn free_slots(
        &self,
        rep_ids: &[String],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<SlotsOutcome, CrmError> {
        let bearer = match self.bearer().await {
            Ok(b) => b,
            Err(e) => return Ok(SlotsOutcome::ApiError(e.to_string())),
        };

        let mut req = self
            .http
            .get(format!(
                "{API_BASE}/calendars/{}/free-slots",
                self.calendar_id
            ))
            .query(&[
                ("startDate", window_start.timestamp_millis().to_string()),
                ("endDate", window_end.timestamp_millis().to_string()),
            ]);
        for (k, v) in self.auth_headers(&bearer) {
            req = req.header(k, v);
        }
        if !rep_ids.is_empty() {
            req = req.query(&[("userId", rep_ids.join(","))]);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return Ok(SlotsOutcome::ApiError(e.to_string())),
        };
        if !resp.status().is_success() {
            return Ok(SlotsOutcome::ApiError(format!("status {}", resp.status())));
        }

        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => return Ok(SlotsOutcome::ApiError(e.to_string())),
        };

        match parse_free_slots_shape(&body) {
            Ok(slots) if slots.is_empty() => Ok(SlotsOutcome::Empty),
            Ok(slots) => Ok(SlotsOutcome::Slots(slots)),
            Err(_) => Ok(SlotsOutcome::ApiError("unrecognized free-slots shape".to_string())),
        }
    }

    /// Books an appointment (spec.md §4.9). `location_type` is always
    /// `"Address"`; `address` falls back to the configured default when the
    /// client's own address is unknown (§9 open question, preserved).
    pub async fn book_appointment(
        &self,
        contact_id: &str,
        start_time_utc: DateTime<Utc>,
        address: &str,
        user_id: Option<&str>,
    ) -> Result<Value, CrmError> {
        let bearer = self.bearer().await?;
        let mut body = serde_json::json!({
            "calendarId": self.calendar_id,
            "locationId": self.location_id,
            "contactId": contact_id,
            "startTime": start_time_utc.to_rfc3339(),
            "locationType": "Address",
            "address": address,
        });
        if let Some(user_id) = user_id {
            body["assignedUserId"] = Value::String(user_id.to_string());
        }

        let mut req = self
            .http
            .post(format!("{API_BASE}/calendars/events/appointments"))
            .json(&body);
        for (k, v) in self.auth_headers(&bearer) {
            req = req.header(k, v);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(CrmError::Status(resp.status()));
        }
        Ok(resp.json().await?)
    }

    pub async fn get_contact(&self, contact_id: &str) -> Result<ContactDetails, CrmError> {
        let bearer = self.bearer().await?;
        let mut req = self.http.get(format!("{API_BASE}/contacts/{contact_id}"));
        for (k, v) in self.auth_headers(&bearer) {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(CrmError::Status(resp.status()));
        }
        Ok(resp.json().await?)
    }

    pub async fn update_contact_address(&self, contact_id: &str, address: &str) -> Result<(), CrmError> {
        let bearer = self.bearer().await?;
        let mut req = self
            .http
            .put(format!("{API_BASE}/contacts/{contact_id}"))
            .json(&serde_json::json!({ "address1": address }));
        for (k, v) in self.auth_headers(&bearer) {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(CrmError::Status(resp.status()));
        }
        Ok(())
    }

    pub async fn add_note(&self, contact_id: &str, body: &str) -> Result<(), CrmError> {
        let bearer = self.bearer().await?;
        let mut req = self
            .http
            .post(format!("{API_BASE}/contacts/{contact_id}/notes"))
            .json(&serde_json::json!({ "body": body }));
        for (k, v) in self.auth_headers(&bearer) {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(CrmError::Status(resp.status()));
        }
        Ok(())
    }

    /// Best-effort workflow enrollment (e.g. "no-sales-rep", "call-scheduled").
    pub async fn add_to_workflow(&self, contact_id: &str, workflow_id: &str) -> Result<(), CrmError> {
        let bearer = self.bearer().await?;
        let mut req = self
            .http
            .post(format!("{API_BASE}/contacts/{contact_id}/workflow/{workflow_id}"))
            .json(&serde_json::json!({ "eventStartTime": Utc::now().to_rfc3339() }));
        for (k, v) in self.auth_headers(&bearer) {
            req = req.header(k, v);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(CrmError::Status(resp.status()));
        }
        Ok(())
    }
}

fn parse_free_slots_shape(body: &Value) -> Result<Vec<RawSlot>, ()> {
    if let Some(free) = body.get("freeSlots").and_then(Value::as_array) {
        return Ok(parse_iso_array(free));
    }
    if let Some(slots) = body.get("slots").and_then(Value::as_array) {
        return Ok(parse_iso_array(slots));
    }
    if let Some(array) = body.as_array() {
        return Ok(parse_iso_array(array));
    }
    if let Some(map) = body.as_object() {
        let mut out = Vec::new();
        for (key, value) in map {
            if key == "traceId" {
                continue;
            }
            if let Some(slots) = value.get("slots").and_then(Value::as_array) {
                out.extend(parse_iso_array(slots));
            }
        }
        return Ok(out);
    }
    Err(())
}

fn parse_iso_array(values: &[Value]) -> Vec<RawSlot> {
    values
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| RawSlot {
            datetime_utc: dt.with_timezone(&Utc),
            rep_id: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_free_slots_top_level_map_shape() {
        let body = json!({
            "2025-03-17": { "slots": ["2025-03-17T14:00:00Z", "2025-03-17T16:00:00Z"] }
        });
        let slots = parse_free_slots_shape(&body).unwrap();
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn parses_bare_array_shape() {
        let body = json!(["2025-03-17T14:00:00Z"]);
        let slots = parse_free_slots_shape(&body).unwrap();
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn parses_free_slots_wrapper_shape() {
        let body = json!({ "freeSlots": ["2025-03-17T14:00:00Z"] });
        let slots = parse_free_slots_shape(&body).unwrap();
        assert_eq!(slots.len(), 1);
    }
}
