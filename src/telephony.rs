//! Telephony provider HTTP client (spec.md §4.6, §6). Call-resource shapes
//! are grounded on the project's own `rusty_twilio` call endpoint — the
//! builder-style `CreateCallBody`, `CallStatus`, `AnsweredBy` enums are kept,
//! narrowed to the fields this system actually reads/writes.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(thiserror::Error, Debug)]
pub enum TelephonyError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("telephony API returned {0}")]
    Status(StatusCode),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Queued,
    Ringing,
    InProgress,
    Canceled,
    Completed,
    Failed,
    Busy,
    NoAnswer,
}

impl CallStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(CallStatus::Queued),
            "ringing" => Some(CallStatus::Ringing),
            "in-progress" => Some(CallStatus::InProgress),
            "canceled" => Some(CallStatus::Canceled),
            "completed" => Some(CallStatus::Completed),
            "failed" => Some(CallStatus::Failed),
            "busy" => Some(CallStatus::Busy),
            "no-answer" => Some(CallStatus::NoAnswer),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CallStatus::Queued | CallStatus::Ringing | CallStatus::InProgress)
    }
}

/// Answering-machine-detection tokens (spec.md §4.7). Kept as raw strings
/// rather than an enum because the provider emits several machine-* variants
/// the classifier only needs to test as a set membership.
pub const MACHINE_TOKENS: &[&str] = &[
    "machine_start",
    "fax",
    "machine_beep",
    "machine_end_silence",
    "machine_end_other",
    "machine_end_beep",
];

pub fn is_machine_token(answered_by: &str) -> bool {
    MACHINE_TOKENS.contains(&answered_by)
}

#[derive(Clone, Debug, Deserialize)]
pub struct CallResponse {
    pub sid: String,
    pub status: Option<String>,
    pub to: String,
    pub from: String,
}

#[derive(Clone, Debug, Deserialize)]
struct CallListResponse {
    calls: Vec<CallResponse>,
}

#[derive(Clone, Debug, Default)]
pub struct CreateCallBody {
    params: HashMap<String, String>,
}

impl CreateCallBody {
    pub fn new(to: impl Into<String>, from: impl Into<String>, twiml_url: impl Into<String>) -> Self {
        let mut params = HashMap::new();
        params.insert("To".to_string(), to.into());
        params.insert("From".to_string(), from.into());
        params.insert("Url".to_string(), twiml_url.into());
        CreateCallBody { params }
    }

    pub fn with_status_callback(mut self, url: impl Into<String>) -> Self {
        self.params.insert("StatusCallback".to_string(), url.into());
        self.params.insert(
            "StatusCallbackEvent".to_string(),
            "initiated ringing answered completed".to_string(),
        );
        self
    }

    pub fn with_machine_detection(mut self) -> Self {
        self.params
            .insert("MachineDetection".to_string(), "DetectMessageEnd".to_string());
        self
    }
}

#[derive(Clone)]
pub struct TelephonyClient {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
}

impl TelephonyClient {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        TelephonyClient {
            http: reqwest::Client::new(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
        }
    }

    fn calls_url(&self) -> String {
        format!("{API_BASE}/Accounts/{}/Calls.json", self.account_sid)
    }

    pub async fn create_call(&self, body: CreateCallBody) -> Result<CallResponse, TelephonyError> {
        let resp = self
            .http
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&body.params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(TelephonyError::Status(resp.status()));
        }
        Ok(resp.json().await?)
    }

    pub async fn hangup(&self, call_sid: &str) -> Result<(), TelephonyError> {
        let url = format!("{}/{call_sid}.json", self.calls_url());
        let mut params = HashMap::new();
        params.insert("Status", "completed");

        let resp = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(TelephonyError::Status(resp.status()));
        }
        Ok(())
    }

    /// Counts calls currently in `queued`/`ringing`/`in-progress` — used by
    /// the Queue Worker's admission control (spec.md §4.6 step 1).
    pub async fn active_call_count(&self) -> Result<u32, TelephonyError> {
        let mut total = 0u32;
        for status in ["queued", "ringing", "in-progress"] {
            let url = self.calls_url();
            let resp = self
                .http
                .get(url)
                .basic_auth(&self.account_sid, Some(&self.auth_token))
                .query(&[("Status", status)])
                .send()
                .await?;

            if !resp.status().is_success() {
                return Err(TelephonyError::Status(resp.status()));
            }
            let parsed: CallListResponse = resp.json().await?;
            total += parsed.calls.len() as u32;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_machine_tokens() {
        assert!(is_machine_token("machine_start"));
        assert!(is_machine_token("fax"));
        assert!(!is_machine_token("human"));
    }

    #[test]
    fn call_status_parses_kebab_case() {
        assert_eq!(CallStatus::parse("no-answer"), Some(CallStatus::NoAnswer));
        assert_eq!(CallStatus::parse("bogus"), None);
    }
}
