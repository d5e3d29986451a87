use std::env::VarError;

/// Process-wide configuration, parsed once from the environment at startup
/// and injected everywhere else — mirrors the `AgentWebSocket::from_env` /
/// `TwilioClient::from_env` composition style, just collected into a single
/// struct instead of one per client.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_path: String,

    // Telephony provider
    pub telephony_account_sid: String,
    pub telephony_auth_token: String,
    pub telephony_number_infissi: String,
    pub telephony_number_glazing: String,

    // CRM
    pub crm_client_id: String,
    pub crm_client_secret: String,
    pub crm_redirect_uri: String,
    pub crm_location_id: String,
    pub crm_calendar_id: String,

    // Operator notifier
    pub notifier_webhook_url: String,

    // Voice-AI provider
    pub voice_ai_api_key: String,
    pub voice_ai_agent_id_inbound: String,
    pub voice_ai_agent_id_outbound: String,
    pub voice_ai_webhook_secret: Option<String>,

    // Routing
    pub public_base_url: String,
    pub outgoing_route_prefix: String,
    pub incoming_route_prefix: String,

    // ZIP->province sheet
    pub province_sheet_id: String,
    pub province_sheet_range: String,
    pub province_sheet_api_key: String,

    // Optional
    pub llm_api_key: Option<String>,
    pub enable_post_call_analysis: bool,
    pub max_active_calls: u32,
    pub queue_tick_interval_secs: u64,
    pub default_appointment_address: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variables: {0:?}")]
    Missing(Vec<&'static str>),
}

fn required(name: &'static str, missing: &mut Vec<&'static str>) -> String {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v,
        _ => {
            missing.push(name);
            String::new()
        }
    }
}

fn optional(name: &'static str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

impl Config {
    /// Parses `Config` from the environment. Fails loudly, collecting every
    /// missing required variable in one error rather than one-at-a-time, so
    /// a misconfigured deployment gets the full picture on the first try.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut missing = Vec::new();

        let database_path = required("DATABASE_PATH", &mut missing);

        let telephony_account_sid = required("TELEPHONY_ACCOUNT_SID", &mut missing);
        let telephony_auth_token = required("TELEPHONY_AUTH_TOKEN", &mut missing);
        let telephony_number_infissi = required("TELEPHONY_NUMBER_INFISSI", &mut missing);
        let telephony_number_glazing = required("TELEPHONY_NUMBER_GLAZING", &mut missing);

        let crm_client_id = required("CRM_CLIENT_ID", &mut missing);
        let crm_client_secret = required("CRM_CLIENT_SECRET", &mut missing);
        let crm_redirect_uri = required("CRM_REDIRECT_URI", &mut missing);
        let crm_location_id = required("CRM_LOCATION_ID", &mut missing);
        let crm_calendar_id = required("CRM_CALENDAR_ID", &mut missing);

        let notifier_webhook_url = required("NOTIFIER_WEBHOOK_URL", &mut missing);

        let voice_ai_api_key = required("VOICE_AI_API_KEY", &mut missing);
        let voice_ai_agent_id_inbound = required("VOICE_AI_AGENT_ID_INBOUND", &mut missing);
        let voice_ai_agent_id_outbound = required("VOICE_AI_AGENT_ID_OUTBOUND", &mut missing);
        let voice_ai_webhook_secret = optional("VOICE_AI_WEBHOOK_SECRET");

        let province_sheet_id = required("PROVINCE_SHEET_ID", &mut missing);
        let province_sheet_range =
            optional("PROVINCE_SHEET_RANGE").unwrap_or_else(|| "Sheet1!A:B".to_string());
        let province_sheet_api_key = required("PROVINCE_SHEET_API_KEY", &mut missing);

        let public_base_url = required("PUBLIC_BASE_URL", &mut missing);
        let outgoing_route_prefix =
            optional("OUTGOING_ROUTE_PREFIX").unwrap_or_else(|| "/outgoing".to_string());
        let incoming_route_prefix =
            optional("INCOMING_ROUTE_PREFIX").unwrap_or_else(|| "/incoming".to_string());

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let llm_api_key = optional("LLM_API_KEY");

        let enable_post_call_analysis = match optional("ENABLE_POST_CALL_ANALYSIS") {
            Some(v) => v.eq_ignore_ascii_case("true") || v == "1",
            None => llm_api_key.is_some(),
        };

        let max_active_calls = optional("MAX_ACTIVE_CALLS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let queue_tick_interval_secs = optional("QUEUE_TICK_INTERVAL_SECS")
            .and_then(|v| v.parse().ok())
            .map(|v: u64| v.max(5))
            .unwrap_or(10);

        let default_appointment_address = optional("DEFAULT_APPOINTMENT_ADDRESS")
            .unwrap_or_else(|| "Sede operativa".to_string());

        Ok(Config {
            database_path,
            telephony_account_sid,
            telephony_auth_token,
            telephony_number_infissi,
            telephony_number_glazing,
            crm_client_id,
            crm_client_secret,
            crm_redirect_uri,
            crm_location_id,
            crm_calendar_id,
            province_sheet_id,
            province_sheet_range,
            province_sheet_api_key,
            notifier_webhook_url,
            voice_ai_api_key,
            voice_ai_agent_id_inbound,
            voice_ai_agent_id_outbound,
            voice_ai_webhook_secret,
            public_base_url,
            outgoing_route_prefix,
            incoming_route_prefix,
            llm_api_key,
            enable_post_call_analysis,
            max_active_calls,
            queue_tick_interval_secs,
            default_appointment_address,
        })
    }
}

impl From<VarError> for ConfigError {
    fn from(_: VarError) -> Self {
        ConfigError::Missing(vec![])
    }
}
