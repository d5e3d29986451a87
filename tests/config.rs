use lead_call_orchestrator::config::{Config, ConfigError};
use std::sync::Mutex;

// `Config::from_env` reads process-wide environment state, so every test in
// this file has to run single-threaded against it.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const REQUIRED_VARS: &[(&str, &str)] = &[
    ("DATABASE_PATH", "sqlite::memory:"),
    ("TELEPHONY_ACCOUNT_SID", "ACxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"),
    ("TELEPHONY_AUTH_TOKEN", "token"),
    ("TELEPHONY_NUMBER_INFISSI", "+390000000001"),
    ("TELEPHONY_NUMBER_GLAZING", "+390000000002"),
    ("CRM_CLIENT_ID", "client-id"),
    ("CRM_CLIENT_SECRET", "client-secret"),
    ("CRM_REDIRECT_URI", "https://orchestrator.example.com/hl/callback"),
    ("CRM_LOCATION_ID", "location-id"),
    ("CRM_CALENDAR_ID", "calendar-id"),
    ("NOTIFIER_WEBHOOK_URL", "https://chat.example.com/hooks/abc"),
    ("VOICE_AI_API_KEY", "voice-ai-key"),
    ("VOICE_AI_AGENT_ID_INBOUND", "agent-inbound"),
    ("VOICE_AI_AGENT_ID_OUTBOUND", "agent-outbound"),
    ("PROVINCE_SHEET_ID", "sheet-id"),
    ("PROVINCE_SHEET_API_KEY", "sheet-key"),
    ("PUBLIC_BASE_URL", "https://orchestrator.example.com"),
];

const OPTIONAL_VARS: &[&str] = &[
    "VOICE_AI_WEBHOOK_SECRET",
    "PROVINCE_SHEET_RANGE",
    "OUTGOING_ROUTE_PREFIX",
    "INCOMING_ROUTE_PREFIX",
    "LLM_API_KEY",
    "ENABLE_POST_CALL_ANALYSIS",
    "MAX_ACTIVE_CALLS",
    "QUEUE_TICK_INTERVAL_SECS",
    "DEFAULT_APPOINTMENT_ADDRESS",
];

fn clear_all() {
    for (name, _) in REQUIRED_VARS {
        std::env::remove_var(name);
    }
    for name in OPTIONAL_VARS {
        std::env::remove_var(name);
    }
}

fn set_all_required() {
    for (name, value) in REQUIRED_VARS {
        std::env::set_var(name, value);
    }
}

#[test]
fn from_env_errs_with_every_missing_variable_at_once() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();

    let err = Config::from_env().expect_err("from_env is erroring when nothing is set");
    match err {
        ConfigError::Missing(missing) => {
            assert!(missing.contains(&"DATABASE_PATH"));
            assert!(missing.contains(&"CRM_CLIENT_ID"));
            assert!(missing.contains(&"PROVINCE_SHEET_ID"));
            assert!(missing.contains(&"PUBLIC_BASE_URL"));
        }
    }

    clear_all();
}

#[test]
fn from_env_succeeds_with_defaults_when_only_required_vars_are_set() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    set_all_required();

    let config = Config::from_env().expect("from_env is succeeding with every required var set");

    assert_eq!(config.province_sheet_range, "Sheet1!A:B");
    assert_eq!(config.outgoing_route_prefix, "/outgoing");
    assert_eq!(config.incoming_route_prefix, "/incoming");
    assert_eq!(config.default_appointment_address, "Sede operativa");
    assert_eq!(config.max_active_calls, 3);
    assert_eq!(config.queue_tick_interval_secs, 10);
    assert!(config.llm_api_key.is_none());
    assert!(!config.enable_post_call_analysis);

    clear_all();
}

#[test]
fn enable_post_call_analysis_defaults_on_when_an_llm_key_is_present() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    set_all_required();
    std::env::set_var("LLM_API_KEY", "llm-key");

    let config = Config::from_env().expect("from_env is succeeding");
    assert!(config.enable_post_call_analysis);

    clear_all();
}

#[test]
fn queue_tick_interval_is_floored_at_five_seconds() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_all();
    set_all_required();
    std::env::set_var("QUEUE_TICK_INTERVAL_SECS", "1");

    let config = Config::from_env().expect("from_env is succeeding");
    assert_eq!(config.queue_tick_interval_secs, 5);

    clear_all();
}
