use lead_call_orchestrator::llm::{HttpLlmClient, LlmClient};
use serde_json::json;
use wiremock::matchers::{method, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn generate_content_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [
            { "content": { "parts": [ { "text": text } ] } }
        ]
    })
}

#[tokio::test]
async fn suggest_province_code_returns_the_model_text_trimmed_of_nothing_else() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/gemini-1\.5-flash:generateContent$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_content_body("RM")))
        .mount(&mock_server)
        .await;

    let client = HttpLlmClient::with_base_url("test-key", mock_server.uri());
    let got = client.suggest_province_code("Via Roma 1, Roma").await;
    assert_eq!(got, Some("RM".to_string()));
}

#[tokio::test]
async fn suggest_province_code_returns_none_when_the_upstream_call_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/gemini-1\.5-flash:generateContent$"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = HttpLlmClient::with_base_url("test-key", mock_server.uri());
    let got = client.suggest_province_code("Via Roma 1, Roma").await;
    assert_eq!(got, None);
}

#[tokio::test]
async fn missed_action_analysis_parses_the_strict_json_schema_out_of_the_model_text() {
    let mock_server = MockServer::start().await;

    let analysis_json = json!({
        "needs_appointment": true,
        "appointment_details": { "date": "2026-08-01", "time": "10:00", "notes": null },
        "needs_follow_up": false,
        "follow_up_details": null,
        "needs_contact_update": false,
        "contact_update_details": {},
        "overall_assessment": "Prospect asked for a morning slot next week."
    })
    .to_string();

    Mock::given(method("POST"))
        .and(path_regex(r"^/gemini-1\.5-flash:generateContent$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_content_body(&analysis_json)))
        .mount(&mock_server)
        .await;

    let client = HttpLlmClient::with_base_url("test-key", mock_server.uri());
    let analysis = client
        .missed_action_analysis("transcript text", &[], "contact context")
        .await
        .expect("missed_action_analysis is parsing the mocked response");

    assert!(analysis.needs_appointment);
    assert_eq!(analysis.appointment_details.date.as_deref(), Some("2026-08-01"));
    assert!(!analysis.needs_follow_up);
}

#[tokio::test]
async fn missed_action_analysis_errs_when_the_model_text_is_not_valid_json() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/gemini-1\.5-flash:generateContent$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(generate_content_body("not json")))
        .mount(&mock_server)
        .await;

    let client = HttpLlmClient::with_base_url("test-key", mock_server.uri());
    let result = client.missed_action_analysis("transcript", &[], "ctx").await;
    assert!(result.is_err());
}
