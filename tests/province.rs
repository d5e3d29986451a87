use lead_call_orchestrator::province::{GoogleSheetZipProvinceSource, ZipProvinceSource};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn fetch_maps_numeric_zip_rows_and_uppercases_the_province() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sheet-id/values/Sheet1!A:B"))
        .and(query_param("key", "sheet-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                ["zip", "province"],
                ["00100", "rm"],
                ["20100", "MI"],
            ]
        })))
        .mount(&mock_server)
        .await;

    let source = GoogleSheetZipProvinceSource::with_base_url(
        "sheet-id",
        "Sheet1!A:B",
        "sheet-key",
        mock_server.uri(),
    );

    let map = source.fetch().await.expect("fetch is succeeding against the mock server");
    assert_eq!(map.get("00100").map(String::as_str), Some("RM"));
    assert_eq!(map.get("20100").map(String::as_str), Some("MI"));
    assert_eq!(map.len(), 2);
}

#[tokio::test]
async fn fetch_skips_rows_whose_first_column_is_not_purely_numeric() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sheet-id/values/Sheet1!A:B"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "values": [
                ["zip", "province"],
                ["not-a-zip", "RM"],
                ["00100", "rm"],
            ]
        })))
        .mount(&mock_server)
        .await;

    let source = GoogleSheetZipProvinceSource::with_base_url(
        "sheet-id",
        "Sheet1!A:B",
        "sheet-key",
        mock_server.uri(),
    );

    let map = source.fetch().await.expect("fetch is succeeding against the mock server");
    assert_eq!(map.len(), 1);
    assert_eq!(map.get("00100").map(String::as_str), Some("RM"));
}

#[tokio::test]
async fn fetch_surfaces_non_success_statuses_as_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sheet-id/values/Sheet1!A:B"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let source = GoogleSheetZipProvinceSource::with_base_url(
        "sheet-id",
        "Sheet1!A:B",
        "sheet-key",
        mock_server.uri(),
    );

    let err = source.fetch().await.expect_err("fetch is erroring on a 403 response");
    assert!(err.contains("403"), "error message should mention the status code: {err}");
}
