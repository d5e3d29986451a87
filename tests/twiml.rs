use lead_call_orchestrator::twiml::websocket_url;

#[test]
fn websocket_url_maps_https_to_wss() {
    let got = websocket_url("https://orchestrator.example.com", "/outgoing/outbound-media-stream");
    assert_eq!(got, "wss://orchestrator.example.com/outgoing/outbound-media-stream");
}

#[test]
fn websocket_url_maps_plain_http_to_ws() {
    let got = websocket_url("http://localhost:3000", "/incoming/inbound-media-stream");
    assert_eq!(got, "ws://localhost:3000/incoming/inbound-media-stream");
}

#[test]
fn websocket_url_defaults_to_wss_when_the_base_has_no_scheme() {
    let got = websocket_url("orchestrator.example.com", "/outgoing/outbound-media-stream");
    assert_eq!(got, "wss://orchestrator.example.com/outgoing/outbound-media-stream");
}
