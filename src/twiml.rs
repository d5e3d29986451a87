//! Telephony-scripting XML responses (spec.md §4.6, §4.12). Hand-rolled
//! with plain string building rather than a TwiML builder crate.

use axum::http::header;
use axum::response::{IntoResponse, Response};

/// Escapes the five XML special characters. Every value we interpolate here
/// originates from a lead/caller field, so none of it can be trusted as-is.
fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Builds a `<Connect><Stream>` response bridging the call to `ws_url`, with
/// `params` carried over as `<Parameter>` children — read back out of
/// `start.customParameters` on the media bridge side (`bridge.rs`).
pub fn connect_stream(ws_url: &str, params: &[(&str, &str)]) -> Response {
    let mut body = String::new();
    body.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    body.push_str("<Response><Connect><Stream url=\"");
    body.push_str(&escape(ws_url));
    body.push_str("\">\n");
    for (name, value) in params {
        if value.is_empty() {
            continue;
        }
        body.push_str("<Parameter name=\"");
        body.push_str(&escape(name));
        body.push_str("\" value=\"");
        body.push_str(&escape(value));
        body.push_str("\"/>\n");
    }
    body.push_str("</Stream></Connect></Response>");

    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

/// Derives a `wss://`/`ws://` media-stream URL from the process's public
/// HTTP(S) base URL plus a route path.
pub fn websocket_url(public_base_url: &str, path: &str) -> String {
    let ws_base = if let Some(rest) = public_base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = public_base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{public_base_url}")
    };
    format!("{ws_base}{path}")
}

/// A bare rejection, used when a call must not be bridged at all.
pub fn reject() -> Response {
    let body = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response><Reject/></Response>";
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_ampersand_and_quotes_in_parameter_values() {
        assert_eq!(escape(r#"Tom & Jerry's "shop""#), "Tom &amp; Jerry&apos;s &quot;shop&quot;");
    }
}
