//! Reload script injection.
//!
//! HTML pages served by the gateway get a small script appended that connects
//! back over WebSocket and reloads the page when told to.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, IF_RANGE, RANGE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Client script injected into HTML responses.
///
/// Connects to the gateway's WebSocket endpoint on the page's own origin and
/// reloads on `{"type":"reload"}`. After a disconnect it retries up to 5 times
/// at 1 s intervals, reloading as soon as a retry connects.
pub const RELOAD_SCRIPT: &str = r"<script>
(function () {
  var protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
  var url = protocol + '//' + window.location.host + '/__vimd/ws';
  var maxRetries = 5;
  var retryDelay = 1000;
  var retries = 0;

  function connect(isRetry) {
    var ws = new WebSocket(url);
    ws.onopen = function () {
      if (isRetry) {
        window.location.reload();
      }
    };
    ws.onmessage = function (event) {
      var message;
      try {
        message = JSON.parse(event.data);
      } catch (e) {
        return;
      }
      if (message.type === 'reload') {
        window.location.reload();
      }
    };
    ws.onclose = function () {
      if (retries >= maxRetries) {
        console.log('[vimd] Server disconnected. Please refresh manually.');
        return;
      }
      retries += 1;
      setTimeout(function () { connect(true); }, retryDelay);
    };
  }

  connect(false);
})();
</script>
";

const BODY_CLOSE: &str = "</body>";
const HTML_CLOSE: &str = "</html>";

/// Insert [`RELOAD_SCRIPT`] before the first `</body>`, else before the first
/// `</html>`, else at the end. Everything else is left untouched.
pub fn inject_reload_script(html: &str) -> String {
    let at = html
        .find(BODY_CLOSE)
        .or_else(|| html.find(HTML_CLOSE))
        .unwrap_or(html.len());

    let mut out = String::with_capacity(html.len() + RELOAD_SCRIPT.len());
    out.push_str(&html[..at]);
    out.push_str(RELOAD_SCRIPT);
    out.push_str(&html[at..]);
    out
}

/// Byte-level variant of [`inject_reload_script`], so non-UTF-8 pages pass
/// through unchanged apart from the insertion.
fn inject_reload_script_bytes(html: &[u8]) -> Vec<u8> {
    let at = find(html, BODY_CLOSE.as_bytes())
        .or_else(|| find(html, HTML_CLOSE.as_bytes()))
        .unwrap_or(html.len());

    let mut out = Vec::with_capacity(html.len() + RELOAD_SCRIPT.len());
    out.extend_from_slice(&html[..at]);
    out.extend_from_slice(RELOAD_SCRIPT.as_bytes());
    out.extend_from_slice(&html[at..]);
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Middleware injecting the reload script into successful `GET *.html`
/// responses.
///
/// Range headers are dropped from those requests so the page is always
/// served whole; a partial body can't be injected.
pub(crate) async fn inject_reload_middleware(mut request: Request, next: Next) -> Response {
    let injectable =
        request.method() == Method::GET && request.uri().path().ends_with(".html");
    if injectable {
        let headers = request.headers_mut();
        headers.remove(RANGE);
        headers.remove(IF_RANGE);
    }

    let response = next.run(request).await;
    if !injectable || response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer HTML response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let injected = inject_reload_script_bytes(&bytes);
    parts
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(injected.len()));
    parts.headers.remove(ACCEPT_RANGES);

    Response::from_parts(parts, Body::from(injected))
}
