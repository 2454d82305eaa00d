//! HTTP transport for the external collaborators (inference service, stores).
//!
//! Every blocking call the pipeline makes goes through an agent built here so
//! timeouts are applied in one place.

use std::time::Duration;

/// Build a blocking HTTP agent for `purpose`.
///
/// `None` means no timeout: a stalled peer blocks the pipeline loop until the
/// OS gives up on the connection. That is allowed but reported.
pub fn http_agent(purpose: &str, timeout: Option<Duration>) -> ureq::Agent {
    let builder = ureq::AgentBuilder::new().user_agent(concat!(
        "crowd-sentinel/",
        env!("CARGO_PKG_VERSION")
    ));
    match timeout {
        Some(timeout) => builder.timeout(timeout).build(),
        None => {
            log::warn!(
                "{}: no timeout configured; a stalled call will block the pipeline loop",
                purpose
            );
            builder.build()
        }
    }
}

/// Agent for long-lived streaming responses (MJPEG).
///
/// The timeout bounds connecting and each individual read rather than the
/// whole response, which never completes for a live stream.
pub fn stream_agent(purpose: &str, timeout: Option<Duration>) -> ureq::Agent {
    let builder = ureq::AgentBuilder::new().user_agent(concat!(
        "crowd-sentinel/",
        env!("CARGO_PKG_VERSION")
    ));
    match timeout {
        Some(timeout) => builder.timeout_connect(timeout).timeout_read(timeout).build(),
        None => {
            log::warn!(
                "{}: no timeout configured; a stalled stream will block the pipeline loop",
                purpose
            );
            builder.build()
        }
    }
}

/// Convert a configured seconds value into an optional timeout (0 disables).
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Flatten a ureq error into a message that keeps the HTTP status and body.
pub fn describe_http_error(err: ureq::Error) -> String {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let body = body.trim();
            if body.is_empty() {
                format!("http status {}", code)
            } else {
                format!("http status {}: {}", code, truncate(body, 256))
            }
        }
        ureq::Error::Transport(transport) => format!("transport error: {}", transport),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_seconds_disables_timeout() {
        assert_eq!(timeout_from_secs(0), None);
        assert_eq!(timeout_from_secs(30), Some(Duration::from_secs(30)));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
