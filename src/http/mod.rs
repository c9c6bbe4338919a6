//! HTTP client (C1, spec §4.1).
//!
//! Single entry point to the backend: attaches credentials, normalizes
//! errors out of heterogeneous envelopes, and applies the timeout policy
//! from §4.1 (10s light reads, 10min synchronous bulk endpoints, no
//! upper bound on polling requests -- that budget is owned by the caller).

mod client;

pub use client::{AsupersyncHttpClient, HttpClient, RecordedRequest, RequestKind, StaticHttpClient};

use crate::error::{Error, ErrorEnvelope};
use serde_json::Value;

/// Extracts a human-readable message from a heterogeneous error envelope,
/// in the precedence order spec.md §4.1 requires:
/// `data.error` (string) -> joined `data.errors[]` -> `data.error.message` ->
/// `data.message` -> fallback. Never returns `"[object Object]"`.
pub fn normalize_error_body(status: u16, body: &Value) -> ErrorEnvelope {
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            body.get("errors").and_then(Value::as_array).map(|errs| {
                errs.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
        })
        .filter(|s| !s.is_empty())
        .or_else(|| {
            body.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or_else(|| {
            body.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("request failed with status {status}"));

    let code = body
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .or_else(|| body.get("code").and_then(Value::as_str))
        .map(str::to_string);

    let details = body
        .get("error")
        .and_then(|e| e.get("details"))
        .or_else(|| body.get("details"))
        .cloned();

    ErrorEnvelope {
        status,
        code,
        message,
        details,
    }
}

/// Convenience: build an [`Error`] straight from a raw status + JSON body.
pub fn classify_response(status: u16, body: &Value) -> Error {
    Error::from_envelope(normalize_error_body(status, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_string_error_field() {
        let env = normalize_error_body(400, &json!({"error": "bad request"}));
        assert_eq!(env.message, "bad request");
    }

    #[test]
    fn joins_errors_array_when_error_field_absent() {
        let env = normalize_error_body(422, &json!({"errors": ["a", "b"]}));
        assert_eq!(env.message, "a, b");
    }

    #[test]
    fn falls_back_to_nested_error_message() {
        let env = normalize_error_body(400, &json!({"error": {"message": "nested", "code": "X"}}));
        assert_eq!(env.message, "nested");
        assert_eq!(env.code.as_deref(), Some("X"));
    }

    #[test]
    fn falls_back_to_top_level_message() {
        let env = normalize_error_body(500, &json!({"message": "oops"}));
        assert_eq!(env.message, "oops");
    }

    #[test]
    fn never_returns_object_to_string_literal() {
        let env = normalize_error_body(500, &json!({}));
        assert_ne!(env.message, "[object Object]");
        assert!(env.message.contains("500"));
    }

    #[test]
    fn classifies_known_codes() {
        let err = classify_response(
            409,
            &json!({"error": {"code": "CONCURRENT_LIMIT", "message": "already running"}}),
        );
        assert!(matches!(err, Error::Conflict(_)));

        let err = classify_response(
            422,
            &json!({"error": {"code": "PRESERVE_INTEGRITY_ERROR", "message": "mismatch"}}),
        );
        assert!(matches!(err, Error::Integrity(_)));

        let err = classify_response(401, &json!({"error": "nope"}));
        assert!(matches!(err, Error::Auth));

        let err = classify_response(524, &json!({}));
        assert!(err.is_transient());
    }
}
