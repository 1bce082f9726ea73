use std::collections::HashMap;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Reads a trace id out of a case-insensitive header map, minting a fresh one
/// when the caller didn't send one (or sent a blank value). The mint-or-forward
/// behavior is what lets unrelated requests and a chain of proxied calls share
/// one identifier without any central coordination.
pub fn trace_id_from_header(existing: Option<&str>) -> String {
    match existing.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// Same lookup against a plain string map, for callers that aren't holding an
/// `axum::http::HeaderMap` (tests, the demo client).
pub fn trace_id_from_map(headers: &HashMap<String, String>) -> String {
    let existing = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(TRACE_ID_HEADER))
        .map(|(_, v)| v.as_str());
    trace_id_from_header(existing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_when_missing() {
        let id = trace_id_from_header(None);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn mints_when_blank() {
        let id = trace_id_from_header(Some("   "));
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn forwards_existing_id() {
        let id = trace_id_from_header(Some("abc-123"));
        assert_eq!(id, "abc-123");
    }

    #[test]
    fn map_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("X-Trace-Id".to_string(), "abc-123".to_string());
        assert_eq!(trace_id_from_map(&headers), "abc-123");
    }
}
