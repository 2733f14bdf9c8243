//! Batch-RPC wire codec.
//!
//! Requests are form bodies of the shape
//! `f.req=<url-encoded envelope>&at=<url-encoded csrf>&`, where the envelope
//! is `[[[method_id, "<params as JSON>", null, "generic"], ...]]`.
//!
//! Responses start with the anti-hijacking prefix `)]}'` and then carry one
//! JSON chunk per line, optionally preceded by a bare byte-count line.
//! Every chunk is an array of entries; the entries we care about are
//! `["wrb.fr", method_id, "<payload as JSON>", ...]` and
//! `["er", method_id, code, ...]`.

use std::collections::BTreeMap;

use br_domain::error::{from_protocol_code, Error, Result, RpcContext};
use br_domain::trace::TraceEvent;
use serde_json::{json, Value};

/// Leading bytes the server adds so the body cannot be evaluated as script.
pub const ANTI_HIJACK_PREFIX: &str = ")]}'";

/// Tag of a successful result entry.
pub const SUCCESS_TAG: &str = "wrb.fr";

/// Tag of an error entry.
pub const ERROR_TAG: &str = "er";

/// Fixed protocol tag closing every request entry.
pub const ENVELOPE_TAG: &str = "generic";

/// A response is rejected once more than one chunk in this many is
/// unparseable (a 10% threshold, checked in integers).
pub const MAX_SKIPPED_ONE_IN: usize = 10;

/// Index of the status array in a success entry with a null payload.
const STATUS_INDEX: usize = 5;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One logical remote call: a method id plus its schema-less parameter tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method_id: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method_id: impl Into<String>, params: Value) -> Self {
        Self {
            method_id: method_id.into(),
            params,
        }
    }

    fn envelope_entry(&self) -> Value {
        json!([self.method_id, self.params.to_string(), Value::Null, ENVELOPE_TAG])
    }
}

/// Encode a single call into a form body.
pub fn encode(method_id: &str, params: &Value, csrf_token: Option<&str>) -> String {
    let entry = json!([method_id, params.to_string(), Value::Null, ENVELOPE_TAG]);
    form_body(&json!([[entry]]), csrf_token)
}

/// Encode several calls into one envelope, multiplexed over one exchange.
pub fn encode_batch(requests: &[RpcRequest], csrf_token: Option<&str>) -> String {
    let entries: Vec<Value> = requests.iter().map(RpcRequest::envelope_entry).collect();
    form_body(&json!([entries]), csrf_token)
}

fn form_body(envelope: &Value, csrf_token: Option<&str>) -> String {
    let mut body = format!("f.req={}", urlencoding::encode(&envelope.to_string()));
    if let Some(token) = csrf_token {
        body.push_str("&at=");
        body.push_str(&urlencoding::encode(token));
    }
    body.push('&');
    body
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A recognized entry found while flattening the response chunks.
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedItem {
    Success { method_id: String, payload: Value },
    Error { method_id: String, code: Option<i64> },
}

impl TaggedItem {
    pub fn method_id(&self) -> &str {
        match self {
            TaggedItem::Success { method_id, .. } | TaggedItem::Error { method_id, .. } => {
                method_id
            }
        }
    }

    fn from_entry(tag: &str, entry: &[Value]) -> Option<Self> {
        let method_id = entry.get(1)?.as_str()?.to_owned();
        match tag {
            SUCCESS_TAG => {
                let payload = entry.get(2).cloned().unwrap_or(Value::Null);
                // A null payload with a status array is an error in disguise.
                if payload.is_null() {
                    if let Some(code) = entry.get(STATUS_INDEX).and_then(status_code) {
                        return Some(TaggedItem::Error {
                            method_id,
                            code: Some(code),
                        });
                    }
                }
                Some(TaggedItem::Success { method_id, payload })
            }
            ERROR_TAG => Some(TaggedItem::Error {
                method_id,
                code: entry.get(2).and_then(status_code),
            }),
            _ => None,
        }
    }
}

/// Accepts `5`, `[5]` and `"5"`.
fn status_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Array(items) => items.first().and_then(status_code),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// All tagged entries of one response, plus every method id seen.
#[derive(Debug, Clone, Default)]
pub struct DecodedBody {
    pub items: Vec<TaggedItem>,
    pub found_ids: Vec<String>,
    pub total_chunks: usize,
    pub skipped_chunks: usize,
}

impl DecodedBody {
    pub fn find(&self, method_id: &str) -> Option<&TaggedItem> {
        self.items.iter().find(|item| item.method_id() == method_id)
    }
}

/// Split a raw body into chunks and collect its tagged entries.
///
/// Malformed chunks are skipped; if more than one in [`MAX_SKIPPED_ONE_IN`] of them
/// are malformed the whole response is rejected.
pub fn parse_body(raw: &str) -> Result<DecodedBody> {
    let body = strip_prefix(raw);

    if body.trim_start().starts_with('<') {
        return Err(Error::Decoding {
            ctx: RpcContext::new(
                "received an HTML page instead of RPC data; the session has likely expired, \
                 re-authenticate",
            )
            .raw(raw),
        });
    }

    let mut chunks = Vec::new();
    let mut total = 0usize;
    let mut skipped = 0usize;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || is_length_header(line) {
            continue;
        }
        total += 1;
        match serde_json::from_str::<Value>(line) {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => {
                skipped += 1;
                tracing::debug!(error = %e, "skipping malformed response chunk");
            }
        }
    }

    if skipped > 0 {
        if skipped * MAX_SKIPPED_ONE_IN > total {
            return Err(Error::Decoding {
                ctx: RpcContext::new(format!(
                    "{skipped} of {total} response chunks could not be parsed"
                ))
                .raw(raw),
            });
        }
        tracing::warn!(skipped, total, "ignored malformed response chunks");
        TraceEvent::ChunksSkipped { skipped, total }.emit();
    }

    let mut items = Vec::new();
    for chunk in &chunks {
        collect_items(chunk, &mut items);
    }

    let mut found_ids: Vec<String> = Vec::new();
    for item in &items {
        if !found_ids.iter().any(|id| id == item.method_id()) {
            found_ids.push(item.method_id().to_owned());
        }
    }

    Ok(DecodedBody {
        items,
        found_ids,
        total_chunks: total,
        skipped_chunks: skipped,
    })
}

/// Decode the result for `method_id` out of a raw response body.
///
/// With `allow_null`, a response that carries no entry for `method_id`
/// yields `Value::Null` instead of an error.
pub fn decode(raw: &str, method_id: &str, allow_null: bool) -> Result<Value> {
    let body = parse_body(raw)?;
    resolve(&body, raw, method_id, allow_null)
}

/// Decode the results of a batch, keyed by method id.
///
/// Corruption above the threshold fails the whole batch; everything else is
/// reported per method id.
pub fn decode_all(raw: &str, method_ids: &[&str]) -> Result<BTreeMap<String, Result<Value>>> {
    let body = parse_body(raw)?;
    Ok(method_ids
        .iter()
        .map(|id| ((*id).to_owned(), resolve(&body, raw, id, false)))
        .collect())
}

fn resolve(body: &DecodedBody, raw: &str, method_id: &str, allow_null: bool) -> Result<Value> {
    let ctx = || {
        RpcContext::default()
            .method(method_id)
            .raw(raw)
            .found(body.found_ids.clone())
    };

    match body.find(method_id) {
        Some(TaggedItem::Error { code: Some(code), .. }) => Err(from_protocol_code(*code, ctx())),
        Some(TaggedItem::Error { code: None, .. }) => Err(Error::Rpc {
            ctx: RpcContext {
                message: "server returned an error entry without a code".into(),
                ..ctx()
            },
            retryable: false,
        }),
        Some(TaggedItem::Success { payload, .. }) => {
            let value = unwrap_payload(payload);
            if value.is_null() && !allow_null {
                return Err(Error::Decoding {
                    ctx: RpcContext {
                        message: "server returned a null result".into(),
                        ..ctx()
                    },
                });
            }
            Ok(value)
        }
        None if allow_null => Ok(Value::Null),
        None if !body.found_ids.is_empty() => Err(Error::UnknownMethod {
            ctx: RpcContext {
                message: "response carries other method ids; the method id mapping has \
                          probably changed"
                    .into(),
                ..ctx()
            },
        }),
        None => Err(Error::Decoding {
            ctx: RpcContext {
                message: "no result found in response".into(),
                ..ctx()
            },
        }),
    }
}

/// Script-sourced payloads arrive JSON-encoded inside a JSON string.
fn unwrap_payload(payload: &Value) -> Value {
    match payload {
        Value::String(inner) => {
            serde_json::from_str(inner).unwrap_or_else(|_| Value::String(inner.clone()))
        }
        other => other.clone(),
    }
}

fn strip_prefix(raw: &str) -> &str {
    match raw.strip_prefix(ANTI_HIJACK_PREFIX) {
        Some(rest) => rest
            .strip_prefix("\r\n")
            .or_else(|| rest.strip_prefix('\n'))
            .unwrap_or(rest),
        None => raw,
    }
}

fn is_length_header(line: &str) -> bool {
    line.bytes().all(|b| b.is_ascii_digit())
}

fn collect_items(value: &Value, out: &mut Vec<TaggedItem>) {
    let Value::Array(entries) = value else {
        return;
    };
    match entries.first() {
        Some(Value::String(tag)) => {
            if let Some(item) = TaggedItem::from_entry(tag, entries) {
                out.push(item);
            }
        }
        _ => {
            for child in entries {
                collect_items(child, out);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use br_domain::error::ErrorKind;

    /// Build a response body with byte-count headers before every chunk.
    fn chunked(chunks: &[String]) -> String {
        let mut out = format!("{ANTI_HIJACK_PREFIX}\n");
        for chunk in chunks {
            out.push_str(&format!("{}\n{}\n", chunk.len(), chunk));
        }
        out
    }

    fn success(method_id: &str, payload: Value) -> Value {
        json!([SUCCESS_TAG, method_id, payload.to_string(), null, null, null, "generic"])
    }

    #[test]
    fn encode_scenario_matches_envelope() {
        let body = encode("abc123", &json!(["x", 1]), None);
        assert!(body.starts_with("f.req="));
        assert!(body.ends_with('&'));

        let encoded = body
            .trim_start_matches("f.req=")
            .trim_end_matches('&');
        let decoded = urlencoding::decode(encoded).unwrap();
        let envelope: Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(
            envelope[0][0],
            json!(["abc123", "[\"x\",1]", null, "generic"])
        );
        assert_eq!(envelope.as_array().unwrap().len(), 1);
    }

    #[test]
    fn encode_appends_csrf_token() {
        let body = encode("abc", &json!([]), Some("tok/en=1"));
        assert!(body.ends_with("&at=tok%2Fen%3D1&"));
    }

    #[test]
    fn encode_batch_puts_all_calls_in_one_envelope() {
        let body = encode_batch(
            &[
                RpcRequest::new("a1", json!([1])),
                RpcRequest::new("b2", json!(null)),
            ],
            None,
        );
        let encoded = body.trim_start_matches("f.req=").trim_end_matches('&');
        let envelope: Value =
            serde_json::from_str(&urlencoding::decode(encoded).unwrap()).unwrap();
        assert_eq!(envelope[0][0][0], "a1");
        assert_eq!(envelope[0][1][0], "b2");
        assert_eq!(envelope[0][1][1], "null");
    }

    #[test]
    fn picks_matching_id_among_interleaved_entries() {
        let raw = chunked(&[
            json!([success("other", json!([1])), ["er", "zzz", 5]]).to_string(),
            json!([["di", 42], success("abc", json!(["hit", 7]))]).to_string(),
            json!([success("third", json!("ignored"))]).to_string(),
        ]);
        let value = decode(&raw, "abc", false).unwrap();
        assert_eq!(value, json!(["hit", 7]));
    }

    #[test]
    fn error_entry_for_requested_id_is_classified() {
        let raw = chunked(&[json!([["er", "abc", 5], success("other", json!(1))]).to_string()]);
        let err = decode(&raw, "abc", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Rpc);
        assert_eq!(err.code(), Some("5"));
        assert_eq!(err.method_id(), Some("abc"));
        assert_eq!(err.found_ids(), ["abc".to_string(), "other".to_string()]);
        assert!(err.raw_response().unwrap().starts_with(ANTI_HIJACK_PREFIX));
    }

    #[test]
    fn null_payload_with_status_array_is_an_error() {
        let raw = chunked(&[
            json!([[SUCCESS_TAG, "abc", null, null, null, [16], "generic"]]).to_string(),
        ]);
        let err = decode(&raw, "abc", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.is_auth_candidate());
    }

    #[test]
    fn double_encoded_payload_is_unwrapped_once() {
        let raw = chunked(&[json!([success("abc", json!([["nested", 1]]))]).to_string()]);
        assert_eq!(decode(&raw, "abc", false).unwrap(), json!([["nested", 1]]));
    }

    #[test]
    fn structured_payload_is_returned_as_is() {
        let raw = chunked(&[json!([[SUCCESS_TAG, "abc", [1, 2, 3]]]).to_string()]);
        assert_eq!(decode(&raw, "abc", false).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn non_json_string_payload_falls_back_to_raw_string() {
        let raw = chunked(&[json!([[SUCCESS_TAG, "abc", "plain text {"]]).to_string()]);
        assert_eq!(decode(&raw, "abc", false).unwrap(), json!("plain text {"));
    }

    #[test]
    fn other_ids_only_is_a_mismatch() {
        let chunk = json!([success("def", json!(1)), success("ghi", json!(2))]);
        let raw = chunked(&[chunk.to_string()]);
        let err = decode(&raw, "abc", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownMethod);
        assert_eq!(err.found_ids(), ["def".to_string(), "ghi".to_string()]);
    }

    #[test]
    fn no_tags_at_all_is_not_found() {
        let raw = chunked(&[json!([["di", 42], ["af.httprm", 41, "x", 1]]).to_string()]);
        let err = decode(&raw, "abc", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decoding);
        assert!(err.found_ids().is_empty());
        assert!(err.to_string().contains("no result found"));
    }

    #[test]
    fn allow_null_returns_null_when_missing() {
        let raw = chunked(&[json!([success("def", json!(1))]).to_string()]);
        assert_eq!(decode(&raw, "abc", true).unwrap(), Value::Null);

        let null_payload = chunked(&[json!([[SUCCESS_TAG, "abc", null]]).to_string()]);
        assert_eq!(decode(&null_payload, "abc", true).unwrap(), Value::Null);
        assert!(decode(&null_payload, "abc", false).is_err());
    }

    #[test]
    fn double_encoded_null_is_still_a_null_result() {
        let raw = chunked(&[json!([[SUCCESS_TAG, "abc", "null"]]).to_string()]);
        let err = decode(&raw, "abc", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decoding);
        assert!(err.to_string().contains("null result"));
        assert_eq!(decode(&raw, "abc", true).unwrap(), Value::Null);
    }

    #[test]
    fn accepts_bodies_without_length_headers() {
        let raw = format!(
            "{ANTI_HIJACK_PREFIX}\n{}\n{}\n",
            json!([["di", 1]]),
            json!([success("abc", json!({"k": "v"}))])
        );
        assert_eq!(decode(&raw, "abc", false).unwrap(), json!({"k": "v"}));

        let no_prefix = json!([success("abc", json!(true))]).to_string();
        assert_eq!(decode(&no_prefix, "abc", false).unwrap(), json!(true));
    }

    fn body_with_garbage(garbage: usize) -> String {
        let mut chunks: Vec<String> = (0..19 - garbage)
            .map(|i| json!([["di", i]]).to_string())
            .collect();
        chunks.push(json!([success("abc", json!(["ok"]))]).to_string());
        for _ in 0..garbage {
            chunks.push("{this is not json".to_string());
        }
        assert_eq!(chunks.len(), 20);
        chunked(&chunks)
    }

    #[test]
    fn tolerates_one_malformed_chunk_in_twenty() {
        let raw = body_with_garbage(1);
        let body = parse_body(&raw).unwrap();
        assert_eq!(body.total_chunks, 20);
        assert_eq!(body.skipped_chunks, 1);
        assert_eq!(decode(&raw, "abc", false).unwrap(), json!(["ok"]));
    }

    #[test]
    fn tolerates_exactly_ten_percent_malformed() {
        let raw = body_with_garbage(2);
        let body = parse_body(&raw).unwrap();
        assert_eq!(body.skipped_chunks, 2);
        assert_eq!(decode(&raw, "abc", false).unwrap(), json!(["ok"]));
    }

    #[test]
    fn rejects_three_malformed_chunks_in_twenty() {
        let err = decode(&body_with_garbage(3), "abc", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decoding);
        assert!(err.to_string().contains("3 of 20"));
    }

    #[test]
    fn html_body_is_an_auth_candidate() {
        let err = decode("<!doctype html><html>Sign in</html>", "abc", false).unwrap_err();
        assert!(err.is_decoding());
        assert!(err.is_auth_candidate());
    }

    #[test]
    fn decode_all_reports_per_method() {
        let raw = chunked(&[
            json!([success("a1", json!([1])), ["er", "b2", 7]]).to_string(),
        ]);
        let results = decode_all(&raw, &["a1", "b2", "c3"]).unwrap();
        assert_eq!(results["a1"].as_ref().unwrap(), &json!([1]));
        assert_eq!(results["b2"].as_ref().unwrap_err().code(), Some("7"));
        assert_eq!(
            results["c3"].as_ref().unwrap_err().kind(),
            ErrorKind::UnknownMethod
        );
    }
}
