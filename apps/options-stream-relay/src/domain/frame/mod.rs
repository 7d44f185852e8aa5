//! Inbound Frame Classification
//!
//! Decides which streamer frames are market data worth relaying.
//!
//! A frame qualifies when it has a top-level `data` array whose first entry
//! has a `content` array whose first element is an object without a `cusip`
//! field. Frames carrying `cusip` identify contracts rather than update them;
//! `response` and `notify` frames are protocol chatter. Nothing here returns
//! an error for a missing field: each level is an optional lookup.
//!
//! ```json
//! {"data":[{"service":"OPTION","command":"SUBS","content":[{"key":"NVDA_020521C500","2":1.25}]}]}
//! ```

use serde_json::Value;

/// Exact text of a qualifying frame, handed to the event sink unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent(String);

impl RelayEvent {
    /// Wrap the received frame text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// The frame text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// UTF-8 payload bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Unwrap into the frame text.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Why a frame was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No top-level `data` entry.
    NoData,
    /// `data[0].content[0]` is missing, empty, or not an object.
    NoContent,
    /// `content[0]` carries a `cusip` field.
    Identification,
    /// Acknowledgement of a request (`response`).
    Response,
    /// Heartbeat or notification (`notify`).
    Notify,
}

impl DiscardReason {
    /// Metric label for the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::NoContent => "no_content",
            Self::Identification => "identification",
            Self::Response => "response",
            Self::Notify => "notify",
        }
    }
}

/// Outcome of classifying one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Relay the frame verbatim.
    Forward,
    /// Drop the frame.
    Discard(DiscardReason),
    /// The frame is not valid JSON.
    Malformed(String),
}

/// Classify one raw inbound frame.
#[must_use]
pub fn classify(text: &str) -> Classification {
    match serde_json::from_str::<Value>(text) {
        Ok(frame) => classify_value(&frame),
        Err(e) => Classification::Malformed(e.to_string()),
    }
}

fn classify_value(frame: &Value) -> Classification {
    let Some(data) = frame.get("data") else {
        if frame.get("response").is_some() {
            return Classification::Discard(DiscardReason::Response);
        }
        if frame.get("notify").is_some() {
            return Classification::Discard(DiscardReason::Notify);
        }
        return Classification::Discard(DiscardReason::NoData);
    };

    let first_content = data
        .get(0)
        .and_then(|entry| entry.get("content"))
        .and_then(|content| content.get(0))
        .and_then(Value::as_object);

    match first_content {
        None => Classification::Discard(DiscardReason::NoContent),
        Some(content) if content.contains_key("cusip") => {
            Classification::Discard(DiscardReason::Identification)
        }
        Some(_) => Classification::Forward,
    }
}

/// Summary of one entry of a `response` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSummary {
    /// Service the response belongs to.
    pub service: String,
    /// Command being acknowledged.
    pub command: String,
    /// Result code, `0` on success.
    pub code: Option<i64>,
    /// Human-readable message.
    pub message: Option<String>,
}

impl ResponseSummary {
    /// Whether the streamer reported a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.code.is_some_and(|code| code != 0)
    }
}

/// Extract request acknowledgements from a `response` frame.
#[must_use]
pub fn response_summaries(frame: &Value) -> Vec<ResponseSummary> {
    let text_field = |entry: &Value, key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    frame
        .get("response")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| {
                    let content = entry.get("content");
                    ResponseSummary {
                        service: text_field(entry, "service"),
                        command: text_field(entry, "command"),
                        code: content.and_then(|c| c.get("code")).and_then(Value::as_i64),
                        message: content
                            .and_then(|c| c.get("msg"))
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(r#"{"data":[{"content":[{"otherField":1}]}]}"# ; "plain update")]
    #[test_case(r#"{"data":[{"content":[{"foo":"bar"}]}]}"# ; "foo bar")]
    #[test_case(r#"{"data":[{"content":[{"key":"A"},{"cusip":"X"}]}]}"# ; "cusip beyond first")]
    #[test_case(r#"{"data":[{"content":[{}]}]}"# ; "empty object")]
    fn forwards(frame: &str) {
        assert_eq!(classify(frame), Classification::Forward);
    }

    #[test_case(r#"{"data":[{"content":[{"cusip":"X"}]}]}"#, DiscardReason::Identification ; "cusip")]
    #[test_case("{}", DiscardReason::NoData ; "empty")]
    #[test_case(r#"{"data":[]}"#, DiscardReason::NoContent ; "empty data")]
    #[test_case(r#"{"data":[{}]}"#, DiscardReason::NoContent ; "no content")]
    #[test_case(r#"{"data":[{"content":[]}]}"#, DiscardReason::NoContent ; "empty content")]
    #[test_case(r#"{"data":[{"content":["cusip"]}]}"#, DiscardReason::NoContent ; "string content")]
    #[test_case(r#"{"data":{"content":[{"a":1}]}}"#, DiscardReason::NoContent ; "data not array")]
    #[test_case(r#"{"data":null}"#, DiscardReason::NoContent ; "null data")]
    #[test_case(r#"{"response":[{"service":"ADMIN","command":"LOGIN","content":{"code":0}}]}"#, DiscardReason::Response ; "response")]
    #[test_case(r#"{"notify":[{"heartbeat":"1611865073000"}]}"#, DiscardReason::Notify ; "notify")]
    #[test_case("[1,2,3]", DiscardReason::NoData ; "array frame")]
    fn discards(frame: &str, reason: DiscardReason) {
        assert_eq!(classify(frame), Classification::Discard(reason));
    }

    #[test_case("not json" ; "garbage")]
    #[test_case(r#"{"data":[{"content":[{"a":1}]}"# ; "truncated")]
    #[test_case("" ; "empty")]
    fn malformed(frame: &str) {
        assert!(matches!(classify(frame), Classification::Malformed(_)));
    }

    #[test]
    fn login_response_summary() {
        let frame: Value = serde_json::from_str(
            r#"{"response":[{"service":"ADMIN","requestid":"0","command":"LOGIN",
                "timestamp":1611865073000,"content":{"code":3,"msg":"Login denied"}}]}"#,
        )
        .unwrap();

        let summaries = response_summaries(&frame);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].service, "ADMIN");
        assert_eq!(summaries[0].command, "LOGIN");
        assert_eq!(summaries[0].code, Some(3));
        assert_eq!(summaries[0].message.as_deref(), Some("Login denied"));
        assert!(summaries[0].is_failure());
    }

    #[test]
    fn summaries_of_non_response_frame_are_empty() {
        assert!(response_summaries(&serde_json::json!({"data": []})).is_empty());
    }

    proptest::proptest! {
        #[test]
        fn classify_never_panics(text in ".*") {
            let _ = classify(&text);
        }

        #[test]
        fn cusip_always_discards(key in "[a-z]{1,8}", value in "[A-Z0-9]{1,9}") {
            let frame = serde_json::json!({"data": [{"content": [{"cusip": value, key: 1}]}]});
            proptest::prop_assert_eq!(
                classify(&frame.to_string()),
                Classification::Discard(DiscardReason::Identification)
            );
        }
    }
}
