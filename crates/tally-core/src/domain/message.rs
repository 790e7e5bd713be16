//! VoteMessage - inbound payload と Message Decoder
//!
//! Wire format: `{"job_id": "<string>", "choice": "<string>"}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::DecodeError;
use super::ids::{Choice, JobId};

/// A decoded vote-cast event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteMessage {
    pub job_id: JobId,
    pub choice: Choice,
}

/// Wire shape before validation. Both fields are required strings and
/// nothing else is accepted.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawVote {
    job_id: String,
    choice: String,
}

impl VoteMessage {
    pub fn new(job_id: JobId, choice: Choice) -> Self {
        Self { job_id, choice }
    }

    /// Decode a delivery body. Pure: no side effects on failure or success.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        // struct の derive は JSON 配列も受理するので、先に object として読む
        let fields: Map<String, Value> = serde_json::from_slice(body)?;
        let raw: RawVote = serde_json::from_value(Value::Object(fields))?;
        Ok(Self {
            job_id: JobId::parse(raw.job_id)?,
            choice: Choice::parse(raw.choice)?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn decodes_flat_object() {
        let vote = VoteMessage::decode(br#"{"job_id":"j1","choice":"yes"}"#).unwrap();
        assert_eq!(vote.job_id.as_str(), "j1");
        assert_eq!(vote.choice.as_str(), "yes");
    }

    #[test]
    fn field_order_does_not_matter() {
        let vote = VoteMessage::decode(br#"{ "choice": "cats", "job_id": "abc" }"#).unwrap();
        assert_eq!(vote, VoteMessage::new(JobId::new("abc"), Choice::new("cats")));
    }

    #[rstest]
    #[case::not_json(b"not-json-bytes".as_slice())]
    #[case::empty_body(b"".as_slice())]
    #[case::missing_choice(br#"{"job_id":"j1"}"#.as_slice())]
    #[case::missing_job_id(br#"{"choice":"yes"}"#.as_slice())]
    #[case::numeric_job_id(br#"{"job_id":42,"choice":"yes"}"#.as_slice())]
    #[case::null_choice(br#"{"job_id":"j1","choice":null}"#.as_slice())]
    #[case::nested_choice(br#"{"job_id":"j1","choice":{"label":"yes"}}"#.as_slice())]
    #[case::array_payload(br#"["j1","yes"]"#.as_slice())]
    #[case::string_payload(br#""j1""#.as_slice())]
    #[case::extra_field(br#"{"job_id":"j1","choice":"yes","weight":2}"#.as_slice())]
    fn malformed_payloads_fail_to_decode(#[case] body: &[u8]) {
        let err = VoteMessage::decode(body).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)), "got {err:?}");
    }

    #[rstest]
    #[case::blank_job_id(br#"{"job_id":"  ","choice":"yes"}"#.as_slice(), "job_id")]
    #[case::empty_choice(br#"{"job_id":"j1","choice":""}"#.as_slice(), "choice")]
    fn blank_fields_fail_to_decode(#[case] body: &[u8], #[case] expected: &str) {
        match VoteMessage::decode(body).unwrap_err() {
            DecodeError::EmptyField { field } => assert_eq!(field, expected),
            other => panic!("expected EmptyField, got {other:?}"),
        }
    }

    #[test]
    fn encode_produces_the_wire_shape() {
        let vote = VoteMessage::new(JobId::new("j2"), Choice::new("no"));
        let body = vote.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, serde_json::json!({"job_id": "j2", "choice": "no"}));
    }
}
