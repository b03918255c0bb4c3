//! Record sanitizer: raw record → canonical JSON record, or rejection.
//!
//! Driven by an ordered rule table of `(field, Rule)`. After the table is
//! applied every remaining field is converted to JSON on its own; if any field
//! has no JSON form the whole record is rejected rather than emitted partially,
//! so an incomplete record is never checkpointed as done.

use serde_json::{Map, Number, Value, json};

use crate::client::{PollData, PollOption, RawRecord, RawValue};

/// Fully serializable record, one output line
pub type CanonicalRecord = Map<String, Value>;

/// Field added to every accepted record: seconds since epoch at sanitization time
pub const RETRIEVED_FIELD: &str = "retrieved_utc";

/// Transform applied to one named field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Remove the field (large, redundant or a live handle)
    Drop,
    /// Replace a sub-entity reference with its display name (null if anonymous)
    DisplayName,
    /// Flatten a poll construct into plain option/vote data
    FlattenPoll,
}

/// Rule table for Reddit submissions
pub const SUBMISSION_RULES: &[(&str, Rule)] = &[
    ("_reddit", Rule::Drop),
    ("comments", Rule::Drop),
    ("selftext_html", Rule::Drop),
    ("subreddit", Rule::DisplayName),
    ("author", Rule::DisplayName),
    ("poll_data", Rule::FlattenPoll),
];

/// Result of sanitizing one record
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted(CanonicalRecord),
    Rejected {
        id: String,
        /// Fields that had no JSON form, in field-name order
        dropped_fields: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Sanitizer {
    rules: Vec<(String, Rule)>,
    timestamp_field: String,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(SUBMISSION_RULES.iter().map(|(f, r)| (f.to_string(), *r)))
    }
}

impl Sanitizer {
    pub fn new(rules: impl IntoIterator<Item = (String, Rule)>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
            timestamp_field: RETRIEVED_FIELD.to_string(),
        }
    }

    pub fn with_timestamp_field(mut self, name: impl Into<String>) -> Self {
        self.timestamp_field = name.into();
        self
    }

    pub fn rules(&self) -> &[(String, Rule)] {
        &self.rules
    }

    /// Sanitize with the current wall-clock time as retrieval timestamp
    pub fn sanitize(&self, record: RawRecord) -> Outcome {
        self.sanitize_at(record, chrono::Utc::now().timestamp())
    }

    pub fn sanitize_at(&self, record: RawRecord, retrieved_utc: i64) -> Outcome {
        let RawRecord { id, mut fields } = record;

        for (name, rule) in &self.rules {
            let Some(value) = fields.remove(name) else {
                continue;
            };
            match rule {
                Rule::Drop => {}
                Rule::DisplayName => {
                    fields.insert(name.clone(), display_name(value));
                }
                Rule::FlattenPoll => {
                    fields.insert(name.clone(), flatten_poll(value));
                }
            }
        }

        let mut out = CanonicalRecord::new();
        let mut dropped_fields = Vec::new();
        for (name, value) in fields {
            match to_json(value) {
                Some(v) => {
                    out.insert(name, v);
                }
                None => dropped_fields.push(name),
            }
        }

        if !dropped_fields.is_empty() {
            return Outcome::Rejected { id, dropped_fields };
        }
        out.insert(self.timestamp_field.clone(), Value::from(retrieved_utc));
        Outcome::Accepted(out)
    }
}

fn display_name(value: RawValue) -> RawValue {
    match value {
        RawValue::Entity(e) => e.display_name.map_or(RawValue::Null, RawValue::Str),
        other => other,
    }
}

fn flatten_poll(value: RawValue) -> RawValue {
    match value {
        RawValue::Poll(poll) => RawValue::from(poll_json(&poll)),
        other => other,
    }
}

fn option_json(o: &PollOption) -> Value {
    json!({ "text": o.text, "vote_count": o.vote_count, "id": o.id })
}

fn poll_json(poll: &PollData) -> Value {
    json!({
        "options": poll.options.iter().map(option_json).collect::<Vec<_>>(),
        "total_vote_count": poll.total_vote_count,
        "user_selection": poll.user_selection.as_ref().map(|o| o.text.clone()),
        "voting_end_timestamp": poll.voting_end_timestamp,
    })
}

/// Convert to JSON; `None` if the value (or anything nested in it) has no JSON form.
pub fn to_json(value: RawValue) -> Option<Value> {
    Some(match value {
        RawValue::Null => Value::Null,
        RawValue::Bool(b) => Value::Bool(b),
        RawValue::Int(i) => Value::from(i),
        RawValue::UInt(u) => Value::from(u),
        RawValue::Float(f) => Value::Number(Number::from_f64(f)?),
        RawValue::Str(s) => Value::String(s),
        RawValue::List(items) => Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Option<Vec<_>>>()?,
        ),
        RawValue::Map(m) => Value::Object(
            m.into_iter()
                .map(|(k, v)| to_json(v).map(|v| (k, v)))
                .collect::<Option<Map<_, _>>>()?,
        ),
        RawValue::Entity(_) | RawValue::Poll(_) | RawValue::Opaque(_) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EntityRef;

    const NOW: i64 = 1_700_000_000;

    fn submission() -> RawRecord {
        RawRecord::new("abc123")
            .with("id", "abc123")
            .with("title", "Hello")
            .with("score", 42i64)
            .with("_reddit", RawValue::Opaque("Reddit".into()))
            .with("comments", RawValue::Opaque("CommentForest".into()))
            .with("selftext_html", "<p>hi</p>")
            .with("subreddit", EntityRef::named("rust"))
            .with("author", EntityRef::named("ferris"))
    }

    fn accepted(outcome: Outcome) -> CanonicalRecord {
        match outcome {
            Outcome::Accepted(r) => r,
            Outcome::Rejected { dropped_fields, .. } => {
                panic!("unexpected rejection: {dropped_fields:?}")
            }
        }
    }

    #[test]
    fn drops_handles_and_html() {
        let rec = accepted(Sanitizer::default().sanitize_at(submission(), NOW));
        assert!(!rec.contains_key("_reddit"));
        assert!(!rec.contains_key("comments"));
        assert!(!rec.contains_key("selftext_html"));
        assert_eq!(rec["title"], "Hello");
        assert_eq!(rec["score"], 42);
    }

    #[test]
    fn entities_become_display_names() {
        let rec = accepted(Sanitizer::default().sanitize_at(submission(), NOW));
        assert_eq!(rec["subreddit"], "rust");
        assert_eq!(rec["author"], "ferris");
    }

    #[test]
    fn deleted_author_is_null() {
        let raw = submission().with("author", EntityRef::anonymous());
        let rec = accepted(Sanitizer::default().sanitize_at(raw, NOW));
        assert_eq!(rec["author"], Value::Null);

        let raw = submission().with("author", RawValue::Null);
        let rec = accepted(Sanitizer::default().sanitize_at(raw, NOW));
        assert_eq!(rec["author"], Value::Null);
    }

    #[test]
    fn adds_retrieval_timestamp() {
        let rec = accepted(Sanitizer::default().sanitize_at(submission(), NOW));
        assert_eq!(rec[RETRIEVED_FIELD], NOW);
    }

    #[test]
    fn custom_timestamp_field() {
        let s = Sanitizer::default().with_timestamp_field("fetched_at");
        let rec = accepted(s.sanitize_at(submission(), NOW));
        assert_eq!(rec["fetched_at"], NOW);
        assert!(!rec.contains_key(RETRIEVED_FIELD));
    }

    #[test]
    fn poll_is_flattened() {
        let yes = PollOption {
            id: "1".into(),
            text: "yes".into(),
            vote_count: Some(10),
        };
        let poll = PollData {
            options: vec![
                yes.clone(),
                PollOption {
                    id: "2".into(),
                    text: "no".into(),
                    vote_count: None,
                },
            ],
            total_vote_count: Some(10),
            user_selection: Some(yes),
            voting_end_timestamp: Some(NOW + 60),
        };
        let raw = submission().with("poll_data", poll);
        let rec = accepted(Sanitizer::default().sanitize_at(raw, NOW));
        assert_eq!(
            rec["poll_data"],
            json!({
                "options": [
                    {"text": "yes", "vote_count": 10, "id": "1"},
                    {"text": "no", "vote_count": null, "id": "2"}
                ],
                "total_vote_count": 10,
                "user_selection": "yes",
                "voting_end_timestamp": NOW + 60
            })
        );
    }

    #[test]
    fn empty_poll_fields_are_null() {
        let raw = submission().with("poll_data", PollData::default());
        let rec = accepted(Sanitizer::default().sanitize_at(raw, NOW));
        assert_eq!(rec["poll_data"]["user_selection"], Value::Null);
        assert_eq!(rec["poll_data"]["options"], json!([]));
    }

    #[test]
    fn absent_poll_is_null() {
        let raw = submission().with("poll_data", RawValue::Null);
        let rec = accepted(Sanitizer::default().sanitize_at(raw, NOW));
        assert_eq!(rec["poll_data"], Value::Null);
    }

    #[test]
    fn unserializable_field_rejects_record() {
        let raw = submission()
            .with("media_handle", RawValue::Opaque("Stream".into()))
            .with("ratio", f64::NAN);
        match Sanitizer::default().sanitize_at(raw, NOW) {
            Outcome::Rejected { id, dropped_fields } => {
                assert_eq!(id, "abc123");
                assert_eq!(dropped_fields, vec!["media_handle", "ratio"]);
            }
            Outcome::Accepted(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn nested_handle_rejects_record() {
        let mut inner = std::collections::BTreeMap::new();
        inner.insert("owner".to_string(), RawValue::Entity(EntityRef::named("x")));
        let raw = submission().with("media", RawValue::Map(inner));
        assert!(matches!(
            Sanitizer::default().sanitize_at(raw, NOW),
            Outcome::Rejected { .. }
        ));
    }

    #[test]
    fn entity_outside_rule_table_rejects() {
        let raw = submission().with("moderator", EntityRef::named("mod"));
        let Outcome::Rejected { dropped_fields, .. } = Sanitizer::default().sanitize_at(raw, NOW)
        else {
            panic!("expected rejection");
        };
        assert_eq!(dropped_fields, vec!["moderator"]);
    }

    #[test]
    fn empty_rule_table_keeps_everything_serializable() {
        let raw = RawRecord::new("x").with("selftext_html", "<p/>");
        let rec = accepted(Sanitizer::new(Vec::new()).sanitize_at(raw, NOW));
        assert_eq!(rec["selftext_html"], "<p/>");
    }

    #[test]
    fn to_json_rejects_infinite() {
        assert!(to_json(RawValue::Float(f64::INFINITY)).is_none());
        assert_eq!(to_json(RawValue::Float(0.5)), Some(json!(0.5)));
    }

    #[test]
    fn large_unsigned_survives_exactly() {
        let raw = RawRecord::new("a").with("big", RawValue::from(json!(u64::MAX)));
        let rec = accepted(Sanitizer::default().sanitize_at(raw, NOW));
        assert_eq!(rec["big"].as_u64(), Some(u64::MAX));
        assert_eq!(serde_json::to_string(&rec["big"]).unwrap(), "18446744073709551615");
    }
}
