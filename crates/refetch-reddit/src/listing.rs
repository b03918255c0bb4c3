//! `/api/info` listing JSON → raw records

use refetch_core::client::{EntityRef, PollData, PollOption, RawRecord, RawValue};
use refetch_core::error::FetchError;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Type prefix of submission fullnames (`t3_abc123`)
pub const SUBMISSION_PREFIX: &str = "t3_";

/// Author name Reddit reports for removed accounts
const DELETED: &str = "[deleted]";

#[derive(Debug, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing>,
}

/// One child of a listing: `{ "kind": "t3", "data": { ... } }`
#[derive(Debug, Deserialize)]
pub struct Thing {
    pub kind: String,
    pub data: Map<String, Value>,
}

impl Listing {
    pub fn parse(body: &str) -> Result<Self, FetchError> {
        serde_json::from_str(body).map_err(|e| FetchError::Api {
            status: None,
            message: format!("invalid listing JSON: {e}"),
        })
    }

    /// Map every child, one result per child
    pub fn into_records(self) -> Vec<Result<RawRecord, FetchError>> {
        self.data.children.into_iter().map(submission).collect()
    }
}

/// `abc123` → `t3_abc123`
pub fn fullname(id: &str) -> String {
    format!("{SUBMISSION_PREFIX}{id}")
}

/// Map one listing child to a raw submission record.
pub fn submission(thing: Thing) -> Result<RawRecord, FetchError> {
    let Thing { kind, mut data } = thing;
    let id = record_id(&data).ok_or_else(|| FetchError::Record {
        id: String::new(),
        message: format!("{kind} child without id"),
    })?;
    if kind != "t3" {
        return Err(FetchError::Record {
            id,
            message: format!("unexpected kind {kind}"),
        });
    }

    let mut record = RawRecord::new(id.as_str());
    if let Some(v) = data.remove("subreddit") {
        record.fields.insert("subreddit".into(), entity(v));
    }
    if let Some(v) = data.remove("author") {
        record.fields.insert("author".into(), entity(v));
    }
    if let Some(v) = data.remove("poll_data") {
        record.fields.insert("poll_data".into(), poll(v));
    }
    for (name, value) in data {
        record.fields.insert(name, RawValue::from(value));
    }
    Ok(record)
}

fn record_id(data: &Map<String, Value>) -> Option<String> {
    if let Some(id) = data.get("id").and_then(Value::as_str) {
        return Some(id.to_string());
    }
    data.get("name")
        .and_then(Value::as_str)
        .map(|n| n.strip_prefix(SUBMISSION_PREFIX).unwrap_or(n).to_string())
}

fn entity(value: Value) -> RawValue {
    match value {
        Value::String(name) if name == DELETED || name.is_empty() => {
            RawValue::Entity(EntityRef::anonymous())
        }
        Value::String(name) => RawValue::Entity(EntityRef::named(name)),
        Value::Null => RawValue::Entity(EntityRef::anonymous()),
        other => RawValue::from(other),
    }
}

fn poll(value: Value) -> RawValue {
    let Value::Object(p) = value else {
        return RawValue::from(value);
    };
    let options: Vec<PollOption> = p
        .get("options")
        .and_then(Value::as_array)
        .map(|opts| opts.iter().filter_map(poll_option).collect())
        .unwrap_or_default();
    // The listing gives the selected option's id; resolve it to the option
    let user_selection = p
        .get("user_selection")
        .and_then(Value::as_str)
        .and_then(|sel| options.iter().find(|o| o.id == sel).cloned());
    RawValue::from(PollData {
        total_vote_count: p.get("total_vote_count").and_then(Value::as_i64),
        voting_end_timestamp: p.get("voting_end_timestamp").and_then(Value::as_i64),
        user_selection,
        options,
    })
}

fn poll_option(v: &Value) -> Option<PollOption> {
    let id = match v.get("id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(PollOption {
        id,
        text: v.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        vote_count: v.get("vote_count").and_then(Value::as_i64),
    })
}
