//! Remote record client interface and the raw record model it produces

use std::collections::BTreeMap;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;

use crate::error::FetchError;

/// Stream of raw records for one remote batch.
///
/// `Err(FetchError::Record { .. })` items are per-record failures and the stream
/// may continue; any other `Err` ends the batch.
pub type RecordStream<'a> = BoxStream<'a, Result<RawRecord, FetchError>>;

/// Batch lookup against a remote API.
///
/// One instance serves one shard run and is never shared between shards.
pub trait RecordClient: Send {
    /// Protocol limit on identifiers per [`fetch`](Self::fetch) call
    fn max_batch_size(&self) -> usize;

    /// Look up `ids` (at most `max_batch_size`), yielding records as they arrive.
    ///
    /// Records for unknown or removed identifiers are simply absent.
    fn fetch<'a>(&'a mut self, ids: &'a [String]) -> RecordStream<'a>;

    /// Release the session. Called once when the shard drains.
    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Named sub-entity reference (a containing community, an author account)
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRef {
    /// `None` when the identity is anonymous or deleted
    pub display_name: Option<String>,
}

impl EntityRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { display_name: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollOption {
    pub id: String,
    pub text: String,
    pub vote_count: Option<i64>,
}

/// Poll/voting construct attached to a record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollData {
    pub options: Vec<PollOption>,
    pub total_vote_count: Option<i64>,
    pub user_selection: Option<PollOption>,
    pub voting_end_timestamp: Option<i64>,
}

/// A field value as delivered by the remote client.
///
/// Superset of JSON: `Entity`, `Poll` and `Opaque` have no direct serialized
/// form, and `Float` may be non-finite.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Integer above `i64::MAX`
    UInt(u64),
    Float(f64),
    Str(String),
    List(Vec<RawValue>),
    Map(BTreeMap<String, RawValue>),
    Entity(EntityRef),
    Poll(Box<PollData>),
    /// Live handle (session back-reference, lazy comment forest, ...). The
    /// string names the handle type for diagnostics.
    Opaque(String),
}

impl From<serde_json::Value> for RawValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Self::Int(i),
                (None, Some(u)) => Self::UInt(u),
                (None, None) => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Str(s),
            Value::Array(a) => Self::List(a.into_iter().map(Self::from).collect()),
            Value::Object(o) => Self::Map(o.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for RawValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for RawValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<EntityRef> for RawValue {
    fn from(e: EntityRef) -> Self {
        Self::Entity(e)
    }
}

impl From<PollData> for RawValue {
    fn from(p: PollData) -> Self {
        Self::Poll(Box::new(p))
    }
}

/// One record as returned by the remote API
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Source identifier (without any remote type prefix)
    pub id: String,
    pub fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}
