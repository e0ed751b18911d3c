use crate::labels::nullable;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type EventStream = BoxStream<'static, anyhow::Result<Event>>;

/// A message from `GET /events`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Event {
    #[serde(rename = "Type", default)]
    pub kind: String,

    #[serde(rename = "Action", default)]
    pub action: String,

    #[serde(rename = "Actor", default)]
    pub actor: EventActor,

    #[serde(default)]
    pub scope: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventActor {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Attributes", default, deserialize_with = "nullable")]
    pub attributes: BTreeMap<String, String>,
}

/// Engine API list and event filters, encoded as the `filters` query
/// parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filters(BTreeMap<String, BTreeSet<String>>);

// === impl Event ===

impl Event {
    pub fn new(kind: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            action: action.into(),
            ..Default::default()
        }
    }
}

// === impl Filters ===

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.entry(key.into()).or_default().insert(value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self, key: &str) -> impl Iterator<Item = &str> {
        self.0.get(key).into_iter().flatten().map(String::as_str)
    }

    /// The JSON document the Engine API expects, e.g. `{"type":["container"]}`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}
