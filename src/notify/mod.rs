//! Change notifier - topic-keyed publish/subscribe of row changes

mod memory;

pub use memory::MemoryNotifier;

use crate::error::{PokerError, Result};
use crate::model::{Session, Vote};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tokio::sync::mpsc;

/// Topic grammar: `<table>:<column>=eq.<value>`
static TOPIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<table>[a-z_]+):(?P<column>[a-z_]+)=eq\.(?P<value>.+)$")
        .expect("topic pattern is valid")
});

/// Tables that emit change events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Sessions,
    Votes,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Sessions => "sessions",
            Table::Votes => "votes",
        }
    }
}

/// An equality filter over one table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub table: Table,
    pub column: String,
    pub value: String,
}

impl Topic {
    /// Topic for every row of `table` belonging to a session
    pub fn for_session(table: Table, session_id: &str) -> Self {
        Self {
            table,
            column: "session_id".to_string(),
            value: session_id.to_string(),
        }
    }

    /// Whether an event belongs to this topic
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.row.table() == self.table
            && event.row.column(&self.column).as_deref() == Some(self.value.as_str())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}=eq.{}", self.table.as_str(), self.column, self.value)
    }
}

impl FromStr for Topic {
    type Err = PokerError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = TOPIC_RE
            .captures(s)
            .ok_or_else(|| PokerError::Invalid(format!("malformed topic '{}'", s)))?;
        let table = match &caps["table"] {
            "sessions" => Table::Sessions,
            "votes" => Table::Votes,
            other => return Err(PokerError::Invalid(format!("unknown table '{}'", other))),
        };
        Ok(Self {
            table,
            column: caps["column"].to_string(),
            value: caps["value"].to_string(),
        })
    }
}

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Insert,
    Update,
}

/// New row carried by a change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Row {
    Session(Session),
    Vote(Vote),
}

impl Row {
    pub fn table(&self) -> Table {
        match self {
            Row::Session(_) => Table::Sessions,
            Row::Vote(_) => Table::Votes,
        }
    }

    /// Value of a filterable column, rendered as text
    pub fn column(&self, column: &str) -> Option<String> {
        match (self, column) {
            (Row::Session(s), "session_id") => Some(s.session_id.clone()),
            (Row::Session(s), "host_id") => Some(s.host_id.to_string()),
            (Row::Vote(v), "session_id") => Some(v.session_id.clone()),
            (Row::Vote(v), "user_id") => Some(v.user_id.to_string()),
            (Row::Vote(v), "username") => Some(v.username.clone()),
            _ => None,
        }
    }
}

/// A single row change delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub row: Row,
}

impl ChangeEvent {
    pub fn insert(row: Row) -> Self {
        Self {
            operation: Operation::Insert,
            row,
        }
    }

    pub fn update(row: Row) -> Self {
        Self {
            operation: Operation::Update,
            row,
        }
    }
}

/// Opaque identifier of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle(pub u64);

/// An open subscription: its handle and the stream of matching events
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub topic: Topic,
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Publish/subscribe contract for row changes
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn subscribe(&self, topic: &Topic) -> Result<Subscription>;
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()>;
}
