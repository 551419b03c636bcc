//! Query and reply types.
//!
//! A [`Query`] is one outstanding request for a line matching a pattern. It owns
//! the writing half of its private result slot, so resolving a query consumes
//! it: a query that has left the registry can never be delivered to again.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::slot::{self, Outcome, SlotReader, SlotWriter};

/// Unique identifier for a pending query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(Uuid);

impl QueryId {
    /// Create a new random query id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q_{}", self.0.simple())
    }
}

/// Which form a successful reply takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyShape {
    /// The full matched line.
    #[default]
    Line,
    /// The structured match, capture groups included.
    Match,
}

impl ReplyShape {
    /// Maps a "want structured match" flag to a shape.
    #[must_use]
    pub const fn from_structured(structured: bool) -> Self {
        if structured {
            Self::Match
        } else {
            Self::Line
        }
    }
}

/// Owned capture set of a pattern matched against one line.
///
/// Group 0 is the whole match (which may be a substring of the line, since
/// patterns are searched rather than anchored); groups `1..` are the pattern's
/// capture groups, `None` where a group did not participate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    line: String,
    spans: Vec<Option<(usize, usize)>>,
    names: HashMap<String, usize>,
}

impl LineMatch {
    pub(crate) fn from_captures(line: &str, pattern: &Regex, caps: &Captures<'_>) -> Self {
        let spans = caps
            .iter()
            .map(|m| m.map(|m| (m.start(), m.end())))
            .collect();
        let names = pattern
            .capture_names()
            .enumerate()
            .filter_map(|(idx, name)| name.map(|n| (n.to_string(), idx)))
            .collect();
        Self {
            line: line.to_string(),
            spans,
            names,
        }
    }

    /// The full line the pattern matched in.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// The text of the overall match (group 0).
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.get(0).unwrap_or_default()
    }

    /// Byte offset of the overall match in [`line`](Self::line).
    #[must_use]
    pub fn start(&self) -> usize {
        self.spans.first().copied().flatten().map_or(0, |(s, _)| s)
    }

    /// Byte offset one past the end of the overall match.
    #[must_use]
    pub fn end(&self) -> usize {
        self.spans.first().copied().flatten().map_or(0, |(_, e)| e)
    }

    /// Text of capture group `index`, if the group exists and participated.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        let (start, end) = self.spans.get(index).copied().flatten()?;
        self.line.get(start..end)
    }

    /// Text of the named capture group, if it exists and participated.
    #[must_use]
    pub fn name(&self, name: &str) -> Option<&str> {
        self.names.get(name).and_then(|&idx| self.get(idx))
    }

    /// Number of explicit capture groups in the pattern (group 0 excluded).
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.spans.len().saturating_sub(1)
    }

    /// Explicit capture groups in order, group 0 excluded.
    pub fn groups(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        (1..self.spans.len()).map(move |idx| self.get(idx))
    }
}

/// A successful reply delivered to a waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The full matched line.
    Line(String),
    /// The structured match.
    Match(LineMatch),
}

impl Reply {
    /// The full line this reply came from, regardless of shape.
    #[must_use]
    pub fn line(&self) -> &str {
        match self {
            Self::Line(line) => line,
            Self::Match(m) => m.line(),
        }
    }

    /// Consumes the reply, returning the full line.
    #[must_use]
    pub fn into_line(self) -> String {
        match self {
            Self::Line(line) => line,
            Self::Match(m) => m.line,
        }
    }

    /// Consumes the reply, returning the structured match if this is one.
    #[must_use]
    pub fn into_match(self) -> Option<LineMatch> {
        match self {
            Self::Line(_) => None,
            Self::Match(m) => Some(m),
        }
    }

    /// Borrows the structured match if this is one.
    #[must_use]
    pub const fn as_match(&self) -> Option<&LineMatch> {
        match self {
            Self::Line(_) => None,
            Self::Match(m) => Some(m),
        }
    }
}

/// One pending request: identity, pattern, optional action and result slot.
#[derive(Debug)]
pub struct Query {
    id: QueryId,
    pattern: Regex,
    action: Option<String>,
    started_at: Instant,
    registered_at: DateTime<Utc>,
    timeout: Duration,
    shape: ReplyShape,
    pub(crate) seq: u64,
    writer: SlotWriter,
}

impl Query {
    /// Creates a query and the reading half of its result slot.
    ///
    /// The start time is captured here; construct the query immediately
    /// before registering it.
    #[must_use]
    pub fn new(
        pattern: Regex,
        action: Option<String>,
        timeout: Duration,
        shape: ReplyShape,
    ) -> (Self, SlotReader) {
        let (writer, reader) = slot::pair();
        let query = Self {
            id: QueryId::new(),
            pattern,
            action,
            started_at: Instant::now(),
            registered_at: Utc::now(),
            timeout,
            shape,
            seq: 0,
            writer,
        };
        (query, reader)
    }

    /// Unique id of this query.
    #[must_use]
    pub const fn id(&self) -> QueryId {
        self.id
    }

    /// Compiled reply pattern.
    #[must_use]
    pub const fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Action issued before waiting; `None` for a passive listen.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Monotonic start time; orders queries oldest first.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Maximum age before the query expires.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shape of the reply the caller asked for.
    #[must_use]
    pub const fn shape(&self) -> ReplyShape {
        self.shape
    }

    /// True once the query's age strictly exceeds its timeout.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) > self.timeout
    }

    pub(crate) fn view(&self) -> PendingQuery {
        PendingQuery {
            id: self.id,
            pattern: self.pattern.clone(),
            action: self.action.clone(),
            started_at: self.started_at,
            registered_at: self.registered_at,
            timeout: self.timeout,
            shape: self.shape,
            seq: self.seq,
        }
    }

    /// Delivers the terminal outcome, consuming the query.
    ///
    /// Returns false if the slot was already filled or the waiter is gone.
    pub(crate) fn resolve(self, outcome: Outcome) -> bool {
        self.writer.post(outcome)
    }

    #[cfg(test)]
    pub(crate) fn with_start(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_id(mut self, id: QueryId) -> Self {
        self.id = id;
        self
    }
}

/// Read-only snapshot of a pending query.
///
/// Snapshots carry no result slot; delivery always goes back through the
/// registry so that removal and delivery happen under one lock acquisition.
#[derive(Debug, Clone)]
pub struct PendingQuery {
    id: QueryId,
    pattern: Regex,
    action: Option<String>,
    started_at: Instant,
    registered_at: DateTime<Utc>,
    timeout: Duration,
    shape: ReplyShape,
    seq: u64,
}

impl PendingQuery {
    /// Unique id of this query.
    #[must_use]
    pub const fn id(&self) -> QueryId {
        self.id
    }

    /// Source text of the reply pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Action issued before waiting; `None` for a passive listen.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Monotonic start time; orders queries oldest first.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Wall-clock registration time, for diagnostics only.
    #[must_use]
    pub const fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Maximum age before the query expires.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shape of the reply the caller asked for.
    #[must_use]
    pub const fn shape(&self) -> ReplyShape {
        self.shape
    }

    /// Time since start as of `now`.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub(crate) const fn order_key(&self) -> (Instant, u64) {
        (self.started_at, self.seq)
    }

    /// Tests `line` against this query's pattern, building the reply in the
    /// query's shape on a match.
    #[must_use]
    pub fn reply_for(&self, line: &str) -> Option<Reply> {
        match self.shape {
            ReplyShape::Line => self
                .pattern
                .is_match(line)
                .then(|| Reply::Line(line.to_string())),
            ReplyShape::Match => self
                .pattern
                .captures(line)
                .map(|caps| Reply::Match(LineMatch::from_captures(line, &self.pattern, &caps))),
        }
    }
}
