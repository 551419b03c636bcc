//! Line correlation.
//!
//! For each incoming line the correlator first purges expired queries, then
//! walks the remaining ones oldest first and hands the line to the first
//! whose pattern matches. A line resolves at most one query; the scan stops
//! there. Lines nobody matches are dropped.
//!
//! Lines must be fed from a single delivery context, in arrival order.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use crate::context::ContextId;
use crate::error::ReplyResult;
use crate::query::{PendingQuery, QueryId};
use crate::registry::Registry;
use crate::slot::Outcome;

/// Where a console line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineOrigin {
    /// Output of the server process itself.
    Server,
    /// Text typed by an interactive user; never correlated.
    User,
}

/// One line of console output as handed over by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    /// The line without its trailing newline.
    pub text: String,
    /// Who produced the line.
    pub origin: LineOrigin,
}

impl ConsoleLine {
    /// A line of server output.
    #[must_use]
    pub fn server(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: LineOrigin::Server,
        }
    }

    /// A line of user input.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            origin: LineOrigin::User,
        }
    }
}

/// What happened to one delivered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The line resolved this query.
    Matched(QueryId),
    /// No pending query matched.
    Unmatched,
    /// The line was not eligible for correlation (user input).
    Ignored,
}

/// Feeds lines into a registry. Cheap to clone; clones share the registry
/// and the delivery context identity.
#[derive(Debug, Clone)]
pub struct Correlator {
    registry: Arc<Registry>,
    context: ContextId,
}

impl Correlator {
    /// Creates a correlator with a fresh delivery context identity.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_context(registry, ContextId::new())
    }

    /// Creates a correlator for an existing delivery context identity.
    #[must_use]
    pub const fn with_context(registry: Arc<Registry>, context: ContextId) -> Self {
        Self { registry, context }
    }

    /// Identity of the context lines are delivered from.
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// Correlates a host console line, skipping user input.
    pub fn deliver(&self, line: &ConsoleLine) -> ReplyResult<Delivery> {
        if line.origin == LineOrigin::User {
            trace!(line = %line.text, "ignoring user input line");
            return Ok(Delivery::Ignored);
        }
        self.deliver_line(&line.text)
    }

    /// Correlates one line against the pending queries.
    pub fn deliver_line(&self, line: &str) -> ReplyResult<Delivery> {
        self.deliver_line_at(line, Instant::now())
    }

    /// Correlates one line as of `now`.
    pub fn deliver_line_at(&self, line: &str, now: Instant) -> ReplyResult<Delivery> {
        // Expired queries must never win a match against live ones.
        self.purge_expired_at(now)?;
        let candidates = self.registry.live_sorted_snapshot(now)?;
        self.deliver_to(line, candidates)
    }

    /// Hands `line` to the first of `candidates` that matches and is still
    /// registered.
    fn deliver_to(&self, line: &str, candidates: Vec<PendingQuery>) -> ReplyResult<Delivery> {
        for candidate in candidates {
            let Some(reply) = candidate.reply_for(line) else {
                continue;
            };
            if self.registry.resolve(candidate.id(), Outcome::Matched(reply))? {
                log_matched(&candidate);
                return Ok(Delivery::Matched(candidate.id()));
            }
            // Removed by its own caller after the snapshot was taken; it was
            // never resolved by this line, so the next candidate may take it.
            trace!(query_id = %candidate.id(), "matching query left before delivery");
        }

        trace!(line, "line matched no pending query");
        Ok(Delivery::Unmatched)
    }

    /// Purges every expired query, posting the timeout sentinel to each.
    ///
    /// Returns the number of queries purged.
    pub fn purge_expired(&self) -> ReplyResult<usize> {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> ReplyResult<usize> {
        let purged = self.registry.purge_expired(now)?;
        for query in &purged {
            match query.action() {
                Some(action) => debug!(query_id = %query.id(), action, "query timed out"),
                None => debug!(query_id = %query.id(), pattern = query.pattern(), "listen query timed out"),
            }
        }
        Ok(purged.len())
    }
}

fn log_matched(query: &PendingQuery) {
    match query.action() {
        Some(action) => debug!(query_id = %query.id(), action, "query matched"),
        None => debug!(query_id = %query.id(), pattern = query.pattern(), "listen query matched"),
    }
}
