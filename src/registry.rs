//! Thread-safe store of pending queries.
//!
//! Every operation takes the single registry mutex for its duration and never
//! blocks on anything else. Ordering is not a property of the map: it is
//! computed on read by sorting live entries by start time (registration
//! sequence breaks ties between queries started within the same clock tick).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::error::{lock_err, ExecutionError, ReplyError, ReplyResult};
use crate::query::{PendingQuery, Query, QueryId};
use crate::slot::Outcome;

#[derive(Debug, Default)]
struct RegistryState {
    queries: HashMap<QueryId, Query>,
    next_seq: u64,
}

/// Store of all pending queries, keyed by id.
#[derive(Debug, Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, context: &'static str) -> ReplyResult<MutexGuard<'_, RegistryState>> {
        self.state.lock().map_err(|_| lock_err(context))
    }

    /// Inserts `query` under its id.
    ///
    /// Fails with `DuplicateQuery` if the id is already present; the rejected
    /// query is dropped, which disconnects its result slot.
    pub fn register(&self, mut query: Query) -> ReplyResult<()> {
        let mut state = self.lock("registry register")?;
        let id = query.id();
        if state.queries.contains_key(&id) {
            return Err(ReplyError::Execution(ExecutionError::DuplicateQuery { id }));
        }
        query.seq = state.next_seq;
        state.next_seq += 1;
        state.queries.insert(id, query);
        Ok(())
    }

    /// Idempotent removal. Returns whether an entry was present.
    pub fn remove(&self, id: QueryId) -> ReplyResult<bool> {
        let removed = self.lock("registry remove")?.queries.remove(&id);
        Ok(removed.is_some())
    }

    /// Removes the query and delivers `outcome` to it in one lock acquisition.
    ///
    /// Returns false, delivering nothing, if the query is already gone.
    pub fn resolve(&self, id: QueryId, outcome: Outcome) -> ReplyResult<bool> {
        let mut state = self.lock("registry resolve")?;
        let Some(query) = state.queries.remove(&id) else {
            return Ok(false);
        };
        // A waiter that already gave up has dropped its reader; that is fine.
        let _ = query.resolve(outcome);
        Ok(true)
    }

    /// Queries with `now - start <= timeout`, ascending by start time.
    pub fn live_sorted_snapshot(&self, now: Instant) -> ReplyResult<Vec<PendingQuery>> {
        let state = self.lock("registry snapshot")?;
        let mut live: Vec<PendingQuery> = state
            .queries
            .values()
            .filter(|q| !q.is_expired(now))
            .map(Query::view)
            .collect();
        drop(state);
        live.sort_by_key(PendingQuery::order_key);
        Ok(live)
    }

    /// Ids of queries with `now - start > timeout`.
    pub fn expired_ids(&self, now: Instant) -> ReplyResult<Vec<QueryId>> {
        let state = self.lock("registry expired_ids")?;
        Ok(state
            .queries
            .values()
            .filter(|q| q.is_expired(now))
            .map(Query::id)
            .collect())
    }

    /// Removes every expired query and posts the timeout sentinel to each.
    ///
    /// Returns snapshots of the purged queries, ascending by start time.
    pub fn purge_expired(&self, now: Instant) -> ReplyResult<Vec<PendingQuery>> {
        let mut state = self.lock("registry purge")?;
        let expired: Vec<QueryId> = state
            .queries
            .values()
            .filter(|q| q.is_expired(now))
            .map(Query::id)
            .collect();

        let mut purged = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(query) = state.queries.remove(&id) {
                purged.push(query.view());
                let _ = query.resolve(Outcome::TimedOut);
            }
        }
        drop(state);

        purged.sort_by_key(PendingQuery::order_key);
        Ok(purged)
    }

    /// Every registered query regardless of expiry, ascending by start time.
    pub fn snapshot(&self) -> ReplyResult<Vec<PendingQuery>> {
        let state = self.lock("registry snapshot")?;
        let mut all: Vec<PendingQuery> = state.queries.values().map(Query::view).collect();
        drop(state);
        all.sort_by_key(PendingQuery::order_key);
        Ok(all)
    }

    /// Number of registered queries. Diagnostic only.
    pub fn count(&self) -> ReplyResult<usize> {
        Ok(self.lock("registry count")?.queries.len())
    }
}
