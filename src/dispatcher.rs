//! The blocking request/reply call.
//!
//! [`Dispatcher::await_reply`] registers a query, optionally fires an action
//! through the host's [`ActionSink`], then blocks the calling thread on the
//! query's private slot until a matching line arrives or the timeout passes.
//! The registry lock is never held across the action or the wait, so any
//! number of callers can wait concurrently while lines keep flowing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, warn};

use crate::config::DEFAULT_TIMEOUT;
use crate::context::ContextId;
use crate::error::{ExecutionError, ReplyError, ReplyResult, ValidationError};
use crate::query::{LineMatch, Query, QueryId, Reply, ReplyShape};
use crate::registry::Registry;
use crate::slot::{Outcome, SlotReader};

/// Host-provided side effect, e.g. writing a command to the server console.
///
/// Fire-and-forget: any effect surfaces later as lines on the inbound feed.
pub trait ActionSink: Send + Sync {
    /// Issues `action`.
    fn run_action(&self, action: &str);
}

impl<F> ActionSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn run_action(&self, action: &str) {
        self(action);
    }
}

/// Parameters of one blocking call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    action: Option<String>,
    pattern: String,
    timeout: Option<Duration>,
    shape: ReplyShape,
}

impl ReplyRequest {
    /// Run `action`, then wait for a line matching `pattern`.
    #[must_use]
    pub fn execute(action: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            pattern: pattern.into(),
            timeout: None,
            shape: ReplyShape::Line,
        }
    }

    /// Wait for a line matching `pattern` without taking any action.
    #[must_use]
    pub fn listen(pattern: impl Into<String>) -> Self {
        Self {
            action: None,
            pattern: pattern.into(),
            timeout: None,
            shape: ReplyShape::Line,
        }
    }

    /// Overrides the dispatcher's default timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Selects the reply shape.
    #[must_use]
    pub fn shape(mut self, shape: ReplyShape) -> Self {
        self.shape = shape;
        self
    }

    /// Requests the structured match instead of the full line.
    #[must_use]
    pub fn structured(self) -> Self {
        self.shape(ReplyShape::Match)
    }

    /// The action to run, if any.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// The pattern source as given.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// Issues blocking request/reply calls against a shared registry.
///
/// Cheap to clone; clones share the registry and the action sink.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    sink: Arc<dyn ActionSink>,
    delivery_context: ContextId,
    default_timeout: Duration,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("delivery_context", &self.delivery_context)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Removes the query from the registry however the call exits.
struct Deregister<'a> {
    registry: &'a Registry,
    id: QueryId,
}

impl Drop for Deregister<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.registry.remove(self.id) {
            warn!(query_id = %self.id, error = %err, "failed to deregister query");
        }
    }
}

impl Dispatcher {
    /// Creates a dispatcher that refuses calls from `delivery_context`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, sink: Arc<dyn ActionSink>, delivery_context: ContextId) -> Self {
        Self {
            registry,
            sink,
            delivery_context,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the timeout for requests that do not carry one.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Timeout applied to requests that do not carry one.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Runs the request and blocks for its reply.
    ///
    /// Returns `Ok(None)` when no matching line arrived in time, and also when
    /// the pattern does not compile (logged). Fails only with
    /// `ExecutionError::ReentrantCall` when `caller` is the delivery context,
    /// or when the registry itself is unusable.
    pub fn await_reply(&self, caller: &ContextId, request: ReplyRequest) -> ReplyResult<Option<Reply>> {
        if *caller == self.delivery_context {
            return Err(ReplyError::Execution(ExecutionError::ReentrantCall {
                context: caller.to_string(),
            }));
        }

        let pattern = match Regex::new(&request.pattern) {
            Ok(pattern) => pattern,
            Err(e) => {
                let err = ValidationError::InvalidPattern {
                    pattern: request.pattern,
                    reason: e.to_string(),
                };
                error!(error = %err, "dropping request");
                return Ok(None);
            }
        };

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        // An empty action is a passive listen.
        let action = request.action.filter(|a| !a.is_empty());

        let (query, reader) = Query::new(pattern, action.clone(), timeout, request.shape);
        let id = query.id();
        self.registry.register(query)?;
        let _deregister = Deregister {
            registry: &self.registry,
            id,
        };

        match action.as_deref() {
            Some(action) => self.sink.run_action(action),
            None => debug!(query_id = %id, pattern = %request.pattern, "listening for reply"),
        }

        let waited = reader.wait(timeout);
        let reply = self.settle(id, &reader, waited)?;
        if reply.is_none() {
            match action.as_deref() {
                Some(action) => debug!(query_id = %id, action, "no reply before timeout"),
                None => debug!(query_id = %id, pattern = %request.pattern, "no line matched before timeout"),
            }
        }
        Ok(reply)
    }

    /// Turns the result of the wait into the caller's reply.
    ///
    /// When the wait came back empty the query is withdrawn here. If it was
    /// already gone, a line may have resolved it after the wait ended, and
    /// that reply is taken from the slot instead of being lost.
    fn settle(&self, id: QueryId, reader: &SlotReader, waited: Option<Outcome>) -> ReplyResult<Option<Reply>> {
        match waited {
            Some(Outcome::Matched(reply)) => Ok(Some(reply)),
            Some(Outcome::TimedOut) => Ok(None),
            None => {
                if self.registry.remove(id)? {
                    return Ok(None);
                }
                match reader.try_take() {
                    Some(Outcome::Matched(reply)) => {
                        debug!(query_id = %id, "reply arrived as the wait expired");
                        Ok(Some(reply))
                    }
                    Some(Outcome::TimedOut) | None => Ok(None),
                }
            }
        }
    }

    /// Runs `action` and waits for a line matching `pattern`.
    pub fn execute_and_wait(
        &self,
        caller: &ContextId,
        action: &str,
        pattern: &str,
        timeout: Duration,
        shape: ReplyShape,
    ) -> ReplyResult<Option<Reply>> {
        self.await_reply(caller, ReplyRequest::execute(action, pattern).timeout(timeout).shape(shape))
    }

    /// Waits for a line matching `pattern` without taking any action.
    pub fn listen_and_wait(
        &self,
        caller: &ContextId,
        pattern: &str,
        timeout: Duration,
        shape: ReplyShape,
    ) -> ReplyResult<Option<Reply>> {
        self.await_reply(caller, ReplyRequest::listen(pattern).timeout(timeout).shape(shape))
    }

    /// [`execute_and_wait`](Self::execute_and_wait), returning the full line.
    pub fn execute_and_wait_line(
        &self,
        caller: &ContextId,
        action: &str,
        pattern: &str,
        timeout: Duration,
    ) -> ReplyResult<Option<String>> {
        Ok(self
            .execute_and_wait(caller, action, pattern, timeout, ReplyShape::Line)?
            .map(Reply::into_line))
    }

    /// [`execute_and_wait`](Self::execute_and_wait), returning the structured match.
    pub fn execute_and_wait_match(
        &self,
        caller: &ContextId,
        action: &str,
        pattern: &str,
        timeout: Duration,
    ) -> ReplyResult<Option<LineMatch>> {
        Ok(self
            .execute_and_wait(caller, action, pattern, timeout, ReplyShape::Match)?
            .and_then(Reply::into_match))
    }

    /// [`listen_and_wait`](Self::listen_and_wait), returning the full line.
    pub fn listen_and_wait_line(
        &self,
        caller: &ContextId,
        pattern: &str,
        timeout: Duration,
    ) -> ReplyResult<Option<String>> {
        Ok(self
            .listen_and_wait(caller, pattern, timeout, ReplyShape::Line)?
            .map(Reply::into_line))
    }

    /// [`listen_and_wait`](Self::listen_and_wait), returning the structured match.
    pub fn listen_and_wait_match(
        &self,
        caller: &ContextId,
        pattern: &str,
        timeout: Duration,
    ) -> ReplyResult<Option<LineMatch>> {
        Ok(self
            .listen_and_wait(caller, pattern, timeout, ReplyShape::Match)?
            .and_then(Reply::into_match))
    }

    /// Number of queries currently registered.
    pub fn pending_count(&self) -> ReplyResult<usize> {
        self.registry.count()
    }
}
