//! # linereply - blocking request/reply over an asynchronous line stream
//!
//! A host process (typically a game-server wrapper) receives console output one
//! line at a time on a delivery thread it does not control. linereply lets any
//! other thread issue a request ("run this command, then wait for a line
//! matching this pattern") or a passive wait ("wait for a line matching this
//! pattern") and get the reply back synchronously, bounded by a timeout, even
//! while other requests are pending on the same stream.
//!
//! ## Core Concepts
//!
//! - **Query**: one outstanding request with a pattern, optional action and timeout
//! - **Registry**: the single shared store of pending queries
//! - **Correlator**: matches each incoming line to at most one query, oldest first
//! - **Dispatcher**: the blocking call; registers, acts, waits, cleans up
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::thread;
//! use std::time::Duration;
//!
//! use linereply::{ContextId, HubConfig, ReplyHub, ReplyRequest};
//!
//! let hub = ReplyHub::new(&HubConfig::default(), |command: &str| {
//!     // write `command` to the server's stdin
//!     let _ = command;
//! })?;
//!
//! // Host side: feed every console line from the delivery thread.
//! let correlator = hub.correlator();
//! thread::spawn(move || {
//!     for line in ["There are 3 of a max of 20 players online"] {
//!         let _ = correlator.deliver_line(line);
//!     }
//! });
//!
//! // Caller side: any other thread.
//! let reply = hub.await_reply(
//!     &ContextId::new(),
//!     ReplyRequest::execute("list", r"There are (\d+) of a max of (\d+) players")
//!         .structured()
//!         .timeout(Duration::from_secs(5)),
//! )?;
//! if let Some(m) = reply.as_ref().and_then(|r| r.as_match()) {
//!     println!("{} of {} players online", m.get(1).unwrap_or("?"), m.get(2).unwrap_or("?"));
//! }
//! # Ok::<(), linereply::ReplyError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod query;
pub mod registry;
pub mod slot;

// Re-export primary types at crate root for convenience
pub use config::{HubConfig, DEFAULT_TIMEOUT};
pub use context::ContextId;
pub use correlator::{ConsoleLine, Correlator, Delivery, LineOrigin};
pub use dispatcher::{ActionSink, Dispatcher, ReplyRequest};
pub use error::{ExecutionError, ReplyError, ReplyResult, ValidationError};
pub use hub::ReplyHub;
pub use query::{LineMatch, PendingQuery, Query, QueryId, Reply, ReplyShape};
pub use registry::Registry;
pub use slot::{Outcome, SlotReader, SlotWriter};
