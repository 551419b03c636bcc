//! Wiring for one independent correlation instance.
//!
//! A [`ReplyHub`] owns a registry and hands out the two halves that share it:
//! the [`Correlator`] the host feeds console lines into, and the
//! [`Dispatcher`] that callers block on. It optionally runs a low-frequency
//! sweeper thread that purges expired queries even when no lines arrive.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, warn};

use crate::config::HubConfig;
use crate::context::ContextId;
use crate::correlator::{ConsoleLine, Correlator, Delivery};
use crate::dispatcher::{ActionSink, Dispatcher, ReplyRequest};
use crate::error::{ExecutionError, ReplyResult};
use crate::query::{PendingQuery, Reply};
use crate::registry::Registry;

/// Background expiry sweep. Stops and joins on drop.
#[derive(Debug)]
struct Sweeper {
    stop_tx: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Sweeper {
    fn start(correlator: Correlator, interval: Duration) -> ReplyResult<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let join = thread::Builder::new()
            .name("linereply-sweeper".to_string())
            .spawn(move || sweep_loop(&correlator, stop_rx, interval))
            .map_err(|e| ExecutionError::Spawn {
                name: "linereply-sweeper".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            join: Some(join),
        })
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        // Disconnecting the stop channel wakes the loop immediately.
        drop(self.stop_tx.take());
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

fn sweep_loop(correlator: &Correlator, stop_rx: Receiver<()>, interval: Duration) {
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            default(interval) => {
                match correlator.purge_expired() {
                    Ok(0) => {}
                    Ok(n) => debug!(purged = n, "sweeper purged expired queries"),
                    Err(err) => warn!(error = %err, "sweeper failed to purge expired queries"),
                }
            }
        }
    }
}

/// One correlation instance: registry, correlator, dispatcher and sweeper.
#[derive(Debug)]
pub struct ReplyHub {
    registry: Arc<Registry>,
    correlator: Correlator,
    dispatcher: Dispatcher,
    sweeper: Option<Sweeper>,
}

impl ReplyHub {
    /// Builds a hub that issues actions through `sink`.
    ///
    /// Validates `config` and starts the sweeper if one is configured.
    pub fn new(config: &HubConfig, sink: impl ActionSink + 'static) -> ReplyResult<Self> {
        Self::with_sink(config, Arc::new(sink))
    }

    /// Builds a hub around an already shared sink.
    pub fn with_sink(config: &HubConfig, sink: Arc<dyn ActionSink>) -> ReplyResult<Self> {
        config.validate()?;

        let registry = Arc::new(Registry::new());
        let correlator = Correlator::new(Arc::clone(&registry));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), sink, correlator.context())
            .with_default_timeout(config.default_timeout());

        let sweeper = match config.sweep_interval() {
            Some(interval) => Some(Sweeper::start(correlator.clone(), interval)?),
            None => None,
        };

        Ok(Self {
            registry,
            correlator,
            dispatcher,
            sweeper,
        })
    }

    /// The correlator to move into the host's line delivery context.
    #[must_use]
    pub fn correlator(&self) -> Correlator {
        self.correlator.clone()
    }

    /// A dispatcher handle for callers on other threads.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Identity of the line delivery context.
    #[must_use]
    pub const fn delivery_context(&self) -> ContextId {
        self.correlator.context()
    }

    /// True if a background sweeper is running.
    #[must_use]
    pub const fn is_sweeping(&self) -> bool {
        self.sweeper.is_some()
    }

    /// See [`Dispatcher::await_reply`].
    pub fn await_reply(&self, caller: &ContextId, request: ReplyRequest) -> ReplyResult<Option<Reply>> {
        self.dispatcher.await_reply(caller, request)
    }

    /// See [`Correlator::deliver`].
    pub fn deliver(&self, line: &ConsoleLine) -> ReplyResult<Delivery> {
        self.correlator.deliver(line)
    }

    /// Number of queries currently pending.
    pub fn pending_count(&self) -> ReplyResult<usize> {
        self.registry.count()
    }

    /// Snapshots of every pending query, oldest first.
    pub fn pending(&self) -> ReplyResult<Vec<PendingQuery>> {
        self.registry.snapshot()
    }
}
