use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use tracing_subscriber::EnvFilter;

use linereply::{
    ActionSink, ConsoleLine, ContextId, Delivery, HubConfig, ReplyHub, ReplyRequest,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A stand-in for the host: one delivery thread feeding console lines, and an
/// action sink that answers known commands by emitting lines onto that feed.
struct FakeServer {
    hub: ReplyHub,
    lines: Sender<ConsoleLine>,
    // Exits on its own once the hub (holding the sink's sender) and `lines` drop.
    _delivery: JoinHandle<()>,
}

impl FakeServer {
    fn start(config: &HubConfig, respond: fn(&str) -> Vec<String>) -> Self {
        let (line_tx, line_rx) = unbounded::<ConsoleLine>();

        let sink_tx = line_tx.clone();
        let sink: Arc<dyn ActionSink> = Arc::new(move |action: &str| {
            for line in respond(action) {
                let _ = sink_tx.send(ConsoleLine::server(line));
            }
        });
        let hub = ReplyHub::with_sink(config, sink).unwrap();

        let correlator = hub.correlator();
        let delivery = thread::spawn(move || {
            for line in line_rx {
                correlator.deliver(&line).unwrap();
            }
        });

        Self {
            hub,
            lines: line_tx,
            _delivery: delivery,
        }
    }

    fn emit(&self, line: &str) {
        self.lines.send(ConsoleLine::server(line)).unwrap();
    }

    fn wait_for_pending(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.hub.pending_count().unwrap() < n {
            assert!(Instant::now() < deadline, "timed out waiting for {n} pending queries");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_for_drained(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.hub.pending_count().unwrap() > 0 {
            assert!(Instant::now() < deadline, "pending queries never drained");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

fn silent(_: &str) -> Vec<String> {
    Vec::new()
}

fn vanilla(action: &str) -> Vec<String> {
    match action {
        "list" => vec![
            "[Server thread/INFO]: There are 3 of a max of 20 players online: Alex, Steve, Sam".to_string(),
        ],
        other => match other.strip_prefix("ping ") {
            Some(n) => vec![format!("pong {n}")],
            None => Vec::new(),
        },
    }
}

#[test]
fn listen_returns_full_line_when_it_arrives() {
    init_tracing();
    let server = FakeServer::start(&HubConfig::default(), silent);
    let dispatcher = server.hub.dispatcher();

    let started = Instant::now();
    let waiter = thread::spawn(move || {
        dispatcher.listen_and_wait_line(&ContextId::new(), "^OK$", Duration::from_secs(1))
    });
    server.wait_for_pending(1);
    thread::sleep(Duration::from_millis(100));
    server.emit("OK");

    let reply = waiter.join().unwrap().unwrap();
    assert_eq!(reply.as_deref(), Some("OK"));
    assert!(started.elapsed() < Duration::from_millis(900));
    server.wait_for_drained();
}

#[test]
fn execute_returns_structured_match_with_groups() {
    init_tracing();
    let server = FakeServer::start(&HubConfig::default(), vanilla);

    let m = server
        .hub
        .dispatcher()
        .execute_and_wait_match(
            &ContextId::new(),
            "list",
            r"There are (\d+) of a max of (\d+) players",
            Duration::from_secs(5),
        )
        .unwrap()
        .expect("list reply");

    assert_eq!(m.get(1), Some("3"));
    assert_eq!(m.get(2), Some("20"));
    assert!(m.line().ends_with("Alex, Steve, Sam"));
    assert_eq!(server.hub.pending_count().unwrap(), 0);
}

#[test]
fn earliest_query_wins_shared_line() {
    init_tracing();
    let server = FakeServer::start(&HubConfig::default(), silent);

    let first = server.hub.dispatcher();
    let a = thread::spawn(move || {
        first.listen_and_wait_line(&ContextId::new(), "^A$", Duration::from_secs(2))
    });
    server.wait_for_pending(1);
    thread::sleep(Duration::from_millis(10));

    let second = server.hub.dispatcher();
    let b_started = Instant::now();
    let b = thread::spawn(move || {
        second.listen_and_wait_line(&ContextId::new(), "^.*$", Duration::from_millis(300))
    });
    server.wait_for_pending(2);

    server.emit("A");
    assert_eq!(a.join().unwrap().unwrap().as_deref(), Some("A"));
    assert_eq!(server.hub.pending_count().unwrap(), 1);

    assert_eq!(b.join().unwrap().unwrap(), None);
    assert!(b_started.elapsed() >= Duration::from_millis(300));
    server.wait_for_drained();
}

#[test]
fn unmatched_query_times_out_and_is_cleaned_up() {
    init_tracing();
    let server = FakeServer::start(&HubConfig::default(), silent);
    let dispatcher = server.hub.dispatcher();

    let started = Instant::now();
    let waiter = thread::spawn(move || {
        dispatcher.listen_and_wait_line(&ContextId::new(), "^NEVER$", Duration::from_millis(200))
    });
    server.wait_for_pending(1);
    thread::sleep(Duration::from_millis(50));
    server.emit("hello");

    assert_eq!(waiter.join().unwrap().unwrap(), None);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
    server.wait_for_drained();
}

#[test]
fn call_from_delivery_context_fails_immediately() {
    init_tracing();
    let hub = ReplyHub::new(&HubConfig::default(), |_: &str| {}).unwrap();
    let correlator = hub.correlator();
    let dispatcher = hub.dispatcher();

    let delivery = thread::spawn(move || {
        let started = Instant::now();
        // A delivery loop that mistakenly blocks on a reply.
        let result = dispatcher.await_reply(
            &correlator.context(),
            ReplyRequest::listen("^anything$").timeout(Duration::from_secs(10)),
        );
        (result, started.elapsed())
    });

    let (result, elapsed) = delivery.join().unwrap();
    assert!(result.unwrap_err().is_reentrant_call());
    assert!(elapsed < Duration::from_secs(1));
    assert_eq!(hub.pending_count().unwrap(), 0);
}

#[test]
fn invalid_pattern_returns_no_reply_immediately() {
    init_tracing();
    let server = FakeServer::start(&HubConfig::default(), vanilla);

    let started = Instant::now();
    let reply = server
        .hub
        .await_reply(
            &ContextId::new(),
            ReplyRequest::execute("list", "There are ([0-9+ players").timeout(Duration::from_secs(5)),
        )
        .unwrap();
    assert_eq!(reply, None);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(server.hub.pending_count().unwrap(), 0);
}

#[test]
fn concurrent_requests_each_get_their_own_reply() {
    init_tracing();
    let server = FakeServer::start(&HubConfig::default(), vanilla);

    let callers: Vec<_> = (0..16)
        .map(|i| {
            let dispatcher = server.hub.dispatcher();
            thread::spawn(move || {
                let reply = dispatcher
                    .execute_and_wait_line(
                        &ContextId::new(),
                        &format!("ping {i}"),
                        &format!("^pong {i}$"),
                        Duration::from_secs(5),
                    )
                    .unwrap();
                (i, reply)
            })
        })
        .collect();

    for caller in callers {
        let (i, reply) = caller.join().unwrap();
        assert_eq!(reply, Some(format!("pong {i}")));
    }
    assert_eq!(server.hub.pending_count().unwrap(), 0);
}

#[test]
fn pending_query_ids_are_unique() {
    init_tracing();
    let hub = ReplyHub::new(&HubConfig::default(), |_: &str| {}).unwrap();

    let waiters: Vec<_> = (0..32)
        .map(|_| {
            let dispatcher = hub.dispatcher();
            thread::spawn(move || {
                dispatcher.listen_and_wait_line(&ContextId::new(), "^release$", Duration::from_secs(5))
            })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while hub.pending_count().unwrap() < 32 {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(1));
    }

    let ids: HashSet<_> = hub.pending().unwrap().iter().map(|q| q.id()).collect();
    assert_eq!(ids.len(), 32);

    let correlator = hub.correlator();
    for _ in 0..32 {
        assert!(matches!(correlator.deliver_line("release").unwrap(), Delivery::Matched(_)));
    }
    for waiter in waiters {
        assert_eq!(waiter.join().unwrap().unwrap().as_deref(), Some("release"));
    }
    assert_eq!(hub.pending_count().unwrap(), 0);
}

#[test]
fn each_line_resolves_at_most_one_query_in_fifo_order() {
    init_tracing();
    let hub = ReplyHub::new(&HubConfig::default(), |_: &str| {}).unwrap();
    let correlator = hub.correlator();

    let mut waiters = Vec::new();
    for n in 1..=8 {
        let dispatcher = hub.dispatcher();
        waiters.push(thread::spawn(move || {
            dispatcher.listen_and_wait_line(&ContextId::new(), "^tick$", Duration::from_secs(5))
        }));
        let deadline = Instant::now() + Duration::from_secs(5);
        while hub.pending_count().unwrap() < n {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
    }

    let order: Vec<_> = hub.pending().unwrap().iter().map(|q| q.id()).collect();
    for (delivered, expected) in order.iter().enumerate() {
        let delivery = correlator.deliver_line("tick").unwrap();
        assert_eq!(delivery, Delivery::Matched(*expected));
        assert_eq!(hub.pending_count().unwrap(), order.len() - delivered - 1);
    }
    assert_eq!(correlator.deliver_line("tick").unwrap(), Delivery::Unmatched);

    for waiter in waiters {
        assert_eq!(waiter.join().unwrap().unwrap().as_deref(), Some("tick"));
    }
}

#[test]
fn user_lines_never_resolve_queries() {
    init_tracing();
    let server = FakeServer::start(&HubConfig::default(), silent);
    let dispatcher = server.hub.dispatcher();

    let waiter = thread::spawn(move || {
        dispatcher.listen_and_wait_line(&ContextId::new(), "joined the game", Duration::from_millis(500))
    });
    server.wait_for_pending(1);
    server.lines.send(ConsoleLine::user("<Steve> I joined the game")).unwrap();
    server.emit("Steve joined the game");

    assert_eq!(waiter.join().unwrap().unwrap().as_deref(), Some("Steve joined the game"));
}

#[test]
fn sweeper_resolves_expired_queries_without_lines() {
    init_tracing();
    let config = HubConfig::default().with_sweep_interval(Duration::from_millis(10));
    let server = FakeServer::start(&config, silent);
    let dispatcher = server.hub.dispatcher();

    let started = Instant::now();
    let reply = dispatcher
        .listen_and_wait_line(&ContextId::new(), "^NEVER$", Duration::from_millis(50))
        .unwrap();
    assert_eq!(reply, None);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(server.hub.pending_count().unwrap(), 0);
}
