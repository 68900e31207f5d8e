//! End-to-end behaviour over real loopback sockets.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parley::responder::{EchoHandler, FixedReplyHandler, ReplyHandler, ReplyServer, ServerHandle};
use parley::{
    CommandOutput, Dialogue, Engine, EngineSettings, FAILED_RECEIVE_SENTINEL, FAILURE_MARKER,
    SocketTransport, run_command,
};
use parley_config::SocketEndpoint;
use rstest::{fixture, rstest};

struct Peer {
    address: String,
    handle: ServerHandle,
}

impl Peer {
    fn start(handler: Arc<dyn ReplyHandler>) -> Self {
        let server = ReplyServer::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind peer");
        let address = server.endpoint().to_string();
        let handle = server.start(handler).expect("start peer");
        Self { address, handle }
    }

    fn stop(self) {
        self.handle.shutdown();
        self.handle.join().expect("join peer");
    }
}

fn engine_with_timeout(timeout: Duration) -> Engine {
    Engine::new(
        Arc::new(SocketTransport::new()),
        EngineSettings {
            reply_timeout: timeout,
            ..EngineSettings::default()
        },
    )
}

#[fixture]
fn engine() -> Engine {
    engine_with_timeout(Duration::from_millis(500))
}

/// An address with nothing listening on it.
fn vacant_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let port = listener.local_addr().expect("local address").port();
    drop(listener);
    format!("tcp://127.0.0.1:{port}")
}

#[rstest]
fn ping_pong_round_trip(engine: Engine) {
    let peer = Peer::start(Arc::new(|request: &[u8]| {
        (request == b"PING").then(|| b"PONG".to_vec())
    }));

    let token = match run_command(&engine, "send", &[peer.address.as_str(), "PING", "0"])
        .expect("send")
    {
        CommandOutput::Token { time_submitted } => time_submitted,
        other => panic!("expected a token, got {other:?}"),
    };
    let CommandOutput::Responses { dialogues } =
        run_command(&engine, "getResponses", &["1"]).expect("retrieve")
    else {
        panic!("expected responses");
    };

    assert_eq!(dialogues.len(), 1);
    let record = dialogues.first().expect("one record");
    assert_eq!(record.order, "PING");
    assert_eq!(record.response, "PONG");
    assert_eq!(record.time_submitted, token);
    assert!(record.time_sent >= record.time_submitted);
    assert!(record.time_received >= record.time_sent);

    engine.shutdown();
    peer.stop();
}

#[test]
fn sync_send_without_listener_fails_within_the_timeout() {
    let timeout = Duration::from_millis(200);
    let engine = engine_with_timeout(timeout);
    let address = vacant_address();

    let started = Instant::now();
    let dialogue = engine.submit_sync(&address, "PING");
    let elapsed = started.elapsed();

    assert_eq!(dialogue.response(), FAILURE_MARKER);
    assert_eq!(dialogue.time_received_micros(), FAILED_RECEIVE_SENTINEL);
    assert!(elapsed < timeout + Duration::from_millis(500), "took {elapsed:?}");
}

#[rstest]
fn silent_peer_times_out_then_recovers() {
    let engine = engine_with_timeout(Duration::from_millis(60));
    let peer = Peer::start(Arc::new(|request: &[u8]| {
        (request != b"ignore me").then(|| request.to_vec())
    }));

    let ignored = engine.submit_sync(&peer.address, "ignore me");
    let answered = engine.submit_sync(&peer.address, "answer me");

    assert!(ignored.is_failed());
    assert_eq!(answered.response(), "answer me");
    assert_eq!(engine.registry().len(), 1);
    peer.stop();
}

#[rstest]
fn async_completions_preserve_submission_order(engine: Engine) {
    let peer = Peer::start(Arc::new(EchoHandler));
    let orders = (0..20).map(|index| format!("order-{index}")).collect::<Vec<_>>();
    for order in &orders {
        engine.submit_async(&peer.address, order).expect("submit");
    }

    let responses = engine
        .retrieve_completed(true)
        .iter()
        .map(|dialogue| dialogue.response().to_owned())
        .collect::<Vec<_>>();

    assert_eq!(responses, orders);
    assert_eq!(engine.pending_len(), 0);
    peer.stop();
}

#[rstest]
fn drain_never_returns_before_prior_submissions_complete(engine: Engine) {
    let peer = Peer::start(Arc::new(|request: &[u8]| {
        thread::sleep(Duration::from_millis(10));
        Some(request.to_vec())
    }));
    for index in 0..6 {
        engine
            .submit_async(&peer.address, &index.to_string())
            .expect("submit");
    }

    let batch = engine.retrieve_completed(true);

    assert_eq!(batch.len(), 6);
    assert!(batch.iter().all(|dialogue| !dialogue.is_failed()));
    assert!(engine.retrieve_completed(false).is_empty());
    peer.stop();
}

#[rstest]
fn shutdown_twice_leaves_an_empty_registry(engine: Engine) {
    let peer = Peer::start(Arc::new(FixedReplyHandler::new("ok")));
    engine.submit_async(&peer.address, "one").expect("submit");
    engine.retrieve_completed(true);

    engine.shutdown();
    engine.shutdown();

    assert!(engine.registry().is_empty());
    assert_eq!(engine.active_workers(), 0);
    assert_eq!(engine.submit_sync(&peer.address, "again").response(), "ok");
    peer.stop();
}

#[rstest]
fn exchanges_with_different_peers_never_overlap(engine: Engine) {
    let slow_echo = |request: &[u8]| {
        thread::sleep(Duration::from_millis(5));
        Some(request.to_vec())
    };
    let first = Peer::start(Arc::new(slow_echo));
    let second = Peer::start(Arc::new(slow_echo));
    let engine = Arc::new(engine);

    let callers = [first.address.clone(), second.address.clone()]
        .into_iter()
        .map(|address| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                (0..5)
                    .map(|index| engine.submit_sync(&address, &index.to_string()))
                    .collect::<Vec<Dialogue>>()
            })
        })
        .collect::<Vec<_>>();
    let mut intervals = callers
        .into_iter()
        .flat_map(|caller| caller.join().expect("join caller"))
        .map(|dialogue| {
            (
                dialogue.time_sent().expect("sent"),
                dialogue.time_received().expect("received"),
            )
        })
        .collect::<Vec<_>>();
    intervals.sort();

    assert_eq!(intervals.len(), 10);
    assert!(intervals.windows(2).all(|pair| match pair {
        [earlier, later] => earlier.1 <= later.0,
        _ => true,
    }));
    first.stop();
    second.stop();
}

#[cfg(unix)]
#[rstest]
fn unix_socket_peers_are_reachable(engine: Engine) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("peer.sock"))
        .expect("utf8 socket path");
    let handle = ReplyServer::bind(&SocketEndpoint::unix(path.clone()))
        .expect("bind unix peer")
        .start(Arc::new(EchoHandler))
        .expect("start unix peer");

    let unix = engine.submit_sync(&format!("unix://{path}"), "over unix");
    let ipc = engine.submit_sync(&format!("ipc://{path}"), "over ipc");

    assert_eq!(unix.response(), "over unix");
    assert_eq!(ipc.response(), "over ipc");
    handle.shutdown();
    handle.join().expect("join unix peer");
}
