//! Unit tests for connection lifecycle and dispatch over loopback TCP.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use blue_config::{Endpoint, ProcessingMode, ShieldConfig, ShieldConfigError};
use rstest::rstest;

use super::*;
use crate::message::{CloseCode, PING_TAG};
use crate::tests::support::{
    CountRequest, CountResponse, DispatchLog, Notice, Pair, ReasonLog, UnhandledRequest,
    counting_registry, raw_peer, wait_until,
};

fn counting_server() -> ConnectionOptions {
    ConnectionOptions::default().with_registry(counting_registry())
}

#[rstest]
#[case(ProcessingMode::Concurrent)]
#[case(ProcessingMode::Queued)]
fn connection_starts_in_connecting_state(#[case] mode: ProcessingMode) {
    let pair = Pair::new(
        ConnectionOptions::default().with_mode(mode),
        ConnectionOptions::default(),
    );
    assert_eq!(pair.client.state(), ConnectionState::Connecting);
    assert_eq!(pair.client.processing_mode(), mode);
    assert!(matches!(
        pair.client.send_event(&Notice {
            text: "early".to_owned()
        }),
        Err(ConnectionError::NotOpen {
            state: ConnectionState::Connecting
        })
    ));
    pair.client.start().expect("start client");
    pair.client.start().expect("second start is a no-op");
    assert!(pair.client.is_open());
}

#[test]
fn request_resolves_with_handler_response() {
    let pair = Pair::started(ConnectionOptions::default(), counting_server());
    let reply = pair
        .client
        .send_request(&CountRequest { count: 5 })
        .expect("send request");
    assert!(pair.client.is_awaiting(reply.correlation_id()));

    let response = reply.wait().expect("response arrives");
    assert!(response.is_success());
    assert_eq!(response.correlation_id(), Some(reply.correlation_id()));
    let payload: CountResponse = response.payload_as().expect("typed payload");
    assert_eq!(payload, CountResponse { code: 0, doubled: 10 });
    assert_eq!(pair.client.pending_len(), 0);
}

#[test]
fn response_callbacks_run_on_resolution() {
    let pair = Pair::started(ConnectionOptions::default(), counting_server());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let reply = pair
        .client
        .send_request(&CountRequest { count: 2 })
        .expect("send request");
    let sink = Arc::clone(&seen);
    reply.on_response(move |response| {
        sink.lock().expect("sink lock").push(response.code());
    });
    reply.wait().expect("response arrives");
    assert!(wait_until(|| seen.lock().expect("sink lock").len() == 1));
}

#[test]
fn events_reach_handlers_registered_on_a_live_connection() {
    let pair = Pair::started(ConnectionOptions::default(), ConnectionOptions::default());
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    pair.server
        .register_event_handler(move |connection: &Connection, notice: Notice| {
            assert!(connection.is_open());
            sink.lock().expect("sink lock").push(notice.text);
        })
        .expect("register notice handler");

    pair.client
        .send_event(&Notice {
            text: "hello".to_owned(),
        })
        .expect("send event");
    assert!(wait_until(|| received.lock().expect("sink lock").len() == 1));
    assert_eq!(received.lock().expect("sink lock")[0], "hello");
}

#[test]
fn missing_handler_is_reported_and_connection_stays_open() {
    let pair = Pair::started(ConnectionOptions::default(), ConnectionOptions::default());
    let errors = DispatchLog::default();
    errors.observe(&pair.server);

    pair.client
        .send_request(&UnhandledRequest)
        .expect("send request");

    assert!(wait_until(|| !errors.errors().is_empty()));
    assert!(errors.errors()[0].contains("test.unhandled"));
    assert!(pair.server.is_open());
    assert!(pair.client.is_open());
}

#[test]
fn graceful_close_delivers_reason_to_both_peers() {
    let pair = Pair::started(ConnectionOptions::default(), ConnectionOptions::default());
    let client_reasons = ReasonLog::default();
    let server_reasons = ReasonLog::default();
    client_reasons.observe(&pair.client);
    server_reasons.observe(&pair.server);

    let started = Instant::now();
    pair.client.close(CloseReason::custom("bye"));
    let elapsed = started.elapsed();

    assert_eq!(pair.client.state(), ConnectionState::Closed);
    assert_eq!(client_reasons.reasons(), vec![CloseReason::custom("bye")]);
    assert_eq!(server_reasons.reasons(), vec![CloseReason::custom("bye")]);
    assert!(
        elapsed < CLOSE_ACK_TIMEOUT,
        "acknowledgement should end the wait early, took {elapsed:?}"
    );
    assert!(wait_until(|| pair.server.state() == ConnectionState::Closed));
}

#[test]
fn close_is_idempotent() {
    let pair = Pair::started(ConnectionOptions::default(), ConnectionOptions::default());
    let reasons = ReasonLog::default();
    reasons.observe(&pair.client);

    pair.client.close(CloseReason::custom("first"));
    pair.client.close(CloseReason::custom("second"));
    pair.client.close_without_reason();

    assert_eq!(reasons.reasons(), vec![CloseReason::custom("first")]);
    assert!(matches!(
        pair.client.send_request(&CountRequest { count: 1 }),
        Err(ConnectionError::NotOpen {
            state: ConnectionState::Closed
        })
    ));
}

#[test]
fn close_fails_unanswered_requests_with_its_reason() {
    let pair = Pair::started(ConnectionOptions::default(), ConnectionOptions::default());
    let reply = pair
        .client
        .send_request(&UnhandledRequest)
        .expect("send request");

    pair.client.close(CloseReason::custom("done"));

    assert_eq!(
        reply.wait(),
        Err(RequestError::ConnectionClosed {
            reason: CloseReason::custom("done")
        })
    );
    assert_eq!(pair.client.pending_len(), 0);
}

#[test]
fn unanswered_request_times_out_the_connection() {
    let shield = ShieldConfig {
        response_timeout_ms: 200,
        ..ShieldConfig::default()
    };
    let pair = Pair::started(
        ConnectionOptions::default().with_shield(shield),
        ConnectionOptions::default(),
    );
    let reasons = ReasonLog::default();
    reasons.observe(&pair.client);

    let reply = pair
        .client
        .send_request(&UnhandledRequest)
        .expect("send request");

    let reason = reasons.wait_for_first().expect("client disconnects");
    assert_eq!(reason.code(), CloseCode::Timeout);
    assert!(matches!(reply.wait(), Err(RequestError::TimedOut { .. })));
    assert!(wait_until(|| pair.client.state() == ConnectionState::Closed));
}

#[test]
fn lifetime_limit_closes_the_connection() {
    let shield = ShieldConfig {
        life_time_ms: 300,
        ..ShieldConfig::default()
    };
    let pair = Pair::started(
        ConnectionOptions::default().with_shield(shield),
        ConnectionOptions::default(),
    );
    let reasons = ReasonLog::default();
    reasons.observe(&pair.client);

    let reason = reasons.wait_for_first().expect("client disconnects");
    assert_eq!(reason.code(), CloseCode::LifetimeExceeded);
}

#[test]
fn queued_connection_defers_dispatch_until_drained() {
    let pair = Pair::started(
        ConnectionOptions::default(),
        counting_server().with_mode(ProcessingMode::Queued),
    );
    let replies: Vec<_> = (1..=3)
        .map(|count| {
            pair.client
                .send_request(&CountRequest { count })
                .expect("send request")
        })
        .collect();

    assert!(wait_until(|| pair.server.queued_len() == 3));
    assert!(replies.iter().all(|reply| !reply.is_resolved()));

    assert!(pair.server.process_one().expect("drain one"));
    assert_eq!(pair.server.process_all().expect("drain rest"), 2);
    assert!(!pair.server.process_one().expect("empty queue"));

    for (reply, count) in replies.iter().zip(1..=3_u32) {
        let response = reply
            .wait_timeout(Duration::from_secs(2))
            .expect("resolved in time")
            .expect("successful response");
        let payload: CountResponse = response.payload_as().expect("typed payload");
        assert_eq!(payload.doubled, count * 2);
    }
}

#[test]
fn queued_drain_reports_every_failure() {
    let pair = Pair::started(
        ConnectionOptions::default(),
        counting_server().with_mode(ProcessingMode::Queued),
    );
    let errors = DispatchLog::default();
    errors.observe(&pair.server);

    pair.client
        .send_request(&UnhandledRequest)
        .expect("send first");
    pair.client
        .send_request(&CountRequest { count: 1 })
        .expect("send second");
    pair.client
        .send_request(&UnhandledRequest)
        .expect("send third");
    assert!(wait_until(|| pair.server.queued_len() == 3));

    let error = pair.server.process_all().expect_err("unhandled requests fail");
    assert!(matches!(error, DispatchError::NoHandler { .. }));
    assert_eq!(errors.errors().len(), 2);
    assert_eq!(pair.server.queued_len(), 0);
}

#[test]
fn queued_connection_completes_close_handshake_without_draining() {
    let pair = Pair::started(
        ConnectionOptions::default(),
        ConnectionOptions::default().with_mode(ProcessingMode::Queued),
    );
    let server_reasons = ReasonLog::default();
    server_reasons.observe(&pair.server);

    let started = Instant::now();
    pair.server.close(CloseReason::custom("queued bye"));
    assert!(started.elapsed() < CLOSE_ACK_TIMEOUT);
    assert_eq!(server_reasons.reasons(), vec![CloseReason::custom("queued bye")]);
    assert!(wait_until(|| pair.client.state() == ConnectionState::Closed));
}

#[test]
fn inbound_rate_limit_delays_but_admits_messages() {
    let shield = ShieldConfig {
        max_requests_per_second: 2,
        ..ShieldConfig::default()
    };
    let pair = Pair::started(
        ConnectionOptions::default(),
        counting_server().with_shield(shield),
    );

    let started = Instant::now();
    let replies: Vec<_> = (0..3)
        .map(|count| {
            pair.client
                .send_request(&CountRequest { count })
                .expect("send request")
        })
        .collect();
    for reply in &replies {
        reply.wait().expect("every request is eventually answered");
    }
    assert!(
        started.elapsed() >= Duration::from_millis(800),
        "third request should wait for the one-second window"
    );
    assert!(pair.server.is_open());
}

#[test]
fn vanished_peer_closes_with_internal_error() {
    let (connection, peer) = raw_peer(ConnectionOptions::default());
    let reasons = ReasonLog::default();
    reasons.observe(&connection);
    connection.start().expect("start client");

    drop(peer);

    let reason = reasons.wait_for_first().expect("client disconnects");
    assert_eq!(reason.code(), CloseCode::InternalError);
    assert!(wait_until(|| connection.state() == ConnectionState::Closed));
}

#[test]
fn stale_response_is_reported_as_unknown_correlation() {
    let (connection, mut peer) = raw_peer(ConnectionOptions::default());
    let errors = DispatchLog::default();
    errors.observe(&connection);
    connection.start().expect("start client");

    let stale = Response::ok().stamped(CorrelationId::fresh());
    Envelope::response(&stale)
        .expect("encode response")
        .write_to(&mut peer)
        .expect("write stale response");

    assert!(wait_until(|| !errors.errors().is_empty()));
    assert!(errors.errors()[0].contains("no pending request"));
    assert!(connection.is_open());
    connection.abort(CloseReason::custom("test finished"));
}

#[test]
fn unresolvable_frames_are_skipped() {
    let (connection, mut peer) = raw_peer(ConnectionOptions::default());
    connection.start().expect("start client");

    let garbage = Envelope::new(crate::message::RESPONSE_TAG, "not json")
        .encode()
        .expect("encode garbage frame");
    peer.write_all(&garbage).expect("write garbage frame");
    Envelope::ping().write_to(&mut peer).expect("write ping");

    std::thread::sleep(Duration::from_millis(100));
    assert!(connection.is_open());
    connection.abort(CloseReason::custom("test finished"));
}

#[test]
fn close_sends_close_request_carrying_the_reason() {
    let (connection, mut peer) = raw_peer(ConnectionOptions::default());
    connection.start().expect("start client");

    let closer = connection.clone();
    let closing = std::thread::spawn(move || closer.close(CloseReason::custom("wire")));

    let envelope = loop {
        let envelope = Envelope::read_from(&mut peer).expect("read frame");
        if envelope.type_tag() != PING_TAG {
            break envelope;
        }
    };
    assert_eq!(envelope.type_tag(), CLOSE_TAG);
    let body: serde_json::Value = serde_json::from_str(envelope.body()).expect("json body");
    assert_eq!(body["payload"]["message"], "wire");
    assert_eq!(body["payload"]["code"], "Custom");

    closing.join().expect("close returns without acknowledgement");
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[rstest]
#[case(ShieldConfig { max_requests_per_second: 0, ..ShieldConfig::default() })]
#[case(ShieldConfig { max_requests_per_minute: 0, ..ShieldConfig::default() })]
fn shield_that_never_admits_is_rejected(#[case] shield: ShieldConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener address");
    let options = ConnectionOptions::default().with_shield(shield);

    assert!(matches!(
        Connection::connect(addr, options.clone()),
        Err(ConnectionError::Shield(ShieldConfigError::ZeroLimit { .. }))
    ));
    let stream = TcpStream::connect(addr).expect("connect loopback");
    assert!(matches!(
        Connection::from_stream(stream, options),
        Err(ConnectionError::Shield(_))
    ));
}

#[test]
fn endpoint_connections_resolve_before_connecting() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let port = listener.local_addr().expect("listener address").port();
    let shield = ShieldConfig {
        response_timeout_ms: 750,
        ..ShieldConfig::default()
    };

    let connection = Connection::connect_endpoint(
        &Endpoint::tcp("127.0.0.1", port),
        ConnectionOptions::default().with_shield(shield),
    )
    .expect("connect to endpoint");

    assert_eq!(connection.remote_addr().port(), port);
    assert_eq!(connection.state(), ConnectionState::Connecting);
    assert_eq!(connection.shield_config(), shield);
}

#[test]
fn supervisor_pings_an_idle_peer() {
    let (connection, mut peer) = raw_peer(ConnectionOptions::default());
    peer.set_read_timeout(Some(PING_INTERVAL + Duration::from_secs(2)))
        .expect("set read timeout");
    let started = Instant::now();
    connection.start().expect("start client");

    let envelope = Envelope::read_from(&mut peer).expect("ping arrives");
    let elapsed = started.elapsed();

    assert_eq!(envelope.type_tag(), PING_TAG);
    assert!(
        elapsed >= PING_INTERVAL,
        "ping sent before the interval elapsed: {elapsed:?}"
    );
    connection.abort(CloseReason::custom("test finished"));
}

#[test]
fn queued_connection_discards_pings() {
    let (connection, mut peer) =
        raw_peer(ConnectionOptions::default().with_mode(ProcessingMode::Queued));
    connection.start().expect("start client");

    for _ in 0..3 {
        Envelope::ping().write_to(&mut peer).expect("write ping");
    }
    Envelope::event(&Notice {
        text: "after pings".to_owned(),
    })
    .expect("encode event")
    .write_to(&mut peer)
    .expect("write event");

    assert!(wait_until(|| connection.queued_len() == 1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(connection.queued_len(), 1);
    connection.abort(CloseReason::custom("test finished"));
}

#[test]
fn requests_resolved_after_the_scan_do_not_time_out() {
    let pair = Pair::started(ConnectionOptions::default(), ConnectionOptions::default());
    let reasons = ReasonLog::default();
    reasons.observe(&pair.client);
    let reply = pair
        .client
        .send_request(&UnhandledRequest)
        .expect("send request");

    std::thread::sleep(Duration::from_millis(20));
    let threshold = Duration::from_millis(10);
    let expired = pair.client.shared.pending.timed_out_since(threshold);
    assert_eq!(expired.len(), 1);
    pair.client
        .shared
        .pending
        .remove(reply.correlation_id())
        .expect("still pending")
        .complete(Response::ok());

    assert_eq!(pair.client.fail_expired(expired, threshold), 0);
    assert!(pair.client.is_open());
    assert!(reasons.reasons().is_empty());
    assert_eq!(reply.wait(), Ok(Response::ok()));
}
