//! Behavioural tests for connection request, dispatch and close flows.

use std::cell::RefCell;

use blue_config::ShieldConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::tests::support::{
    CountRequest, CountResponse, DispatchLog, Pair, ReasonLog, UnhandledRequest,
    counting_registry, wait_until,
};
use crate::{CloseReason, ConnectionOptions, Message, ReplyHandle, RequestError, Response};

#[derive(Default)]
struct ConnectionWorld {
    pair: Option<Pair>,
    reply: Option<ReplyHandle>,
    client_reasons: ReasonLog,
    server_reasons: ReasonLog,
    server_errors: DispatchLog,
}

impl ConnectionWorld {
    fn connect(&mut self, client: ConnectionOptions) {
        let pair = Pair::new(
            client,
            ConnectionOptions::default().with_registry(counting_registry()),
        );
        self.client_reasons.observe(&pair.client);
        self.server_reasons.observe(&pair.server);
        self.server_errors.observe(&pair.server);
        pair.server.start().expect("start server");
        pair.client.start().expect("start client");
        self.pair = Some(pair);
    }

    fn pair(&self) -> &Pair {
        self.pair.as_ref().expect("pair should be connected")
    }

    fn wait_for_reply(&self) -> Result<Response, RequestError> {
        self.reply.as_ref().expect("request should be sent").wait()
    }
}

#[fixture]
fn world() -> RefCell<ConnectionWorld> {
    RefCell::new(ConnectionWorld::default())
}

#[given("a connected pair serving count requests")]
fn given_pair(world: &RefCell<ConnectionWorld>) {
    world.borrow_mut().connect(ConnectionOptions::default());
}

#[given("a client whose requests time out after {timeout} ms")]
fn given_impatient_client(world: &RefCell<ConnectionWorld>, timeout: u64) {
    let shield = ShieldConfig {
        response_timeout_ms: timeout,
        ..ShieldConfig::default()
    };
    world
        .borrow_mut()
        .connect(ConnectionOptions::default().with_shield(shield));
}

#[when("the client requests the count {count}")]
fn when_count_requested(world: &RefCell<ConnectionWorld>, count: u32) {
    let reply = world
        .borrow()
        .pair()
        .client
        .send_request(&CountRequest { count })
        .expect("send count request");
    world.borrow_mut().reply = Some(reply);
}

#[when("the client sends a request nobody handles")]
fn when_unhandled_sent(world: &RefCell<ConnectionWorld>) {
    let reply = world
        .borrow()
        .pair()
        .client
        .send_request(&UnhandledRequest)
        .expect("send unhandled request");
    world.borrow_mut().reply = Some(reply);
}

#[when("the client closes with reason {reason}")]
fn when_client_closes(world: &RefCell<ConnectionWorld>, reason: String) {
    world.borrow().pair().client.close(CloseReason::custom(reason));
}

#[then("the reply carries the doubled count {doubled}")]
fn then_reply_doubled(world: &RefCell<ConnectionWorld>, doubled: u32) {
    let response = world.borrow().wait_for_reply().expect("response arrives");
    let payload: CountResponse = response.payload_as().expect("typed payload");
    assert_eq!(payload.doubled, doubled);
}

#[then("the server reports a missing handler")]
fn then_missing_handler(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    assert!(wait_until(|| !world.server_errors.errors().is_empty()));
    assert!(world.server_errors.errors()[0].contains(UnhandledRequest::TYPE_TAG));
}

#[then("both peers stay open")]
fn then_both_open(world: &RefCell<ConnectionWorld>) {
    let world = world.borrow();
    assert!(world.pair().client.is_open());
    assert!(world.pair().server.is_open());
}

#[then("the client disconnects with code {code}")]
fn then_client_disconnects(world: &RefCell<ConnectionWorld>, code: String) {
    let reason = world
        .borrow()
        .client_reasons
        .wait_for_first()
        .expect("client disconnects");
    assert_eq!(reason.code().to_string(), code);
}

#[then("both peers saw the reason {reason}")]
fn then_both_saw_reason(world: &RefCell<ConnectionWorld>, reason: String) {
    let world = world.borrow();
    let expected = CloseReason::custom(reason);
    assert_eq!(world.client_reasons.reasons(), vec![expected.clone()]);
    assert!(wait_until(|| !world.server_reasons.reasons().is_empty()));
    assert_eq!(world.server_reasons.reasons(), vec![expected]);
}

#[scenario(
    path = "tests/features/connection.feature",
    name = "Request resolves with its response"
)]
fn request_resolves(world: RefCell<ConnectionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/connection.feature",
    name = "Missing handler is reported without closing"
)]
fn missing_handler_reported(world: RefCell<ConnectionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/connection.feature",
    name = "Unanswered request closes the connection"
)]
fn unanswered_request_closes(world: RefCell<ConnectionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/connection.feature",
    name = "Graceful close delivers the reason to both peers"
)]
fn graceful_close(world: RefCell<ConnectionWorld>) {
    drop(world);
}
