//! In-memory stand-ins for the underlying client, and recording
//! interceptors, shared by the unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::client::{
    ConsumerGroupSession, RawAsyncProducer, RawClaim, RawSyncProducer,
};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::interceptor::ProducerInterceptor;
use crate::message::{ConsumerMessage, ProducerError, ProducerMessage};

pub(crate) type Log = Arc<Mutex<Vec<String>>>;

/// Context value the recorder prints, so tests can tell contexts apart.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Tag(pub &'static str);

fn value_of(msg: &ProducerMessage) -> String {
    msg.value.as_ref().map(|v| String::from_utf8_lossy(v).into_owned()).unwrap_or_default()
}

// ── Interceptors ─────────────────────────────────────────────────────────────

/// Logs `NAME.before:VALUE` and `NAME.after:VALUE:TAG:ok|err`.
pub(crate) struct Recorder {
    name: &'static str,
    log: Log,
}

impl Recorder {
    pub(crate) fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub(crate) fn new(name: &'static str, log: &Log) -> Self {
        Self { name, log: Arc::clone(log) }
    }
}

impl ProducerInterceptor for Recorder {
    fn before(&self, _ctx: &Context, msg: &mut ProducerMessage) {
        self.log.lock().push(format!("{}.before:{}", self.name, value_of(msg)));
    }

    fn after(&self, ctx: &Context, msg: &mut ProducerMessage, err: Option<&Error>) {
        let tag = ctx.get::<Tag>().map_or("-", |t| t.0);
        let outcome = if err.is_some() { "err" } else { "ok" };
        self.log.lock().push(format!("{}.after:{}:{tag}:{outcome}", self.name, value_of(msg)));
    }
}

/// Writes a `stamp` header in `before`.
pub(crate) struct Stamp(pub &'static str);

impl ProducerInterceptor for Stamp {
    fn before(&self, _ctx: &Context, msg: &mut ProducerMessage) {
        msg.headers.push(crate::message::Header::new("stamp", self.0));
    }

    fn after(&self, _ctx: &Context, _msg: &mut ProducerMessage, _err: Option<&Error>) {}
}

/// Panics in one of its hooks.
pub(crate) enum Explode {
    InBefore,
    InAfter,
}

impl ProducerInterceptor for Explode {
    fn before(&self, _ctx: &Context, _msg: &mut ProducerMessage) {
        if let Self::InBefore = self {
            panic!("before blew up");
        }
    }

    fn after(&self, _ctx: &Context, _msg: &mut ProducerMessage, _err: Option<&Error>) {
        if let Self::InAfter = self {
            panic!("after blew up");
        }
    }
}

// ── Sync producer ────────────────────────────────────────────────────────────

/// Logs `send:VALUE` and assigns consecutive offsets on partition 0.
pub(crate) struct MockSyncProducer {
    log: Log,
    fail_with: Option<&'static str>,
    stalled: bool,
    sent: Mutex<Vec<ProducerMessage>>,
}

impl MockSyncProducer {
    pub(crate) fn new(log: &Log) -> Self {
        Self { log: Arc::clone(log), fail_with: None, stalled: false, sent: Mutex::new(Vec::new()) }
    }

    pub(crate) fn failing(mut self, reason: &'static str) -> Self {
        self.fail_with = Some(reason);
        self
    }

    /// Accepts messages but never answers.
    pub(crate) fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    async fn outcome(&self) -> Result<()> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        match self.fail_with {
            Some(reason) => Err(Error::client(reason)),
            None => Ok(()),
        }
    }

    /// The `stamp` header of every message sent so far.
    pub(crate) fn sent_headers(&self) -> Vec<Option<String>> {
        self.sent
            .lock()
            .iter()
            .map(|m| m.header_value("stamp").map(|v| String::from_utf8_lossy(v).into_owned()))
            .collect()
    }

    fn send_one(&self, msg: &mut ProducerMessage) {
        self.log.lock().push(format!("send:{}", value_of(msg)));
        let mut sent = self.sent.lock();
        msg.partition = 0;
        msg.offset = sent.len() as i64;
        sent.push(msg.clone());
    }
}

#[async_trait]
impl RawSyncProducer for MockSyncProducer {
    async fn send_message(&self, msg: &mut ProducerMessage) -> Result<(i32, i64)> {
        self.send_one(msg);
        self.outcome().await?;
        Ok((msg.partition, msg.offset))
    }

    async fn send_messages(&self, msgs: &mut [ProducerMessage]) -> Result<()> {
        for msg in msgs.iter_mut() {
            self.send_one(msg);
        }
        self.outcome().await
    }
}

// ── Async producer ───────────────────────────────────────────────────────────

type Outcomes = Option<(mpsc::Sender<ProducerMessage>, mpsc::Sender<ProducerError>)>;

struct Shared {
    outcomes: Mutex<Outcomes>,
    close_calls: Mutex<Vec<&'static str>>,
    closed: Notify,
}

/// Client half: owned by the pipeline under test.
pub(crate) struct MockAsyncProducer {
    input: mpsc::Sender<ProducerMessage>,
    successes: Option<mpsc::Receiver<ProducerMessage>>,
    errors: Option<mpsc::Receiver<ProducerError>>,
    close_error: Option<&'static str>,
    shared: Arc<Shared>,
}

/// Broker half: driven by the test to observe sends and report outcomes.
pub(crate) struct MockBroker {
    received: mpsc::Receiver<ProducerMessage>,
    shared: Arc<Shared>,
}

impl MockAsyncProducer {
    pub(crate) fn new() -> (Self, MockBroker) {
        Self::with_input_capacity(16)
    }

    /// A client whose input holds at most `capacity` unread messages.
    pub(crate) fn with_input_capacity(capacity: usize) -> (Self, MockBroker) {
        let (input, received) = mpsc::channel(capacity);
        let (ok_tx, ok_rx) = mpsc::channel(16);
        let (err_tx, err_rx) = mpsc::channel(16);
        let shared = Arc::new(Shared {
            outcomes: Mutex::new(Some((ok_tx, err_tx))),
            close_calls: Mutex::new(Vec::new()),
            closed: Notify::new(),
        });
        let client = Self {
            input,
            successes: Some(ok_rx),
            errors: Some(err_rx),
            close_error: None,
            shared: Arc::clone(&shared),
        };
        (client, MockBroker { received, shared })
    }

    pub(crate) fn close_fails_with(mut self, reason: &'static str) -> Self {
        self.close_error = Some(reason);
        self
    }

    fn shut(&self, call: &'static str) {
        self.shared.close_calls.lock().push(call);
        // Ends both outcome streams.
        self.shared.outcomes.lock().take();
        self.shared.closed.notify_one();
    }
}

#[async_trait]
impl RawAsyncProducer for MockAsyncProducer {
    fn input(&self) -> mpsc::Sender<ProducerMessage> {
        self.input.clone()
    }

    fn take_successes(&mut self) -> mpsc::Receiver<ProducerMessage> {
        self.successes.take().expect("successes taken twice")
    }

    fn take_errors(&mut self) -> mpsc::Receiver<ProducerError> {
        self.errors.take().expect("errors taken twice")
    }

    async fn close(self) -> Result<()> {
        self.shut("close");
        match self.close_error {
            Some(reason) => Err(Error::client(reason)),
            None => Ok(()),
        }
    }

    fn async_close(self) {
        self.shut("async_close");
    }
}

impl MockBroker {
    pub(crate) async fn received(&mut self) -> ProducerMessage {
        self.received.recv().await.expect("client input closed")
    }

    /// `None` once the client and every handle to its input are gone.
    pub(crate) async fn try_received(&mut self) -> Option<ProducerMessage> {
        self.received.recv().await
    }

    pub(crate) async fn succeed(&self, msg: ProducerMessage) {
        let tx = self.shared.outcomes.lock().as_ref().map(|(ok, _)| ok.clone());
        tx.expect("client already closed").send(msg).await.expect("success stream closed");
    }

    pub(crate) async fn fail(&self, msg: ProducerMessage, reason: &'static str) {
        let tx = self.shared.outcomes.lock().as_ref().map(|(_, err)| err.clone());
        tx.expect("client already closed")
            .send(ProducerError { message: msg, error: Error::client(reason) })
            .await
            .expect("error stream closed");
    }

    pub(crate) fn close_calls(&self) -> Vec<&'static str> {
        self.shared.close_calls.lock().clone()
    }

    pub(crate) async fn wait_closed(&self) {
        self.shared.closed.notified().await;
    }

    /// Stops reading the client's input, as a crashed client would.
    pub(crate) fn hang_up(self) {}
}

// ── Consumer ─────────────────────────────────────────────────────────────────

pub(crate) struct MockClaim {
    topic: String,
    partition: i32,
    messages: Option<mpsc::Receiver<ConsumerMessage>>,
}

impl MockClaim {
    /// A claim plus the sender that feeds it; dropping the sender revokes
    /// the partition.
    pub(crate) fn new(topic: &str, partition: i32) -> (Self, mpsc::Sender<ConsumerMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let claim = Self { topic: topic.to_owned(), partition, messages: Some(rx) };
        (claim, tx)
    }
}

impl RawClaim for MockClaim {
    fn topic(&self) -> &str { &self.topic }
    fn partition(&self) -> i32 { self.partition }
    fn initial_offset(&self) -> i64 { 0 }
    fn high_water_mark_offset(&self) -> i64 { 100 }

    fn messages(&mut self) -> mpsc::Receiver<ConsumerMessage> {
        self.messages.take().expect("messages taken twice")
    }
}

pub(crate) fn consumer_message(topic: &str, offset: i64, value: &'static str) -> ConsumerMessage {
    ConsumerMessage {
        topic: topic.to_owned(),
        offset,
        value: Some(value.into()),
        ..ConsumerMessage::default()
    }
}

#[derive(Default)]
pub(crate) struct MockSession {
    pub(crate) marked: Mutex<Vec<i64>>,
}

impl ConsumerGroupSession for MockSession {
    fn member_id(&self) -> &str { "member-1" }
    fn generation_id(&self) -> i32 { 1 }

    fn mark_message(&self, msg: &ConsumerMessage, _metadata: &str) {
        self.marked.lock().push(msg.offset);
    }
}
