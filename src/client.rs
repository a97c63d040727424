//! What tether needs from the underlying pub/sub client.
//!
//! tether never talks to a broker. It wraps a client that already does, and
//! that client only has to provide the handful of operations below. Once a
//! client is handed to a wrapper, the wrapper owns it: nothing else may send
//! through it or close it.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::message::{ConsumerMessage, ProducerError, ProducerMessage};

/// A client that sends one message (or one batch) and waits for the broker.
#[async_trait]
pub trait RawSyncProducer: Send + Sync + 'static {
    /// Sends `msg` and returns the partition and offset it was written to.
    async fn send_message(&self, msg: &mut ProducerMessage) -> Result<(i32, i64)>;

    async fn send_messages(&self, msgs: &mut [ProducerMessage]) -> Result<()>;
}

/// A client that accepts messages on a channel and reports outcomes later,
/// on two separate streams, in whatever order the broker answers.
#[async_trait]
pub trait RawAsyncProducer: Send + 'static {
    fn input(&self) -> mpsc::Sender<ProducerMessage>;

    /// Hands over the success stream. Called once.
    ///
    /// The stream must end once [`close`](RawAsyncProducer::close) or
    /// [`async_close`](RawAsyncProducer::async_close) has finished flushing.
    fn take_successes(&mut self) -> mpsc::Receiver<ProducerMessage>;

    /// Hands over the error stream. Called once, same ending rule as
    /// [`take_successes`](RawAsyncProducer::take_successes).
    fn take_errors(&mut self) -> mpsc::Receiver<ProducerError>;

    /// Flushes buffered messages and shuts down.
    async fn close(self) -> Result<()>;

    /// Starts shutting down without waiting.
    fn async_close(self);
}

/// One partition's message stream within a consumer-group session.
pub trait RawClaim: Send + 'static {
    fn topic(&self) -> &str;
    fn partition(&self) -> i32;
    fn initial_offset(&self) -> i64;
    fn high_water_mark_offset(&self) -> i64;

    /// Hands over the message stream. Called once; the stream closes when
    /// the partition is revoked.
    fn messages(&mut self) -> mpsc::Receiver<ConsumerMessage>;
}

/// The consumer-group session a claim belongs to.
pub trait ConsumerGroupSession: Send + Sync {
    fn member_id(&self) -> &str;
    fn generation_id(&self) -> i32;

    /// Marks `msg` as consumed so its offset is committed.
    fn mark_message(&self, msg: &ConsumerMessage, metadata: &str);
}

/// The handler the underlying consumer group drives.
#[async_trait]
pub trait RawConsumerGroupHandler: Send + Sync + 'static {
    async fn setup(&self, session: &dyn ConsumerGroupSession) -> Result<()>;

    async fn cleanup(&self, session: &dyn ConsumerGroupSession) -> Result<()>;

    async fn consume_claim(
        &self,
        session: &dyn ConsumerGroupSession,
        claim: Box<dyn RawClaim>,
    ) -> Result<()>;
}
