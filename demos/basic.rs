//! Minimal tether demo: an in-process loopback "broker", a traced async
//! producer and a traced consumer group handler.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Every produced message gets a `kafka.produce` span and a `trace-id`
//! header; the consumer side opens a `kafka.consume` span and finds the same
//! trace id in the envelope's context.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tether::client::{ConsumerGroupSession, RawAsyncProducer, RawClaim, RawConsumerGroupHandler};
use tether::middleware::trace::{TraceConsumerInterceptor, TraceId, TraceProducerInterceptor};
use tether::{
    AsyncProducer, Config, ConsumerGroupClaim, ConsumerGroupHandler, ConsumerMessage, Context,
    ProducerEnvelope, ProducerError, ProducerMessage, wrap_consumer_group_handler,
};

const TOPIC: &str = "example";

#[tokio::main]
async fn main() -> tether::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Arc::new(
        Config::builder()
            .with_producer_interceptor(TraceProducerInterceptor::new())
            .with_consumer_interceptor(TraceConsumerInterceptor)
            .build(),
    );

    let (client, claim) = loopback();

    // Consumer: one claim, driven the way a consumer group would drive it.
    let handler = wrap_consumer_group_handler(Printer, Arc::clone(&config));
    let consumer = tokio::spawn(async move {
        let session = Session;
        handler.setup(&session).await?;
        handler.consume_claim(&session, Box::new(claim)).await?;
        handler.cleanup(&session).await
    });

    // Producer: five messages, each under its own request context.
    let producer = AsyncProducer::new(client, config);
    let input = producer.input();
    for n in 0..5 {
        let trace_id = TraceId::new();
        println!("produce {trace_id}");
        let ctx = Context::background().with_value(trace_id);
        let msg = ProducerMessage::new(TOPIC).value(format!("message {n}"));
        input.send(ProducerEnvelope::new(ctx, msg)).await;
    }
    producer.close().await?;

    consumer.await.expect("consumer task panicked")
}

// ── Consumer handler ──────────────────────────────────────────────────────────

struct Printer;

#[async_trait]
impl ConsumerGroupHandler for Printer {
    async fn consume_claim(
        &self,
        session: &dyn ConsumerGroupSession,
        claim: &mut ConsumerGroupClaim,
    ) -> tether::Result<()> {
        while let Some(envelope) = claim.recv().await {
            let trace_id = TraceId::from_context(&envelope.context)
                .map_or_else(|| "-".to_owned(), |id| id.to_string());
            println!("consume {trace_id} offset={}", envelope.message.offset);
            session.mark_message(&envelope.message, "");
        }
        Ok(())
    }
}

struct Session;

impl ConsumerGroupSession for Session {
    fn member_id(&self) -> &str { "demo" }
    fn generation_id(&self) -> i32 { 1 }
    fn mark_message(&self, _msg: &ConsumerMessage, _metadata: &str) {}
}

// ── Loopback broker ───────────────────────────────────────────────────────────

/// Acknowledges every produced message and replays it on a single-partition
/// claim. Closing the producer revokes the claim.
struct Loopback {
    input: mpsc::Sender<ProducerMessage>,
    successes: Option<mpsc::Receiver<ProducerMessage>>,
    errors: Option<mpsc::Receiver<ProducerError>>,
    broker: tokio::task::JoinHandle<()>,
}

struct LoopbackClaim {
    messages: Option<mpsc::Receiver<ConsumerMessage>>,
}

fn loopback() -> (Loopback, LoopbackClaim) {
    let (input, mut received) = mpsc::channel::<ProducerMessage>(16);
    let (ok_tx, ok_rx) = mpsc::channel(16);
    let (err_tx, err_rx) = mpsc::channel::<ProducerError>(16);
    let (log_tx, log_rx) = mpsc::channel(16);

    let broker = tokio::spawn(async move {
        // The loopback never fails a send; the error stream just ends with it.
        let _errors = err_tx;
        let mut offset = 0;
        while let Some(mut msg) = received.recv().await {
            msg.partition = 0;
            msg.offset = offset;
            offset += 1;
            let replay = ConsumerMessage {
                topic: msg.topic.clone(),
                partition: 0,
                offset: msg.offset,
                key: msg.key.clone(),
                value: msg.value.clone(),
                headers: msg.headers.clone(),
                timestamp: Some(std::time::SystemTime::now()),
            };
            if ok_tx.send(msg).await.is_err() || log_tx.send(replay).await.is_err() {
                break;
            }
        }
    });

    let client = Loopback { input, successes: Some(ok_rx), errors: Some(err_rx), broker };
    (client, LoopbackClaim { messages: Some(log_rx) })
}

#[async_trait]
impl RawAsyncProducer for Loopback {
    fn input(&self) -> mpsc::Sender<ProducerMessage> {
        self.input.clone()
    }

    fn take_successes(&mut self) -> mpsc::Receiver<ProducerMessage> {
        self.successes.take().expect("successes taken twice")
    }

    fn take_errors(&mut self) -> mpsc::Receiver<ProducerError> {
        self.errors.take().expect("errors taken twice")
    }

    async fn close(self) -> tether::Result<()> {
        let Self { input, broker, .. } = self;
        drop(input);
        broker.await.map_err(tether::Error::client)
    }

    fn async_close(self) {
        drop(self.input);
    }
}

impl RawClaim for LoopbackClaim {
    fn topic(&self) -> &str { TOPIC }
    fn partition(&self) -> i32 { 0 }
    fn initial_offset(&self) -> i64 { 0 }
    fn high_water_mark_offset(&self) -> i64 { 0 }

    fn messages(&mut self) -> mpsc::Receiver<ConsumerMessage> {
        self.messages.take().expect("messages taken twice")
    }
}
