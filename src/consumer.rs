//! Context-aware consumer-group handling.
//!
//! The underlying consumer group drives a [`RawConsumerGroupHandler`]. Wrap
//! your own [`ConsumerGroupHandler`] with [`wrap_consumer_group_handler`]
//! and hand the result to the client: setup and cleanup pass straight
//! through, and every claimed partition reaches your handler as a
//! [`ConsumerGroupClaim`] yielding [`ConsumerEnvelope`]s that have been run
//! through the configured consumer interceptors.
//!
//! One forwarding task runs per claim. It reads a raw message, wraps it in
//! an envelope with a fresh background context, and drives the interceptor
//! chain to completion before reading the next one, so delivery order is
//! the partition's order. When the partition is revoked the task ends and
//! the claim's stream closes.

use std::panic;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::{ConsumerGroupSession, RawClaim, RawConsumerGroupHandler};
use crate::config::Config;
use crate::context::Context;
use crate::error::Result;
use crate::interceptor::Chain;
use crate::message::{ConsumerEnvelope, ConsumerMessage};

// ── Claim ─────────────────────────────────────────────────────────────────────

/// One partition's intercepted message stream.
///
/// Offsets are a snapshot taken when the claim started.
pub struct ConsumerGroupClaim {
    topic: String,
    partition: i32,
    initial_offset: i64,
    high_water_mark_offset: i64,
    messages: mpsc::Receiver<ConsumerEnvelope>,
    forwarder: JoinHandle<()>,
}

impl ConsumerGroupClaim {
    /// Starts forwarding `claim` through the config's consumer interceptors.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(mut claim: Box<dyn RawClaim>, config: &Config) -> Self {
        let (tx, messages) = mpsc::channel(config.claim_capacity());
        let probe = tx.clone();
        let chain = Chain::new(Arc::clone(&config.consumer_interceptors), tx);

        let topic = claim.topic().to_owned();
        let partition = claim.partition();
        let raw = claim.messages();
        let forwarder = tokio::spawn(forward(raw, chain, probe, topic.clone(), partition));

        Self {
            topic,
            partition,
            initial_offset: claim.initial_offset(),
            high_water_mark_offset: claim.high_water_mark_offset(),
            messages,
            forwarder,
        }
    }

    pub fn topic(&self) -> &str { &self.topic }
    pub fn partition(&self) -> i32 { self.partition }
    pub fn initial_offset(&self) -> i64 { self.initial_offset }
    pub fn high_water_mark_offset(&self) -> i64 { self.high_water_mark_offset }

    /// The next delivered envelope, or `None` once the partition has been
    /// revoked and every envelope in flight has been delivered.
    pub async fn recv(&mut self) -> Option<ConsumerEnvelope> {
        self.messages.recv().await
    }

    /// Stops receiving and waits for the forwarding task, resuming any
    /// interceptor panic on the caller.
    async fn finish(self) {
        let Self { messages, forwarder, .. } = self;
        drop(messages);
        if let Err(e) = forwarder.await {
            if e.is_panic() {
                panic::resume_unwind(e.into_panic());
            }
        }
    }
}

async fn forward(
    mut raw: mpsc::Receiver<ConsumerMessage>,
    chain: Arc<Chain>,
    probe: mpsc::Sender<ConsumerEnvelope>,
    topic: String,
    partition: i32,
) {
    debug!(%topic, partition, "claim forwarding started");
    loop {
        let message = tokio::select! {
            biased;

            () = probe.closed() => {
                debug!(%topic, partition, "claim dropped by the application");
                break;
            }

            message = raw.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let envelope = ConsumerEnvelope::new(Context::background(), message);
        chain.head().run(envelope).await;
    }
    debug!(%topic, partition, "claim forwarding stopped");
}

// ── Handler ───────────────────────────────────────────────────────────────────

/// Application-side consumer-group handler.
///
/// The same shape as [`RawConsumerGroupHandler`], except that claims arrive
/// already wrapped.
#[async_trait]
pub trait ConsumerGroupHandler: Send + Sync + 'static {
    async fn setup(&self, _session: &dyn ConsumerGroupSession) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self, _session: &dyn ConsumerGroupSession) -> Result<()> {
        Ok(())
    }

    /// Processes one partition. Typically loops on
    /// [`ConsumerGroupClaim::recv`] until it returns `None`.
    async fn consume_claim(
        &self,
        session: &dyn ConsumerGroupSession,
        claim: &mut ConsumerGroupClaim,
    ) -> Result<()>;
}

/// Adapter returned by [`wrap_consumer_group_handler`].
pub struct ContextHandler<H> {
    handler: H,
    config: Arc<Config>,
}

/// Wraps `handler` so the underlying consumer group can drive it.
pub fn wrap_consumer_group_handler<H: ConsumerGroupHandler>(
    handler: H,
    config: Arc<Config>,
) -> ContextHandler<H> {
    ContextHandler { handler, config }
}

impl<H> ContextHandler<H> {
    pub fn get_ref(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<H: ConsumerGroupHandler> RawConsumerGroupHandler for ContextHandler<H> {
    async fn setup(&self, session: &dyn ConsumerGroupSession) -> Result<()> {
        self.handler.setup(session).await
    }

    async fn cleanup(&self, session: &dyn ConsumerGroupSession) -> Result<()> {
        self.handler.cleanup(session).await
    }

    async fn consume_claim(
        &self,
        session: &dyn ConsumerGroupSession,
        claim: Box<dyn RawClaim>,
    ) -> Result<()> {
        let mut claim = ConsumerGroupClaim::new(claim, &self.config);
        let result = self.handler.consume_claim(session, &mut claim).await;
        claim.finish().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::interceptor::Next;
    use crate::testing::{MockClaim, MockSession, Tag, consumer_message};

    fn values(envelopes: &[ConsumerEnvelope]) -> Vec<String> {
        envelopes
            .iter()
            .map(|e| String::from_utf8_lossy(e.message.value.as_deref().unwrap_or_default()).into_owned())
            .collect()
    }

    async fn drain(claim: &mut ConsumerGroupClaim) -> Vec<ConsumerEnvelope> {
        let mut out = Vec::new();
        while let Some(envelope) = claim.recv().await {
            out.push(envelope);
        }
        out
    }

    #[tokio::test]
    async fn delivers_in_receive_order_and_closes_on_revoke() {
        let (raw, feed) = MockClaim::new("orders", 3);
        let config = Config::builder()
            .with_consumer_interceptor(|env: ConsumerEnvelope, next: Next| next.run(env))
            .with_consumer_interceptor(|env: ConsumerEnvelope, next: Next| next.run(env))
            .build();
        let mut claim = ConsumerGroupClaim::new(Box::new(raw), &config);

        assert_eq!(claim.topic(), "orders");
        assert_eq!(claim.partition(), 3);
        assert_eq!(claim.initial_offset(), 0);
        assert_eq!(claim.high_water_mark_offset(), 100);

        let producer = tokio::spawn(async move {
            for (i, v) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
                feed.send(consumer_message("orders", i as i64, v)).await.unwrap();
            }
        });

        let got = drain(&mut claim).await;
        producer.await.unwrap();
        assert_eq!(values(&got), ["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn tag_then_filter_delivers_survivors_in_order() {
        let (raw, feed) = MockClaim::new("orders", 0);
        let config = Config::builder()
            .with_consumer_interceptor(|env: ConsumerEnvelope, next: Next| async move {
                let context = env.context.with_value(Tag("c1"));
                next.run(ConsumerEnvelope { context, ..env }).await;
            })
            .with_consumer_interceptor(|env: ConsumerEnvelope, next: Next| async move {
                if env.message.value.as_deref() != Some(&b"2"[..]) {
                    next.run(env).await;
                }
            })
            .build();
        let mut claim = ConsumerGroupClaim::new(Box::new(raw), &config);

        for (offset, v) in [(0, "1"), (1, "2"), (2, "3")] {
            feed.send(consumer_message("orders", offset, v)).await.unwrap();
        }
        drop(feed);

        let got = drain(&mut claim).await;
        assert_eq!(values(&got), ["1", "3"]);
        assert!(got.iter().all(|e| e.context.get::<Tag>() == Some(&Tag("c1"))));
    }

    #[tokio::test]
    async fn dropped_message_never_reaches_later_interceptors() {
        let (raw, feed) = MockClaim::new("orders", 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let later = Arc::clone(&seen);
        let config = Config::builder()
            .with_consumer_interceptor(|env: ConsumerEnvelope, next: Next| async move {
                if env.message.offset != 1 {
                    next.run(env).await;
                }
            })
            .with_consumer_interceptor(move |env: ConsumerEnvelope, next: Next| {
                let later = Arc::clone(&later);
                async move {
                    later.lock().push(env.message.offset);
                    next.run(env).await;
                }
            })
            .build();
        let mut claim = ConsumerGroupClaim::new(Box::new(raw), &config);

        for offset in 0..3 {
            feed.send(consumer_message("orders", offset, "x")).await.unwrap();
        }
        drop(feed);
        drain(&mut claim).await;

        assert_eq!(*seen.lock(), [0, 2]);
    }

    #[tokio::test]
    async fn envelopes_start_with_background_context() {
        let (raw, feed) = MockClaim::new("orders", 0);
        let mut claim = ConsumerGroupClaim::new(Box::new(raw), &Config::default());

        feed.send(consumer_message("orders", 0, "x")).await.unwrap();
        let envelope = claim.recv().await.unwrap();
        assert!(envelope.context.get::<Tag>().is_none());
    }

    #[tokio::test]
    async fn dropping_the_claim_stops_forwarding() {
        let (raw, feed) = MockClaim::new("orders", 0);
        let claim = ConsumerGroupClaim::new(Box::new(raw), &Config::default());

        drop(claim);
        tokio::time::timeout(Duration::from_secs(5), feed.closed())
            .await
            .expect("forwarding task kept the partition open");
    }

    struct Collect {
        seen: Mutex<Vec<i64>>,
        setups: Mutex<u32>,
    }

    #[async_trait]
    impl ConsumerGroupHandler for Collect {
        async fn setup(&self, _session: &dyn ConsumerGroupSession) -> Result<()> {
            *self.setups.lock() += 1;
            Ok(())
        }

        async fn consume_claim(
            &self,
            session: &dyn ConsumerGroupSession,
            claim: &mut ConsumerGroupClaim,
        ) -> Result<()> {
            while let Some(envelope) = claim.recv().await {
                self.seen.lock().push(envelope.message.offset);
                session.mark_message(&envelope.message, "");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_adapter_delegates_and_wraps_claims() {
        let handler = wrap_consumer_group_handler(
            Collect { seen: Mutex::new(Vec::new()), setups: Mutex::new(0) },
            Arc::new(Config::default()),
        );
        let session = MockSession::default();

        handler.setup(&session).await.unwrap();
        handler.cleanup(&session).await.unwrap();

        let (raw, feed) = MockClaim::new("orders", 0);
        for offset in 0..3 {
            feed.send(consumer_message("orders", offset, "x")).await.unwrap();
        }
        drop(feed);
        handler.consume_claim(&session, Box::new(raw)).await.unwrap();

        assert_eq!(*handler.get_ref().setups.lock(), 1);
        assert_eq!(*handler.get_ref().seen.lock(), [0, 1, 2]);
        assert_eq!(*session.marked.lock(), [0, 1, 2]);
    }

    async fn explode(_env: ConsumerEnvelope, _next: Next) {
        panic!("interceptor blew up");
    }

    #[tokio::test]
    #[should_panic(expected = "interceptor blew up")]
    async fn interceptor_panic_reaches_consume_claim_caller() {
        let config = Config::builder().with_consumer_interceptor(explode).build();
        let handler = wrap_consumer_group_handler(
            Collect { seen: Mutex::new(Vec::new()), setups: Mutex::new(0) },
            Arc::new(config),
        );
        let session = MockSession::default();

        let (raw, feed) = MockClaim::new("orders", 0);
        feed.send(consumer_message("orders", 0, "x")).await.unwrap();
        drop(feed);
        let _ = handler.consume_claim(&session, Box::new(raw)).await;
    }
}
