//! Producer and consumer interceptor contracts, and the consumer chain.
//!
//! # Producer side
//!
//! A [`ProducerInterceptor`] is an observer with two hooks, `before` and
//! `after`. Registered interceptors form a flat list and are always called
//! in registration order, for both hooks.
//!
//! # Consumer side
//!
//! A [`ConsumerInterceptor`] wraps delivery instead of observing it. It gets
//! the envelope and a [`Next`] continuation and decides whether, when, and
//! with what envelope to call [`Next::run`]. Not calling it drops the
//! message.
//!
//! Any async closure with the right shape is an interceptor:
//!
//! ```rust
//! use tether::{Config, ConsumerEnvelope, Next};
//!
//! let config = Config::builder()
//!     .with_consumer_interceptor(|env: ConsumerEnvelope, next: Next| async move {
//!         if env.message.value.is_some() {
//!             next.run(env).await;
//!         }
//!     })
//!     .build();
//! # drop(config);
//! ```
//!
//! The chain the claim runs is built once per claim:
//!
//! ```text
//! Next { index: 0 }.run(env)
//!        ↓ interceptors[0].intercept(env, Next { index: 1 })
//!        ↓ interceptors[1].intercept(env, Next { index: 2 })
//!        ↓ …
//! Next { index: N }.run(env)   ← terminal: deliver onto the claim's stream
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::context::Context;
use crate::error::Error;
use crate::message::{ConsumerEnvelope, ProducerMessage};

// ── Producer interceptors ─────────────────────────────────────────────────────

/// Observer invoked around every producer send.
///
/// Both hooks run on the producer's own task. They must not block for long:
/// a slow hook stalls every message behind it.
pub trait ProducerInterceptor: Send + Sync + 'static {
    /// Called before the message is handed to the client. May edit it.
    fn before(&self, ctx: &Context, msg: &mut ProducerMessage);

    /// Called once the outcome is known. `err` is `None` on success.
    fn after(&self, ctx: &Context, msg: &mut ProducerMessage, err: Option<&Error>);
}

/// Shared, type-erased producer interceptor.
pub type BoxedProducerInterceptor = Arc<dyn ProducerInterceptor>;

/// Runs every `before` hook, in order.
pub(crate) fn run_before(interceptors: &[BoxedProducerInterceptor], ctx: &Context, msg: &mut ProducerMessage) {
    for interceptor in interceptors {
        interceptor.before(ctx, msg);
    }
}

/// Runs every `after` hook, in the same order as `before`.
pub(crate) fn run_after(
    interceptors: &[BoxedProducerInterceptor],
    ctx: &Context,
    msg: &mut ProducerMessage,
    err: Option<&Error>,
) {
    for interceptor in interceptors {
        interceptor.after(ctx, msg, err);
    }
}

// ── Consumer interceptors ─────────────────────────────────────────────────────

/// A heap-allocated future that drives one envelope through the rest of the
/// chain.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Middleware wrapped around the delivery of every inbound message.
///
/// Implemented automatically for closures of the form
/// `Fn(ConsumerEnvelope, Next) -> impl Future<Output = ()>`.
pub trait ConsumerInterceptor: Send + Sync + 'static {
    fn intercept(&self, envelope: ConsumerEnvelope, next: Next) -> BoxFuture;
}

/// Shared, type-erased consumer interceptor.
pub type BoxedConsumerInterceptor = Arc<dyn ConsumerInterceptor>;

impl<F, Fut> ConsumerInterceptor for F
where
    F: Fn(ConsumerEnvelope, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn intercept(&self, envelope: ConsumerEnvelope, next: Next) -> BoxFuture {
        Box::pin(self(envelope, next))
    }
}

/// The interceptors of one claim plus the terminal delivery channel.
pub(crate) struct Chain {
    interceptors: Arc<[BoxedConsumerInterceptor]>,
    deliver: mpsc::Sender<ConsumerEnvelope>,
}

impl Chain {
    pub(crate) fn new(
        interceptors: Arc<[BoxedConsumerInterceptor]>,
        deliver: mpsc::Sender<ConsumerEnvelope>,
    ) -> Arc<Self> {
        Arc::new(Self { interceptors, deliver })
    }

    /// The continuation that starts at the first interceptor.
    pub(crate) fn head(self: &Arc<Self>) -> Next {
        Next { chain: Arc::clone(self), index: 0 }
    }
}

/// Continuation handed to a [`ConsumerInterceptor`]: the rest of the chain.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    /// Passes `envelope` to the next interceptor, or delivers it to the
    /// application when no interceptor is left.
    pub async fn run(self, envelope: ConsumerEnvelope) {
        match self.chain.interceptors.get(self.index) {
            Some(interceptor) => {
                let next = Next { chain: Arc::clone(&self.chain), index: self.index + 1 };
                interceptor.intercept(envelope, next).await;
            }
            None => {
                if self.chain.deliver.send(envelope).await.is_err() {
                    debug!("claim stream dropped by the application, message discarded");
                }
            }
        }
    }
}
