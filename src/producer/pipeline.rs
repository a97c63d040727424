//! Asynchronous producer pipeline.
//!
//! # Tasks
//!
//! Three tasks are spawned when the pipeline is built and live until it is
//! closed:
//!
//! ```text
//!  Input::send ──► dispatch ──► client.input()
//!                                    │
//!            client.take_successes() ┼─► success drain ──► after(ctx, msg, None)
//!            client.take_errors()    └─► error drain   ──► after(ctx, msg, Some(err))
//! ```
//!
//! Outcomes come back on their own streams, out of order and arbitrarily
//! late. The submitting context rides in the message's correlation slot, so
//! the drain tasks recover it from the message itself without any lookup
//! table of their own.
//!
//! # Shutdown
//!
//! [`AsyncProducer::close`] and [`AsyncProducer::async_close`] consume the
//! handle and move the [lifecycle](crate::lifecycle) out of `Open` exactly
//! once. The dispatch loop then refuses new input, dispatches whatever is
//! already buffered so every accepted envelope still gets its `after`, and
//! closes the client. Dropping the handle without closing it is an abandon
//! close.

use std::panic;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::client::RawAsyncProducer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::interceptor::{BoxedProducerInterceptor, run_after, run_before};
use crate::lifecycle::{Lifecycle, State};
use crate::message::{ProducerEnvelope, ProducerError, ProducerMessage};

/// How the dispatch loop was asked to stop.
enum CloseSignal {
    /// Run the client's blocking close and report its result here.
    Graceful(oneshot::Sender<Result<()>>),
    Abandon,
}

// ── Input ─────────────────────────────────────────────────────────────────────

/// Submission handle for an [`AsyncProducer`]. Clone it freely.
#[derive(Clone)]
pub struct Input {
    tx: mpsc::Sender<ProducerEnvelope>,
    lifecycle: Lifecycle,
}

impl Input {
    /// Hands `envelope` to the dispatch loop, waiting while it is busy.
    ///
    /// There is no failure path here: the send's outcome reaches the
    /// interceptors' `after` hook later.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline has been closed. Sending after close is a bug
    /// in the caller.
    pub async fn send(&self, envelope: ProducerEnvelope) {
        if !self.lifecycle.is_open() || self.tx.send(envelope).await.is_err() {
            panic!("send on a closed producer pipeline ({})", self.lifecycle.state());
        }
    }
}

// ── AsyncProducer ─────────────────────────────────────────────────────────────

/// A [`RawAsyncProducer`] with interceptors and per-message contexts.
///
/// ```rust,no_run
/// # async fn demo(client: impl tether::client::RawAsyncProducer) -> tether::Result<()> {
/// use std::sync::Arc;
/// use tether::{AsyncProducer, Config, Context, ProducerEnvelope, ProducerMessage};
///
/// let producer = AsyncProducer::new(client, Arc::new(Config::default()));
/// let ctx = Context::background();
/// producer.input()
///     .send(ProducerEnvelope::new(ctx, ProducerMessage::new("orders").value("hi")))
///     .await;
/// producer.close().await
/// # }
/// ```
pub struct AsyncProducer {
    input: Input,
    lifecycle: Lifecycle,
    close_tx: Option<oneshot::Sender<CloseSignal>>,
    dispatch: Option<JoinHandle<()>>,
    // Plain handles rather than a JoinSet: dropping them must detach the
    // drains, not abort them, or an abandon close would lose outcomes.
    drains: Vec<JoinHandle<()>>,
}

impl AsyncProducer {
    /// Takes ownership of `client` and starts the dispatch and drain tasks.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new<P: RawAsyncProducer>(mut client: P, config: Arc<Config>) -> Self {
        let (tx, rx) = mpsc::channel(config.input_capacity());
        let (close_tx, close_rx) = oneshot::channel();
        let lifecycle = Lifecycle::new();
        let interceptors = Arc::clone(&config.producer_interceptors);

        let successes = tokio::spawn(drain_successes(client.take_successes(), Arc::clone(&interceptors)));
        let errors = tokio::spawn(drain_errors(client.take_errors(), Arc::clone(&interceptors)));
        let dispatch = tokio::spawn(dispatch(client, rx, close_rx, interceptors, lifecycle.clone()));

        debug!(interceptors = config.producer_interceptors().len(), "producer pipeline started");

        Self {
            input: Input { tx, lifecycle: lifecycle.clone() },
            lifecycle,
            close_tx: Some(close_tx),
            dispatch: Some(dispatch),
            drains: vec![successes, errors],
        }
    }

    pub fn input(&self) -> Input {
        self.input.clone()
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// Closes the pipeline and waits for the client's blocking close.
    ///
    /// Returns the client's close result once every outcome has been
    /// reported to the interceptors. A panic raised by an interceptor on one
    /// of the pipeline's tasks resumes here.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline was already closed.
    pub async fn close(mut self) -> Result<()> {
        self.lifecycle.begin_close(State::ClosingGraceful);
        debug!("closing producer pipeline");

        let (reply_tx, reply_rx) = oneshot::channel();
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(CloseSignal::Graceful(reply_tx));
        }
        let reply = reply_rx.await;

        if let Some(dispatch) = self.dispatch.take() {
            join(dispatch).await;
        }
        for drain in std::mem::take(&mut self.drains) {
            join(drain).await;
        }

        debug!("producer pipeline closed");
        reply.unwrap_or(Err(Error::ClientClosed))
    }

    /// Signals the pipeline to stop and returns immediately.
    ///
    /// Outcomes still in flight keep flowing to the interceptors for as long
    /// as the client reports them.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline was already closed.
    pub fn async_close(mut self) {
        self.abandon();
    }

    fn abandon(&mut self) {
        if let Some(close_tx) = self.close_tx.take() {
            self.lifecycle.begin_close(State::ClosingAbandon);
            debug!("abandoning producer pipeline");
            let _ = close_tx.send(CloseSignal::Abandon);
        }
    }
}

impl Drop for AsyncProducer {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// Waits for a pipeline task, resuming its panic on the caller.
async fn join(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        if e.is_panic() {
            panic::resume_unwind(e.into_panic());
        }
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

async fn dispatch<P: RawAsyncProducer>(
    client: P,
    mut rx: mpsc::Receiver<ProducerEnvelope>,
    mut close_rx: oneshot::Receiver<CloseSignal>,
    interceptors: Arc<[BoxedProducerInterceptor]>,
    lifecycle: Lifecycle,
) {
    let client_input = client.input();

    let signal = loop {
        tokio::select! {
            // Check the close signal first so a close is never starved by a
            // busy input.
            biased;

            signal = &mut close_rx => break signal.unwrap_or(CloseSignal::Abandon),

            envelope = rx.recv() => match envelope {
                Some(envelope) => forward(envelope, &client_input, &interceptors).await,
                // Every Input is gone, only a close can follow.
                None => break (&mut close_rx).await.unwrap_or(CloseSignal::Abandon),
            },
        }
    };

    rx.close();
    let mut buffered = 0usize;
    while let Ok(envelope) = rx.try_recv() {
        forward(envelope, &client_input, &interceptors).await;
        buffered += 1;
    }
    if buffered > 0 {
        debug!(buffered, "dispatched buffered messages before close");
    }
    drop(client_input);

    match signal {
        CloseSignal::Graceful(reply) => {
            let result = client.close().await;
            if let Err(e) = &result {
                warn!("client close failed: {e}");
            }
            lifecycle.finish();
            let _ = reply.send(result);
        }
        CloseSignal::Abandon => {
            client.async_close();
            lifecycle.finish();
        }
    }
}

/// Correlates, runs `before`, and hands the message to the client.
async fn forward(
    envelope: ProducerEnvelope,
    client_input: &mpsc::Sender<ProducerMessage>,
    interceptors: &[BoxedProducerInterceptor],
) {
    let ProducerEnvelope { mut message, context } = envelope;
    message.correlate(&context);
    run_before(interceptors, &context, &mut message);

    if let Err(mpsc::error::SendError(mut message)) = client_input.send(message).await {
        error!(topic = %message.topic, "client input closed, reporting message as failed");
        let ctx = message.recover_context();
        run_after(interceptors, &ctx, &mut message, Some(&Error::ClientClosed));
    }
}

async fn drain_successes(
    mut successes: mpsc::Receiver<ProducerMessage>,
    interceptors: Arc<[BoxedProducerInterceptor]>,
) {
    while let Some(mut message) = successes.recv().await {
        let ctx = message.recover_context();
        run_after(&interceptors, &ctx, &mut message, None);
    }
}

async fn drain_errors(
    mut errors: mpsc::Receiver<ProducerError>,
    interceptors: Arc<[BoxedProducerInterceptor]>,
) {
    while let Some(ProducerError { mut message, error }) = errors.recv().await {
        debug!(topic = %message.topic, "send failed: {error}");
        let ctx = message.recover_context();
        run_after(&interceptors, &ctx, &mut message, Some(&error));
    }
}
