//! Interceptors around a blocking send.

use std::sync::Arc;

use tracing::warn;

use crate::client::RawSyncProducer;
use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::interceptor::BoxedProducerInterceptor;
use crate::message::ProducerMessage;

/// A [`RawSyncProducer`] with interceptors and a caller-supplied context.
///
/// Messages are not copied: interceptors edit the same message the client
/// sends and the caller gets back.
///
/// Both sends are cancel-safe with respect to interceptors. If the returned
/// future is dropped after `before` ran, every `after` still runs, with
/// [`Error::Cancelled`].
pub struct SyncProducer<P> {
    client: P,
    config: Arc<Config>,
}

impl<P: RawSyncProducer> SyncProducer<P> {
    pub fn new(client: P, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    /// Sends one message and returns its partition and offset.
    ///
    /// Every interceptor's `after` sees the send's error, or `None`.
    pub async fn send_message(&self, ctx: &Context, msg: &mut ProducerMessage) -> Result<(i32, i64)> {
        let mut sending = Sending::begin(self.config.producer_interceptors(), ctx, std::slice::from_mut(msg));

        let result = self.client.send_message(&mut sending.msgs[0]).await;
        sending.finish(result.as_ref().err());

        result
    }

    /// Sends a batch under one context.
    ///
    /// Interceptors are the outer loop: the first interceptor sees every
    /// message, then the second, and so on. The batch's single result is
    /// passed to `after` for every message.
    pub async fn send_messages(&self, ctx: &Context, msgs: &mut [ProducerMessage]) -> Result<()> {
        let mut sending = Sending::begin(self.config.producer_interceptors(), ctx, msgs);

        let result = self.client.send_messages(&mut *sending.msgs).await;
        sending.finish(result.as_ref().err());

        result
    }

    pub fn get_ref(&self) -> &P {
        &self.client
    }

    pub fn into_inner(self) -> P {
        self.client
    }
}

/// Messages between their `before` and `after` hooks.
///
/// Dropped without [`finish`](Self::finish), it runs `after` with
/// [`Error::Cancelled`].
struct Sending<'a> {
    interceptors: &'a [BoxedProducerInterceptor],
    ctx: &'a Context,
    msgs: &'a mut [ProducerMessage],
    done: bool,
}

impl<'a> Sending<'a> {
    fn begin(
        interceptors: &'a [BoxedProducerInterceptor],
        ctx: &'a Context,
        msgs: &'a mut [ProducerMessage],
    ) -> Self {
        for interceptor in interceptors {
            for msg in msgs.iter_mut() {
                interceptor.before(ctx, msg);
            }
        }
        Self { interceptors, ctx, msgs, done: false }
    }

    fn finish(mut self, err: Option<&Error>) {
        self.done = true;
        self.run_after(err);
    }

    fn run_after(&mut self, err: Option<&Error>) {
        for interceptor in self.interceptors {
            for msg in self.msgs.iter_mut() {
                interceptor.after(self.ctx, msg, err);
            }
        }
    }
}

impl Drop for Sending<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        warn!(messages = self.msgs.len(), "send dropped before the client answered");
        self.run_after(Some(&Error::Cancelled));
    }
}
