//! Span-per-message tracing with trace-id propagation.
//!
//! The producer side opens a `kafka.produce` span in `before` and closes it
//! in `after`, once the broker has answered. The trace id found in the
//! sending context (or a fresh one) is written to the [`TRACE_HEADER`]
//! header. The consumer side reads that header back into the envelope's
//! context and runs the rest of the chain inside a `kafka.consume` span.
//!
//! `before` and `after` of an async send run on different tasks, far apart
//! in time, and may interleave with other messages under the same context.
//! The producer interceptor therefore keys open spans by a per-message
//! [`SpanKey`] parked in the message's `metadata` slot; the caller's own
//! metadata is restored in `after`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{Instrument, Span, debug, error, field, info_span};
use uuid::Uuid;

use crate::context::Context;
use crate::error::Error;
use crate::interceptor::{BoxFuture, ConsumerInterceptor, Next, ProducerInterceptor};
use crate::message::{ConsumerEnvelope, Metadata, ProducerMessage};

/// Header carrying the trace id from producer to consumer.
pub const TRACE_HEADER: &str = "trace-id";

// ── TraceId ───────────────────────────────────────────────────────────────────

/// Identifier shared by every span of one logical request.
///
/// Lives in a [`Context`]; rendered as 32 lowercase hex digits on the wire.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TraceId(Uuid);

impl TraceId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_context(ctx: &Context) -> Option<Self> {
        ctx.get::<Self>().copied()
    }

    fn from_header(value: &[u8]) -> Option<Self> {
        std::str::from_utf8(value).ok()?.parse().ok()
    }
}

impl Default for TraceId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for TraceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ── Producer ──────────────────────────────────────────────────────────────────

/// Marker parked in a message's metadata slot while its span is open.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpanKey(u64);

struct InFlight {
    span: Span,
    backup: Option<Metadata>,
}

/// Opens a span per produced message and closes it when the outcome is known.
#[derive(Default)]
pub struct TraceProducerInterceptor {
    next_key: AtomicU64,
    in_flight: Mutex<HashMap<u64, InFlight>>,
}

impl TraceProducerInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans opened by `before` and not yet closed by `after`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

impl ProducerInterceptor for TraceProducerInterceptor {
    fn before(&self, ctx: &Context, msg: &mut ProducerMessage) {
        let trace_id = TraceId::from_context(ctx).unwrap_or_default();
        let span = info_span!(
            "kafka.produce",
            messaging.system = "kafka",
            messaging.destination = %msg.topic,
            messaging.kafka.partition = field::Empty,
            messaging.message_id = field::Empty,
            trace_id = %trace_id,
        );

        msg.headers.retain(|h| h.key != TRACE_HEADER);
        msg.headers.push(crate::message::Header::new(TRACE_HEADER, trace_id.to_string()));

        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let backup = msg.metadata.replace(Arc::new(SpanKey(key)));
        self.in_flight.lock().insert(key, InFlight { span, backup });
    }

    fn after(&self, _ctx: &Context, msg: &mut ProducerMessage, err: Option<&Error>) {
        let Some(SpanKey(key)) = msg.metadata.as_ref().and_then(|m| m.downcast_ref::<SpanKey>()).copied() else {
            return;
        };
        let Some(InFlight { span, backup }) = self.in_flight.lock().remove(&key) else {
            return;
        };

        span.record("messaging.kafka.partition", msg.partition);
        span.record("messaging.message_id", msg.offset);
        match err {
            Some(e) => error!(parent: &span, error = %e, "produce failed"),
            None => debug!(parent: &span, "produced"),
        }
        msg.metadata = backup;
    }
}

// ── Consumer ──────────────────────────────────────────────────────────────────

/// Runs delivery inside a `kafka.consume` span and puts the producer's
/// [`TraceId`] into the envelope's context.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceConsumerInterceptor;

impl ConsumerInterceptor for TraceConsumerInterceptor {
    fn intercept(&self, mut envelope: ConsumerEnvelope, next: Next) -> BoxFuture {
        let msg = &envelope.message;
        let span = info_span!(
            "kafka.consume",
            messaging.system = "kafka",
            messaging.destination = %msg.topic,
            messaging.operation = "receive",
            messaging.kafka.partition = msg.partition,
            messaging.message_id = msg.offset,
            trace_id = field::Empty,
        );

        if let Some(trace_id) = msg.header_value(TRACE_HEADER).and_then(|v| TraceId::from_header(v)) {
            span.record("trace_id", field::display(trace_id));
            envelope.context = envelope.context.with_value(trace_id);
        }

        Box::pin(next.run(envelope).instrument(span))
    }
}
