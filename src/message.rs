//! Raw messages and the envelopes that pair them with a [`Context`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;

use crate::context::Context;
use crate::error::Error;

/// Free-form, caller-owned value riding along with a producer message.
pub type Metadata = Arc<dyn Any + Send + Sync>;

/// A record header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Bytes,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Case-sensitive header lookup shared by both message kinds.
fn find_header<'a>(headers: &'a [Header], key: &str) -> Option<&'a Bytes> {
    headers.iter().find(|h| h.key == key).map(|h| &h.value)
}

// ── Producer side ────────────────────────────────────────────────────────────

/// A message on its way to the broker.
///
/// `partition` and `offset` are filled in by the client once the broker has
/// acknowledged the write.
///
/// The `metadata` slot belongs to the caller and is never touched by the
/// producers in this crate. The correlation slot belongs to the async
/// pipeline: it carries the submitting [`Context`] to the outcome tasks.
#[derive(Clone, Default)]
pub struct ProducerMessage {
    pub topic: String,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
    pub partition: i32,
    pub offset: i64,
    pub metadata: Option<Metadata>,
    correlation: Option<Context>,
}

impl ProducerMessage {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), ..Self::default() }
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    pub fn header_value(&self, key: &str) -> Option<&Bytes> {
        find_header(&self.headers, key)
    }

    /// The context the async pipeline will report this message's outcome
    /// under, if one has been attached.
    pub fn correlation(&self) -> Option<&Context> {
        self.correlation.as_ref()
    }

    /// Pins the outcome context ahead of submission. The pipeline only fills
    /// the slot when it is empty.
    pub fn set_correlation(&mut self, ctx: Context) {
        self.correlation = Some(ctx);
    }

    /// Fills the correlation slot with `ctx` unless it is already set.
    pub(crate) fn correlate(&mut self, ctx: &Context) {
        if self.correlation.is_none() {
            self.correlation = Some(ctx.clone());
        }
    }

    /// The context to report an outcome under, or the background context
    /// when nothing was attached.
    pub(crate) fn recover_context(&self) -> Context {
        self.correlation.clone().unwrap_or_else(Context::background)
    }
}

impl fmt::Debug for ProducerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerMessage")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("value", &self.value)
            .field("headers", &self.headers)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("metadata", &self.metadata.is_some())
            .field("correlated", &self.correlation.is_some())
            .finish()
    }
}

/// A failed asynchronous send, as reported on the client's error stream.
#[derive(Debug)]
pub struct ProducerError {
    pub message: ProducerMessage,
    pub error: Error,
}

// ── Consumer side ────────────────────────────────────────────────────────────

/// A message read from one partition.
#[derive(Clone, Debug, Default)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
    pub timestamp: Option<SystemTime>,
}

impl ConsumerMessage {
    pub fn header_value(&self, key: &str) -> Option<&Bytes> {
        find_header(&self.headers, key)
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// A message paired with the context it travels under.
///
/// Whoever holds the envelope owns it; handing it to a channel hands over
/// both the message and the context.
#[derive(Clone, Debug)]
pub struct Envelope<M> {
    pub message: M,
    pub context: Context,
}

impl<M> Envelope<M> {
    pub fn new(context: Context, message: M) -> Self {
        Self { message, context }
    }
}

/// Outbound envelope, submitted to a producer.
pub type ProducerEnvelope = Envelope<ProducerMessage>;

/// Inbound envelope, delivered to a consumer.
pub type ConsumerEnvelope = Envelope<ConsumerMessage>;
