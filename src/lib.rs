//! # tether
//!
//! Request-scoped context and interceptors for topic/partition pub/sub
//! clients. Nothing more. Nothing less.
//!
//! ## The contract
//!
//! The client you already use owns the hard transport problems: broker
//! connections, the wire protocol, partition assignment, rebalancing and
//! offset commits. tether does not touch any of them. It sits between your
//! code and that client and does two things:
//!
//! - **Carries a [`Context`] with every message.** From the moment a message
//!   is submitted until its delivery outcome arrives (possibly much later, on
//!   another task, out of order), and from the moment a message is received
//!   until your handler is done with it.
//! - **Runs interceptors around every message.** Producer interceptors
//!   observe `before`/`after` each send; consumer interceptors wrap delivery
//!   and may edit, delay, or drop messages.
//!
//! What the client must provide is spelled out in [`client`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether::middleware::trace::{TraceId, TraceProducerInterceptor};
//! use tether::{AsyncProducer, Config, Context, ProducerEnvelope, ProducerMessage};
//!
//! # async fn run(client: impl tether::client::RawAsyncProducer) -> tether::Result<()> {
//! let config = Arc::new(
//!     Config::builder()
//!         .with_producer_interceptor(TraceProducerInterceptor::new())
//!         .build(),
//! );
//! let producer = AsyncProducer::new(client, config);
//!
//! let ctx = Context::background().with_value(TraceId::new());
//! producer.input()
//!     .send(ProducerEnvelope::new(ctx, ProducerMessage::new("orders").value("hello")))
//!     .await;
//!
//! producer.close().await
//! # }
//! ```
//!
//! ## Usage errors
//!
//! Closing a producer twice, or sending after it was closed, is a bug in
//! the calling code and panics. Send failures are ordinary values: they are
//! handed to every interceptor's `after` and, for [`SyncProducer`], returned
//! to the caller.

mod config;
mod consumer;
mod context;
mod error;
mod interceptor;
mod message;
mod producer;

pub mod client;
pub mod lifecycle;
pub mod middleware;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigBuilder, DEFAULT_CAPACITY};
pub use consumer::{ConsumerGroupClaim, ConsumerGroupHandler, ContextHandler, wrap_consumer_group_handler};
pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use interceptor::{
    BoxFuture, BoxedConsumerInterceptor, BoxedProducerInterceptor, ConsumerInterceptor, Next,
    ProducerInterceptor,
};
pub use message::{
    ConsumerEnvelope, ConsumerMessage, Envelope, Header, Metadata, ProducerEnvelope, ProducerError,
    ProducerMessage,
};
pub use producer::{AsyncProducer, Input, SyncProducer};
