//! Context-aware producers.
//!
//! [`SyncProducer`] wraps a client that blocks until the broker answers;
//! [`AsyncProducer`] wraps one that reports outcomes later on separate
//! streams. Both run the configured [`ProducerInterceptor`]s around every
//! message, `before` in registration order and `after` in the same order.
//!
//! [`ProducerInterceptor`]: crate::ProducerInterceptor

mod pipeline;
mod sync;

pub use pipeline::{AsyncProducer, Input};
pub use sync::SyncProducer;
