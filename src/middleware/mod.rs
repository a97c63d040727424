//! Ready-made interceptors.
//!
//! Interceptors are the right place for cross-cutting concerns: structured
//! tracing, metrics, header injection, filtering. The core never depends on
//! anything in here; register what you need through
//! [`ConfigBuilder`](crate::ConfigBuilder).
//!
//! - [`trace`]: a span per produced and per consumed message, with a trace
//!   id carried from producer to consumer in a message header.

pub mod trace;
