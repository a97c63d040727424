//! Interceptor registration and channel sizing.
//!
//! A [`Config`] is assembled once with [`ConfigBuilder`] and is immutable
//! afterwards. Wrappers take it by `Arc`, so one config can serve a sync
//! producer, an async producer and a consumer group at the same time.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::interceptor::{
    BoxedConsumerInterceptor, BoxedProducerInterceptor, ConsumerInterceptor, ProducerInterceptor,
};

/// Capacity of the pipeline's input and of each claim's stream unless
/// overridden. One slot is the closest a tokio channel gets to a rendezvous.
pub const DEFAULT_CAPACITY: usize = 1;

/// Frozen wrapper configuration.
pub struct Config {
    pub(crate) producer_interceptors: Arc<[BoxedProducerInterceptor]>,
    pub(crate) consumer_interceptors: Arc<[BoxedConsumerInterceptor]>,
    pub(crate) input_capacity: usize,
    pub(crate) claim_capacity: usize,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn producer_interceptors(&self) -> &[BoxedProducerInterceptor] {
        &self.producer_interceptors
    }

    pub fn consumer_interceptors(&self) -> &[BoxedConsumerInterceptor] {
        &self.consumer_interceptors
    }

    pub fn input_capacity(&self) -> usize { self.input_capacity }
    pub fn claim_capacity(&self) -> usize { self.claim_capacity }
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

/// Builder for [`Config`]. Every `with_*` call appends; registration order
/// is invocation order.
///
/// ```rust
/// use tether::Config;
/// use tether::middleware::trace::{TraceConsumerInterceptor, TraceProducerInterceptor};
///
/// let config = Config::builder()
///     .with_producer_interceptor(TraceProducerInterceptor::new())
///     .with_consumer_interceptor(TraceConsumerInterceptor)
///     .try_build()
///     .unwrap();
/// assert_eq!(config.producer_interceptors().len(), 1);
/// ```
pub struct ConfigBuilder {
    producer_interceptors: Vec<BoxedProducerInterceptor>,
    consumer_interceptors: Vec<BoxedConsumerInterceptor>,
    input_capacity: usize,
    claim_capacity: usize,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            producer_interceptors: Vec::new(),
            consumer_interceptors: Vec::new(),
            input_capacity: DEFAULT_CAPACITY,
            claim_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ConfigBuilder {
    pub fn with_producer_interceptor(mut self, interceptor: impl ProducerInterceptor) -> Self {
        self.producer_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn with_producer_interceptors(
        mut self,
        interceptors: impl IntoIterator<Item = BoxedProducerInterceptor>,
    ) -> Self {
        self.producer_interceptors.extend(interceptors);
        self
    }

    pub fn with_consumer_interceptor(mut self, interceptor: impl ConsumerInterceptor) -> Self {
        self.consumer_interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn with_consumer_interceptors(
        mut self,
        interceptors: impl IntoIterator<Item = BoxedConsumerInterceptor>,
    ) -> Self {
        self.consumer_interceptors.extend(interceptors);
        self
    }

    /// Slots in the async producer's input channel.
    pub fn input_capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = capacity;
        self
    }

    /// Slots in each claim's delivery channel.
    pub fn claim_capacity(mut self, capacity: usize) -> Self {
        self.claim_capacity = capacity;
        self
    }

    /// Validates and freezes the configuration.
    pub fn try_build(self) -> Result<Config> {
        if self.input_capacity == 0 {
            return Err(Error::InvalidConfig("input_capacity must be at least 1".into()));
        }
        if self.claim_capacity == 0 {
            return Err(Error::InvalidConfig("claim_capacity must be at least 1".into()));
        }
        Ok(Config {
            producer_interceptors: self.producer_interceptors.into(),
            consumer_interceptors: self.consumer_interceptors.into(),
            input_capacity: self.input_capacity,
            claim_capacity: self.claim_capacity,
        })
    }

    /// Like [`try_build`](ConfigBuilder::try_build).
    ///
    /// # Panics
    ///
    /// Panics if a capacity was set to zero.
    pub fn build(self) -> Config {
        self.try_build().unwrap_or_else(|e| panic!("{e}"))
    }
}
