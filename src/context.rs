//! Request-scoped context carried by every envelope.
//!
//! A [`Context`] is an immutable, type-keyed bag of values. Deriving a new
//! context with [`Context::with_value`] never mutates the original, so a
//! context can be handed to a producer, kept by the caller, and read from an
//! outcome task at the same time.
//!
//! ```rust
//! use tether::Context;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct RequestId(u64);
//!
//! let ctx = Context::background().with_value(RequestId(7));
//! assert_eq!(ctx.get::<RequestId>(), Some(&RequestId(7)));
//! assert!(Context::background().get::<RequestId>().is_none());
//! ```

use std::sync::Arc;

use http::Extensions;

/// A cheaply clonable request context.
///
/// Cloning shares the underlying storage; [`Context::same`] tells whether two
/// handles point at the same context value.
#[derive(Clone, Debug, Default)]
pub struct Context {
    values: Arc<Extensions>,
}

impl Context {
    /// The empty root context.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a child context holding `value`, replacing any earlier value
    /// of the same type. `self` is left untouched.
    #[must_use]
    pub fn with_value<T>(&self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut values = Extensions::clone(&self.values);
        values.insert(value);
        Self { values: Arc::new(values) }
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    /// `true` if both handles refer to the same context value.
    pub fn same(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}
