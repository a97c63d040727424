//! One-shot shutdown state machine for the async producer.
//!
//! ```text
//! Open ──close()───────► ClosingGraceful ──► Closed
//!   └────async_close()─► ClosingAbandon  ──► Closed
//! ```
//!
//! Leaving `Open` happens exactly once. The transition is a compare-exchange
//! on a single atomic, so two racing closers cannot both win; the loser
//! panics, because closing twice is a bug in the caller.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where a pipeline is in its shutdown.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Open,
    ClosingGraceful,
    ClosingAbandon,
    Closed,
}

impl State {
    fn as_u8(self) -> u8 {
        match self {
            Self::Open            => 0,
            Self::ClosingGraceful => 1,
            Self::ClosingAbandon  => 2,
            Self::Closed          => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::ClosingGraceful,
            2 => Self::ClosingAbandon,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open            => "open",
            Self::ClosingGraceful => "closing (graceful)",
            Self::ClosingAbandon  => "closing (abandon)",
            Self::Closed          => "closed",
        })
    }
}

/// Shared handle to a pipeline's state. Cloning shares the state.
#[derive(Clone)]
pub(crate) struct Lifecycle {
    state: Arc<AtomicU8>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self { state: Arc::new(AtomicU8::new(State::Open.as_u8())) }
    }

    pub(crate) fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    /// Moves `Open` to `to`, one of the two closing states.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline has already left `Open`.
    pub(crate) fn begin_close(&self, to: State) {
        debug_assert!(matches!(to, State::ClosingGraceful | State::ClosingAbandon));
        if let Err(current) = self.state.compare_exchange(
            State::Open.as_u8(),
            to.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            panic!("producer pipeline closed twice (already {})", State::from_u8(current));
        }
    }

    /// Final transition, made by the dispatch loop once the client has been
    /// told to close.
    pub(crate) fn finish(&self) {
        self.state.store(State::Closed.as_u8(), Ordering::Release);
    }
}
