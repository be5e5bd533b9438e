//! One-shot deferred values.
//!
//! A [`Cell`] starts pending and settles exactly once, fulfilled with a
//! [`Value`] or rejected with a reason. Observers chain reactions with
//! [`Cell::then`]; reactions run later, on the cell's [`Scheduler`], in the
//! order they were attached. Handing a cell another cell or a foreign
//! [`Thenable`] makes it adopt that awaitable's outcome.
//!
//! # Examples
//!
//! ```
//! use settle::{Cell, Handler, Value};
//! use futures::executor::block_on;
//!
//! let chained = Cell::resolved(1)
//!     .then(Some(Handler::new(|_| Err("boom".into()))), None)
//!     .catch(Handler::new(Ok));
//! assert_eq!(block_on(chained), Ok(Value::from("boom")));
//! ```
mod cell;
mod combinators;
mod resolve;
mod scheduler;
mod value;

pub use cell::{Cell, CellState, Resolver};
pub use scheduler::{Config, Scheduler, UnhandledHook};
pub use value::{Handler, ThenFn, Thenable, Value};

use thiserror::Error;

/// A settled value (`Ok`) or rejection reason (`Err`).
pub type Outcome<T = Value> = std::result::Result<T, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A setup routine was not a function.
    #[error("setup must be a function, got {0}")]
    NotCallable(&'static str),
    /// `all` or `race` was given something other than a list.
    #[error("expected a list of cells or values, got {0}")]
    NotASequence(&'static str),
    /// A cell was resolved with itself. Carried as a rejection reason.
    #[error("a cell cannot be resolved with itself")]
    SelfResolution,
    #[error("the scheduler worker has stopped")]
    SchedulerGone,
}

pub type Result<T> = std::result::Result<T, Error>;
