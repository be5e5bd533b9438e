//! Payloads carried by cells.
//!
//! A cell does not care what it holds. The only payloads it treats specially
//! are other cells, which it adopts, and foreign awaitables (anything
//! implementing [`Thenable`]), whose `then` member it reads once and invokes.
use crate::{Cell, Error, Resolver};
use std::{fmt, sync::Arc};

/// The callable found behind a foreign awaitable's `then` member.
///
/// It receives a [`Resolver`] whose `resolve` and `reject` are the success and
/// failure adapters. Returning `Err` means calling `then` threw.
pub type ThenFn = Arc<dyn Fn(Resolver) -> Result<(), Value> + Send + Sync>;

/// A foreign awaitable, i.e. a deferred value from some other implementation.
///
/// # Examples
///
/// ```
/// use settle::{Cell, Resolver, ThenFn, Thenable, Value};
/// use futures::executor::block_on;
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// struct Ready(i32);
///
/// impl Thenable for Ready {
///     fn then_member(&self) -> Result<Option<ThenFn>, Value> {
///         let value = self.0;
///         Ok(Some(Arc::new(move |resolver: Resolver| -> Result<(), Value> {
///             resolver.resolve(value.into());
///             Ok(())
///         })))
///     }
/// }
///
/// let cell = Cell::resolved(Value::Foreign(Arc::new(Ready(7))));
/// assert_eq!(block_on(cell), Ok(Value::from(7)));
/// ```
pub trait Thenable: fmt::Debug + Send + Sync {
    /// Reads the `then` member.
    ///
    /// `Err` means reading the member threw, `Ok(None)` means the member is
    /// absent or not callable. Called at most once per adoption.
    fn then_member(&self) -> Result<Option<ThenFn>, Value>;
}

/// A reaction callable. `Err` is the thrown reason.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(Value) -> Result<Value, Value> + Send + Sync>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value, Value> + Send + Sync + 'static,
    {
        Handler(Arc::new(f))
    }

    pub fn call(&self, value: Value) -> Result<Value, Value> {
        (self.0)(value)
    }

    pub fn ptr_eq(&self, other: &Handler) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Any value a cell can be settled with.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    List(Vec<Value>),
    Cell(Cell),
    Foreign(Arc<dyn Thenable>),
    Function(Handler),
    Error(Error),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Cell(_) => "cell",
            Value::Foreign(_) => "foreign",
            Value::Function(_) => "function",
            Value::Error(_) => "error",
        }
    }

    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            Value::Cell(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Handler> {
        match self {
            Value::Function(handler) => Some(handler),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// True for cells and foreign awaitables, the two payloads the resolution
    /// procedure unwraps instead of settling with directly.
    pub fn is_awaitable(&self) -> bool {
        matches!(self, Value::Cell(_) | Value::Foreign(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Cell(a), Value::Cell(b)) => a.ptr_eq(b),
            (Value::Foreign(a), Value::Foreign(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Number(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl From<Cell> for Value {
    fn from(value: Cell) -> Self {
        Value::Cell(value)
    }
}

impl From<Handler> for Value {
    fn from(value: Handler) -> Self {
        Value::Function(value)
    }
}

impl From<Error> for Value {
    fn from(value: Error) -> Self {
        Value::Error(value)
    }
}
