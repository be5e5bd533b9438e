use crate::{resolve::resolve, scheduler::catch_panic, Error, Handler, Outcome, Scheduler, Value};
use std::{
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    task::{Context, Poll, Waker},
};
use tracing::{error, trace};

/// A one-shot deferred value. It starts pending and settles exactly once,
/// either fulfilled with a value or rejected with a reason. Clones share the
/// same state; equality between cells is identity.
///
/// # Examples
///
/// ```
/// use settle::{Cell, Handler};
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (cell, resolver) = Cell::deferred();
/// let doubled = cell.then(
///     Some(Handler::new(|v| Ok((v.as_number().unwrap_or(0.0) * 2.0).into()))),
///     None,
/// );
/// let task = thread::spawn(move || resolver.resolve(21.into()));
/// assert_eq!(block_on(doubled), Ok(42.0.into()));
/// task.join().expect("The resolver thread has panicked.");
/// ```
#[derive(Clone)]
pub struct Cell {
    inner: Arc<Inner>,
}

/// Where a cell is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Pending,
    Fulfilled,
    Rejected,
}

struct Inner {
    scheduler: Scheduler,
    state: Mutex<State>,
}

struct State {
    status: Status,
    reactions: VecDeque<Reaction>,
    wakers: Vec<Waker>,
}

enum Status {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

impl Status {
    fn outcome(&self) -> Option<Outcome> {
        match self {
            Status::Pending => None,
            Status::Fulfilled(value) => Some(Ok(value.clone())),
            Status::Rejected(reason) => Some(Err(reason.clone())),
        }
    }
}

/// A reaction pair queued by `then`, bound to the cell `then` returned.
struct Reaction {
    on_success: Option<Handler>,
    on_failure: Option<Handler>,
    downstream: Cell,
}

impl Reaction {
    fn run(self, outcome: &Outcome) {
        let handler = match outcome {
            Ok(_) => self.on_success.as_ref(),
            Err(_) => self.on_failure.as_ref(),
        };
        let result = match (handler, outcome) {
            (Some(handler), Ok(value) | Err(value)) => invoke(handler, value.clone()),
            (None, outcome) => outcome.clone(),
        };
        match result {
            Ok(value) => resolve(&self.downstream, value),
            Err(reason) => self.downstream.reject(reason),
        }
    }
}

/// Calls `handler`; a panic becomes a thrown reason so one bad reaction
/// cannot take the rest of the drain down with it.
fn invoke(handler: &Handler, value: Value) -> Outcome {
    catch_panic(|| handler.call(value))
}

impl Cell {
    /// Creates a cell on the global scheduler and runs `setup` right away.
    ///
    /// An `Err` from `setup`, or a panic inside it, rejects the cell unless
    /// the cell has already settled.
    ///
    /// # Examples
    ///
    /// ```
    /// use settle::{Cell, Value};
    /// use futures::executor::block_on;
    ///
    /// let cell = Cell::new(|resolver| {
    ///     resolver.resolve("🍓".into());
    ///     Err("ignored".into())
    /// });
    /// assert_eq!(block_on(cell), Ok(Value::from("🍓")));
    /// ```
    pub fn new<F>(setup: F) -> Cell
    where
        F: FnOnce(Resolver) -> Outcome<()>,
    {
        Cell::new_in(Scheduler::global(), setup)
    }

    /// Like [`Cell::new`], bound to `scheduler`.
    pub fn new_in<F>(scheduler: &Scheduler, setup: F) -> Cell
    where
        F: FnOnce(Resolver) -> Outcome<()>,
    {
        let (cell, resolver) = Cell::deferred_in(scheduler);
        let settle = resolver.clone();
        if let Err(reason) = catch_panic(move || setup(settle)) {
            resolver.reject(reason);
        }
        cell
    }

    /// A pending cell together with the resolver that settles it.
    pub fn deferred() -> (Cell, Resolver) {
        Cell::deferred_in(Scheduler::global())
    }

    /// Like [`Cell::deferred`], bound to `scheduler`.
    pub fn deferred_in(scheduler: &Scheduler) -> (Cell, Resolver) {
        let cell = Cell::pending(scheduler.clone());
        let resolver = Resolver::new(cell.clone());
        (cell, resolver)
    }

    /// Builds a cell from a dynamically typed setup routine.
    ///
    /// `setup` must be a [`Value::Function`]. It is called with a two element
    /// list holding the settle-as-success and settle-as-failure capabilities,
    /// each wrapped as a function. Anything else fails with
    /// [`Error::NotCallable`] before a cell exists.
    pub fn from_setup_value(setup: &Value) -> crate::Result<Cell> {
        let Some(setup) = setup.as_function().cloned() else {
            return Err(Error::NotCallable(setup.type_name()));
        };
        Ok(Cell::new(move |resolver| {
            let on_failure = resolver.clone();
            let capabilities = vec![
                Value::Function(Handler::new(move |value| {
                    resolver.resolve(value);
                    Ok(Value::Undefined)
                })),
                Value::Function(Handler::new(move |reason| {
                    on_failure.reject(reason);
                    Ok(Value::Undefined)
                })),
            ];
            setup.call(Value::List(capabilities)).map(drop)
        }))
    }

    fn pending(scheduler: Scheduler) -> Cell {
        Cell {
            inner: Arc::new(Inner {
                scheduler,
                state: Mutex::new(State {
                    status: Status::Pending,
                    reactions: VecDeque::new(),
                    wakers: vec![],
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Handlers never run under this lock, so poisoning cannot leave the
        // state half written.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The scheduler this cell drains its reactions on.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn state(&self) -> CellState {
        match self.lock().status {
            Status::Pending => CellState::Pending,
            Status::Fulfilled(_) => CellState::Fulfilled,
            Status::Rejected(_) => CellState::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == CellState::Pending
    }

    /// The settled value (`Ok`) or reason (`Err`), or `None` while pending.
    pub fn outcome(&self) -> Option<Outcome> {
        self.lock().status.outcome()
    }

    /// True if both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Cell) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queues a reaction pair and returns the cell its outcome feeds into.
    ///
    /// An absent handler passes the value or reason through unchanged. The
    /// handlers never run before this call returns.
    pub fn then(&self, on_success: Option<Handler>, on_failure: Option<Handler>) -> Cell {
        let downstream = Cell::pending(self.inner.scheduler.clone());
        self.lock().reactions.push_back(Reaction {
            on_success,
            on_failure,
            downstream: downstream.clone(),
        });
        self.schedule_drain();
        downstream
    }

    /// [`Cell::then`] for dynamically typed handlers: anything that is not a
    /// [`Value::Function`] is treated as absent.
    pub fn then_values(&self, on_success: &Value, on_failure: &Value) -> Cell {
        self.then(
            on_success.as_function().cloned(),
            on_failure.as_function().cloned(),
        )
    }

    pub fn catch(&self, on_failure: Handler) -> Cell {
        self.then(None, Some(on_failure))
    }

    /// Runs `callback` on either outcome and forwards the original outcome.
    ///
    /// If `callback` fails, or returns an awaitable that rejects, that
    /// rejection is forwarded instead. An awaitable that fulfills is waited
    /// for and its value dropped.
    pub fn finally<F>(&self, callback: F) -> Cell
    where
        F: Fn() -> Outcome + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let on_failure = callback.clone();
        let scheduler = self.inner.scheduler.clone();
        let failure_scheduler = scheduler.clone();
        self.then(
            Some(Handler::new(move |value| {
                after_finally(&scheduler, callback(), Ok(value))
            })),
            Some(Handler::new(move |reason| {
                after_finally(&failure_scheduler, on_failure(), Err(reason))
            })),
        )
    }

    /// Like [`Cell::then`], but ends the chain: a rejection that survives the
    /// handlers is handed to the scheduler's unhandled-rejection hook on a
    /// later turn instead of being parked in another cell.
    pub fn done(&self, on_success: Option<Handler>, on_failure: Option<Handler>) {
        let scheduler = self.inner.scheduler.clone();
        self.then(on_success, on_failure).then(
            None,
            Some(Handler::new(move |reason| {
                scheduler.report_unhandled(reason);
                Ok(Value::Undefined)
            })),
        );
    }

    pub(crate) fn fulfill(&self, value: Value) {
        self.settle(Status::Fulfilled(value));
    }

    pub(crate) fn reject(&self, reason: Value) {
        self.settle(Status::Rejected(reason));
    }

    fn settle(&self, status: Status) {
        let wakers = {
            let mut state = self.lock();
            if !matches!(state.status, Status::Pending) {
                return;
            }
            state.status = status;
            std::mem::take(&mut state.wakers)
        };
        trace!(state = ?self.state(), "cell settled");
        for waker in wakers {
            waker.wake()
        }
        self.schedule_drain();
    }

    fn schedule_drain(&self) {
        if self.is_pending() {
            return;
        }
        let cell = self.clone();
        if let Err(err) = self.inner.scheduler.post(move || cell.drain()) {
            error!(%err, "could not schedule a drain");
        }
    }

    /// Runs every reaction queued so far, oldest first. Reactions queued
    /// while this runs get a drain of their own.
    fn drain(&self) {
        let (outcome, reactions) = {
            let mut state = self.lock();
            let Some(outcome) = state.status.outcome() else {
                return;
            };
            (outcome, std::mem::take(&mut state.reactions))
        };
        if reactions.is_empty() {
            return;
        }
        trace!(count = reactions.len(), "draining reactions");
        for reaction in reactions {
            reaction.run(&outcome);
        }
    }
}

fn after_finally(scheduler: &Scheduler, returned: Outcome, original: Outcome) -> Outcome {
    let returned = returned?;
    if !returned.is_awaitable() {
        return original;
    }
    let forward = Handler::new(move |_| original.clone());
    Ok(Cell::resolved_in(scheduler, returned)
        .then(Some(forward), None)
        .into())
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell").field("state", &self.state()).finish()
    }
}

impl Future for Cell {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.lock();
        match state.status.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// The settle capabilities of one cell.
///
/// A resolver handed out by [`Cell::new`] or [`Cell::deferred`] is only
/// limited by the cell itself: calls after the cell settled are ignored, but a
/// `reject` still lands while the cell is pending on an adopted awaitable.
/// The adapters given to a foreign `then` are guarded instead: across all
/// clones only the first `resolve` or `reject` has any effect.
#[derive(Clone)]
pub struct Resolver {
    cell: Cell,
    once: Option<Arc<AtomicBool>>,
}

impl Resolver {
    pub(crate) fn new(cell: Cell) -> Self {
        Resolver { cell, once: None }
    }

    pub(crate) fn guarded(cell: Cell) -> Self {
        Resolver {
            cell,
            once: Some(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Runs the resolution procedure on the cell with `value`.
    pub fn resolve(&self, value: Value) {
        if self.claim() {
            resolve(&self.cell, value);
        }
    }

    /// Rejects the cell with `reason`, without unwrapping it.
    pub fn reject(&self, reason: Value) {
        if self.claim() {
            self.cell.reject(reason);
        }
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    fn claim(&self) -> bool {
        match &self.once {
            Some(called) => !called.swap(true, Ordering::AcqRel),
            None => true,
        }
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("cell", &self.cell)
            .field("guarded", &self.once.is_some())
            .finish()
    }
}
