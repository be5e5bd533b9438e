//! The deferred task queue reactions are drained on.
//!
//! A scheduler owns one worker thread fed through a multi-producer,
//! single-consumer channel. Every posted task is one turn; turns run one at a
//! time in the order they were posted.
use crate::{Cell, Error, Outcome, Resolver, Result, Value};
use std::{
    any::Any,
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, OnceLock,
    },
    thread,
};
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send>;

/// Receives rejections that reached the end of a [`Cell::done`] chain.
pub type UnhandledHook = Arc<dyn Fn(Value) + Send + Sync>;

static GLOBAL: OnceLock<Scheduler> = OnceLock::new();

/// Scheduler settings.
#[derive(Clone)]
pub struct Config {
    /// Name given to the worker thread.
    pub thread_name: String,
    /// Called, on its own turn, with every unhandled rejection.
    pub unhandled: UnhandledHook,
}

impl Config {
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn on_unhandled<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.unhandled = Arc::new(hook);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            thread_name: "settle-scheduler".into(),
            unhandled: Arc::new(|reason: Value| error!(?reason, "unhandled rejection")),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("thread_name", &self.thread_name)
            .finish_non_exhaustive()
    }
}

/// A cloneable handle to a worker thread. The worker exits once every handle
/// (including the ones held by cells) is gone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Shared>,
}

struct Shared {
    sender: Sender<Task>,
    unhandled: UnhandledHook,
    name: String,
}

impl Scheduler {
    /// Starts a worker thread.
    pub fn new(config: Config) -> io::Result<Scheduler> {
        let (sender, receiver) = channel();
        thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(receiver))?;
        Ok(Scheduler {
            inner: Arc::new(Shared {
                sender,
                unhandled: config.unhandled,
                name: config.thread_name,
            }),
        })
    }

    /// The process-wide scheduler used by [`Cell::new`] and friends. Started
    /// with [`Config::default`] unless [`Scheduler::install`] ran first.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread cannot be spawned on first use. Every
    /// constructor that does not take a scheduler (`Cell::new`,
    /// `Cell::deferred`, `Cell::resolved`, `Cell::all`, ...) goes through
    /// here; call [`Scheduler::install`] up front to handle that error.
    pub fn global() -> &'static Scheduler {
        GLOBAL.get_or_init(|| {
            Scheduler::new(Config::default()).expect("failed to spawn the global scheduler")
        })
    }

    /// Starts the process-wide scheduler with `config`. Fails with
    /// [`io::ErrorKind::AlreadyExists`] if it is already running.
    pub fn install(config: Config) -> io::Result<()> {
        let scheduler = Scheduler::new(config)?;
        GLOBAL.set(scheduler).map_err(|_| {
            io::Error::new(io::ErrorKind::AlreadyExists, "global scheduler already running")
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queues `task` to run on a later turn.
    pub fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .sender
            .send(Box::new(task))
            .map_err(|_| Error::SchedulerGone)
    }

    /// Hands `reason` to the unhandled-rejection hook on a later turn.
    pub fn report_unhandled(&self, reason: Value) {
        let hook = self.inner.unhandled.clone();
        if let Err(err) = self.post(move || hook(reason)) {
            error!(%err, "dropping unhandled rejection");
        }
    }

    /// A cell bound to this scheduler. See [`Cell::new`].
    pub fn cell<F>(&self, setup: F) -> Cell
    where
        F: FnOnce(Resolver) -> std::result::Result<(), Value>,
    {
        Cell::new_in(self, setup)
    }

    /// See [`Cell::deferred`].
    pub fn deferred(&self) -> (Cell, Resolver) {
        Cell::deferred_in(self)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").field("name", &self.inner.name).finish()
    }
}

fn run(receiver: Receiver<Task>) {
    for task in receiver {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!(panic = %panic_message(payload.as_ref()), "scheduled task panicked");
        }
    }
    debug!("scheduler worker stopped");
}

/// Runs `f`, turning a panic into a rejection reason carrying its message.
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> Outcome<T>) -> Outcome<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(panic_message(payload.as_ref()).into()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, Scheduler};
    use std::{
        sync::{mpsc::channel, Arc, Mutex},
        time::Duration,
    };

    #[test]
    fn test_tasks_run_in_post_order() {
        let scheduler = Scheduler::new(Config::default()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = channel();
        for i in 0..10 {
            let seen = seen.clone();
            scheduler.post(move || seen.lock().unwrap().push(i)).unwrap();
        }
        scheduler.post(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_worker_survives_a_panicking_task() {
        let scheduler = Scheduler::new(Config::default()).unwrap();
        let (tx, rx) = channel();
        scheduler.post(|| panic!("boom")).unwrap();
        scheduler.post(move || tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_unhandled_hook_runs_on_the_worker() {
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        let scheduler = Scheduler::new(
            Config::default()
                .with_thread_name("unhandled-test")
                .on_unhandled(move |reason| {
                    let name = std::thread::current().name().map(str::to_owned);
                    tx.lock().unwrap().send((reason, name)).unwrap();
                }),
        )
        .unwrap();
        scheduler.report_unhandled("lost".into());
        let (reason, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(reason, crate::Value::from("lost"));
        assert_eq!(thread.as_deref(), Some("unhandled-test"));
        assert_eq!(scheduler.name(), "unhandled-test");
    }

    #[test]
    fn test_install_after_start_is_rejected() {
        let _ = Scheduler::global();
        let err = Scheduler::install(Config::default()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
    }
}
