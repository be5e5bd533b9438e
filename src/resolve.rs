//! The resolution procedure: how a value handed to a cell turns into a
//! settlement.
//!
//! Plain values fulfill the cell at once. Another cell is adopted: its outcome
//! is copied if it has one, otherwise the copy is deferred to a reaction on it.
//! A foreign awaitable has its `then` member read once and invoked with a
//! fresh guarded [`Resolver`], so only the first of its success call, failure
//! call or synchronous error (a panic counts as one) has any effect.
use crate::{scheduler::catch_panic, Cell, CellState, Error, Handler, Resolver, Value};
use tracing::debug;

/// Resolves `cell` with `value`. A no-op once `cell` has settled.
pub(crate) fn resolve(cell: &Cell, value: Value) {
    if !cell.is_pending() {
        return;
    }
    match value {
        Value::Cell(ref other) if other.ptr_eq(cell) => {
            debug!("cell resolved with itself");
            cell.reject(Error::SelfResolution.into());
        }
        Value::Cell(other) => adopt(cell, other),
        Value::Foreign(thenable) => {
            let then = match catch_panic(|| thenable.then_member()) {
                Ok(Some(then)) => then,
                Ok(None) => return cell.fulfill(Value::Foreign(thenable)),
                Err(reason) => return cell.reject(reason),
            };
            debug!("adopting a foreign awaitable");
            let resolver = Resolver::guarded(cell.clone());
            let adapters = resolver.clone();
            if let Err(reason) = catch_panic(move || then(adapters)) {
                resolver.reject(reason);
            }
        }
        value => cell.fulfill(value),
    }
}

fn adopt(cell: &Cell, other: Cell) {
    match other.state() {
        CellState::Pending => {
            debug!("adopting a pending cell");
            let on_success = cell.clone();
            let on_failure = cell.clone();
            other.then(
                Some(Handler::new(move |value| {
                    resolve(&on_success, value);
                    Ok(Value::Undefined)
                })),
                Some(Handler::new(move |reason| {
                    on_failure.reject(reason);
                    Ok(Value::Undefined)
                })),
            );
        }
        // Fulfilled outcomes went through this procedure already, so they are
        // never cells or callable thenables and can be copied as they are.
        CellState::Fulfilled | CellState::Rejected => match other.outcome() {
            Some(Ok(value)) => cell.fulfill(value),
            Some(Err(reason)) => cell.reject(reason),
            None => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::resolve;
    use crate::{Cell, CellState, Error, Resolver, ThenFn, Thenable, Value};
    use futures::executor::block_on;
    use std::{
        fmt,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    #[derive(Debug, Default)]
    struct Counting {
        reads: AtomicUsize,
    }

    impl Thenable for Counting {
        fn then_member(&self) -> Result<Option<ThenFn>, Value> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(Arc::new(|resolver: Resolver| -> Result<(), Value> {
                resolver.resolve(1.into());
                resolver.resolve(2.into());
                resolver.reject("late".into());
                Err("thrown after resolving".into())
            })))
        }
    }

    #[derive(Debug)]
    struct NotCallable;

    impl Thenable for NotCallable {
        fn then_member(&self) -> Result<Option<ThenFn>, Value> {
            Ok(None)
        }
    }

    #[derive(Debug)]
    struct ThrowingGetter;

    impl Thenable for ThrowingGetter {
        fn then_member(&self) -> Result<Option<ThenFn>, Value> {
            Err("getter threw".into())
        }
    }

    /// A foreign awaitable whose `then` is the given closure.
    struct Scripted(ThenFn);

    impl Scripted {
        fn value<F>(then: F) -> Value
        where
            F: Fn(Resolver) -> Result<(), Value> + Send + Sync + 'static,
        {
            Value::Foreign(Arc::new(Scripted(Arc::new(then))))
        }
    }

    impl fmt::Debug for Scripted {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("Scripted")
        }
    }

    impl Thenable for Scripted {
        fn then_member(&self) -> Result<Option<ThenFn>, Value> {
            Ok(Some(self.0.clone()))
        }
    }

    #[derive(Debug)]
    struct PanickingGetter;

    impl Thenable for PanickingGetter {
        fn then_member(&self) -> Result<Option<ThenFn>, Value> {
            panic!("getter panicked")
        }
    }

    #[test]
    fn test_plain_values_fulfill_synchronously() {
        let (cell, _) = Cell::deferred();
        resolve(&cell, Value::Null);
        assert_eq!(cell.outcome(), Some(Ok(Value::Null)));
    }

    #[test]
    fn test_self_resolution_rejects() {
        let (cell, _) = Cell::deferred();
        resolve(&cell, Value::Cell(cell.clone()));
        assert_eq!(cell.outcome(), Some(Err(Error::SelfResolution.into())));
    }

    #[test]
    fn test_settled_cells_are_copied_synchronously() {
        let (cell, _) = Cell::deferred();
        resolve(&cell, Cell::rejected("no").into());
        assert_eq!(cell.outcome(), Some(Err("no".into())));
    }

    #[test]
    fn test_pending_cells_keep_the_target_pending() {
        let (inner, _inner_resolver) = Cell::deferred();
        let (cell, _) = Cell::deferred();
        resolve(&cell, inner.into());
        assert_eq!(cell.state(), CellState::Pending);
    }

    #[test]
    fn test_thenable_is_read_once_and_first_call_wins() {
        let thenable = Arc::new(Counting::default());
        let (cell, _) = Cell::deferred();
        resolve(&cell, Value::Foreign(thenable.clone()));
        assert_eq!(thenable.reads.load(Ordering::SeqCst), 1);
        assert_eq!(cell.outcome(), Some(Ok(1.into())));
    }

    #[test]
    fn test_non_callable_then_fulfills_with_the_object() {
        let object: Arc<dyn Thenable> = Arc::new(NotCallable);
        let (cell, _) = Cell::deferred();
        resolve(&cell, Value::Foreign(object.clone()));
        assert_eq!(cell.outcome(), Some(Ok(Value::Foreign(object))));
    }

    #[test]
    fn test_throwing_getter_rejects() {
        let (cell, _) = Cell::deferred();
        resolve(&cell, Value::Foreign(Arc::new(ThrowingGetter)));
        assert_eq!(cell.outcome(), Some(Err("getter threw".into())));
    }

    #[test]
    fn test_then_error_before_any_adapter_call_rejects() {
        let (cell, _) = Cell::deferred();
        resolve(&cell, Scripted::value(|_| Err("then threw".into())));
        assert_eq!(cell.outcome(), Some(Err("then threw".into())));
    }

    #[test]
    fn test_then_panic_rejects() {
        let (cell, _) = Cell::deferred();
        resolve(&cell, Scripted::value(|_| panic!("then panicked")));
        assert_eq!(cell.outcome(), Some(Err("then panicked".into())));

        let (cell, _) = Cell::deferred();
        resolve(&cell, Value::Foreign(Arc::new(PanickingGetter)));
        assert_eq!(cell.outcome(), Some(Err("getter panicked".into())));
    }

    #[test]
    fn test_then_panic_after_resolving_is_ignored() {
        let (cell, _) = Cell::deferred();
        resolve(
            &cell,
            Scripted::value(|resolver| {
                resolver.resolve("kept".into());
                panic!("too late")
            }),
        );
        assert_eq!(cell.outcome(), Some(Ok("kept".into())));
    }

    #[test]
    fn test_adapter_values_go_through_the_procedure_again() {
        let (inner, inner_resolver) = Cell::deferred();
        let adopted = inner.clone();
        let (cell, _) = Cell::deferred();
        resolve(
            &cell,
            Scripted::value(move |resolver| {
                resolver.resolve(adopted.clone().into());
                Ok(())
            }),
        );
        assert_eq!(cell.state(), CellState::Pending);

        inner_resolver.resolve(Scripted::value(|resolver| {
            resolver.resolve(Scripted::value(|resolver| {
                resolver.reject("nested".into());
                Ok(())
            }));
            Ok(())
        }));
        assert_eq!(inner.outcome(), Some(Err("nested".into())));
        assert_eq!(block_on(cell), Err("nested".into()));
    }
}
