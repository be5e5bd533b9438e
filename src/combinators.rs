//! Constructors and aggregates built on [`Cell`], [`Resolver`] and the
//! resolution procedure.
use crate::{Cell, Error, Handler, Resolver, Result, Scheduler, Value};
use std::sync::{Arc, Mutex, PoisonError};

/// Fills one slot per input as results arrive, by source index.
struct Slots {
    values: Vec<Option<Value>>,
    remaining: usize,
}

impl Slots {
    /// Stores `value` at `index`; returns the full list once every slot is
    /// filled.
    fn fill(&mut self, index: usize, value: Value) -> Option<Vec<Value>> {
        if self.values[index].replace(value).is_none() {
            self.remaining -= 1;
        }
        if self.remaining > 0 {
            return None;
        }
        Some(self.values.drain(..).map(Option::unwrap_or_default).collect())
    }
}

fn sequence(items: Value) -> Result<Vec<Value>> {
    match items {
        Value::List(items) => Ok(items),
        other => Err(Error::NotASequence(other.type_name())),
    }
}

fn settle_on_success(resolver: Resolver) -> Option<Handler> {
    Some(Handler::new(move |value| {
        resolver.resolve(value);
        Ok(Value::Undefined)
    }))
}

fn settle_on_failure(resolver: Resolver) -> Option<Handler> {
    Some(Handler::new(move |reason| {
        resolver.reject(reason);
        Ok(Value::Undefined)
    }))
}

impl Cell {
    /// Returns `value` itself if it is a cell, otherwise a new cell resolved
    /// with it. Foreign awaitables are adopted.
    ///
    /// # Examples
    ///
    /// ```
    /// use settle::{Cell, Value};
    ///
    /// let cell = Cell::resolved(5);
    /// assert!(Cell::resolved(Value::Cell(cell.clone())).ptr_eq(&cell));
    /// ```
    pub fn resolved(value: impl Into<Value>) -> Cell {
        Cell::resolved_in(Scheduler::global(), value)
    }

    pub(crate) fn resolved_in(scheduler: &Scheduler, value: impl Into<Value>) -> Cell {
        match value.into() {
            Value::Cell(cell) => cell,
            value => Cell::new_in(scheduler, |resolver| {
                resolver.resolve(value);
                Ok(())
            }),
        }
    }

    /// A new cell rejected with `reason`. Cells and awaitables are not
    /// unwrapped.
    pub fn rejected(reason: impl Into<Value>) -> Cell {
        Cell::rejected_in(Scheduler::global(), reason)
    }

    pub(crate) fn rejected_in(scheduler: &Scheduler, reason: impl Into<Value>) -> Cell {
        let reason = reason.into();
        Cell::new_in(scheduler, |resolver| {
            resolver.reject(reason);
            Ok(())
        })
    }

    /// Fulfills with the list of every item's value, in item order, once all
    /// of them fulfill. Rejects with the first rejection.
    ///
    /// Fails with [`Error::NotASequence`] unless `items` is a list.
    ///
    /// # Examples
    ///
    /// ```
    /// use settle::{Cell, Value};
    /// use futures::executor::block_on;
    ///
    /// let items: Vec<Value> = vec![Cell::resolved(1).into(), 2.into()];
    /// let all = Cell::all(items).unwrap();
    /// assert_eq!(block_on(all), Ok(Value::List(vec![1.into(), 2.into()])));
    /// ```
    pub fn all(items: impl Into<Value>) -> Result<Cell> {
        Cell::all_in(Scheduler::global(), items)
    }

    pub(crate) fn all_in(scheduler: &Scheduler, items: impl Into<Value>) -> Result<Cell> {
        let items = sequence(items.into())?;
        if items.is_empty() {
            return Ok(Cell::resolved_in(scheduler, Value::List(Vec::new())));
        }
        let (cell, resolver) = Cell::deferred_in(scheduler);
        let slots = Arc::new(Mutex::new(Slots {
            values: vec![None; items.len()],
            remaining: items.len(),
        }));
        for (index, item) in items.into_iter().enumerate() {
            let slots = slots.clone();
            let on_success = resolver.clone();
            Cell::resolved_in(scheduler, item).then(
                Some(Handler::new(move |value| {
                    let complete = slots
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .fill(index, value);
                    if let Some(values) = complete {
                        on_success.resolve(Value::List(values));
                    }
                    Ok(Value::Undefined)
                })),
                settle_on_failure(resolver.clone()),
            );
        }
        Ok(cell)
    }

    /// Settles like whichever item settles first.
    ///
    /// Fails with [`Error::NotASequence`] unless `items` is a list. An empty
    /// list never settles.
    pub fn race(items: impl Into<Value>) -> Result<Cell> {
        Cell::race_in(Scheduler::global(), items)
    }

    pub(crate) fn race_in(scheduler: &Scheduler, items: impl Into<Value>) -> Result<Cell> {
        let items = sequence(items.into())?;
        let (cell, resolver) = Cell::deferred_in(scheduler);
        for item in items {
            Cell::resolved_in(scheduler, item).then(
                settle_on_success(resolver.clone()),
                settle_on_failure(resolver.clone()),
            );
        }
        Ok(cell)
    }
}

impl Scheduler {
    /// See [`Cell::resolved`].
    pub fn resolved(&self, value: impl Into<Value>) -> Cell {
        Cell::resolved_in(self, value)
    }

    /// See [`Cell::rejected`].
    pub fn rejected(&self, reason: impl Into<Value>) -> Cell {
        Cell::rejected_in(self, reason)
    }

    /// See [`Cell::all`].
    pub fn all(&self, items: impl Into<Value>) -> Result<Cell> {
        Cell::all_in(self, items)
    }

    /// See [`Cell::race`].
    pub fn race(&self, items: impl Into<Value>) -> Result<Cell> {
        Cell::race_in(self, items)
    }
}

#[cfg(test)]
mod tests {
    use super::Slots;
    use crate::{Cell, CellState, Error, Value};

    #[test]
    fn test_slots_complete_in_index_order() {
        let mut slots = Slots {
            values: vec![None; 3],
            remaining: 3,
        };
        assert_eq!(slots.fill(2, "c".into()), None);
        assert_eq!(slots.fill(0, "a".into()), None);
        assert_eq!(
            slots.fill(1, "b".into()),
            Some(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn test_rejected_does_not_unwrap() {
        let inner = Cell::resolved(1);
        let cell = Cell::rejected(inner.clone());
        assert_eq!(cell.outcome(), Some(Err(Value::Cell(inner))));
    }

    #[test]
    fn test_resolved_plain_value_is_already_fulfilled() {
        assert_eq!(Cell::resolved("x").state(), CellState::Fulfilled);
    }

    #[test]
    fn test_non_sequences_fail_synchronously() {
        assert_eq!(Cell::all(1).unwrap_err(), Error::NotASequence("number"));
        assert_eq!(Cell::race(Value::Null).unwrap_err(), Error::NotASequence("null"));
    }

    #[test]
    fn test_race_of_nothing_stays_pending() {
        assert_eq!(Cell::race(Value::List(Vec::new())).unwrap().state(), CellState::Pending);
    }
}
