//! Values that are not known at declaration time.
//!
//! Many of the values that flow through a declaration pass are only known once the
//! provisioning engine has actually created something: the name of the secret an issued
//! certificate was written to, the external IP of a load balancer, the nameservers of a
//! DNS zone. A `Deferred<T>` is a cell holding such a value. It starts out pending and
//! settles exactly once, either with a value or with a `PlanError`.
//!
//! Anything computed from a deferred value is registered on it with `map`, `and_then` or
//! `flat_map`, and runs as soon as the input settles, on the thread that settled it.
//! `combine` and `all` wait for several inputs. A failure of any input fails every
//! dependent value with the original error; a default is never substituted.
//!
//! ```rust
//! use cloud_app::deferred::Deferred;
//!
//! let (resolver, secret_name) = Deferred::<String>::pending();
//! let volume_source = secret_name.map(|name| format!("secret/{}", name));
//! assert!(volume_source.try_now().is_none());
//!
//! resolver.resolve("wildcard-certificate".to_owned());
//! assert_eq!(Some(Ok("secret/wildcard-certificate".to_owned())), volume_source.try_now());
//! ```
use crate::error::PlanError;

use futures::channel::oneshot;

use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::{Arc, Mutex};

pub type Settled<T> = Result<T, PlanError>;

type Callback<T> = Box<dyn FnOnce(&Settled<T>) + Send>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Settled(Settled<T>),
}

struct Cell<T> {
    state: Mutex<State<T>>,
}

impl<T: Clone + Send + 'static> Cell<T> {
    fn new(state: State<T>) -> Arc<Cell<T>> {
        Arc::new(Cell {
            state: Mutex::new(state),
        })
    }

    fn settle(&self, result: Settled<T>) {
        let callbacks = {
            let mut state = lock(&self.state);
            match *state {
                State::Settled(_) => {
                    log::warn!("Ignoring attempt to settle a deferred value more than once");
                    return;
                }
                State::Pending(ref mut callbacks) => {
                    let callbacks = std::mem::replace(callbacks, Vec::new());
                    *state = State::Settled(result.clone());
                    callbacks
                }
            }
        };
        // callbacks may register more work on other cells, so the lock must not be held here
        for callback in callbacks {
            callback(&result);
        }
    }

    fn on_settled(&self, callback: Callback<T>) {
        let settled = {
            let mut state = lock(&self.state);
            match *state {
                State::Pending(ref mut callbacks) => {
                    callbacks.push(callback);
                    return;
                }
                State::Settled(ref result) => result.clone(),
            }
        };
        callback(&settled);
    }

    fn peek(&self) -> Option<Settled<T>> {
        match *lock(&self.state) {
            State::Pending(_) => None,
            State::Settled(ref result) => Some(result.clone()),
        }
    }
}

fn lock<S>(mutex: &Mutex<S>) -> std::sync::MutexGuard<'_, S> {
    // a panic inside a callback never leaves a cell half-updated
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The write side of a pending `Deferred`. Dropping a `Resolver` without calling
/// `resolve` or `fail` fails the value with `PlanError::DeferredResolution`.
pub struct Resolver<T: Clone + Send + 'static> {
    cell: Option<Arc<Cell<T>>>,
}

impl<T: Clone + Send + 'static> Resolver<T> {
    pub fn resolve(mut self, value: T) {
        self.settle(Ok(value));
    }

    pub fn fail(mut self, error: PlanError) {
        self.settle(Err(error));
    }

    pub fn settle_with(mut self, result: Settled<T>) {
        self.settle(result);
    }

    fn settle(&mut self, result: Settled<T>) {
        if let Some(cell) = self.cell.take() {
            cell.settle(result);
        }
    }
}

impl<T: Clone + Send + 'static> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.cell.is_some() {
            self.settle(Err(PlanError::unresolved(
                "the resolver was dropped before a value was provided",
            )));
        }
    }
}

impl<T: Clone + Send + 'static> Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("settled", &self.cell.is_none())
            .finish()
    }
}

/// A value that becomes available once an external system resolves it. Cloning a
/// `Deferred` is cheap and every clone observes the same settled value.
pub struct Deferred<T: Clone + Send + 'static> {
    cell: Arc<Cell<T>>,
}

impl<T: Clone + Send + 'static> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Returns a new pending value, along with the `Resolver` that settles it
    pub fn pending() -> (Resolver<T>, Deferred<T>) {
        let cell = Cell::new(State::Pending(Vec::new()));
        let resolver = Resolver {
            cell: Some(cell.clone()),
        };
        (resolver, Deferred { cell })
    }

    /// Returns a value that is already known
    pub fn resolved(value: T) -> Deferred<T> {
        Deferred {
            cell: Cell::new(State::Settled(Ok(value))),
        }
    }

    /// Returns a value that has already failed
    pub fn failed(error: PlanError) -> Deferred<T> {
        Deferred {
            cell: Cell::new(State::Settled(Err(error))),
        }
    }

    pub fn from_result(result: Settled<T>) -> Deferred<T> {
        Deferred {
            cell: Cell::new(State::Settled(result)),
        }
    }

    /// Returns the settled result without waiting, or `None` if the value is still pending
    pub fn try_now(&self) -> Option<Settled<T>> {
        self.cell.peek()
    }

    pub fn is_pending(&self) -> bool {
        self.try_now().is_none()
    }

    /// Invokes `callback` once this value settles. If it has already settled, the callback
    /// runs immediately on the current thread.
    pub fn on_settled(&self, callback: impl FnOnce(&Settled<T>) + Send + 'static) {
        self.cell.on_settled(Box::new(callback));
    }

    /// Returns a new value that applies `f` once this one resolves
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(move |value| Ok(f(value)))
    }

    /// Like `map`, but the transform may itself fail
    pub fn and_then<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Settled<U> + Send + 'static,
    {
        let (resolver, derived) = Deferred::pending();
        self.on_settled(move |result| {
            let derived_result = match result {
                Ok(value) => f(value.clone()),
                Err(err) => Err(err.clone()),
            };
            resolver.settle_with(derived_result);
        });
        derived
    }

    /// Chains a transform that produces another deferred value
    pub fn flat_map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Deferred<U> + Send + 'static,
    {
        let (resolver, derived) = Deferred::pending();
        self.on_settled(move |result| match result {
            Ok(value) => {
                f(value.clone()).on_settled(move |inner| resolver.settle_with(inner.clone()))
            }
            Err(err) => resolver.fail(err.clone()),
        });
        derived
    }

    /// Waits for both values. The first failure of either input fails the result.
    pub fn combine<U>(&self, other: &Deferred<U>) -> Deferred<(T, U)>
    where
        U: Clone + Send + 'static,
    {
        let (resolver, combined) = Deferred::pending();
        let slots: Arc<Mutex<Pair<T, U>>> = Arc::new(Mutex::new(Pair {
            left: None,
            right: None,
            resolver: Some(resolver),
        }));

        let left_slots = slots.clone();
        self.on_settled(move |result| {
            let settled = {
                let mut pair = lock(&left_slots);
                match result {
                    Ok(value) => {
                        pair.left = Some(value.clone());
                        pair.take_complete()
                    }
                    Err(err) => pair.take_failed(err.clone()),
                }
            };
            // the resolver runs dependents, which may settle the other input
            settle(settled);
        });
        other.on_settled(move |result| {
            let settled = {
                let mut pair = lock(&slots);
                match result {
                    Ok(value) => {
                        pair.right = Some(value.clone());
                        pair.take_complete()
                    }
                    Err(err) => pair.take_failed(err.clone()),
                }
            };
            settle(settled);
        });
        combined
    }

    /// Waits for every value, preserving their order. The first failure fails the result.
    pub fn all(values: Vec<Deferred<T>>) -> Deferred<Vec<T>> {
        if values.is_empty() {
            return Deferred::resolved(Vec::new());
        }
        let (resolver, combined) = Deferred::pending();
        let slots = Arc::new(Mutex::new(Slots {
            values: vec![None; values.len()],
            remaining: values.len(),
            resolver: Some(resolver),
        }));
        for (index, value) in values.iter().enumerate() {
            let slots = slots.clone();
            value.on_settled(move |result| {
                let settled = {
                    let mut slots = lock(&slots);
                    match result {
                        Ok(value) => slots.fill(index, value.clone()),
                        Err(err) => slots.resolver.take().map(|r| (r, Err(err.clone()))),
                    }
                };
                settle(settled);
            });
        }
        combined
    }

    /// Returns a future that completes once this value settles
    pub fn value(&self) -> impl Future<Output = Settled<T>> {
        let (tx, rx) = oneshot::channel();
        self.on_settled(move |result| {
            // the receiver may have been dropped already
            let _ = tx.send(result.clone());
        });
        async move {
            rx.await.unwrap_or_else(|_| {
                Err(PlanError::unresolved(
                    "value was dropped before it was settled",
                ))
            })
        }
    }
}

impl<T: Clone + Send + 'static> From<T> for Deferred<T> {
    fn from(value: T) -> Deferred<T> {
        Deferred::resolved(value)
    }
}

impl<T: Clone + Send + Debug + 'static> Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.try_now() {
            None => f.write_str("Deferred(<pending>)"),
            Some(Ok(value)) => write!(f, "Deferred({:?})", value),
            Some(Err(err)) => write!(f, "Deferred(<failed: {}>)", err),
        }
    }
}

fn settle<T: Clone + Send + 'static>(settled: Option<(Resolver<T>, Settled<T>)>) {
    if let Some((resolver, result)) = settled {
        resolver.settle_with(result);
    }
}

struct Pair<T: Clone + Send + 'static, U: Clone + Send + 'static> {
    left: Option<T>,
    right: Option<U>,
    resolver: Option<Resolver<(T, U)>>,
}

impl<T: Clone + Send + 'static, U: Clone + Send + 'static> Pair<T, U> {
    fn take_failed(&mut self, error: PlanError) -> Option<(Resolver<(T, U)>, Settled<(T, U)>)> {
        self.resolver.take().map(|resolver| (resolver, Err(error)))
    }

    fn take_complete(&mut self) -> Option<(Resolver<(T, U)>, Settled<(T, U)>)> {
        if self.left.is_none() || self.right.is_none() {
            return None;
        }
        let resolver = self.resolver.take()?;
        match (self.left.take(), self.right.take()) {
            (Some(left), Some(right)) => Some((resolver, Ok((left, right)))),
            _ => None,
        }
    }
}

struct Slots<T: Clone + Send + 'static> {
    values: Vec<Option<T>>,
    remaining: usize,
    resolver: Option<Resolver<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Slots<T> {
    fn fill(&mut self, index: usize, value: T) -> Option<(Resolver<Vec<T>>, Settled<Vec<T>>)> {
        self.resolver.as_ref()?;
        self.values[index] = Some(value);
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        let values = std::mem::replace(&mut self.values, Vec::new());
        let values: Vec<T> = values.into_iter().flatten().collect();
        self.resolver.take().map(|resolver| (resolver, Ok(values)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn map_runs_once_the_input_resolves() {
        let (resolver, ip) = Deferred::<String>::pending();
        let url = ip.map(|ip| format!("https://{}", ip));
        assert!(url.is_pending());

        resolver.resolve("10.0.0.7".to_owned());
        assert_eq!(Some(Ok("https://10.0.0.7".to_owned())), url.try_now());
    }

    #[test]
    fn map_on_a_resolved_value_runs_immediately() {
        let doubled = Deferred::resolved(21).map(|n| n * 2);
        assert_eq!(Some(Ok(42)), doubled.try_now());
    }

    #[test]
    fn and_then_failure_becomes_the_derived_failure() {
        let derived: Deferred<u32> = Deferred::resolved(1u32)
            .and_then(|_| Err(PlanError::config_shape("no listeners")));
        assert_eq!(
            Some(Err(PlanError::ConfigShape("no listeners".to_owned()))),
            derived.try_now()
        );
    }

    #[test]
    fn combine_waits_for_both_inputs() {
        let (left_resolver, left) = Deferred::<String>::pending();
        let (right_resolver, right) = Deferred::<u16>::pending();
        let combined = left.combine(&right);

        right_resolver.resolve(443);
        assert!(combined.is_pending());
        left_resolver.resolve("envoy".to_owned());
        assert_eq!(Some(Ok(("envoy".to_owned(), 443))), combined.try_now());
    }

    #[test]
    fn combine_propagates_the_first_failure_without_waiting() {
        let (_left_resolver, left) = Deferred::<String>::pending();
        let right = Deferred::<u16>::failed(PlanError::unresolved("certificate not issued"));
        let combined = left.combine(&right);
        assert_eq!(
            Some(Err(PlanError::DeferredResolution(
                "certificate not issued".to_owned()
            ))),
            combined.try_now()
        );
    }

    #[test]
    fn all_preserves_input_order_regardless_of_resolution_order() {
        let (first_resolver, first) = Deferred::<&'static str>::pending();
        let (second_resolver, second) = Deferred::<&'static str>::pending();
        let all = Deferred::all(vec![first, second, Deferred::resolved("ns3")]);

        second_resolver.resolve("ns2");
        assert!(all.is_pending());
        first_resolver.resolve("ns1");
        assert_eq!(Some(Ok(vec!["ns1", "ns2", "ns3"])), all.try_now());
    }

    #[test]
    fn all_of_nothing_is_resolved() {
        let all: Deferred<Vec<u8>> = Deferred::all(Vec::new());
        assert_eq!(Some(Ok(Vec::new())), all.try_now());
    }

    #[test]
    fn dropping_a_resolver_fails_the_value() {
        let (resolver, value) = Deferred::<u8>::pending();
        drop(resolver);
        match value.try_now() {
            Some(Err(PlanError::DeferredResolution(_))) => {}
            other => panic!("expected a resolution failure, got: {:?}", other),
        }
    }

    #[test]
    fn flat_map_follows_the_inner_value() {
        let (inner_resolver, inner) = Deferred::<u8>::pending();
        let outer = Deferred::resolved(()).flat_map(move |_| inner);
        assert!(outer.is_pending());
        inner_resolver.resolve(7);
        assert_eq!(Some(Ok(7)), outer.try_now());
    }

    #[test]
    fn value_can_be_awaited() {
        let (resolver, value) = Deferred::<String>::pending();
        let future = value.value();
        resolver.resolve("done".to_owned());
        let result = futures::executor::block_on(future);
        assert_eq!(Ok("done".to_owned()), result);
    }

    #[test]
    fn dependents_of_a_combined_value_may_settle_its_other_input() {
        let (left_resolver, left) = Deferred::<u8>::pending();
        let (right_resolver, right) = Deferred::<u8>::pending();
        let combined = left.combine(&right);
        combined.on_settled(move |_| right_resolver.resolve(2));

        left_resolver.fail(PlanError::unresolved("cluster failed"));
        assert_eq!(Some(Ok(2)), right.try_now());
        assert_eq!(
            Some(Err(PlanError::DeferredResolution("cluster failed".to_owned()))),
            combined.try_now()
        );
    }

    #[test]
    fn dependents_of_all_may_settle_another_input() {
        let (first_resolver, first) = Deferred::<u8>::pending();
        let (second_resolver, second) = Deferred::<u8>::pending();
        let all = Deferred::all(vec![first, second.clone()]);
        all.on_settled(move |_| second_resolver.resolve(2));

        first_resolver.fail(PlanError::unresolved("zone failed"));
        assert_eq!(Some(Ok(2)), second.try_now());
        assert!(matches!(all.try_now(), Some(Err(PlanError::DeferredResolution(_)))));
    }
}
