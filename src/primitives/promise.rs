// ============================================================================
// weft - Promise Bridge
// Republishing asynchronous outcomes into the observable graph
// ============================================================================
//
// The graph itself never suspends; asynchronous work happens in host-driven
// futures. ObservablePromise wraps such a future so that its settlement is
// published as a tagged result inside a dedicated transaction, while the
// original outcome still flows to any direct awaiter through a shared
// future - the bridge republishes, it does not swallow.
// ============================================================================

use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture, Shared};

use crate::core::observable::Observable;
use crate::primitives::derived::{derived_with_equals, Derived};
use crate::primitives::value::ObservableValue;
use crate::reactivity::equality::never_equals;
use crate::reactivity::transaction::transaction_named;

// =============================================================================
// PROMISE RESULT
// =============================================================================

/// The settled outcome of a wrapped asynchronous operation.
#[derive(Debug, Clone)]
pub struct PromiseResult<T, E> {
    result: Result<T, E>,
}

impl<T, E> PromiseResult<T, E> {
    pub fn resolved(data: T) -> Self {
        Self { result: Ok(data) }
    }

    pub fn rejected(error: E) -> Self {
        Self { result: Err(error) }
    }

    /// The success value, if the operation resolved.
    pub fn data(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// The failure value, if the operation rejected.
    pub fn error(&self) -> Option<&E> {
        self.result.as_ref().err()
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_ok()
    }

    pub fn as_result(&self) -> Result<&T, &E> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

impl<T, E: std::fmt::Debug> PromiseResult<T, E> {
    /// The success value. A rejected result raises here - this is the one
    /// place a captured failure surfaces synchronously, and only because
    /// the caller explicitly demanded the data.
    pub fn data_or_throw(&self) -> &T {
        match &self.result {
            Ok(data) => data,
            Err(error) => panic!("promise rejected: {error:?}"),
        }
    }
}

// =============================================================================
// OBSERVABLE PROMISE
// =============================================================================

/// The shared completion channel of a wrapped operation.
pub type SharedOutcome<T, E> = Shared<LocalBoxFuture<'static, Result<T, E>>>;

/// An asynchronous operation whose settlement is observable.
///
/// `result()` starts at `None` and transitions exactly once to
/// `Some(PromiseResult)` when the wrapped future completes, inside its own
/// transaction. `future()` hands out the original outcome to direct
/// awaiters; rejections reach both channels.
///
/// The crate embeds no executor: publication happens when the host drives
/// the shared future (or any clone of it) to completion.
pub struct ObservablePromise<T: Clone + 'static, E: Clone + 'static> {
    result: ObservableValue<Option<PromiseResult<T, E>>>,
    future: SharedOutcome<T, E>,
}

impl<T: Clone + 'static, E: Clone + 'static> Clone for ObservablePromise<T, E> {
    fn clone(&self) -> Self {
        Self {
            result: self.result.clone(),
            future: self.future.clone(),
        }
    }
}

impl<T: Clone + 'static, E: Clone + 'static> ObservablePromise<T, E> {
    pub fn new(future: impl Future<Output = Result<T, E>> + 'static) -> Self {
        let result = ObservableValue::with_equals(None, never_equals);
        let published = result.clone();
        let wrapped = async move {
            let outcome = future.await;
            let tagged = match &outcome {
                Ok(data) => PromiseResult::resolved(data.clone()),
                Err(error) => PromiseResult::rejected(error.clone()),
            };
            transaction_named("promise settled", |tx| {
                published.set(Some(tagged), Some(tx));
            });
            outcome
        }
        .boxed_local()
        .shared();

        Self {
            result,
            future: wrapped,
        }
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        Self::new(f())
    }

    /// The observable settlement state: `None` until the operation settles.
    pub fn result(&self) -> ObservableValue<Option<PromiseResult<T, E>>> {
        self.result.clone()
    }

    /// The completion channel for direct awaiters. Cloneable; every awaiter
    /// receives the same outcome, and a rejection is surfaced as `Err` here
    /// as well as in `result()`.
    pub fn future(&self) -> SharedOutcome<T, E> {
        self.future.clone()
    }
}

// =============================================================================
// OBSERVABLE LAZY
// =============================================================================

/// Defers a computation until first demanded, then caches it permanently.
pub struct ObservableLazy<T: Clone + 'static> {
    compute: Box<dyn Fn() -> T>,
    value: ObservableValue<Option<T>>,
}

impl<T: Clone + 'static> ObservableLazy<T> {
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self {
            compute: Box::new(compute),
            value: ObservableValue::with_equals(None, never_equals),
        }
    }

    /// The cached value; observing this never forces the computation.
    pub fn cached_value(&self) -> ObservableValue<Option<T>> {
        self.value.clone()
    }

    /// The value, computing it on first call.
    pub fn get_value(&self) -> T {
        if let Some(value) = self.value.get() {
            return value;
        }
        let value = (self.compute)();
        self.value.set(Some(value.clone()), None);
        value
    }
}

// =============================================================================
// OBSERVABLE LAZY PROMISE
// =============================================================================

/// Defers starting an asynchronous operation until first demanded.
///
/// Reading `cached_promise_result()` never starts the operation; `start()`
/// constructs the wrapped promise once and returns its completion channel
/// on every subsequent call.
pub struct ObservableLazyPromise<T: Clone + 'static, E: Clone + 'static> {
    lazy: Rc<ObservableLazy<ObservablePromise<T, E>>>,
    cached_promise_result: Derived<Option<PromiseResult<T, E>>>,
}

impl<T: Clone + 'static, E: Clone + 'static> ObservableLazyPromise<T, E> {
    pub fn new<F, Fut>(compute_future: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let lazy = Rc::new(ObservableLazy::new(move || {
            ObservablePromise::new(compute_future())
        }));
        let cached_promise_result = {
            let lazy = lazy.clone();
            derived_with_equals(
                move |reader| {
                    lazy.cached_value()
                        .read(reader)
                        .and_then(|promise| promise.result().read(reader))
                },
                never_equals,
            )
        };
        Self {
            lazy,
            cached_promise_result,
        }
    }

    /// `None` while the operation has not been started or has not settled.
    pub fn cached_promise_result(&self) -> Derived<Option<PromiseResult<T, E>>> {
        self.cached_promise_result.clone()
    }

    /// Whether the operation has been started.
    pub fn is_started(&self) -> bool {
        self.lazy.cached_value().get().is_some()
    }

    /// Start the operation (first call only) and return its completion
    /// channel.
    pub fn start(&self) -> SharedOutcome<T, E> {
        self.lazy.get_value().future()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::autorun::autorun;
    use futures::channel::oneshot;
    use futures::executor::block_on;
    use std::cell::{Cell, RefCell};

    #[test]
    fn resolution_publishes_data_once_and_forwards_value() {
        let promise: ObservablePromise<i32, String> = ObservablePromise::new(async { Ok(42) });

        let states: Rc<RefCell<Vec<Option<bool>>>> = Rc::new(RefCell::new(Vec::new()));
        let _run = autorun({
            let result = promise.result();
            let states = states.clone();
            move |reader| {
                let state = result.read(reader).map(|r| r.is_resolved());
                states.borrow_mut().push(state);
            }
        });
        assert_eq!(*states.borrow(), vec![None]);

        let outcome = block_on(promise.future());
        assert_eq!(outcome, Ok(42));

        // Exactly one transition: None -> resolved.
        assert_eq!(*states.borrow(), vec![None, Some(true)]);

        let settled = promise.result().get().expect("settled");
        assert_eq!(settled.data(), Some(&42));
        assert_eq!(*settled.data_or_throw(), 42);
    }

    #[test]
    fn rejection_publishes_error_and_forwards_failure() {
        let promise: ObservablePromise<i32, String> =
            ObservablePromise::new(async { Err(String::from("boom")) });

        let outcome = block_on(promise.future());
        assert_eq!(outcome, Err(String::from("boom")));

        let settled = promise.result().get().expect("settled");
        assert!(!settled.is_resolved());
        assert_eq!(settled.error(), Some(&String::from("boom")));
    }

    #[test]
    #[should_panic(expected = "promise rejected")]
    fn data_or_throw_raises_the_captured_error() {
        let rejected: PromiseResult<i32, &str> = PromiseResult::rejected("nope");
        let _ = rejected.data_or_throw();
    }

    #[test]
    fn pending_operation_settles_when_driven() {
        let (sender, receiver) = oneshot::channel::<i32>();
        let promise: ObservablePromise<i32, String> = ObservablePromise::new(async move {
            receiver.await.map_err(|_| String::from("cancelled"))
        });

        assert!(promise.result().get().is_none());

        sender.send(7).expect("receiver alive");
        let outcome = block_on(promise.future());
        assert_eq!(outcome, Ok(7));

        let settled = promise.result().get().expect("settled");
        assert_eq!(settled.data(), Some(&7));
    }

    #[test]
    fn multiple_awaiters_share_one_settlement() {
        let publishes = Rc::new(Cell::new(0));
        let promise: ObservablePromise<i32, String> = ObservablePromise::new(async { Ok(1) });

        let _run = autorun({
            let result = promise.result();
            let publishes = publishes.clone();
            move |reader| {
                if result.read(reader).is_some() {
                    publishes.set(publishes.get() + 1);
                }
            }
        });

        let first = promise.future();
        let second = promise.future();
        assert_eq!(block_on(first), Ok(1));
        assert_eq!(block_on(second), Ok(1));

        assert_eq!(publishes.get(), 1);
    }

    #[test]
    fn lazy_computes_once_on_demand() {
        let computes = Rc::new(Cell::new(0));
        let lazy = {
            let computes = computes.clone();
            ObservableLazy::new(move || {
                computes.set(computes.get() + 1);
                String::from("built")
            })
        };

        assert!(lazy.cached_value().get().is_none());
        assert_eq!(computes.get(), 0);

        assert_eq!(lazy.get_value(), "built");
        assert_eq!(lazy.get_value(), "built");
        assert_eq!(computes.get(), 1);
        assert_eq!(lazy.cached_value().get(), Some(String::from("built")));
    }

    #[test]
    fn lazy_promise_does_not_start_until_forced() {
        let starts = Rc::new(Cell::new(0));
        let lazy: ObservableLazyPromise<i32, String> = {
            let starts = starts.clone();
            ObservableLazyPromise::new(move || {
                starts.set(starts.get() + 1);
                async { Ok(9) }
            })
        };

        // Reading the projection does not start the operation.
        assert!(lazy.cached_promise_result().get().is_none());
        assert!(!lazy.is_started());
        assert_eq!(starts.get(), 0);

        let outcome = block_on(lazy.start());
        assert_eq!(outcome, Ok(9));
        assert_eq!(starts.get(), 1);

        // Further starts reuse the same operation.
        let outcome = block_on(lazy.start());
        assert_eq!(outcome, Ok(9));
        assert_eq!(starts.get(), 1);

        let settled = lazy.cached_promise_result().get().expect("settled");
        assert_eq!(settled.data(), Some(&9));
    }
}
