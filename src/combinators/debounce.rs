// ============================================================================
// weft - Time-Based Combinators
// Debounce, throttle, and recently-triggered tracking
// ============================================================================
//
// All three are built on the event bridge plus a timer scheduler: an
// internal autorun watches the source while the combinator is observed, and
// deferred publishes go through the bridge's own change path. Teardown
// (last observer removed) disposes the autorun, cancels any pending timer,
// and clears cached state synchronously.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::combinators::from_event::{observable_from_event_opts, CallbackSource, EventSource, FromEventObservable};
use crate::core::observable::Observable;
use crate::primitives::autorun::autorun;
use crate::primitives::value::{observable_value, ObservableValue};
use crate::reactivity::equality::equals;
use crate::shared::lifecycle::Subscription;
use crate::shared::timing::{TimerHandle, TimerScheduler};

struct DeferredState<T> {
    last: Option<T>,
    timer: Option<TimerHandle>,
}

impl<T> DeferredState<T> {
    fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            last: None,
            timer: None,
        }))
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

// =============================================================================
// DEBOUNCE
// =============================================================================

/// Trailing-edge debounce: republishes the source value once it has been
/// quiet for `delay`.
///
/// Every upstream change cancels the pending publish and schedules a new
/// one, so only the most recent value survives a burst. While unobserved
/// the value falls through to the source directly.
///
/// # Example
///
/// ```
/// use weft::{autorun, debounced_observable, observable_value, Observable, VirtualScheduler};
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
///
/// let scheduler = VirtualScheduler::new();
/// let source = observable_value(0);
/// let debounced = debounced_observable(
///     source.clone(),
///     Duration::from_millis(100),
///     Rc::new(scheduler.clone()),
/// );
///
/// let seen = Rc::new(Cell::new(0));
/// let _run = autorun({
///     let debounced = debounced.clone();
///     let seen = seen.clone();
///     move |reader| seen.set(debounced.read(reader))
/// });
///
/// source.set(5, None);
/// assert_eq!(seen.get(), 0); // still quiet period
///
/// scheduler.advance(Duration::from_millis(100));
/// assert_eq!(seen.get(), 5);
/// ```
pub fn debounced_observable<T, O>(
    source: O,
    delay: Duration,
    scheduler: Rc<dyn TimerScheduler>,
) -> FromEventObservable<(), T>
where
    T: Clone + PartialEq + 'static,
    O: Observable<T> + Clone + 'static,
{
    let state = DeferredState::<T>::new();

    let subscribe = {
        let state = state.clone();
        let source = source.clone();
        move |publish: Rc<dyn Fn(&())>| {
            let primed = Cell::new(false);
            let run = autorun({
                let state = state.clone();
                let source = source.clone();
                let scheduler = scheduler.clone();
                move |reader| {
                    let value = source.read(reader);
                    if !primed.replace(true) {
                        // The initial run seeds the value without a timer.
                        state.borrow_mut().last = Some(value);
                        return;
                    }
                    let mut deferred = state.borrow_mut();
                    deferred.cancel_timer();
                    let state = state.clone();
                    let publish = publish.clone();
                    deferred.timer = Some(scheduler.schedule(
                        delay,
                        Box::new(move || {
                            state.borrow_mut().last = Some(value);
                            publish(&());
                        }),
                    ));
                }
            });

            let state = state.clone();
            Subscription::new(move || {
                drop(run);
                let mut deferred = state.borrow_mut();
                deferred.cancel_timer();
                deferred.last = None;
            })
        }
    };

    observable_from_event_opts(
        Some("debounced".into()),
        CallbackSource::new(subscribe),
        move |_payload| match &state.borrow().last {
            Some(value) => value.clone(),
            None => source.get(),
        },
        equals,
    )
}

// =============================================================================
// THROTTLE
// =============================================================================

/// Window throttle: at most one deferred publish per `delay` window.
///
/// The first change in a window schedules a publish of its value at the
/// window's end; further changes inside the window are dropped, not queued.
pub fn throttled_observable<T, O>(
    source: O,
    delay: Duration,
    scheduler: Rc<dyn TimerScheduler>,
) -> FromEventObservable<(), T>
where
    T: Clone + PartialEq + 'static,
    O: Observable<T> + Clone + 'static,
{
    let state = DeferredState::<T>::new();

    let subscribe = {
        let state = state.clone();
        let source = source.clone();
        move |publish: Rc<dyn Fn(&())>| {
            let primed = Cell::new(false);
            let run = autorun({
                let state = state.clone();
                let source = source.clone();
                let scheduler = scheduler.clone();
                move |reader| {
                    let value = source.read(reader);
                    if !primed.replace(true) {
                        state.borrow_mut().last = Some(value);
                        return;
                    }
                    let mut deferred = state.borrow_mut();
                    if deferred.timer.is_some() {
                        // Window already open: this change is dropped.
                        return;
                    }
                    let state = state.clone();
                    let publish = publish.clone();
                    deferred.timer = Some(scheduler.schedule(
                        delay,
                        Box::new(move || {
                            let mut deferred = state.borrow_mut();
                            deferred.timer = None;
                            deferred.last = Some(value);
                            drop(deferred);
                            publish(&());
                        }),
                    ));
                }
            });

            let state = state.clone();
            Subscription::new(move || {
                drop(run);
                let mut deferred = state.borrow_mut();
                deferred.cancel_timer();
                deferred.last = None;
            })
        }
    };

    observable_from_event_opts(
        Some("throttled".into()),
        CallbackSource::new(subscribe),
        move |_payload| match &state.borrow().last {
            Some(value) => value.clone(),
            None => source.get(),
        },
        equals,
    )
}

// =============================================================================
// RECENTLY TRIGGERED
// =============================================================================

/// A boolean observable that is `true` for `window` after each raw event.
///
/// Returns the observable and the subscription holding the event listener
/// and any pending reset timer.
pub fn was_event_triggered_recently<A: 'static>(
    source: &impl EventSource<A>,
    window: Duration,
    scheduler: Rc<dyn TimerScheduler>,
) -> (ObservableValue<bool>, Subscription) {
    let flag = observable_value(false);
    let pending: Rc<RefCell<Option<TimerHandle>>> = Rc::new(RefCell::new(None));

    let listener = {
        let flag = flag.clone();
        let pending = pending.clone();
        Rc::new(move |_payload: &A| {
            flag.set(true, None);
            if let Some(timer) = pending.borrow_mut().take() {
                timer.cancel();
            }
            let reset = {
                let flag = flag.clone();
                Box::new(move || flag.set(false, None))
            };
            *pending.borrow_mut() = Some(scheduler.schedule(window, reset));
        })
    };
    let subscription = source.subscribe(listener);

    let teardown = Subscription::new(move || {
        subscription.dispose();
        if let Some(timer) = pending.borrow_mut().take() {
            timer.cancel();
        }
    });

    (flag, teardown)
}

// =============================================================================
// TESTS
// =============================================================================
