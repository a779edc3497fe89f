// ============================================================================
// weft - Glitch-Free Observable Dataflow
// ============================================================================
//
// A graph of mutable value nodes and derived computations that propagates
// changes consistently: multi-step updates batch into transactions, derived
// values recompute lazily and only when read or kept alive, and the
// two-phase (begin/end) update protocol guarantees downstream consumers
// never observe a half-updated graph.
//
// Single-threaded by design: graph logic never blocks and never runs in
// parallel. Suspension happens only at the boundaries - host-driven futures
// (the promise bridge) and host-supplied timers (debounce, throttle).
// ============================================================================

pub mod combinators;
pub mod core;
pub mod primitives;
pub mod reactivity;
pub mod shared;

// Re-export the working vocabulary at the crate root.
pub use crate::core::observable::{Observable, ObservableExt, ObservableRef};
pub use crate::core::observers::{AddOutcome, ObserverList, RemoveOutcome};
pub use crate::core::types::{DynObservable, NodeId, Observer};

pub use crate::reactivity::equality;
pub use crate::reactivity::equality::EqualsFn;
pub use crate::reactivity::reader::{Reader, TrackingScope};
pub use crate::reactivity::transaction::{
    subtransaction, transaction, transaction_named, Transaction,
};

pub use crate::primitives::autorun::{autorun, autorun_opts, Autorun};
pub use crate::primitives::derived::{
    derived, derived_opts, derived_with_equals, signal_from_observable, Derived, DerivedOpts,
};
pub use crate::primitives::promise::{
    ObservableLazy, ObservableLazyPromise, ObservablePromise, PromiseResult, SharedOutcome,
};
pub use crate::primitives::value::{
    const_observable, observable_signal, observable_value, ConstObservable, ObservableSignal,
    ObservableValue,
};

pub use crate::combinators::array_map::{map_observable_array, map_observable_array_cached};
pub use crate::combinators::debounce::{
    debounced_observable, throttled_observable, was_event_triggered_recently,
};
pub use crate::combinators::from_event::{
    observable_from_event, observable_from_event_opts, observable_signal_from_event,
    CallbackSource, Emitter, EventSignal, EventSource, FromEventObservable,
};
pub use crate::combinators::keep_alive::{keep_observed, recompute_initially_and_on_change};
pub use crate::combinators::latest::latest_changed_value;

pub use crate::shared::diagnostics::{
    report_fault, set_diagnostic_sink, set_fault_reporter, DiagnosticSink, GraphFault, TracingSink,
};
pub use crate::shared::lifecycle::{DisposableBag, Subscription};
pub use crate::shared::timing::{TimerHandle, TimerScheduler, VirtualScheduler};

// =============================================================================
// TESTS
// =============================================================================
