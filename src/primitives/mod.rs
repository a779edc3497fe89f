// ============================================================================
// weft - Primitives Module
// Observable values, derived computations, autoruns, and the promise bridge
// ============================================================================

pub mod autorun;
pub mod derived;
pub mod promise;
pub mod value;

pub use autorun::{autorun, autorun_opts, Autorun};
pub use derived::{
    derived, derived_opts, derived_with_equals, signal_from_observable, Derived, DerivedOpts,
};
pub use promise::{
    ObservableLazy, ObservableLazyPromise, ObservablePromise, PromiseResult, SharedOutcome,
};
pub use value::{
    const_observable, observable_signal, observable_value, ConstObservable, ObservableSignal,
    ObservableValue,
};
