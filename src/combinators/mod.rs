// ============================================================================
// weft - Combinators Module
// Stateful operators built on the primitives
// ============================================================================

pub mod array_map;
pub mod debounce;
pub mod from_event;
pub mod keep_alive;
pub mod latest;

pub use array_map::{map_observable_array, map_observable_array_cached};
pub use debounce::{debounced_observable, throttled_observable, was_event_triggered_recently};
pub use from_event::{
    observable_from_event, observable_from_event_opts, observable_signal_from_event,
    CallbackSource, Emitter, EventSignal, EventSource, FromEventObservable,
};
pub use keep_alive::{keep_observed, recompute_initially_and_on_change};
pub use latest::latest_changed_value;
