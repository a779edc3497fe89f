// ============================================================================
// weft - Core Module
// Graph traits, node identity, and the observer registry
// ============================================================================

pub mod observable;
pub mod observers;
pub mod types;

pub use observable::{Observable, ObservableExt, ObservableRef};
pub use observers::{AddOutcome, ObserverList, RemoveOutcome};
pub use types::{DynObservable, NodeId, Observer};
