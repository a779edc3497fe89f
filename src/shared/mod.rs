// ============================================================================
// weft - Shared Support Module
// Lifecycle disposal, timer scheduling, diagnostics
// ============================================================================

pub mod diagnostics;
pub mod lifecycle;
pub mod timing;

pub use diagnostics::{
    report_fault, set_diagnostic_sink, set_fault_reporter, DiagnosticSink, GraphFault, TracingSink,
};
pub use lifecycle::{DisposableBag, Subscription};
pub use timing::{TimerHandle, TimerScheduler, VirtualScheduler};
