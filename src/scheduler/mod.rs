//! Scheduler modules
//!
//! Background loops that drive payment tasks no client is driving any more:
//! the watch scheduler resolves submitted and failed open calls, the close
//! scheduler force-closes phases left unresolved past the forced-close age.

pub mod close;
pub mod watch;

// Re-export for convenience
pub use close::CloseScheduler;
pub use watch::WatchScheduler;

/// Outcome counts of one scheduler pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Tasks examined
    pub scanned: usize,
    /// Tasks whose status changed
    pub advanced: usize,
    /// Tasks whose handling failed and were left for the next pass
    pub failed: usize,
}
