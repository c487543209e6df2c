//! Global run lifecycle and cross-core barrier coordination.

/// Lifecycle state machine values and transition rules.
pub mod state;
/// Orchestrator-owned controller and worker-side observers.
pub mod controller;

pub use controller::{LifecycleController, LifecycleError, LifecycleObserver, WorkerTicket};
pub use state::{InvalidTransition, LifecycleState};
