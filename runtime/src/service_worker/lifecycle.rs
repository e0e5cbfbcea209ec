//! Service Worker Lifecycle Management
//!
//! Handles service worker state transitions and lifecycle events.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spin::RwLock;

/// Service Worker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceWorkerState {
    /// Constructed, no generation fetched yet
    #[default]
    Uninstalled,
    /// Fetching the manifest set
    Installing,
    /// Generation stored, waiting to activate
    Installed,
    /// Generation is authoritative; requests are intercepted
    Active,
    /// Superseded by a newer worker
    Redundant,
}

impl fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninstalled => "uninstalled",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Active => "active",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Lifecycle error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ServiceWorkerState,
        to: ServiceWorkerState,
    },

    #[error("cannot claim clients while {0}")]
    NotActive(ServiceWorkerState),
}

/// State change event data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    /// Old state
    pub old_state: ServiceWorkerState,
    /// New state
    pub new_state: ServiceWorkerState,
}

/// Lifecycle event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// State change
    StateChange(StateChangeEvent),
    /// The worker took control of open clients
    ControllerChange,
}

type Listener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Lifecycle manager
///
/// Listeners run synchronously inside the transition, after the state lock
/// is released.
pub struct LifecycleManager {
    /// Current state
    state: RwLock<ServiceWorkerState>,
    /// Whether open clients have been claimed
    controlling: AtomicBool,
    /// Events emitted since the last drain
    pending_events: RwLock<Vec<LifecycleEvent>>,
    /// Event listeners
    listeners: RwLock<Vec<Listener>>,
}

impl LifecycleManager {
    /// Create new lifecycle manager
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ServiceWorkerState::Uninstalled),
            controlling: AtomicBool::new(false),
            pending_events: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Current state
    pub fn state(&self) -> ServiceWorkerState {
        *self.state.read()
    }

    /// Whether clients have been claimed
    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::SeqCst)
    }

    /// Add event listener
    pub fn add_listener(&self, listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Drain events emitted so far
    pub fn take_pending(&self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut *self.pending_events.write())
    }

    fn dispatch(&self, event: LifecycleEvent) {
        // Snapshot so listeners may register listeners of their own
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener(&event);
        }
        self.pending_events.write().push(event);
    }

    /// Transition worker state.
    ///
    /// The check and the write happen under one lock, so two concurrent
    /// callers cannot both leave the same state.
    pub fn transition(&self, new_state: ServiceWorkerState) -> Result<(), LifecycleError> {
        let old_state = {
            let mut state = self.state.write();
            let old_state = *state;
            if !is_valid_transition(old_state, new_state) {
                return Err(LifecycleError::InvalidStateTransition {
                    from: old_state,
                    to: new_state,
                });
            }
            *state = new_state;
            old_state
        };

        log::debug!("[SW] State {} -> {}", old_state, new_state);
        self.dispatch(LifecycleEvent::StateChange(StateChangeEvent {
            old_state,
            new_state,
        }));

        Ok(())
    }

    /// Claim clients (take control of all open pages without a reload)
    pub fn claim(&self) -> Result<(), LifecycleError> {
        let state = self.state();
        if state != ServiceWorkerState::Active {
            return Err(LifecycleError::NotActive(state));
        }

        if !self.controlling.swap(true, Ordering::SeqCst) {
            log::info!("[SW] Clients claimed");
            self.dispatch(LifecycleEvent::ControllerChange);
        }

        Ok(())
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a state transition is valid
fn is_valid_transition(from: ServiceWorkerState, to: ServiceWorkerState) -> bool {
    use ServiceWorkerState::*;

    matches!(
        (from, to),
        (Uninstalled, Installing)
            | (Installing, Installed)
            | (Installing, Uninstalled) // Install failed
            | (Installed, Active)
            | (Active, Redundant) // Replaced by new worker
    )
}
