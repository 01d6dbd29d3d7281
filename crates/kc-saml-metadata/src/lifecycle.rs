//! Resolver lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use tokio::sync::Notify;

use crate::error::{ResolverError, ResolverResult};

/// Externally observable resolver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, `initialize()` not yet called.
    Uninitialized,
    /// `initialize()` in progress.
    Initializing,
    /// Serving lookups.
    Initialized,
    /// Torn down; lookups fail.
    Destroyed,
}

impl LifecycleState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Initialized,
            _ => Self::Destroyed,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Initializing => 1,
            Self::Initialized => 2,
            Self::Destroyed => 3,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Atomic lifecycle cell shared by all resolver kinds.
///
/// Callers that find initialization already running wait for it to settle.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    settled: Notify,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates an uninitialized lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Uninitialized.as_u8()),
            settled: Notify::new(),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves `Uninitialized` to `Initializing`.
    ///
    /// Returns `Ok(false)` if the resolver is already initialized. While
    /// another caller is initializing, waits for it: a successful
    /// initialization yields `Ok(false)`, a failed one lets this caller try.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error if the resolver was destroyed.
    pub async fn begin_initialize(&self, resolver: &str) -> ResolverResult<bool> {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.state.compare_exchange(
                LifecycleState::Uninitialized.as_u8(),
                LifecycleState::Initializing.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(true),
                Err(current) => match LifecycleState::from_u8(current) {
                    LifecycleState::Destroyed => return Err(ResolverError::destroyed(resolver)),
                    LifecycleState::Initialized => return Ok(false),
                    LifecycleState::Initializing => notified.await,
                    LifecycleState::Uninitialized => {}
                },
            }
        }
    }

    /// Completes initialization.
    pub fn finish_initialize(&self) {
        let _ = self.state.compare_exchange(
            LifecycleState::Initializing.as_u8(),
            LifecycleState::Initialized.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.settled.notify_waiters();
    }

    /// Rolls a failed initialization back to `Uninitialized`.
    pub fn abort_initialize(&self) {
        let _ = self.state.compare_exchange(
            LifecycleState::Initializing.as_u8(),
            LifecycleState::Uninitialized.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.settled.notify_waiters();
    }

    /// Marks the resolver destroyed.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn destroy(&self) -> bool {
        let first = self.state.swap(LifecycleState::Destroyed.as_u8(), Ordering::AcqRel)
            != LifecycleState::Destroyed.as_u8();
        self.settled.notify_waiters();
        first
    }

    /// Checks if the resolver was destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state() == LifecycleState::Destroyed
    }

    /// Checks if the resolver is serving lookups.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state() == LifecycleState::Initialized
    }

    /// Fails unless the resolver is initialized.
    ///
    /// # Errors
    ///
    /// Returns a lifecycle error naming the resolver.
    pub fn ensure_initialized(&self, resolver: &str) -> ResolverResult<()> {
        match self.state() {
            LifecycleState::Initialized => Ok(()),
            LifecycleState::Destroyed => Err(ResolverError::destroyed(resolver)),
            LifecycleState::Uninitialized | LifecycleState::Initializing => {
                Err(ResolverError::not_initialized(resolver))
            }
        }
    }
}
